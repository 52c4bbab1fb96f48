//! Deterministic ASCII report of a selection.
//!
//! ```text
//! capdispatch caps audit v1
//! result=0
//! hw os=0x00000006 cpu=0x00003200 gpu=0x00000000
//! - subsystem_id=1 backend=posix det=D0 perf=perf prio=90
//! - subsystem_id=2 backend=soft det=D0 perf=baseline prio=10
//! sys=posix
//! gfx=soft
//! ```
//!
//! On failure the result line becomes
//! `result=-7 fail_reason=3 fail_subsystem_id=1` and no entry lines follow.

use std::fmt::Write as _;

use crate::caps::descriptor::subsystem;
use crate::caps::hw::HwCaps;
use crate::caps::select::Selection;

pub const AUDIT_HEADER: &str = "capdispatch caps audit v1";

/// Render the audit report.
pub fn audit_log(sel: &Selection, hw: &HwCaps) -> String {
    let mut out = String::with_capacity(256);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{AUDIT_HEADER}");
    match &sel.error {
        None => {
            let _ = writeln!(out, "result={}", sel.result_code());
        }
        Some(err) => {
            let _ = writeln!(
                out,
                "result={} fail_reason={} fail_subsystem_id={}",
                err.code(),
                err.fail_reason().code(),
                err.fail_subsystem_id()
            );
        }
    }
    let _ = writeln!(
        out,
        "hw os=0x{:08x} cpu=0x{:08x} gpu=0x{:08x}",
        hw.os_flags, hw.cpu_flags, hw.gpu_flags
    );
    for entry in &sel.entries {
        let _ = writeln!(
            out,
            "- subsystem_id={} backend={} det={} perf={} prio={}",
            entry.subsystem_id,
            entry.backend_name,
            entry.determinism_grade,
            entry.perf_class,
            entry.priority
        );
    }
    let _ = writeln!(out, "sys={}", summary_name(sel, subsystem::PLATFORM));
    let _ = writeln!(out, "gfx={}", summary_name(sel, subsystem::GRAPHICS));
    out
}

/// Copy the report into `buf`, truncating if it does not fit, and return
/// the full report length so callers can retry with a larger buffer.
pub fn get_audit_log(sel: &Selection, hw: &HwCaps, buf: &mut [u8]) -> usize {
    let report = audit_log(sel, hw);
    let n = report.len().min(buf.len());
    buf[..n].copy_from_slice(&report.as_bytes()[..n]);
    report.len()
}

fn summary_name(sel: &Selection, subsystem_id: u32) -> &str {
    sel.entry(subsystem_id)
        .map_or("none", |e| e.backend_name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::builtin::register_builtin_backends;
    use crate::caps::hw::{cpu, os};
    use crate::caps::registry::CapsRegistry;
    use crate::caps::select::SelectionProfile;

    fn builtin_selection(hw: &HwCaps) -> Selection {
        let mut reg = CapsRegistry::new();
        register_builtin_backends(&mut reg).unwrap();
        reg.finalize().unwrap();
        reg.select(&SelectionProfile::default(), hw)
    }

    #[test]
    fn test_audit_success_layout() {
        let hw = HwCaps::new(os::POSIX, cpu::X86_64, 0);
        let log = audit_log(&builtin_selection(&hw), &hw);
        let lines: Vec<&str> = log.lines().collect();

        assert_eq!(lines[0], AUDIT_HEADER);
        assert_eq!(lines[1], "result=0");
        assert_eq!(lines[2], "hw os=0x00000002 cpu=0x00000200 gpu=0x00000000");
        assert_eq!(lines[3], "- subsystem_id=1 backend=posix det=D0 perf=perf prio=90");
        assert_eq!(lines[4], "- subsystem_id=2 backend=soft det=D0 perf=baseline prio=10");
        assert_eq!(lines[5], "- subsystem_id=3 backend=native det=D1 perf=compat prio=50");
        assert_eq!(lines[6], "sys=posix");
        assert_eq!(lines[7], "gfx=soft");
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_audit_failure_layout() {
        let reg = CapsRegistry::new();
        let hw = HwCaps::default();
        let sel = reg.select(&SelectionProfile::default(), &hw);
        let log = audit_log(&sel, &hw);

        assert!(log.contains("result=-6 fail_reason=1 fail_subsystem_id=0\n"));
        assert!(!log.contains("- subsystem_id="));
        assert!(log.ends_with("sys=none\ngfx=none\n"));
    }

    #[test]
    fn test_audit_is_deterministic() {
        let hw = HwCaps::new(os::POSIX, 0, 0);
        assert_eq!(
            audit_log(&builtin_selection(&hw), &hw),
            audit_log(&builtin_selection(&hw), &hw)
        );
    }

    #[test]
    fn test_get_audit_log_truncates_and_reports_length() {
        let hw = HwCaps::default();
        let sel = builtin_selection(&hw);
        let full = audit_log(&sel, &hw);

        let mut small = [0u8; 10];
        assert_eq!(get_audit_log(&sel, &hw, &mut small), full.len());
        assert_eq!(&small, &full.as_bytes()[..10]);

        let mut big = vec![0u8; full.len() + 8];
        let len = get_audit_log(&sel, &hw, &mut big);
        assert_eq!(&big[..len], full.as_bytes());
    }
}
