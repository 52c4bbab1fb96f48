//! The backends every build ships with.
//!
//! | subsystem | backend | prio | requires        | grade | perf     |
//! |-----------|---------|------|-----------------|-------|----------|
//! | platform  | win32   | 100  | WIN32           | D0    | perf     |
//! | platform  | posix   | 90   | POSIX           | D0    | perf     |
//! | platform  | null    | 0    | -               | D0    | baseline |
//! | graphics  | vk1     | 80   | VK1             | D2    | perf     |
//! | graphics  | dx9     | 70   | WIN32 + DX9     | D2    | compat   |
//! | graphics  | gl2     | 60   | GL2             | D2    | compat   |
//! | graphics  | soft    | 10   | -               | D0    | baseline |
//! | graphics  | null    | 0    | -               | D0    | baseline |
//! | ui        | native  | 50   | WIN32 or POSIX* | D1    | compat   |
//! | ui        | null    | 0    | -               | D0    | baseline |
//!
//! `*` expressed as a probe, since hardware flags only express "all of".
//! Only the platform subsystem is lockstep-relevant.

use std::any::Any;

use tracing::debug;

use crate::caps::descriptor::{
    backend_flags, subsystem, subsystem_flags, BackendDescriptor, DeterminismGrade, PerfClass,
};
use crate::caps::hw::{gpu, os, HwCaps};
use crate::caps::registry::CapsRegistry;
use crate::caps::CapsError;

/// API object exposed by the software rasterizer through `get_api`.
#[derive(Debug, PartialEq, Eq)]
pub struct SoftGraphicsApi {
    pub abi_version: u32,
    pub max_surface_dim: u32,
    pub bytes_per_pixel: u32,
}

static SOFT_GRAPHICS_API_V1: SoftGraphicsApi = SoftGraphicsApi {
    abi_version: 1,
    max_surface_dim: 4096,
    bytes_per_pixel: 4,
};

fn soft_graphics_api(abi_version: u32) -> Option<&'static (dyn Any + Sync)> {
    match abi_version {
        1 => Some(&SOFT_GRAPHICS_API_V1),
        _ => None,
    }
}

fn has_native_windowing(hw: &HwCaps) -> bool {
    hw.os_flags & (os::WIN32 | os::POSIX) != 0
}

fn platform(name: &str) -> BackendDescriptor {
    BackendDescriptor::new(subsystem::PLATFORM, name)
        .with_subsystem_name("platform")
        .with_subsystem_flags(subsystem_flags::LOCKSTEP_RELEVANT)
}

fn graphics(name: &str) -> BackendDescriptor {
    BackendDescriptor::new(subsystem::GRAPHICS, name).with_subsystem_name("graphics")
}

fn ui(name: &str) -> BackendDescriptor {
    BackendDescriptor::new(subsystem::UI, name).with_subsystem_name("ui")
}

/// Descriptors for the builtin backend set, in no particular order.
pub fn builtin_backends() -> Vec<BackendDescriptor> {
    vec![
        platform("win32")
            .with_priority(100)
            .with_required_hardware(os::WIN32)
            .with_perf_class(PerfClass::Perf),
        platform("posix")
            .with_priority(90)
            .with_required_hardware(os::POSIX)
            .with_perf_class(PerfClass::Perf),
        platform("null").with_backend_flags(backend_flags::HEADLESS),
        graphics("vk1")
            .with_priority(80)
            .with_required_hardware(gpu::VK1)
            .with_backend_flags(backend_flags::PRESENTATION)
            .with_grade(DeterminismGrade::D2)
            .with_perf_class(PerfClass::Perf),
        graphics("dx9")
            .with_priority(70)
            .with_required_hardware(os::WIN32 | gpu::DX9)
            .with_backend_flags(backend_flags::PRESENTATION)
            .with_grade(DeterminismGrade::D2)
            .with_perf_class(PerfClass::Compat),
        graphics("gl2")
            .with_priority(60)
            .with_required_hardware(gpu::GL2)
            .with_backend_flags(backend_flags::PRESENTATION)
            .with_grade(DeterminismGrade::D2)
            .with_perf_class(PerfClass::Compat),
        graphics("soft")
            .with_priority(10)
            .with_backend_flags(backend_flags::PRESENTATION | backend_flags::SOFTWARE)
            .with_get_api(soft_graphics_api),
        graphics("null").with_backend_flags(backend_flags::HEADLESS),
        ui("native")
            .with_priority(50)
            .with_probe(has_native_windowing)
            .with_backend_flags(backend_flags::PRESENTATION)
            .with_grade(DeterminismGrade::D1)
            .with_perf_class(PerfClass::Compat),
        ui("null").with_backend_flags(backend_flags::HEADLESS),
    ]
}

/// Register the builtin backend set.
pub fn register_builtin_backends(registry: &mut CapsRegistry) -> Result<(), CapsError> {
    let backends = builtin_backends();
    let count = backends.len();
    for desc in backends {
        registry.register(desc)?;
    }
    debug!(count, "builtin backends registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::hw::cpu;
    use crate::caps::select::SelectionProfile;
    use crate::caps::FailReason;

    fn builtin_registry() -> CapsRegistry {
        let mut reg = CapsRegistry::new();
        register_builtin_backends(&mut reg).unwrap();
        reg.finalize().unwrap();
        reg
    }

    #[test]
    fn test_builtins_register_once() {
        let mut reg = CapsRegistry::new();
        register_builtin_backends(&mut reg).unwrap();
        assert_eq!(reg.backend_count(), builtin_backends().len());

        let err = register_builtin_backends(&mut reg).unwrap_err();
        assert_eq!(err.code(), -4);
    }

    #[test]
    fn test_headless_host_selects_fallbacks() {
        let reg = builtin_registry();
        let sel = reg.select(&SelectionProfile::lockstep(), &HwCaps::default());
        assert!(sel.is_ok());

        let names: Vec<&str> = sel.entries.iter().map(|e| e.backend_name.as_str()).collect();
        assert_eq!(names, vec!["null", "soft", "null"]);
    }

    #[test]
    fn test_posix_desktop_selection() {
        let reg = builtin_registry();
        let hw = HwCaps::new(os::POSIX | os::LINUX, cpu::X86_64, gpu::GL2 | gpu::VK1);
        let sel = reg.select(&SelectionProfile::default(), &hw);

        assert_eq!(sel.entry(subsystem::PLATFORM).unwrap().backend_name, "posix");
        assert_eq!(sel.entry(subsystem::GRAPHICS).unwrap().backend_name, "vk1");
        assert_eq!(sel.entry(subsystem::UI).unwrap().backend_name, "native");
    }

    #[test]
    fn test_dx9_requires_win32() {
        let reg = builtin_registry();
        let hw = HwCaps::new(os::POSIX, 0, gpu::DX9);
        let sel = reg.select(&SelectionProfile::default(), &hw);
        assert_eq!(sel.entry(subsystem::GRAPHICS).unwrap().backend_name, "soft");
    }

    #[test]
    fn test_soft_graphics_api_lookup() {
        let reg = builtin_registry();
        let sel = reg.select(&SelectionProfile::default(), &HwCaps::default());
        let gfx = sel.entry(subsystem::GRAPHICS).unwrap();

        let api = reg
            .backend_api(gfx, 1)
            .and_then(|api| <dyn std::any::Any>::downcast_ref::<SoftGraphicsApi>(api))
            .unwrap();
        assert_eq!(api.max_surface_dim, 4096);
        assert!(reg.backend_api(gfx, 2).is_none());
    }

    #[test]
    fn test_builtin_override_to_headless_graphics() {
        let reg = builtin_registry();
        let hw = HwCaps::new(os::POSIX, 0, gpu::GL2);
        let profile = SelectionProfile::default().with_override(subsystem::GRAPHICS, "null");
        let sel = reg.select(&profile, &hw);
        assert_eq!(sel.fail_reason(), FailReason::None);
        assert!(sel.entry(subsystem::GRAPHICS).unwrap().forced_by_override);
    }
}
