//! Selection must not depend on the order backends were registered in.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use capdispatch::caps::builtin::builtin_backends;
use capdispatch::caps::descriptor::{subsystem, BackendDescriptor, DeterminismGrade};
use capdispatch::caps::hw::{cpu, gpu, os};
use capdispatch::caps::tlv::encode_capabilities;
use capdispatch::caps::{audit_log, CapsRegistry, HwCaps, SelectionProfile};

fn hosts() -> Vec<HwCaps> {
    vec![
        HwCaps::default(),
        HwCaps::new(os::POSIX | os::LINUX, cpu::X86_64 | cpu::SSE2, 0),
        HwCaps::new(os::POSIX | os::LINUX, cpu::ARM64 | cpu::NEON, gpu::GL2 | gpu::VK1),
        HwCaps::new(os::WIN32, cpu::X86_64 | cpu::SSE2 | cpu::AVX2, gpu::DX9 | gpu::DX11),
        HwCaps::new(os::POSIX | os::APPLE, cpu::ARM64 | cpu::NEON, gpu::METAL),
    ]
}

fn profiles() -> Vec<SelectionProfile> {
    vec![
        SelectionProfile::default(),
        SelectionProfile::lockstep(),
        SelectionProfile::default().with_override(subsystem::GRAPHICS, "SOFT"),
        SelectionProfile::default().with_override(subsystem::UI, "missing"),
        SelectionProfile::lockstep().with_override(subsystem::PLATFORM, "null"),
    ]
}

/// Extra descriptors that tie on priority with different names, so the
/// name tie-break is exercised too.
fn tied_backends() -> Vec<BackendDescriptor> {
    vec![
        BackendDescriptor::new(subsystem::GRAPHICS, "zeta").with_priority(10),
        BackendDescriptor::new(subsystem::GRAPHICS, "alpha")
            .with_priority(10)
            .with_grade(DeterminismGrade::D1),
        BackendDescriptor::new(7, "beta").with_priority(-1),
        BackendDescriptor::new(7, "Alpha").with_priority(-1),
    ]
}

fn registry_from(descs: Vec<BackendDescriptor>) -> CapsRegistry {
    let mut reg = CapsRegistry::new();
    for desc in descs {
        reg.register(desc).unwrap();
    }
    reg.finalize().unwrap();
    reg
}

fn all_backends() -> Vec<BackendDescriptor> {
    let mut descs = builtin_backends();
    descs.extend(tied_backends());
    descs
}

#[test]
fn test_shuffled_registration_selects_identically() {
    let reference = registry_from(all_backends());
    let mut rng = StdRng::seed_from_u64(0x5eed_ca95);

    for round in 0..32 {
        let mut descs = all_backends();
        descs.shuffle(&mut rng);
        let shuffled = registry_from(descs);

        let names = |r: &CapsRegistry| -> Vec<(u32, String)> {
            r.backends()
                .iter()
                .map(|d| (d.subsystem_id, d.backend_name.clone()))
                .collect()
        };
        assert_eq!(names(&shuffled), names(&reference), "round {round}: table order");

        for hw in hosts() {
            for profile in profiles() {
                let a = reference.select(&profile, &hw);
                let b = shuffled.select(&profile, &hw);
                assert_eq!(a, b, "round {round}: {hw:?} {profile:?}");
                assert_eq!(audit_log(&a, &hw), audit_log(&b, &hw));
                assert_eq!(encode_capabilities(&a, &hw), encode_capabilities(&b, &hw));
            }
        }
    }
}

#[test]
fn test_priority_ties_break_by_name() {
    let reg = registry_from(all_backends());
    let sub7: Vec<&str> = reg
        .backends()
        .iter()
        .filter(|d| d.subsystem_id == 7)
        .map(|d| d.backend_name.as_str())
        .collect();
    assert_eq!(sub7, ["Alpha", "beta"]);

    // soft (10), alpha (10) and zeta (10) tie; alpha sorts first.
    let sel = reg.select(&SelectionProfile::default(), &HwCaps::default());
    assert!(sel.is_ok());
    assert_eq!(sel.entry(subsystem::GRAPHICS).unwrap().backend_name, "alpha");
    assert_eq!(sel.entry(7).unwrap().backend_name, "Alpha");
}
