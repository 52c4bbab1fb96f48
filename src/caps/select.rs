//! Deterministic backend selection over a finalized registry.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::caps::descriptor::{BackendDescriptor, DeterminismGrade, PerfClass};
use crate::caps::hw::HwCaps;
use crate::caps::registry::CapsRegistry;
use crate::caps::{CapsError, FailReason, RESULT_OK};

/// Force a named backend for one subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOverride {
    pub subsystem_id: u32,
    pub backend_name: String,
}

/// Product policy applied during selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionProfile {
    /// Lockstep-relevant subsystems must select a D0 backend.
    pub lockstep_strict: bool,
    pub overrides: Vec<BackendOverride>,
}

impl SelectionProfile {
    pub fn lockstep() -> Self {
        Self {
            lockstep_strict: true,
            overrides: Vec::new(),
        }
    }

    /// Builder-style override. A later override for the same subsystem
    /// replaces the earlier one.
    pub fn with_override(mut self, subsystem_id: u32, backend_name: impl Into<String>) -> Self {
        self.overrides.retain(|o| o.subsystem_id != subsystem_id);
        self.overrides.push(BackendOverride {
            subsystem_id,
            backend_name: backend_name.into(),
        });
        self
    }

    pub fn override_for(&self, subsystem_id: u32) -> Option<&str> {
        self.overrides
            .iter()
            .find(|o| o.subsystem_id == subsystem_id)
            .map(|o| o.backend_name.as_str())
    }
}

/// The backend chosen for one subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionEntry {
    pub subsystem_id: u32,
    pub subsystem_name: Option<String>,
    pub backend_name: String,
    /// Position of the backend in the finalized table.
    pub backend_index: usize,
    pub determinism_grade: DeterminismGrade,
    pub perf_class: PerfClass,
    pub priority: i32,
    pub backend_flags: u32,
    pub forced_by_override: bool,
}

impl SelectionEntry {
    fn from_descriptor(index: usize, desc: &BackendDescriptor, forced: bool) -> Self {
        Self {
            subsystem_id: desc.subsystem_id,
            subsystem_name: desc.subsystem_name.clone(),
            backend_name: desc.backend_name.clone(),
            backend_index: index,
            determinism_grade: desc.determinism_grade,
            perf_class: desc.perf_class,
            priority: desc.priority,
            backend_flags: desc.backend_flags,
            forced_by_override: forced,
        }
    }
}

/// Outcome of one [`CapsRegistry::select`] call.
///
/// A failed selection is still a value: it carries the error (and through it
/// the fail reason and offending subsystem) so it can be audited and exported
/// like a successful one. Failed selections hold no entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub error: Option<CapsError>,
    pub entries: Vec<SelectionEntry>,
}

impl Selection {
    fn failed(error: CapsError) -> Self {
        Self {
            error: Some(error),
            entries: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// `?`-friendly view of the outcome.
    pub fn check(&self) -> Result<&Self, CapsError> {
        match &self.error {
            None => Ok(self),
            Some(err) => Err(err.clone()),
        }
    }

    pub fn result_code(&self) -> i32 {
        self.error.as_ref().map_or(RESULT_OK, CapsError::code)
    }

    pub fn fail_reason(&self) -> FailReason {
        self.error
            .as_ref()
            .map_or(FailReason::None, CapsError::fail_reason)
    }

    pub fn fail_subsystem_id(&self) -> u32 {
        self.error.as_ref().map_or(0, CapsError::fail_subsystem_id)
    }

    pub fn entry(&self, subsystem_id: u32) -> Option<&SelectionEntry> {
        self.entries.iter().find(|e| e.subsystem_id == subsystem_id)
    }
}

enum Eligibility {
    Eligible,
    /// Hardware-capable, rejected only by the lockstep D0 requirement.
    WrongGrade,
    Incapable,
}

fn eligibility(desc: &BackendDescriptor, hw: &HwCaps, require_d0: bool) -> Eligibility {
    if !desc.is_hardware_capable(hw) {
        return Eligibility::Incapable;
    }
    if require_d0 && desc.determinism_grade != DeterminismGrade::D0 {
        return Eligibility::WrongGrade;
    }
    Eligibility::Eligible
}

impl CapsRegistry {
    /// Choose one backend per subsystem.
    ///
    /// Within a subsystem the table is already ordered by descending
    /// priority, so the first eligible candidate wins. The first subsystem
    /// without an eligible candidate aborts the whole selection.
    pub fn select(&self, profile: &SelectionProfile, hw: &HwCaps) -> Selection {
        if !self.is_finalized() {
            warn!("select called before finalize");
            return Selection::failed(CapsError::NotFinalized);
        }

        let mut entries = Vec::new();
        for (offset, group) in self.subsystem_groups() {
            match select_in_group(group, profile, hw) {
                Ok((index, forced)) => {
                    let entry = SelectionEntry::from_descriptor(offset + index, &group[index], forced);
                    debug!(
                        subsystem_id = entry.subsystem_id,
                        backend = %entry.backend_name,
                        grade = %entry.determinism_grade,
                        forced,
                        "backend selected"
                    );
                    entries.push(entry);
                }
                Err(reason) => {
                    let subsystem_id = group[0].subsystem_id;
                    warn!(subsystem_id, %reason, "backend selection failed");
                    return Selection::failed(CapsError::NoEligible {
                        subsystem_id,
                        reason,
                    });
                }
            }
        }

        info!(
            subsystems = entries.len(),
            lockstep = profile.lockstep_strict,
            "backend selection complete"
        );
        Selection {
            error: None,
            entries,
        }
    }
}

/// Pick within one subsystem group; returns the group-relative index and
/// whether an override forced it.
fn select_in_group(
    group: &[BackendDescriptor],
    profile: &SelectionProfile,
    hw: &HwCaps,
) -> Result<(usize, bool), FailReason> {
    let subsystem_id = group[0].subsystem_id;
    let require_d0 =
        profile.lockstep_strict && group.iter().any(BackendDescriptor::is_lockstep_relevant);

    if let Some(name) = profile.override_for(subsystem_id) {
        let index = group
            .iter()
            .position(|d| d.name_eq(name))
            .ok_or(FailReason::OverrideNotFound)?;
        return match eligibility(&group[index], hw, require_d0) {
            Eligibility::Eligible => Ok((index, true)),
            Eligibility::WrongGrade => Err(FailReason::LockstepRequiresD0),
            Eligibility::Incapable => Err(FailReason::NoEligibleBackend),
        };
    }

    let mut hardware_capable = 0usize;
    for (index, desc) in group.iter().enumerate() {
        match eligibility(desc, hw, require_d0) {
            Eligibility::Eligible => return Ok((index, false)),
            Eligibility::WrongGrade => hardware_capable += 1,
            Eligibility::Incapable => {}
        }
    }

    if require_d0 && hardware_capable > 0 {
        Err(FailReason::LockstepRequiresD0)
    } else {
        Err(FailReason::NoEligibleBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::descriptor::{subsystem, subsystem_flags};
    use crate::caps::hw::{gpu, os};

    fn posix_gl() -> HwCaps {
        HwCaps::new(os::POSIX, 0, gpu::GL2)
    }

    fn graphics_registry() -> CapsRegistry {
        let mut reg = CapsRegistry::new();
        reg.register(
            BackendDescriptor::new(subsystem::GRAPHICS, "vk1")
                .with_priority(80)
                .with_required_hardware(gpu::VK1)
                .with_grade(DeterminismGrade::D2),
        )
        .unwrap();
        reg.register(
            BackendDescriptor::new(subsystem::GRAPHICS, "gl2")
                .with_priority(60)
                .with_required_hardware(gpu::GL2)
                .with_grade(DeterminismGrade::D2),
        )
        .unwrap();
        reg.register(BackendDescriptor::new(subsystem::GRAPHICS, "soft").with_priority(10))
            .unwrap();
        reg.finalize().unwrap();
        reg
    }

    #[test]
    fn test_select_before_finalize() {
        let reg = CapsRegistry::new();
        let sel = reg.select(&SelectionProfile::default(), &posix_gl());
        assert_eq!(sel.error, Some(CapsError::NotFinalized));
        assert_eq!(sel.result_code(), -6);
        assert_eq!(sel.fail_reason(), FailReason::NotFinalized);
    }

    #[test]
    fn test_first_hardware_capable_by_priority() {
        let reg = graphics_registry();
        let sel = reg.select(&SelectionProfile::default(), &posix_gl());
        assert!(sel.is_ok());
        let entry = sel.entry(subsystem::GRAPHICS).unwrap();
        assert_eq!(entry.backend_name, "gl2");
        assert_eq!(entry.priority, 60);
        assert!(!entry.forced_by_override);
        assert_eq!(reg.backend_get(entry.backend_index).unwrap().backend_name, "gl2");
    }

    #[test]
    fn test_lockstep_ignored_for_irrelevant_subsystem() {
        let reg = graphics_registry();
        let sel = reg.select(&SelectionProfile::lockstep(), &posix_gl());
        assert_eq!(sel.entry(subsystem::GRAPHICS).unwrap().backend_name, "gl2");
    }

    #[test]
    fn test_lockstep_skips_non_d0_on_relevant_subsystem() {
        let mut reg = CapsRegistry::new();
        reg.register(
            BackendDescriptor::new(subsystem::PLATFORM, "fast")
                .with_priority(100)
                .with_subsystem_flags(subsystem_flags::LOCKSTEP_RELEVANT)
                .with_grade(DeterminismGrade::D1),
        )
        .unwrap();
        reg.register(
            BackendDescriptor::new(subsystem::PLATFORM, "exact")
                .with_priority(1)
                .with_subsystem_flags(subsystem_flags::LOCKSTEP_RELEVANT),
        )
        .unwrap();
        reg.finalize().unwrap();

        let relaxed = reg.select(&SelectionProfile::default(), &posix_gl());
        assert_eq!(relaxed.entries[0].backend_name, "fast");

        let strict = reg.select(&SelectionProfile::lockstep(), &posix_gl());
        assert_eq!(strict.entries[0].backend_name, "exact");
    }

    /// Lockstep-relevant platform backends, one per grade, all requiring
    /// `required` hardware.
    fn lockstep_platform(grades: &[(&str, DeterminismGrade)], required: u32) -> CapsRegistry {
        let mut reg = CapsRegistry::new();
        for &(name, grade) in grades {
            reg.register(
                BackendDescriptor::new(subsystem::PLATFORM, name)
                    .with_subsystem_flags(subsystem_flags::LOCKSTEP_RELEVANT)
                    .with_required_hardware(required)
                    .with_grade(grade),
            )
            .unwrap();
        }
        reg.finalize().unwrap();
        reg
    }

    #[test]
    fn test_lockstep_fails_without_d0_candidate() {
        let grades = [("d1", DeterminismGrade::D1), ("d2", DeterminismGrade::D2)];

        // Capable backends exist but none is D0.
        let reg = lockstep_platform(&grades, 0);
        let sel = reg.select(&SelectionProfile::lockstep(), &HwCaps::default());
        assert_eq!(
            sel.error,
            Some(CapsError::NoEligible {
                subsystem_id: subsystem::PLATFORM,
                reason: FailReason::LockstepRequiresD0,
            })
        );
        assert_eq!(sel.result_code(), -7);
        assert_eq!(sel.fail_reason(), FailReason::LockstepRequiresD0);
        assert_eq!(sel.fail_subsystem_id(), subsystem::PLATFORM);
        assert!(sel.entries.is_empty());

        let relaxed = reg.select(&SelectionProfile::default(), &HwCaps::default());
        assert!(relaxed.is_ok());

        // Nothing runs on this host at all, so the grade is not the reason.
        let reg = lockstep_platform(&grades, os::WIN32);
        let sel = reg.select(&SelectionProfile::lockstep(), &HwCaps::default());
        assert_eq!(sel.result_code(), -7);
        assert_eq!(sel.fail_reason(), FailReason::NoEligibleBackend);
        assert_eq!(sel.fail_subsystem_id(), subsystem::PLATFORM);
    }

    #[test]
    fn test_no_hardware_capable_candidate() {
        let mut reg = CapsRegistry::new();
        reg.register(
            BackendDescriptor::new(subsystem::GRAPHICS, "dx9").with_required_hardware(gpu::DX9),
        )
        .unwrap();
        reg.finalize().unwrap();

        let sel = reg.select(&SelectionProfile::lockstep(), &posix_gl());
        assert_eq!(sel.result_code(), -7);
        assert_eq!(sel.fail_reason(), FailReason::NoEligibleBackend);
        assert_eq!(sel.fail_subsystem_id(), subsystem::GRAPHICS);
        assert!(sel.entries.is_empty());
        assert!(sel.check().is_err());
    }

    #[test]
    fn test_override_forces_lower_priority_backend() {
        let reg = graphics_registry();
        let profile = SelectionProfile::default().with_override(subsystem::GRAPHICS, "SOFT");
        let sel = reg.select(&profile, &posix_gl());
        let entry = sel.entry(subsystem::GRAPHICS).unwrap();
        assert_eq!(entry.backend_name, "soft");
        assert!(entry.forced_by_override);
    }

    #[test]
    fn test_override_unknown_or_incapable() {
        let reg = graphics_registry();

        let unknown = SelectionProfile::default().with_override(subsystem::GRAPHICS, "metal");
        let sel = reg.select(&unknown, &posix_gl());
        assert_eq!(sel.fail_reason(), FailReason::OverrideNotFound);

        let incapable = SelectionProfile::default().with_override(subsystem::GRAPHICS, "vk1");
        let sel = reg.select(&incapable, &posix_gl());
        assert_eq!(sel.fail_reason(), FailReason::NoEligibleBackend);
    }

    #[test]
    fn test_with_override_replaces_previous() {
        let profile = SelectionProfile::default()
            .with_override(subsystem::UI, "a")
            .with_override(subsystem::UI, "b");
        assert_eq!(profile.overrides.len(), 1);
        assert_eq!(profile.override_for(subsystem::UI), Some("b"));
    }
}
