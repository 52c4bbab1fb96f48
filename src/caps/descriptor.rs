//! Backend descriptors: what a backend is, what it needs, how reproducible it is.

use std::any::Any;
use std::fmt;

use serde::Serialize;

use crate::caps::hw::HwCaps;

/// Descriptor layout version understood by this registry.
pub const BACKEND_DESC_ABI_VERSION: u32 = 1;

/// Well-known subsystem identifiers. Zero is never a valid subsystem.
pub mod subsystem {
    pub const PLATFORM: u32 = 1;
    pub const GRAPHICS: u32 = 2;
    pub const UI: u32 = 3;
}

/// Flags describing a subsystem as a whole.
pub mod subsystem_flags {
    /// Backends chosen for this subsystem can affect authoritative state, so
    /// strict lockstep profiles demand a D0 backend.
    pub const LOCKSTEP_RELEVANT: u32 = 1 << 0;
}

/// Flags describing an individual backend.
pub mod backend_flags {
    /// Runs without a display or window system.
    pub const HEADLESS: u32 = 1 << 0;
    /// Renders or presents output to the user.
    pub const PRESENTATION: u32 = 1 << 1;
    /// Software rasterizer or emulation path.
    pub const SOFTWARE: u32 = 1 << 2;
}

/// Reproducibility guarantee of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DeterminismGrade {
    /// Bit-exact across runs and peers.
    D0 = 0,
    /// Tick-exact but not necessarily bit-exact.
    D1 = 1,
    /// Best effort, not reproducible.
    D2 = 2,
}

impl DeterminismGrade {
    pub fn label(self) -> &'static str {
        match self {
            DeterminismGrade::D0 => "D0",
            DeterminismGrade::D1 => "D1",
            DeterminismGrade::D2 => "D2",
        }
    }
}

impl fmt::Display for DeterminismGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Coarse performance bucket used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfClass {
    Baseline = 0,
    Compat = 1,
    Perf = 2,
}

impl PerfClass {
    pub fn label(self) -> &'static str {
        match self {
            PerfClass::Baseline => "baseline",
            PerfClass::Compat => "compat",
            PerfClass::Perf => "perf",
        }
    }
}

impl fmt::Display for PerfClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Runtime availability check run during selection. Returning `false` makes
/// the backend ineligible on this host, exactly like a missing hardware flag.
pub type ProbeFn = fn(&HwCaps) -> bool;

/// Interface lookup: returns the backend's API object for the requested ABI
/// version, or `None` when that version is not provided.
pub type GetApiFn = fn(u32) -> Option<&'static (dyn Any + Sync)>;

/// A registrable backend implementation for one subsystem.
#[derive(Clone)]
pub struct BackendDescriptor {
    pub abi_version: u32,
    pub subsystem_id: u32,
    pub subsystem_name: Option<String>,
    pub backend_name: String,
    /// Higher wins.
    pub priority: i32,
    pub required_hardware_flags: u32,
    pub subsystem_flags: u32,
    pub backend_flags: u32,
    pub determinism_grade: DeterminismGrade,
    pub perf_class: PerfClass,
    pub probe: Option<ProbeFn>,
    pub get_api: Option<GetApiFn>,
}

impl BackendDescriptor {
    /// A D0 baseline backend with priority 0 and no hardware requirements.
    pub fn new(subsystem_id: u32, backend_name: impl Into<String>) -> Self {
        Self {
            abi_version: BACKEND_DESC_ABI_VERSION,
            subsystem_id,
            subsystem_name: None,
            backend_name: backend_name.into(),
            priority: 0,
            required_hardware_flags: 0,
            subsystem_flags: 0,
            backend_flags: 0,
            determinism_grade: DeterminismGrade::D0,
            perf_class: PerfClass::Baseline,
            probe: None,
            get_api: None,
        }
    }

    pub fn with_subsystem_name(mut self, name: impl Into<String>) -> Self {
        self.subsystem_name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_required_hardware(mut self, flags: u32) -> Self {
        self.required_hardware_flags = flags;
        self
    }

    pub fn with_subsystem_flags(mut self, flags: u32) -> Self {
        self.subsystem_flags = flags;
        self
    }

    pub fn with_backend_flags(mut self, flags: u32) -> Self {
        self.backend_flags = flags;
        self
    }

    pub fn with_grade(mut self, grade: DeterminismGrade) -> Self {
        self.determinism_grade = grade;
        self
    }

    pub fn with_perf_class(mut self, perf_class: PerfClass) -> Self {
        self.perf_class = perf_class;
        self
    }

    pub fn with_probe(mut self, probe: ProbeFn) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_get_api(mut self, get_api: GetApiFn) -> Self {
        self.get_api = Some(get_api);
        self
    }

    pub fn is_lockstep_relevant(&self) -> bool {
        self.subsystem_flags & subsystem_flags::LOCKSTEP_RELEVANT != 0
    }

    /// Case-insensitive backend name comparison.
    pub fn name_eq(&self, name: &str) -> bool {
        self.backend_name.eq_ignore_ascii_case(name)
    }

    /// Whether the host can run this backend at all: hardware flags first,
    /// then the optional runtime probe.
    pub fn is_hardware_capable(&self, hw: &HwCaps) -> bool {
        if !hw.satisfies(self.required_hardware_flags) {
            return false;
        }
        match self.probe {
            Some(probe) => probe(hw),
            None => true,
        }
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("subsystem_id", &self.subsystem_id)
            .field("subsystem_name", &self.subsystem_name)
            .field("backend_name", &self.backend_name)
            .field("priority", &self.priority)
            .field("required_hardware_flags", &self.required_hardware_flags)
            .field("subsystem_flags", &self.subsystem_flags)
            .field("backend_flags", &self.backend_flags)
            .field("determinism_grade", &self.determinism_grade)
            .field("perf_class", &self.perf_class)
            .field("probe", &self.probe.is_some())
            .field("get_api", &self.get_api.is_some())
            .finish()
    }
}
