//! Capability negotiation: which backend each subsystem runs on this host.
//!
//! The flow is register -> finalize -> select, driven once at process start:
//!
//! 1. Backends are registered into a caller-owned [`CapsRegistry`]
//!    (builtins via [`register_builtin_backends`]).
//! 2. [`CapsRegistry::finalize`] sorts the table by
//!    `(subsystem_id, priority desc, name)` and freezes it.
//! 3. [`CapsRegistry::select`] walks each subsystem group and picks the first
//!    backend the host can run under the requested [`SelectionProfile`].
//!
//! Results can be rendered as a deterministic text report ([`audit`]) or a
//! binary DTLV container ([`tlv`]).

pub mod audit;
pub mod builtin;
pub mod descriptor;
pub mod hw;
pub mod registry;
pub mod select;
pub mod tlv;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use audit::{audit_log, get_audit_log};
pub use builtin::register_builtin_backends;
pub use descriptor::{BackendDescriptor, DeterminismGrade, PerfClass};
pub use hw::{probe, HwCaps};
pub use registry::CapsRegistry;
pub use select::{BackendOverride, Selection, SelectionEntry, SelectionProfile};
pub use tlv::write_capabilities_tlv;

/// Numeric code for success in audit logs and DTLV records.
pub const RESULT_OK: i32 = 0;

/// Why a selection failed. Carried alongside [`CapsError::NoEligible`] and
/// written to audit logs and DTLV records as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    None = 0,
    NotFinalized = 1,
    NoEligibleBackend = 2,
    LockstepRequiresD0 = 3,
    OverrideNotFound = 4,
}

impl FailReason {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailReason::None => "none",
            FailReason::NotFinalized => "registry not finalized",
            FailReason::NoEligibleBackend => "no hardware-capable backend",
            FailReason::LockstepRequiresD0 => "lockstep requires a D0 backend",
            FailReason::OverrideNotFound => "override names an unknown backend",
        };
        f.write_str(s)
    }
}

/// Capability registry errors.
///
/// Codes are stable and negative; `-1` is reserved for a null argument,
/// which cannot be expressed through this API.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum CapsError {
    #[error("backend descriptor rejected: {reason}")]
    BadDesc { reason: &'static str },

    #[error("backend registry is full ({capacity} entries)")]
    TooMany { capacity: usize },

    #[error("backend {name:?} is already registered for subsystem {subsystem_id}")]
    Duplicate { subsystem_id: u32, name: String },

    #[error("backend registry is already finalized")]
    Finalized,

    #[error("backend registry has not been finalized")]
    NotFinalized,

    #[error("no eligible backend for subsystem {subsystem_id}: {reason}")]
    NoEligible { subsystem_id: u32, reason: FailReason },
}

impl CapsError {
    pub fn code(&self) -> i32 {
        match self {
            CapsError::BadDesc { .. } => -2,
            CapsError::TooMany { .. } => -3,
            CapsError::Duplicate { .. } => -4,
            CapsError::Finalized => -5,
            CapsError::NotFinalized => -6,
            CapsError::NoEligible { .. } => -7,
        }
    }

    pub fn fail_reason(&self) -> FailReason {
        match self {
            CapsError::NotFinalized => FailReason::NotFinalized,
            CapsError::NoEligible { reason, .. } => *reason,
            _ => FailReason::None,
        }
    }

    pub fn fail_subsystem_id(&self) -> u32 {
        match self {
            CapsError::NoEligible { subsystem_id, .. } => *subsystem_id,
            _ => 0,
        }
    }
}
