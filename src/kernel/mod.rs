//! Compute kernel registry and dispatch.
//!
//! Every operation ships one implementation per backend tier:
//!
//! - **Scalar**: reference implementation, always registered, always D0.
//! - **Simd**: lane-blocked CPU path, bit-identical to scalar.
//! - **Gpu**: deferred through the [`gpu_queue::GpuJobQueue`], executed when
//!   the caller pumps the queue (or immediately when the queue is full).
//!
//! Resolution picks one entry per `(op, requirements, class)`; dispatch
//! invokes it. Neither allocates.

pub mod builtin;
pub mod dispatch;
pub mod gpu_queue;
pub mod ops;
pub mod registry;
pub mod resolver;
pub mod verify;
pub mod view;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use builtin::register_builtin_kernels;
pub use dispatch::{dispatch, CallContext, KernelCall, KernelEnv, KernelRequirements};
pub use gpu_queue::GpuJobQueue;
pub use registry::{KernelEntry, KernelMeta, KernelRegistry};
pub use resolver::{prefer_highest_tier, resolve, resolve_with};
pub use view::{AccessMode, BufferId, BufferSet, ComponentView, ElemType, EntityRange};

/// Backend tier of a kernel entry. Numerically larger tiers are faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendTier {
    Scalar = 0,
    Simd = 1,
    Gpu = 2,
}

impl BackendTier {
    pub const ALL: [BackendTier; 3] = [BackendTier::Scalar, BackendTier::Simd, BackendTier::Gpu];

    /// This tier's bit in a backend mask.
    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            BackendTier::Scalar => "scalar",
            BackendTier::Simd => "simd",
            BackendTier::Gpu => "gpu",
        }
    }
}

impl fmt::Display for BackendTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for BackendTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scalar" => Ok(BackendTier::Scalar),
            "simd" => Ok(BackendTier::Simd),
            "gpu" => Ok(BackendTier::Gpu),
            other => Err(format!("unknown backend tier: {other}")),
        }
    }
}

/// Backend masks over [`BackendTier`] bits.
pub mod tier_mask {
    use super::BackendTier;

    pub const SCALAR: u32 = BackendTier::Scalar.bit();
    pub const SIMD: u32 = BackendTier::Simd.bit();
    pub const GPU: u32 = BackendTier::Gpu.bit();
    pub const ALL: u32 = SCALAR | SIMD | GPU;
}

/// Capabilities a kernel entry may require of the caller.
pub mod kernel_caps {
    pub const SIMD: u32 = 1 << 0;
    pub const GPU_COMPUTE: u32 = 1 << 1;
}

/// Kernel entry flags.
pub mod entry_flags {
    /// Never eligible for [`DeterminismClass::Strict`](super::DeterminismClass::Strict) calls.
    pub const DERIVED_ONLY: u32 = 1 << 0;
}

/// Operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OpId(pub u32);

impl OpId {
    pub const MEM_COPY: OpId = OpId(1);
    pub const MEM_FILL: OpId = OpId(2);
    pub const REDUCE_SUM_INT: OpId = OpId(3);
    pub const REDUCE_MIN_INT: OpId = OpId(4);
    pub const REDUCE_MAX_INT: OpId = OpId(5);
    pub const APPLY_DELTA_PACKED: OpId = OpId(6);
    pub const BUILD_VISIBILITY_MASK: OpId = OpId(7);

    pub const BUILTIN: [OpId; 7] = [
        OpId::MEM_COPY,
        OpId::MEM_FILL,
        OpId::REDUCE_SUM_INT,
        OpId::REDUCE_MIN_INT,
        OpId::REDUCE_MAX_INT,
        OpId::APPLY_DELTA_PACKED,
        OpId::BUILD_VISIBILITY_MASK,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpId::MEM_COPY => "mem_copy",
            OpId::MEM_FILL => "mem_fill",
            OpId::REDUCE_SUM_INT => "reduce_sum_int",
            OpId::REDUCE_MIN_INT => "reduce_min_int",
            OpId::REDUCE_MAX_INT => "reduce_max_int",
            OpId::APPLY_DELTA_PACKED => "apply_delta_packed",
            OpId::BUILD_VISIBILITY_MASK => "build_visibility_mask",
            _ => "unknown",
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// What the caller is computing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeterminismClass {
    /// Authoritative state; only deterministic, non-derived entries qualify.
    #[default]
    Strict,
    /// Presentation or other derived output; any entry qualifies.
    Derived,
}

impl fmt::Display for DeterminismClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeterminismClass::Strict => "strict",
            DeterminismClass::Derived => "derived",
        })
    }
}

impl FromStr for DeterminismClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(DeterminismClass::Strict),
            "derived" => Ok(DeterminismClass::Derived),
            other => Err(format!("unknown determinism class: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("kernel registry is full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    #[error("invalid kernel call: {0}")]
    InvalidCall(&'static str),

    #[error("no kernel entry resolved for {op}")]
    Unresolved { op: OpId },
}

impl KernelError {
    /// Stable negative code, mirroring the capability API's convention.
    pub fn code(&self) -> i32 {
        match self {
            KernelError::RegistryFull { .. } => -3,
            KernelError::InvalidCall(_) => -2,
            KernelError::Unresolved { .. } => -8,
        }
    }
}
