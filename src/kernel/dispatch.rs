//! The per-tick call site. Nothing here allocates or logs.

use serde::Serialize;

use crate::caps::hw::HwCaps;
use crate::kernel::gpu_queue::GpuJobQueue;
use crate::kernel::registry::KernelRegistry;
use crate::kernel::resolver::resolve;
use crate::kernel::view::{BufferSet, ComponentView, EntityRange};
use crate::kernel::{tier_mask, BackendTier, DeterminismClass, KernelError, OpId};

/// What the caller is willing to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelRequirements {
    /// Acceptable tiers, see [`tier_mask`].
    pub backend_mask: u32,
    /// Capabilities available to kernels, see [`kernel_caps`](crate::kernel::kernel_caps).
    pub capabilities: u32,
}

impl KernelRequirements {
    pub const fn new(backend_mask: u32, capabilities: u32) -> Self {
        Self {
            backend_mask,
            capabilities,
        }
    }

    /// Scalar only, no capabilities.
    pub const fn scalar() -> Self {
        Self::new(tier_mask::SCALAR, 0)
    }

    /// Every tier, with the capabilities the host offers.
    pub const fn from_hw(hw: &HwCaps) -> Self {
        Self::new(tier_mask::ALL, hw.kernel_capabilities())
    }
}

/// One kernel invocation.
#[derive(Debug, Clone, Copy)]
pub struct KernelCall<'a> {
    pub op: OpId,
    pub inputs: &'a [ComponentView],
    pub outputs: &'a [ComponentView],
    /// Opaque op-specific parameter blob.
    pub params: &'a [u8],
    pub range: EntityRange,
    pub class: DeterminismClass,
}

impl<'a> KernelCall<'a> {
    /// A strict call with no views or parameters.
    pub const fn new(op: OpId, range: EntityRange) -> Self {
        Self {
            op,
            inputs: &[],
            outputs: &[],
            params: &[],
            range,
            class: DeterminismClass::Strict,
        }
    }

    pub const fn with_inputs(mut self, inputs: &'a [ComponentView]) -> Self {
        self.inputs = inputs;
        self
    }

    pub const fn with_outputs(mut self, outputs: &'a [ComponentView]) -> Self {
        self.outputs = outputs;
        self
    }

    pub const fn with_params(mut self, params: &'a [u8]) -> Self {
        self.params = params;
        self
    }

    pub const fn with_class(mut self, class: DeterminismClass) -> Self {
        self.class = class;
        self
    }

    fn validate(&self) -> Result<(), KernelError> {
        if !self.range.is_valid() {
            return Err(KernelError::InvalidCall("entity range begins after it ends"));
        }
        Ok(())
    }
}

/// Which entry ran, and under which class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallContext {
    pub op: OpId,
    pub tier: BackendTier,
    pub class: DeterminismClass,
}

/// Mutable state kernels run against.
#[derive(Debug)]
pub struct KernelEnv<'a> {
    pub buffers: &'a mut BufferSet,
    pub gpu_queue: &'a mut GpuJobQueue,
}

impl<'a> KernelEnv<'a> {
    pub fn new(buffers: &'a mut BufferSet, gpu_queue: &'a mut GpuJobQueue) -> Self {
        Self { buffers, gpu_queue }
    }
}

/// Validate `call`, resolve its op and invoke the winning entry.
pub fn dispatch(
    registry: &KernelRegistry,
    call: &KernelCall<'_>,
    req: &KernelRequirements,
    env: &mut KernelEnv<'_>,
) -> Result<CallContext, KernelError> {
    call.validate()?;
    let entry =
        resolve(registry, call.op, req, call.class).ok_or(KernelError::Unresolved { op: call.op })?;
    Ok(entry.invoke(call, env))
}
