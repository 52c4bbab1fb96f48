use tracing::debug;

use crate::kernel::ops::{gpu_kernel, scalar_kernel, simd_kernel};
use crate::kernel::registry::{KernelMeta, KernelRegistry};
use crate::kernel::{kernel_caps, BackendTier, KernelError, OpId};

/// Metadata of the builtin entry for `(op, tier)`.
///
/// GPU entries need GPU compute and are flagged non-deterministic. The GPU
/// visibility mask is also derived-only.
pub fn builtin_meta(op: OpId, tier: BackendTier) -> KernelMeta {
    match tier {
        BackendTier::Scalar => KernelMeta::new(),
        BackendTier::Simd => KernelMeta::new().requiring(kernel_caps::SIMD),
        BackendTier::Gpu => {
            let meta = KernelMeta::new()
                .requiring(kernel_caps::GPU_COMPUTE)
                .non_deterministic();
            if op == OpId::BUILD_VISIBILITY_MASK {
                meta.derived_only()
            } else {
                meta
            }
        }
    }
}

/// Register all builtin ops at every tier.
pub fn register_builtin_kernels(registry: &mut KernelRegistry) -> Result<(), KernelError> {
    for op in OpId::BUILTIN {
        registry.register(op, BackendTier::Scalar, scalar_kernel, builtin_meta(op, BackendTier::Scalar))?;
        registry.register(op, BackendTier::Simd, simd_kernel, builtin_meta(op, BackendTier::Simd))?;
        registry.register(op, BackendTier::Gpu, gpu_kernel, builtin_meta(op, BackendTier::Gpu))?;
    }
    debug!(entries = registry.len(), "builtin kernels registered");
    Ok(())
}
