//! capdispatch -- deterministic capability negotiation and compute-kernel
//! dispatch for lockstep simulation runtimes.
//!
//! Two registries do the work:
//!
//! - [`caps`] picks one backend per subsystem (platform, graphics, UI) from
//!   the probed host capabilities and a selection profile, and reports the
//!   outcome as an audit log or a DTLV container.
//! - [`kernel`] resolves compute operations to the best scalar, SIMD or GPU
//!   implementation the caller allows, and dispatches them without
//!   allocating.

pub mod caps;
pub mod config;
pub mod kernel;

use anyhow::{Context, Result};

use caps::{CapsRegistry, HwCaps};
use kernel::KernelRegistry;

/// Registries and host capabilities assembled from a [`config::Config`].
#[derive(Debug)]
pub struct Runtime {
    pub hw: HwCaps,
    pub backends: CapsRegistry,
    pub kernels: KernelRegistry,
}

impl Runtime {
    /// Probe the host, register and finalize the builtin backends, and
    /// register the builtin kernels under the configured backend mask.
    pub fn from_config(cfg: &config::Config) -> Result<Self> {
        let hw = cfg
            .hardware
            .apply(caps::probe())
            .context("invalid [hardware] configuration")?;

        let mut backends = CapsRegistry::new();
        caps::register_builtin_backends(&mut backends).context("failed to register builtin backends")?;
        backends.finalize().context("failed to finalize backend registry")?;

        let mut kernels = KernelRegistry::new();
        kernel::register_builtin_kernels(&mut kernels).context("failed to register builtin kernels")?;
        kernels.set_backend_mask(cfg.kernels.backend_mask());

        tracing::debug!(
            os = hw.os_flags,
            cpu = hw.cpu_flags,
            gpu = hw.gpu_flags,
            backends = backends.backend_count(),
            kernels = kernels.len(),
            "runtime initialised"
        );
        Ok(Self { hw, backends, kernels })
    }
}
