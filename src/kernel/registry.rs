use std::fmt;

use tracing::debug;

use crate::kernel::dispatch::{CallContext, KernelCall, KernelEnv};
use crate::kernel::{entry_flags, tier_mask, BackendTier, DeterminismClass, KernelError, OpId};

/// Maximum number of kernel entries across all ops and tiers.
pub const MAX_KERNEL_ENTRIES: usize = 256;

/// A kernel implementation. Kernel bodies never fail: malformed views or
/// parameters make them return without writing.
pub type KernelFn = fn(&CallContext, &KernelCall<'_>, &mut KernelEnv<'_>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelMeta {
    /// Capabilities (see [`kernel_caps`](crate::kernel::kernel_caps)) the
    /// caller must offer.
    pub capability_mask: u32,
    /// Bit-exact across runs and hosts.
    pub deterministic: bool,
    pub flags: u32,
}

impl Default for KernelMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelMeta {
    pub const fn new() -> Self {
        Self {
            capability_mask: 0,
            deterministic: true,
            flags: 0,
        }
    }

    pub const fn requiring(mut self, capability_mask: u32) -> Self {
        self.capability_mask = capability_mask;
        self
    }

    pub const fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    pub const fn derived_only(mut self) -> Self {
        self.flags |= entry_flags::DERIVED_ONLY;
        self
    }
}

#[derive(Clone, Copy)]
pub struct KernelEntry {
    pub op: OpId,
    pub tier: BackendTier,
    pub func: KernelFn,
    pub meta: KernelMeta,
}

impl KernelEntry {
    pub fn is_derived_only(&self) -> bool {
        self.meta.flags & entry_flags::DERIVED_ONLY != 0
    }

    /// Strict calls exclude derived-only and non-deterministic entries.
    pub fn eligible_for(&self, class: DeterminismClass) -> bool {
        match class {
            DeterminismClass::Strict => self.meta.deterministic && !self.is_derived_only(),
            DeterminismClass::Derived => true,
        }
    }

    /// Run this entry for `call`. Resolution can be done once and the entry
    /// invoked many times.
    pub fn invoke(&self, call: &KernelCall<'_>, env: &mut KernelEnv<'_>) -> CallContext {
        let ctx = CallContext {
            op: self.op,
            tier: self.tier,
            class: call.class,
        };
        (self.func)(&ctx, call, env);
        ctx
    }
}

impl fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelEntry")
            .field("op", &self.op)
            .field("tier", &self.tier)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Caller-owned table of kernel entries.
#[derive(Debug)]
pub struct KernelRegistry {
    entries: Vec<KernelEntry>,
    backend_mask: u32,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_KERNEL_ENTRIES),
            backend_mask: tier_mask::ALL,
        }
    }

    /// Append an entry. `(op, tier)` is expected to be unique; this is not
    /// checked.
    pub fn register(
        &mut self,
        op: OpId,
        tier: BackendTier,
        func: KernelFn,
        meta: KernelMeta,
    ) -> Result<(), KernelError> {
        if self.entries.len() >= MAX_KERNEL_ENTRIES {
            return Err(KernelError::RegistryFull {
                capacity: MAX_KERNEL_ENTRIES,
            });
        }
        self.entries.push(KernelEntry {
            op,
            tier,
            func,
            meta,
        });
        debug!(%op, %tier, deterministic = meta.deterministic, "kernel registered");
        Ok(())
    }

    /// Restrict the tiers this registry will ever offer.
    pub fn set_backend_mask(&mut self, mask: u32) {
        self.backend_mask = mask & tier_mask::ALL;
        debug!(mask = self.backend_mask, "kernel backend mask set");
    }

    pub fn backend_mask(&self) -> u32 {
        self.backend_mask
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[KernelEntry] {
        &self.entries
    }

    pub fn entries_for(&self, op: OpId) -> impl Iterator<Item = &KernelEntry> {
        self.entries.iter().filter(move |e| e.op == op)
    }
}
