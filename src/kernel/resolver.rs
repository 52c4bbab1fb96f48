//! Pick one kernel entry for `(op, requirements, class)`.

use std::cmp::Ordering;

use crate::kernel::dispatch::KernelRequirements;
use crate::kernel::registry::{KernelEntry, KernelRegistry};
use crate::kernel::{DeterminismClass, OpId};

/// Ranks two eligible candidates; `Greater` means `a` is preferred.
pub type TierPolicy = fn(&KernelEntry, &KernelEntry) -> Ordering;

/// Prefer the numerically greatest tier (GPU over SIMD over scalar).
///
/// The tier comparison is the whole of the base policy. On top of it this
/// crate breaks ties between entries sharing a tier: deterministic entries
/// first, then fewer required capability bits. These two keys are local
/// additions, not part of the greatest-tier rule. Entries equal on all three
/// keep registration order, first wins.
pub fn prefer_highest_tier(a: &KernelEntry, b: &KernelEntry) -> Ordering {
    a.tier
        .cmp(&b.tier)
        .then(a.meta.deterministic.cmp(&b.meta.deterministic))
        .then(
            b.meta
                .capability_mask
                .count_ones()
                .cmp(&a.meta.capability_mask.count_ones()),
        )
}

fn is_candidate(
    registry: &KernelRegistry,
    entry: &KernelEntry,
    req: &KernelRequirements,
    class: DeterminismClass,
) -> bool {
    let tier_bit = entry.tier.bit();
    registry.backend_mask() & req.backend_mask & tier_bit != 0
        && entry.meta.capability_mask & !req.capabilities == 0
        && entry.eligible_for(class)
}

/// Resolve with [`prefer_highest_tier`].
pub fn resolve<'r>(
    registry: &'r KernelRegistry,
    op: OpId,
    req: &KernelRequirements,
    class: DeterminismClass,
) -> Option<&'r KernelEntry> {
    resolve_with(registry, op, req, class, prefer_highest_tier)
}

/// Resolve under an explicit ranking policy. `None` only when no entry
/// survives filtering.
pub fn resolve_with<'r>(
    registry: &'r KernelRegistry,
    op: OpId,
    req: &KernelRequirements,
    class: DeterminismClass,
    policy: TierPolicy,
) -> Option<&'r KernelEntry> {
    registry
        .entries_for(op)
        .filter(|e| is_candidate(registry, e, req, class))
        .fold(None, |best, e| match best {
            Some(b) if policy(e, b) != Ordering::Greater => Some(b),
            _ => Some(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::dispatch::{CallContext, KernelCall, KernelEnv};
    use crate::kernel::registry::KernelMeta;
    use crate::kernel::{kernel_caps, tier_mask, BackendTier};

    fn noop(_: &CallContext, _: &KernelCall<'_>, _: &mut KernelEnv<'_>) {}

    fn full_registry() -> KernelRegistry {
        let mut reg = KernelRegistry::new();
        reg.register(OpId::MEM_FILL, BackendTier::Scalar, noop, KernelMeta::new())
            .unwrap();
        reg.register(
            OpId::MEM_FILL,
            BackendTier::Simd,
            noop,
            KernelMeta::new().requiring(kernel_caps::SIMD),
        )
        .unwrap();
        reg.register(
            OpId::MEM_FILL,
            BackendTier::Gpu,
            noop,
            KernelMeta::new()
                .requiring(kernel_caps::GPU_COMPUTE)
                .non_deterministic(),
        )
        .unwrap();
        reg
    }

    fn all_caps() -> KernelRequirements {
        KernelRequirements::new(tier_mask::ALL, kernel_caps::SIMD | kernel_caps::GPU_COMPUTE)
    }

    fn tier_of(entry: Option<&KernelEntry>) -> Option<BackendTier> {
        entry.map(|e| e.tier)
    }

    #[test]
    fn test_highest_eligible_tier_wins() {
        let reg = full_registry();
        let req = all_caps();
        assert_eq!(
            tier_of(resolve(&reg, OpId::MEM_FILL, &req, DeterminismClass::Derived)),
            Some(BackendTier::Gpu)
        );
        assert_eq!(
            tier_of(resolve(&reg, OpId::MEM_FILL, &req, DeterminismClass::Strict)),
            Some(BackendTier::Simd)
        );
    }

    #[test]
    fn test_capabilities_and_masks_filter() {
        let mut reg = full_registry();
        let no_caps = KernelRequirements::new(tier_mask::ALL, 0);
        assert_eq!(
            tier_of(resolve(&reg, OpId::MEM_FILL, &no_caps, DeterminismClass::Derived)),
            Some(BackendTier::Scalar)
        );

        let simd_only = KernelRequirements::new(tier_mask::SIMD, kernel_caps::SIMD);
        assert_eq!(
            tier_of(resolve(&reg, OpId::MEM_FILL, &simd_only, DeterminismClass::Strict)),
            Some(BackendTier::Simd)
        );

        reg.set_backend_mask(tier_mask::SCALAR);
        assert_eq!(
            tier_of(resolve(&reg, OpId::MEM_FILL, &all_caps(), DeterminismClass::Derived)),
            Some(BackendTier::Scalar)
        );
        assert!(resolve(&reg, OpId::MEM_FILL, &simd_only, DeterminismClass::Strict).is_none());
    }

    #[test]
    fn test_unknown_op_is_unresolved() {
        let reg = full_registry();
        assert!(resolve(&reg, OpId::MEM_COPY, &all_caps(), DeterminismClass::Derived).is_none());
    }

    #[test]
    fn test_custom_policy() {
        fn prefer_lowest_tier(a: &KernelEntry, b: &KernelEntry) -> Ordering {
            b.tier.cmp(&a.tier)
        }
        let reg = full_registry();
        let picked = resolve_with(
            &reg,
            OpId::MEM_FILL,
            &all_caps(),
            DeterminismClass::Derived,
            prefer_lowest_tier,
        );
        assert_eq!(tier_of(picked), Some(BackendTier::Scalar));
    }

    #[test]
    fn test_same_tier_prefers_deterministic() {
        let mut reg = KernelRegistry::new();
        reg.register(
            OpId::MEM_COPY,
            BackendTier::Simd,
            noop,
            KernelMeta::new().non_deterministic(),
        )
        .unwrap();
        reg.register(OpId::MEM_COPY, BackendTier::Simd, noop, KernelMeta::new())
            .unwrap();
        let picked = resolve(&reg, OpId::MEM_COPY, &all_caps(), DeterminismClass::Derived).unwrap();
        assert!(picked.meta.deterministic);
    }
}
