//! Cross-tier self-check.
//!
//! Runs every builtin op on each tier over fixed inputs and compares the
//! output bytes against the scalar tier. GPU jobs are drained before the
//! comparison.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::kernel::dispatch::{dispatch, KernelCall, KernelEnv, KernelRequirements};
use crate::kernel::gpu_queue::GpuJobQueue;
use crate::kernel::ops::encode_packed_delta;
use crate::kernel::registry::KernelRegistry;
use crate::kernel::view::{AccessMode, BufferSet, ComponentView, ElemType, EntityRange};
use crate::kernel::{kernel_caps, BackendTier, DeterminismClass, OpId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    /// The tier is not registered for this op or is masked off.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierCheck {
    pub op: &'static str,
    pub tier: BackendTier,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub checks: Vec<TierCheck>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }
}

struct Fixture {
    buffers: BufferSet,
    inputs: Vec<ComponentView>,
    outputs: Vec<ComponentView>,
    params: Vec<u8>,
    range: EntityRange,
}

fn mix(i: usize) -> u32 {
    (i as u32).wrapping_mul(2_654_435_761).rotate_left(13) ^ 0x5bd1_e995
}

fn fixture(op: OpId) -> Option<Fixture> {
    let mut buffers = BufferSet::new();
    let fixture = match op {
        OpId::MEM_COPY => {
            let src = buffers.insert((0..67).flat_map(|i| mix(i).to_le_bytes()).collect());
            let dst = buffers.alloc(67 * 4);
            Fixture {
                inputs: vec![ComponentView::new(src, ElemType::U32, 67, AccessMode::Read)],
                outputs: vec![ComponentView::new(dst, ElemType::U32, 67, AccessMode::Write)],
                params: Vec::new(),
                range: EntityRange::new(3, 64),
                buffers,
            }
        }
        OpId::MEM_FILL => {
            let dst = buffers.alloc(67 * 4);
            Fixture {
                inputs: Vec::new(),
                outputs: vec![ComponentView::new(dst, ElemType::U32, 67, AccessMode::Write)],
                params: vec![0xEF, 0xBE, 0xAD, 0xDE],
                range: EntityRange::new(0, 67),
                buffers,
            }
        }
        OpId::REDUCE_SUM_INT | OpId::REDUCE_MIN_INT | OpId::REDUCE_MAX_INT => {
            let src = buffers.insert((0..103).flat_map(|i| (mix(i) as i32).to_le_bytes()).collect());
            let dst = buffers.alloc(103 * 4);
            Fixture {
                inputs: vec![ComponentView::new(src, ElemType::I32, 103, AccessMode::Read)],
                outputs: vec![ComponentView::new(dst, ElemType::I32, 103, AccessMode::Reduce)],
                params: Vec::new(),
                range: EntityRange::new(0, 103),
                buffers,
            }
        }
        OpId::APPLY_DELTA_PACKED => {
            const STRIDE: usize = 6;
            let baseline = buffers.insert((0..40 * STRIDE).map(|i| i as u8).collect());
            let out = buffers.alloc(40 * STRIDE);
            let records: Vec<[u8; STRIDE]> = (0..40).map(|i| [0xF0 | (i as u8 & 0x0F); STRIDE]).collect();
            let changes: Vec<(u32, &[u8])> = (0..40u32)
                .filter(|i| mix(*i as usize) % 3 == 0)
                .map(|i| (i, &records[i as usize][..]))
                .collect();
            Fixture {
                inputs: vec![ComponentView::records(baseline, STRIDE, 40, AccessMode::Read)],
                outputs: vec![ComponentView::records(out, STRIDE, 40, AccessMode::Write)],
                params: encode_packed_delta(40, STRIDE as u32, &changes),
                range: EntityRange::new(5, 37),
                buffers,
            }
        }
        OpId::BUILD_VISIBILITY_MASK => {
            let src = buffers.insert((0..100).map(|i| (mix(i) % 3) as u8).collect());
            let dst = buffers.insert(vec![0xFF; 16]);
            Fixture {
                inputs: vec![ComponentView::new(src, ElemType::U8, 100, AccessMode::Read)],
                outputs: vec![ComponentView::new(dst, ElemType::U32, 4, AccessMode::Write)],
                params: Vec::new(),
                range: EntityRange::new(3, 97),
                buffers,
            }
        }
        _ => return None,
    };
    Some(fixture)
}

/// Run `op` restricted to `tier`; returns the first output buffer, or
/// `None` when the tier did not resolve.
fn run_on_tier(registry: &KernelRegistry, op: OpId, tier: BackendTier) -> Option<Vec<u8>> {
    let Fixture {
        mut buffers,
        inputs,
        outputs,
        params,
        range,
    } = fixture(op)?;
    let mut queue = GpuJobQueue::new();
    let req = KernelRequirements::new(tier.bit(), kernel_caps::SIMD | kernel_caps::GPU_COMPUTE);
    let call = KernelCall::new(op, range)
        .with_inputs(&inputs)
        .with_outputs(&outputs)
        .with_params(&params)
        .with_class(DeterminismClass::Derived);

    let ctx = dispatch(registry, &call, &req, &mut KernelEnv::new(&mut buffers, &mut queue)).ok()?;
    debug_assert_eq!(ctx.tier, tier);
    queue.process(&mut buffers, usize::MAX);

    let out = outputs.first()?;
    buffers.get(out.buffer).map(<[u8]>::to_vec)
}

/// Compare every tier of every builtin op against scalar.
pub fn verify_registry(registry: &KernelRegistry) -> VerifyReport {
    let mut checks = Vec::new();
    for op in OpId::BUILTIN {
        let reference = run_on_tier(registry, op, BackendTier::Scalar);
        for tier in BackendTier::ALL {
            let check = match (&reference, run_on_tier(registry, op, tier)) {
                (_, None) => TierCheck {
                    op: op.name(),
                    tier,
                    status: CheckStatus::Skipped,
                    details: "tier not available".to_string(),
                },
                (None, Some(_)) => TierCheck {
                    op: op.name(),
                    tier,
                    status: CheckStatus::Fail,
                    details: "no scalar reference to compare against".to_string(),
                },
                (Some(expected), Some(actual)) if *expected == actual => TierCheck {
                    op: op.name(),
                    tier,
                    status: CheckStatus::Pass,
                    details: format!("{} bytes identical", actual.len()),
                },
                (Some(expected), Some(actual)) => {
                    let at = expected
                        .iter()
                        .zip(&actual)
                        .position(|(a, b)| a != b)
                        .unwrap_or(expected.len().min(actual.len()));
                    TierCheck {
                        op: op.name(),
                        tier,
                        status: CheckStatus::Fail,
                        details: format!("first differing byte at offset {at}"),
                    }
                }
            };
            match check.status {
                CheckStatus::Fail => warn!(op = check.op, %tier, details = %check.details, "tier mismatch"),
                _ => debug!(op = check.op, %tier, status = ?check.status, "tier checked"),
            }
            checks.push(check);
        }
    }

    let report = VerifyReport { checks };
    info!(
        passed = report.count(CheckStatus::Pass),
        failed = report.count(CheckStatus::Fail),
        skipped = report.count(CheckStatus::Skipped),
        "kernel verification complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::builtin::register_builtin_kernels;
    use crate::kernel::dispatch::CallContext;
    use crate::kernel::registry::KernelMeta;
    use crate::kernel::tier_mask;

    fn builtin() -> KernelRegistry {
        let mut reg = KernelRegistry::new();
        register_builtin_kernels(&mut reg).unwrap();
        reg
    }

    #[test]
    fn test_builtin_tiers_agree() {
        let report = verify_registry(&builtin());
        assert!(report.passed(), "{report:?}");
        assert_eq!(report.count(CheckStatus::Pass), OpId::BUILTIN.len() * 3);
    }

    #[test]
    fn test_masked_tiers_are_skipped() {
        let mut reg = builtin();
        reg.set_backend_mask(tier_mask::SCALAR);
        let report = verify_registry(&reg);
        assert!(report.passed());
        assert_eq!(report.count(CheckStatus::Pass), OpId::BUILTIN.len());
        assert_eq!(report.count(CheckStatus::Skipped), OpId::BUILTIN.len() * 2);
    }

    #[test]
    fn test_broken_tier_is_reported() {
        fn zero_kernel(_: &CallContext, call: &KernelCall<'_>, env: &mut KernelEnv<'_>) {
            if let Some(out) = call.outputs.first() {
                if let Some(buf) = env.buffers.get_mut(out.buffer) {
                    buf.fill(0);
                }
            }
        }

        let mut reg = builtin();
        reg.register(OpId::MEM_FILL, BackendTier::Simd, zero_kernel, KernelMeta::new())
            .unwrap();
        let report = verify_registry(&reg);
        assert!(!report.passed());
        let failed: Vec<_> = report
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].op, "mem_fill");
        assert_eq!(failed[0].tier, BackendTier::Simd);
    }
}
