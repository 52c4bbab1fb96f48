//! Reference tier: one element at a time, in index order.

use crate::kernel::ops::{
    is_truthy, write_mask_bit, write_record, LaneInt, OpSet, PackedDelta, ReduceKind,
};
use crate::kernel::view::{ComponentView, EntityRange};

pub struct Scalar;

impl OpSet for Scalar {
    fn copy_elems(src: &[u8], sv: &ComponentView, dst: &mut [u8], dv: &ComponentView, r: EntityRange) {
        let size = sv.elem_size;
        for i in r.begin..r.end {
            let (s, d) = (i * sv.stride, i * dv.stride);
            dst[d..d + size].copy_from_slice(&src[s..s + size]);
        }
    }

    fn fill_elems(dst: &mut [u8], dv: &ComponentView, pattern: &[u8], r: EntityRange) {
        for i in r.begin..r.end {
            let d = i * dv.stride;
            dst[d..d + pattern.len()].copy_from_slice(pattern);
        }
    }

    fn reduce_lanes<I: LaneInt>(kind: ReduceKind, src: &[u8], stride: usize, r: EntityRange) -> I {
        let mut acc = I::read_le(&src[r.begin * stride..]);
        for i in r.begin + 1..r.end {
            acc = I::combine(kind, acc, I::read_le(&src[i * stride..]));
        }
        acc
    }

    fn visibility_bits(src: &[u8], sv: &ComponentView, dst: &mut [u8], r: EntityRange) {
        for i in r.begin..r.end {
            write_mask_bit(dst, i, is_truthy(src, sv, i));
        }
    }

    fn apply_delta_records(delta: &PackedDelta<'_>, dst: &mut [u8], r: EntityRange) {
        let mut next = 0;
        for i in 0..delta.entity_count.min(r.end) {
            if delta.is_changed(i) {
                write_record(dst, i, delta.record(next), r);
                next += 1;
            }
        }
    }
}
