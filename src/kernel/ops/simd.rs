//! Lane-blocked tier.
//!
//! Plain safe Rust shaped so the optimizer can vectorize it: bulk copies for
//! packed layouts, four independent accumulators for reductions, whole
//! bitset words built in registers. Strided layouts fall back to the scalar
//! loops. Output is byte-identical to [`Scalar`].

use crate::kernel::ops::{
    is_truthy, write_record, LaneInt, OpSet, PackedDelta, ReduceKind, Scalar,
};
use crate::kernel::view::{ComponentView, EntityRange};

const LANES: usize = 4;

pub struct Simd;

fn is_packed(view: &ComponentView) -> bool {
    view.stride == view.elem_size
}

impl OpSet for Simd {
    fn copy_elems(src: &[u8], sv: &ComponentView, dst: &mut [u8], dv: &ComponentView, r: EntityRange) {
        if !is_packed(sv) || !is_packed(dv) {
            return Scalar::copy_elems(src, sv, dst, dv, r);
        }
        let size = sv.elem_size;
        let (begin, end) = (r.begin * size, r.end * size);
        dst[begin..end].copy_from_slice(&src[begin..end]);
    }

    fn fill_elems(dst: &mut [u8], dv: &ComponentView, pattern: &[u8], r: EntityRange) {
        if !is_packed(dv) {
            return Scalar::fill_elems(dst, dv, pattern, r);
        }
        let span = &mut dst[r.begin * dv.stride..r.end * dv.stride];
        span[..pattern.len()].copy_from_slice(pattern);
        let mut filled = pattern.len();
        while filled < span.len() {
            let n = filled.min(span.len() - filled);
            span.copy_within(..n, filled);
            filled += n;
        }
    }

    fn reduce_lanes<I: LaneInt>(kind: ReduceKind, src: &[u8], stride: usize, r: EntityRange) -> I {
        if stride != I::SIZE {
            return Scalar::reduce_lanes(kind, src, stride, r);
        }
        let bytes = &src[r.begin * stride..r.end * stride];
        let mut lanes = [I::identity(kind); LANES];
        let mut blocks = bytes.chunks_exact(LANES * stride);
        for block in &mut blocks {
            for (lane, acc) in lanes.iter_mut().enumerate() {
                *acc = I::combine(kind, *acc, I::read_le(&block[lane * stride..]));
            }
        }
        let mut total = lanes
            .into_iter()
            .fold(I::identity(kind), |t, lane| I::combine(kind, t, lane));
        for elem in blocks.remainder().chunks_exact(stride) {
            total = I::combine(kind, total, I::read_le(elem));
        }
        total
    }

    fn visibility_bits(src: &[u8], sv: &ComponentView, dst: &mut [u8], r: EntityRange) {
        let full_begin = r.begin.div_ceil(32) * 32;
        let full_end = r.end / 32 * 32;
        if full_begin >= full_end {
            return Scalar::visibility_bits(src, sv, dst, r);
        }

        Scalar::visibility_bits(src, sv, dst, EntityRange::new(r.begin, full_begin));
        for w in full_begin / 32..full_end / 32 {
            let base = w * 32;
            let word = if sv.elem_size == 1 && is_packed(sv) {
                src[base..base + 32]
                    .iter()
                    .enumerate()
                    .fold(0u32, |word, (j, &b)| word | (u32::from(b != 0) << j))
            } else {
                (0..32).fold(0u32, |word, j| {
                    word | (u32::from(is_truthy(src, sv, base + j)) << j)
                })
            };
            word.write_le(&mut dst[w * 4..]);
        }
        Scalar::visibility_bits(src, sv, dst, EntityRange::new(full_end, r.end));
    }

    fn apply_delta_records(delta: &PackedDelta<'_>, dst: &mut [u8], r: EntityRange) {
        let last = delta.entity_count.min(r.end);
        let mut next = 0;
        for k in 0..last.div_ceil(8) {
            let mut bits = delta.mask_byte(k);
            if (k + 1) * 8 <= r.begin {
                next += bits.count_ones() as usize;
                continue;
            }
            while bits != 0 {
                let i = k * 8 + bits.trailing_zeros() as usize;
                if i >= last {
                    break;
                }
                write_record(dst, i, delta.record(next), r);
                next += 1;
                bits &= bits - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ops::{encode_packed_delta, parse_delta};
    use crate::kernel::view::{AccessMode, BufferId, ElemType};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn packed(elem: ElemType, count: usize) -> ComponentView {
        ComponentView::new(BufferId(0), elem, count, AccessMode::Read)
    }

    #[test]
    fn test_reduce_matches_scalar_on_random_input() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<i32> = (0..1003).map(|_| rng.gen()).collect();
        let src: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        for kind in [ReduceKind::Sum, ReduceKind::Min, ReduceKind::Max] {
            for (begin, end) in [(0, 1003), (3, 4), (5, 12), (999, 1003)] {
                let r = EntityRange::new(begin, end);
                let a: i32 = Scalar::reduce_lanes(kind, &src, 4, r);
                let b: i32 = Simd::reduce_lanes(kind, &src, 4, r);
                assert_eq!(a, b, "{kind:?} {begin}..{end}");
            }
        }
    }

    #[test]
    fn test_fill_doubling_matches_scalar() {
        let view = packed(ElemType::U16, 37);
        let mut a = vec![0u8; 74];
        let mut b = vec![0u8; 74];
        let r = EntityRange::new(3, 36);
        Scalar::fill_elems(&mut a, &view, &[0x12, 0x34], r);
        Simd::fill_elems(&mut b, &view, &[0x12, 0x34], r);
        assert_eq!(a, b);
    }

    #[test]
    fn test_visibility_words_match_scalar() {
        let mut rng = StdRng::seed_from_u64(11);
        let src: Vec<u8> = (0..200).map(|_| rng.gen_range(0..3)).collect();
        let view = packed(ElemType::U8, 200);

        for (begin, end) in [(0, 200), (1, 63), (32, 64), (40, 41), (31, 97)] {
            let mut a = vec![0xA5u8; 28];
            let mut b = a.clone();
            let r = EntityRange::new(begin, end);
            Scalar::visibility_bits(&src, &view, &mut a, r);
            Simd::visibility_bits(&src, &view, &mut b, r);
            assert_eq!(a, b, "{begin}..{end}");
        }
    }

    #[test]
    fn test_delta_records_match_scalar() {
        let records: Vec<[u8; 3]> = (0..20u8).map(|i| [i, i + 1, i + 2]).collect();
        let changes: Vec<(u32, &[u8])> = (0..20u32)
            .filter(|i| i % 3 != 1)
            .map(|i| (i, &records[i as usize][..]))
            .collect();
        let blob = encode_packed_delta(20, 3, &changes);
        let delta = parse_delta(&blob).unwrap();

        for (begin, end, cap) in [(0, 20, 60), (9, 17, 60), (4, 20, 40), (0, 20, 31)] {
            let mut a = vec![0u8; cap];
            let mut b = vec![0u8; cap];
            let r = EntityRange::new(begin, end);
            Scalar::apply_delta_records(&delta, &mut a, r);
            Simd::apply_delta_records(&delta, &mut b, r);
            assert_eq!(a, b, "{begin}..{end} cap {cap}");
        }
    }
}
