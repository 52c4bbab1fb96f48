//! Kernel bodies.
//!
//! Each op is validated once in [`execute`] and then handed to a tier's
//! [`OpSet`] with slices and ranges that are already known to be in bounds.
//! Every tier must produce byte-identical output for the same inputs.
//!
//! Kernel bodies never report errors. A view, parameter blob or buffer
//! handle that does not fit the op turns the call into a no-op, and nothing
//! is written before validation finishes.

pub mod delta;
pub mod gpu;
pub mod scalar;
pub mod simd;

use crate::kernel::dispatch::{CallContext, KernelCall, KernelEnv};
use crate::kernel::view::{BufferSet, ComponentView, ElemType, EntityRange};
use crate::kernel::OpId;

pub use delta::{encode_packed_delta, parse_delta, PackedDelta, DELTA_HEADER_LEN};
pub use gpu::gpu_kernel;
pub use scalar::Scalar;
pub use simd::Simd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Min,
    Max,
}

/// Builtin operations, decoded from an [`OpId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    MemCopy,
    MemFill,
    Reduce(ReduceKind),
    ApplyDelta,
    VisibilityMask,
}

impl OpKind {
    pub fn from_op(op: OpId) -> Option<Self> {
        Some(match op {
            OpId::MEM_COPY => OpKind::MemCopy,
            OpId::MEM_FILL => OpKind::MemFill,
            OpId::REDUCE_SUM_INT => OpKind::Reduce(ReduceKind::Sum),
            OpId::REDUCE_MIN_INT => OpKind::Reduce(ReduceKind::Min),
            OpId::REDUCE_MAX_INT => OpKind::Reduce(ReduceKind::Max),
            OpId::APPLY_DELTA_PACKED => OpKind::ApplyDelta,
            OpId::BUILD_VISIBILITY_MASK => OpKind::VisibilityMask,
            _ => return None,
        })
    }

    pub fn op(self) -> OpId {
        match self {
            OpKind::MemCopy => OpId::MEM_COPY,
            OpKind::MemFill => OpId::MEM_FILL,
            OpKind::Reduce(ReduceKind::Sum) => OpId::REDUCE_SUM_INT,
            OpKind::Reduce(ReduceKind::Min) => OpId::REDUCE_MIN_INT,
            OpKind::Reduce(ReduceKind::Max) => OpId::REDUCE_MAX_INT,
            OpKind::ApplyDelta => OpId::APPLY_DELTA_PACKED,
            OpKind::VisibilityMask => OpId::BUILD_VISIBILITY_MASK,
        }
    }
}

/// Integer element types the reduce ops accept.
pub trait LaneInt: Copy + Ord {
    const SIZE: usize;
    const ZERO: Self;
    const MIN: Self;
    const MAX: Self;

    /// Read from the first `SIZE` bytes of `bytes`, little-endian.
    fn read_le(bytes: &[u8]) -> Self;
    /// Write to the first `SIZE` bytes of `out`, little-endian.
    fn write_le(self, out: &mut [u8]);
    fn wrapping_add(self, other: Self) -> Self;

    fn combine(kind: ReduceKind, a: Self, b: Self) -> Self {
        match kind {
            ReduceKind::Sum => a.wrapping_add(b),
            ReduceKind::Min => a.min(b),
            ReduceKind::Max => a.max(b),
        }
    }

    /// Neutral starting value for `kind`.
    fn identity(kind: ReduceKind) -> Self {
        match kind {
            ReduceKind::Sum => Self::ZERO,
            ReduceKind::Min => Self::MAX,
            ReduceKind::Max => Self::MIN,
        }
    }
}

macro_rules! lane_int {
    ($($t:ty),*) => {$(
        impl LaneInt for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            const ZERO: Self = 0;
            const MIN: Self = <$t>::MIN;
            const MAX: Self = <$t>::MAX;

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            fn wrapping_add(self, other: Self) -> Self {
                <$t>::wrapping_add(self, other)
            }
        }
    )*};
}

lane_int!(u32, i32, u64, i64);

/// Per-tier inner loops. Callers guarantee that every element index in `r`
/// lies inside the slices handed over.
pub trait OpSet {
    fn copy_elems(src: &[u8], sv: &ComponentView, dst: &mut [u8], dv: &ComponentView, r: EntityRange);

    fn fill_elems(dst: &mut [u8], dv: &ComponentView, pattern: &[u8], r: EntityRange);

    /// Fold over a non-empty range.
    fn reduce_lanes<I: LaneInt>(kind: ReduceKind, src: &[u8], stride: usize, r: EntityRange) -> I;

    /// Set or clear bit `i` of the `u32` bitset in `dst` for each `i` in `r`.
    fn visibility_bits(src: &[u8], sv: &ComponentView, dst: &mut [u8], r: EntityRange);

    /// Overwrite changed records inside `r`, clipped to `dst`.
    fn apply_delta_records(delta: &PackedDelta<'_>, dst: &mut [u8], r: EntityRange);
}

/// Run `kind` on tier `T`.
pub fn execute<T: OpSet>(
    kind: OpKind,
    inputs: &[ComponentView],
    outputs: &[ComponentView],
    params: &[u8],
    range: EntityRange,
    buffers: &mut BufferSet,
) {
    if !range.is_valid() {
        return;
    }
    match kind {
        OpKind::MemCopy => mem_copy::<T>(inputs, outputs, range, buffers),
        OpKind::MemFill => mem_fill::<T>(outputs, params, range, buffers),
        OpKind::Reduce(reduce) => reduce_int::<T>(reduce, inputs, outputs, range, buffers),
        OpKind::ApplyDelta => apply_delta::<T>(inputs, outputs, params, range, buffers),
        OpKind::VisibilityMask => visibility_mask::<T>(inputs, outputs, params, range, buffers),
    }
}

/// Kernel entry point for the scalar tier.
pub fn scalar_kernel(ctx: &CallContext, call: &KernelCall<'_>, env: &mut KernelEnv<'_>) {
    if let Some(kind) = OpKind::from_op(ctx.op) {
        execute::<Scalar>(kind, call.inputs, call.outputs, call.params, call.range, env.buffers);
    }
}

/// Kernel entry point for the SIMD tier.
pub fn simd_kernel(ctx: &CallContext, call: &KernelCall<'_>, env: &mut KernelEnv<'_>) {
    if let Some(kind) = OpKind::from_op(ctx.op) {
        execute::<Simd>(kind, call.inputs, call.outputs, call.params, call.range, env.buffers);
    }
}

fn mem_copy<T: OpSet>(
    inputs: &[ComponentView],
    outputs: &[ComponentView],
    range: EntityRange,
    buffers: &mut BufferSet,
) {
    let (Some(sv), Some(dv)) = (inputs.first(), outputs.first()) else {
        return;
    };
    if !sv.is_well_formed() || !dv.is_well_formed() || sv.elem_size != dv.elem_size {
        return;
    }
    let Some((src, dst)) = buffers.read_write(sv.buffer, dv.buffer) else {
        return;
    };
    let n = sv.backed_count(src.len()).min(dv.backed_count(dst.len()));
    let r = range.clamp_to(n);
    if !r.is_empty() {
        T::copy_elems(src, sv, dst, dv, r);
    }
}

fn mem_fill<T: OpSet>(
    outputs: &[ComponentView],
    pattern: &[u8],
    range: EntityRange,
    buffers: &mut BufferSet,
) {
    let Some(dv) = outputs.first() else {
        return;
    };
    if !dv.is_well_formed() || pattern.len() != dv.elem_size {
        return;
    }
    let Some(dst) = buffers.get_mut(dv.buffer) else {
        return;
    };
    let r = range.clamp_to(dv.backed_count(dst.len()));
    if !r.is_empty() {
        T::fill_elems(dst, dv, pattern, r);
    }
}

fn reduce_int<T: OpSet>(
    kind: ReduceKind,
    inputs: &[ComponentView],
    outputs: &[ComponentView],
    range: EntityRange,
    buffers: &mut BufferSet,
) {
    let (Some(sv), Some(dv)) = (inputs.first(), outputs.first()) else {
        return;
    };
    if !sv.is_well_formed() || !dv.is_well_formed() || sv.elem_type != dv.elem_type {
        return;
    }
    let Some((src, dst)) = buffers.read_write(sv.buffer, dv.buffer) else {
        return;
    };
    let dst_count = dv.backed_count(dst.len());
    if dst_count == 0 {
        return;
    }
    let r = range.clamp_to(sv.backed_count(src.len()).min(dst_count));
    match sv.elem_type {
        ElemType::U32 => reduce_typed::<T, u32>(kind, src, sv, dst, dv, r),
        ElemType::I32 => reduce_typed::<T, i32>(kind, src, sv, dst, dv, r),
        ElemType::U64 => reduce_typed::<T, u64>(kind, src, sv, dst, dv, r),
        ElemType::I64 => reduce_typed::<T, i64>(kind, src, sv, dst, dv, r),
        _ => {}
    }
}

fn reduce_typed<T: OpSet, I: LaneInt>(
    kind: ReduceKind,
    src: &[u8],
    sv: &ComponentView,
    dst: &mut [u8],
    dv: &ComponentView,
    r: EntityRange,
) {
    if sv.elem_size != I::SIZE || dv.elem_size != I::SIZE {
        return;
    }
    let result = if r.is_empty() {
        // An empty sum is zero; an empty min or max has no value.
        match kind {
            ReduceKind::Sum => I::ZERO,
            ReduceKind::Min | ReduceKind::Max => return,
        }
    } else {
        T::reduce_lanes::<I>(kind, src, sv.stride, r)
    };
    result.write_le(dst);
}

fn visibility_mask<T: OpSet>(
    inputs: &[ComponentView],
    outputs: &[ComponentView],
    params: &[u8],
    range: EntityRange,
    buffers: &mut BufferSet,
) {
    let (Some(sv), Some(dv)) = (inputs.first(), outputs.first()) else {
        return;
    };
    if !sv.is_well_formed()
        || !sv.elem_type.is_integer()
        || sv.elem_type.size() != Some(sv.elem_size)
    {
        return;
    }
    if dv.elem_type != ElemType::U32 || dv.elem_size != 4 || dv.stride != 4 {
        return;
    }
    let Some((src, dst)) = buffers.read_write(sv.buffer, dv.buffer) else {
        return;
    };

    let mut entities = sv.backed_count(src.len());
    if let Some(limit) = entity_count_override(params) {
        entities = entities.min(limit);
    }
    let bits = dv.backed_count(dst.len()).saturating_mul(32);
    let r = range.clamp_to(entities.min(bits));
    if !r.is_empty() {
        T::visibility_bits(src, sv, dst, r);
    }
}

/// First four parameter bytes, little-endian, when present.
fn entity_count_override(params: &[u8]) -> Option<usize> {
    let raw: [u8; 4] = params.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw) as usize)
}

fn apply_delta<T: OpSet>(
    inputs: &[ComponentView],
    outputs: &[ComponentView],
    params: &[u8],
    range: EntityRange,
    buffers: &mut BufferSet,
) {
    let (Some(bv), Some(ov)) = (inputs.first(), outputs.first()) else {
        return;
    };
    let Some(delta) = parse_delta(params) else {
        return;
    };
    if !ov.is_well_formed() || delta.stride != ov.stride {
        return;
    }
    let r = range.clamp_to(delta.entity_count);
    let base_bytes = |len: usize| bv.count.checked_mul(bv.stride).map_or(len, |n| n.min(len));
    let out_bytes = |len: usize| ov.count.checked_mul(ov.stride).map_or(len, |n| n.min(len));

    // In place: the baseline already sits in the output, only the tail past
    // it needs clearing.
    if bv.buffer == ov.buffer {
        let Some(dst) = buffers.get_mut(ov.buffer) else {
            return;
        };
        let capacity = out_bytes(dst.len());
        let copied = base_bytes(dst.len()).min(capacity);
        dst[copied..capacity].fill(0);
        if !r.is_empty() {
            T::apply_delta_records(&delta, &mut dst[..capacity], r);
        }
        return;
    }

    let Some((baseline, dst)) = buffers.read_write(bv.buffer, ov.buffer) else {
        return;
    };
    let capacity = out_bytes(dst.len());
    let copied = base_bytes(baseline.len()).min(capacity);
    dst[..copied].copy_from_slice(&baseline[..copied]);
    dst[copied..capacity].fill(0);
    if !r.is_empty() {
        T::apply_delta_records(&delta, &mut dst[..capacity], r);
    }
}

/// Any nonzero byte in element `i`.
#[inline]
pub(crate) fn is_truthy(src: &[u8], sv: &ComponentView, i: usize) -> bool {
    let at = i * sv.stride;
    src[at..at + sv.elem_size].iter().any(|&b| b != 0)
}

#[inline]
pub(crate) fn write_mask_bit(dst: &mut [u8], i: usize, on: bool) {
    let at = (i / 32) * 4;
    let word = &mut dst[at..at + 4];
    let mut value = u32::read_le(word);
    let bit = 1u32 << (i % 32);
    if on {
        value |= bit;
    } else {
        value &= !bit;
    }
    value.write_le(word);
}

/// Write the changed record for entity `i`, clipped to `r` and `dst`.
#[inline]
pub(crate) fn write_record(dst: &mut [u8], i: usize, record: &[u8], r: EntityRange) {
    if i < r.begin || i >= r.end {
        return;
    }
    let Some(at) = i.checked_mul(record.len()) else {
        return;
    };
    if at >= dst.len() {
        return;
    }
    let n = record.len().min(dst.len() - at);
    dst[at..at + n].copy_from_slice(&record[..n]);
}
