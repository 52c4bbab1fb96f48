//! Component views over caller-owned buffers.
//!
//! A [`ComponentView`] is a plain `Copy` descriptor: element layout plus a
//! [`BufferId`]. It only turns into bytes when resolved against the
//! [`BufferSet`] that owns the storage, which is also what lets deferred GPU
//! jobs hold on to views without borrowing anything.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// Opaque fixed-size records.
    Bytes,
}

impl ElemType {
    /// Natural size in bytes, `None` for [`ElemType::Bytes`].
    pub const fn size(self) -> Option<usize> {
        match self {
            ElemType::U8 | ElemType::I8 => Some(1),
            ElemType::U16 | ElemType::I16 => Some(2),
            ElemType::U32 | ElemType::I32 | ElemType::F32 => Some(4),
            ElemType::U64 | ElemType::I64 | ElemType::F64 => Some(8),
            ElemType::Bytes => None,
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ElemType::U8
                | ElemType::I8
                | ElemType::U16
                | ElemType::I16
                | ElemType::U32
                | ElemType::I32
                | ElemType::U64
                | ElemType::I64
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    Reduce,
}

/// Handle to a buffer inside a [`BufferSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentView {
    pub buffer: BufferId,
    pub elem_type: ElemType,
    pub elem_size: usize,
    /// Distance in bytes between consecutive elements.
    pub stride: usize,
    pub count: usize,
    pub access: AccessMode,
}

impl ComponentView {
    /// A tightly packed view of `count` elements of a sized type. Use
    /// [`ComponentView::records`] for [`ElemType::Bytes`].
    pub fn new(buffer: BufferId, elem_type: ElemType, count: usize, access: AccessMode) -> Self {
        let elem_size = elem_type.size().unwrap_or(0);
        Self {
            buffer,
            elem_type,
            elem_size,
            stride: elem_size,
            count,
            access,
        }
    }

    /// A tightly packed view of opaque `elem_size`-byte records.
    pub fn records(buffer: BufferId, elem_size: usize, count: usize, access: AccessMode) -> Self {
        Self {
            buffer,
            elem_type: ElemType::Bytes,
            elem_size,
            stride: elem_size,
            count,
            access,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Placeholder used to fill fixed view arrays.
    pub const fn unbound() -> Self {
        Self {
            buffer: BufferId(u32::MAX),
            elem_type: ElemType::Bytes,
            elem_size: 0,
            stride: 0,
            count: 0,
            access: AccessMode::Read,
        }
    }

    /// Non-empty elements that do not overlap their neighbours.
    pub fn is_well_formed(&self) -> bool {
        self.elem_size > 0 && self.stride >= self.elem_size
    }

    /// Bytes spanned by the first `n` elements.
    pub fn span_len(&self, n: usize) -> Option<usize> {
        if n == 0 {
            return Some(0);
        }
        (n - 1).checked_mul(self.stride)?.checked_add(self.elem_size)
    }

    /// Byte offset of element `index`.
    pub fn offset_of(&self, index: usize) -> Option<usize> {
        index.checked_mul(self.stride)
    }

    /// Number of elements actually backed by a buffer of `len` bytes.
    pub fn backed_count(&self, len: usize) -> usize {
        if !self.is_well_formed() || len < self.elem_size {
            return 0;
        }
        ((len - self.elem_size) / self.stride + 1).min(self.count)
    }
}

/// Half-open entity range `[begin, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct EntityRange {
    pub begin: usize,
    pub end: usize,
}

impl EntityRange {
    pub const fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    pub const fn is_valid(&self) -> bool {
        self.begin <= self.end
    }

    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intersection with `[0, count)`; empty when disjoint.
    pub fn clamp_to(&self, count: usize) -> EntityRange {
        let end = self.end.min(count);
        let begin = self.begin.min(end);
        EntityRange { begin, end }
    }
}

/// Caller-owned storage that views resolve against.
#[derive(Debug, Default, Clone)]
pub struct BufferSet {
    buffers: Vec<Vec<u8>>,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `data` and return its handle.
    pub fn insert(&mut self, data: Vec<u8>) -> BufferId {
        self.buffers.push(data);
        BufferId((self.buffers.len() - 1) as u32)
    }

    /// A zeroed buffer of `len` bytes.
    pub fn alloc(&mut self, len: usize) -> BufferId {
        self.insert(vec![0; len])
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id.0 as usize).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut [u8]> {
        self.buffers.get_mut(id.0 as usize).map(Vec::as_mut_slice)
    }

    /// Borrow `src` for reading and `dst` for writing at the same time.
    /// `None` when either is missing or both name the same buffer.
    pub fn read_write(&mut self, src: BufferId, dst: BufferId) -> Option<(&[u8], &mut [u8])> {
        let (s, d) = (src.0 as usize, dst.0 as usize);
        if s == d || s >= self.buffers.len() || d >= self.buffers.len() {
            return None;
        }
        if s < d {
            let (lo, hi) = self.buffers.split_at_mut(d);
            Some((lo[s].as_slice(), hi[0].as_mut_slice()))
        } else {
            let (lo, hi) = self.buffers.split_at_mut(s);
            Some((hi[0].as_slice(), lo[d].as_mut_slice()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_geometry() {
        let v = ComponentView::new(BufferId(0), ElemType::U32, 4, AccessMode::Read);
        assert_eq!(v.elem_size, 4);
        assert_eq!(v.span_len(4), Some(16));
        assert_eq!(v.span_len(0), Some(0));

        let strided = v.with_stride(8);
        assert_eq!(strided.span_len(3), Some(20));
        assert_eq!(strided.offset_of(2), Some(16));
        assert_eq!(strided.backed_count(20), 3);
        assert_eq!(strided.backed_count(19), 2);
        assert_eq!(strided.backed_count(3), 0);
    }

    #[test]
    fn test_view_well_formed() {
        let v = ComponentView::new(BufferId(0), ElemType::U16, 2, AccessMode::Write);
        assert!(v.is_well_formed());
        assert!(!v.with_stride(1).is_well_formed());
        assert!(!ComponentView::new(BufferId(0), ElemType::Bytes, 2, AccessMode::Read).is_well_formed());
        assert!(!ComponentView::unbound().is_well_formed());
    }

    #[test]
    fn test_range_clamp() {
        assert_eq!(EntityRange::new(2, 10).clamp_to(5), EntityRange::new(2, 5));
        assert!(EntityRange::new(7, 10).clamp_to(5).is_empty());
        assert!(!EntityRange::new(3, 1).is_valid());
        assert_eq!(EntityRange::new(3, 1).len(), 0);
    }

    #[test]
    fn test_buffer_set_split_borrows() {
        let mut set = BufferSet::new();
        let a = set.insert(vec![1, 2, 3]);
        let b = set.alloc(3);

        let (src, dst) = set.read_write(a, b).unwrap();
        dst.copy_from_slice(src);
        assert_eq!(set.get(b), Some(&[1u8, 2, 3][..]));

        let (src, dst) = set.read_write(b, a).unwrap();
        assert_eq!(src.len(), dst.len());

        assert!(set.read_write(a, a).is_none());
        assert!(set.read_write(a, BufferId(9)).is_none());
    }
}
