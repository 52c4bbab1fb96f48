//! Packed component deltas.
//!
//! ```text
//! offset  size                 field
//! 0       16                   reserved (ignored on apply)
//! 16      4                    entity_count (u32 LE)
//! 20      4                    stride (u32 LE)
//! 24      ceil(count / 8)      changed mask, LSB-first
//! ..      popcount * stride    one record per changed entity, in mask order
//! ```
//!
//! Mask bits at or past `entity_count` are padding and ignored.

pub const DELTA_HEADER_LEN: usize = 24;

const ENTITY_COUNT_OFFSET: usize = 16;
const STRIDE_OFFSET: usize = 20;

/// A validated delta borrowed from a parameter blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedDelta<'a> {
    pub entity_count: usize,
    pub stride: usize,
    pub mask: &'a [u8],
    /// Exactly `changed_count * stride` bytes.
    pub payload: &'a [u8],
}

impl<'a> PackedDelta<'a> {
    pub fn is_changed(&self, i: usize) -> bool {
        i < self.entity_count && self.mask[i / 8] >> (i % 8) & 1 == 1
    }

    /// Mask byte `k` with padding bits cleared.
    pub fn mask_byte(&self, k: usize) -> u8 {
        let byte = self.mask[k];
        let valid = self.entity_count - k * 8;
        if valid >= 8 {
            byte
        } else {
            byte & ((1u8 << valid) - 1)
        }
    }

    pub fn record(&self, n: usize) -> &'a [u8] {
        &self.payload[n * self.stride..(n + 1) * self.stride]
    }
}

fn read_u32(params: &[u8], at: usize) -> usize {
    u32::from_le_bytes([params[at], params[at + 1], params[at + 2], params[at + 3]]) as usize
}

/// Validate a delta blob. `None` for anything truncated or inconsistent.
pub fn parse_delta(params: &[u8]) -> Option<PackedDelta<'_>> {
    if params.len() < DELTA_HEADER_LEN {
        return None;
    }
    let entity_count = read_u32(params, ENTITY_COUNT_OFFSET);
    let stride = read_u32(params, STRIDE_OFFSET);
    if stride == 0 {
        return None;
    }

    let mask_len = entity_count.div_ceil(8);
    let mask = params.get(DELTA_HEADER_LEN..DELTA_HEADER_LEN.checked_add(mask_len)?)?;
    let mut delta = PackedDelta {
        entity_count,
        stride,
        mask,
        payload: &[],
    };

    let changed: usize = (0..mask_len)
        .map(|k| delta.mask_byte(k).count_ones() as usize)
        .sum();
    let payload_start = DELTA_HEADER_LEN + mask_len;
    let payload_end = payload_start.checked_add(changed.checked_mul(stride)?)?;
    delta.payload = params.get(payload_start..payload_end)?;
    Some(delta)
}

/// Build a delta blob. `changes` must be sorted by entity index; entries at
/// or past `entity_count` are dropped, as are records of the wrong length.
pub fn encode_packed_delta(entity_count: u32, stride: u32, changes: &[(u32, &[u8])]) -> Vec<u8> {
    let mask_len = (entity_count as usize).div_ceil(8);
    let mut out = vec![0u8; DELTA_HEADER_LEN + mask_len];
    out[ENTITY_COUNT_OFFSET..ENTITY_COUNT_OFFSET + 4].copy_from_slice(&entity_count.to_le_bytes());
    out[STRIDE_OFFSET..STRIDE_OFFSET + 4].copy_from_slice(&stride.to_le_bytes());

    for &(index, record) in changes {
        if index >= entity_count || record.len() != stride as usize {
            continue;
        }
        let i = index as usize;
        out[DELTA_HEADER_LEN + i / 8] |= 1 << (i % 8);
        out.extend_from_slice(record);
    }
    out
}
