//! DTLV capability container.
//!
//! All integers are little-endian `u32`.
//!
//! ```text
//! file    := "DTLV" | version | chunk_count | chunk*
//! chunk   := tag[4] | chunk_version | payload_len | record*
//! record  := tag[4] | len | field* | name_len | name
//! ```
//!
//! A record's `len` covers everything after it. The file holds a single
//! `CAPS` chunk with these records, in order:
//!
//! | tag    | fields                                                              |
//! |--------|---------------------------------------------------------------------|
//! | `RSLT` | result, fail_reason, fail_subsystem_id, entry_count                 |
//! | `HWCP` | os_flags, cpu_flags, gpu_flags                                      |
//! | `ENTR` | subsystem_id, grade, perf_class, priority, forced, backend_flags    |
//! | `DSYS` | subsystem_id, grade, perf_class, backend_flags (platform, if any)   |
//! | `DGFX` | subsystem_id, grade, perf_class, backend_flags (graphics, if any)   |
//!
//! `ENTR`, `DSYS` and `DGFX` carry the backend name; the others carry an
//! empty one. Signed values (result, priority) are stored as their two's
//! complement bit pattern.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::info;

use crate::caps::descriptor::subsystem;
use crate::caps::hw::HwCaps;
use crate::caps::select::{Selection, SelectionEntry};

pub const DTLV_MAGIC: [u8; 4] = *b"DTLV";
pub const DTLV_VERSION: u32 = 1;
pub const CAPS_CHUNK_VERSION: u32 = 1;

pub mod tag {
    pub const CAPS: [u8; 4] = *b"CAPS";
    pub const RSLT: [u8; 4] = *b"RSLT";
    pub const HWCP: [u8; 4] = *b"HWCP";
    pub const ENTR: [u8; 4] = *b"ENTR";
    pub const DSYS: [u8; 4] = *b"DSYS";
    pub const DGFX: [u8; 4] = *b"DGFX";
}

/// Number of `u32` fields preceding the name for a known record tag.
pub fn field_count(record_tag: [u8; 4]) -> Option<usize> {
    match record_tag {
        tag::RSLT => Some(4),
        tag::HWCP => Some(3),
        tag::ENTR => Some(6),
        tag::DSYS | tag::DGFX => Some(4),
        _ => None,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u32),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("unknown record tag {0:?}")]
    UnknownTag([u8; 4]),

    #[error("record {tag:?} has inconsistent length")]
    BadRecordLength { tag: [u8; 4] },

    #[error("record name is not valid UTF-8")]
    BadName,

    #[error("{0} trailing bytes after last chunk")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tag: [u8; 4],
    pub fields: Vec<u32>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub tag: [u8; 4],
    pub version: u32,
    pub records: Vec<Record>,
}

impl Chunk {
    pub fn records_tagged(&self, record_tag: [u8; 4]) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.tag == record_tag)
    }
}

fn put_record(buf: &mut BytesMut, record_tag: [u8; 4], fields: &[u32], name: &str) {
    let len = fields.len() * 4 + 4 + name.len();
    buf.put_slice(&record_tag);
    buf.put_u32_le(len as u32);
    for &field in fields {
        buf.put_u32_le(field);
    }
    buf.put_u32_le(name.len() as u32);
    buf.put_slice(name.as_bytes());
}

fn put_summary(buf: &mut BytesMut, record_tag: [u8; 4], entry: Option<&SelectionEntry>) {
    if let Some(e) = entry {
        put_record(
            buf,
            record_tag,
            &[
                e.subsystem_id,
                e.determinism_grade as u32,
                e.perf_class as u32,
                e.backend_flags,
            ],
            &e.backend_name,
        );
    }
}

/// Encode a selection and its hardware snapshot as a DTLV container.
pub fn encode_capabilities(sel: &Selection, hw: &HwCaps) -> Bytes {
    let mut payload = BytesMut::with_capacity(64 + sel.entries.len() * 48);
    put_record(
        &mut payload,
        tag::RSLT,
        &[
            sel.result_code() as u32,
            sel.fail_reason().code(),
            sel.fail_subsystem_id(),
            sel.entries.len() as u32,
        ],
        "",
    );
    put_record(
        &mut payload,
        tag::HWCP,
        &[hw.os_flags, hw.cpu_flags, hw.gpu_flags],
        "",
    );
    for e in &sel.entries {
        put_record(
            &mut payload,
            tag::ENTR,
            &[
                e.subsystem_id,
                e.determinism_grade as u32,
                e.perf_class as u32,
                e.priority as u32,
                u32::from(e.forced_by_override),
                e.backend_flags,
            ],
            &e.backend_name,
        );
    }
    put_summary(&mut payload, tag::DSYS, sel.entry(subsystem::PLATFORM));
    put_summary(&mut payload, tag::DGFX, sel.entry(subsystem::GRAPHICS));

    let mut out = BytesMut::with_capacity(12 + 12 + payload.len());
    out.put_slice(&DTLV_MAGIC);
    out.put_u32_le(DTLV_VERSION);
    out.put_u32_le(1);
    out.put_slice(&tag::CAPS);
    out.put_u32_le(CAPS_CHUNK_VERSION);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(&payload);
    out.freeze()
}

/// Write the DTLV container for `sel` to `path`.
pub fn write_capabilities_tlv(sel: &Selection, hw: &HwCaps, path: &Path) -> Result<()> {
    let bytes = encode_capabilities(sel, hw);
    fs::write(path, &bytes)
        .with_context(|| format!("failed to write capabilities TLV to {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "capabilities TLV written");
    Ok(())
}

fn take_tag(buf: &mut &[u8], what: &'static str) -> Result<[u8; 4], TlvError> {
    if buf.remaining() < 4 {
        return Err(TlvError::Truncated(what));
    }
    let mut t = [0u8; 4];
    buf.copy_to_slice(&mut t);
    Ok(t)
}

fn take_u32(buf: &mut &[u8], what: &'static str) -> Result<u32, TlvError> {
    if buf.remaining() < 4 {
        return Err(TlvError::Truncated(what));
    }
    Ok(buf.get_u32_le())
}

fn read_record(buf: &mut &[u8]) -> Result<Record, TlvError> {
    let record_tag = take_tag(buf, "record tag")?;
    let len = take_u32(buf, "record length")? as usize;
    if buf.remaining() < len {
        return Err(TlvError::Truncated("record body"));
    }
    let mut body = &buf[..len];
    buf.advance(len);

    let count = field_count(record_tag).ok_or(TlvError::UnknownTag(record_tag))?;
    let bad_len = TlvError::BadRecordLength { tag: record_tag };
    if body.remaining() < count * 4 + 4 {
        return Err(bad_len);
    }
    let fields = (0..count).map(|_| body.get_u32_le()).collect();
    let name_len = body.get_u32_le() as usize;
    if body.remaining() != name_len {
        return Err(bad_len);
    }
    let name = std::str::from_utf8(body)
        .map_err(|_| TlvError::BadName)?
        .to_owned();

    Ok(Record {
        tag: record_tag,
        fields,
        name,
    })
}

/// Decode and validate a DTLV container.
pub fn read_container(data: &[u8]) -> Result<Vec<Chunk>, TlvError> {
    let mut buf = data;
    let magic = take_tag(&mut buf, "magic")?;
    if magic != DTLV_MAGIC {
        return Err(TlvError::BadMagic(magic));
    }
    let version = take_u32(&mut buf, "version")?;
    if version != DTLV_VERSION {
        return Err(TlvError::UnsupportedVersion(version));
    }
    let chunk_count = take_u32(&mut buf, "chunk count")?;

    let mut chunks = Vec::new();
    for _ in 0..chunk_count {
        let chunk_tag = take_tag(&mut buf, "chunk tag")?;
        let chunk_version = take_u32(&mut buf, "chunk version")?;
        let payload_len = take_u32(&mut buf, "chunk length")? as usize;
        if buf.remaining() < payload_len {
            return Err(TlvError::Truncated("chunk payload"));
        }
        let mut payload = &buf[..payload_len];
        buf.advance(payload_len);

        let mut records = Vec::new();
        while payload.has_remaining() {
            records.push(read_record(&mut payload)?);
        }
        chunks.push(Chunk {
            tag: chunk_tag,
            version: chunk_version,
            records,
        });
    }

    if buf.has_remaining() {
        return Err(TlvError::TrailingBytes(buf.remaining()));
    }
    Ok(chunks)
}
