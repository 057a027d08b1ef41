//! Binary index file codec.
//!
//! # Layout (little-endian)
//!
//! ```text
//! "RGLX" | version u16 | metric u8 | kind u8 | dimension u32
//! model  u16 len + bytes
//! count  u64
//! sha256 [u8; 32] over the header above plus every record below
//! count × record:
//!     chunk_id u16+bytes | doc_id u16+bytes | source u16+bytes
//!     chunk_index u32 | start u64 | end u64 | text u32+bytes
//!     dimension × f32
//! ```
//!
//! The checksum covers the header fields as well as the records, so a
//! damaged metric, kind, dimension, model or count byte is caught before
//! the file is interpreted. Every decoding failure (bad magic, unknown
//! version, checksum mismatch, short read, record count disagreement) maps
//! to [`RagError::IndexCorrupt`].

use sha2::{Digest, Sha256};

use super::{IndexKind, Metric};
use crate::embedding::vec_to_bytes;
use crate::error::{RagError, Result};
use crate::models::{ChunkMeta, EmbeddingVector, IndexEntry};

pub(crate) const MAGIC: &[u8; 4] = b"RGLX";
pub(crate) const VERSION: u16 = 1;

/// Everything needed to rebuild an index.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub metric: Metric,
    pub kind: IndexKind,
    pub dimension: usize,
    pub model: String,
    pub entries: Vec<IndexEntry>,
}

pub(crate) fn encode<'a>(
    metric: Metric,
    kind: IndexKind,
    dimension: usize,
    model: &str,
    entries: impl ExactSizeIterator<Item = &'a IndexEntry>,
) -> Result<Vec<u8>> {
    let count = entries.len() as u64;

    let mut payload = Vec::new();
    for entry in entries {
        put_str16(&mut payload, &entry.chunk_id)?;
        put_str16(&mut payload, &entry.meta.document_id)?;
        put_str16(&mut payload, &entry.meta.source)?;
        payload.extend_from_slice(&entry.meta.chunk_index.to_le_bytes());
        payload.extend_from_slice(&(entry.meta.start as u64).to_le_bytes());
        payload.extend_from_slice(&(entry.meta.end as u64).to_le_bytes());
        let text = entry.meta.text.as_bytes();
        let text_len = u32::try_from(text.len())
            .map_err(|_| RagError::config("chunk text too large to persist"))?;
        payload.extend_from_slice(&text_len.to_le_bytes());
        payload.extend_from_slice(text);
        payload.extend_from_slice(&vec_to_bytes(&entry.vector.values));
    }

    let dim = u32::try_from(dimension).map_err(|_| RagError::config("dimension too large"))?;

    let mut out = Vec::with_capacity(64 + model.len() + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.push(metric.code());
    out.push(kind.code());
    out.extend_from_slice(&dim.to_le_bytes());
    put_str16(&mut out, model)?;
    out.extend_from_slice(&count.to_le_bytes());
    let checksum = digest(&out, &payload);
    out.extend_from_slice(&checksum);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn digest(header: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(header);
    hasher.update(payload);
    hasher.finalize().into()
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let mut r = Reader::new(bytes);

    if r.take(4)? != MAGIC {
        return Err(RagError::corrupt("bad magic (not a ragline index file)"));
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(RagError::corrupt(format!("unsupported version {}", version)));
    }
    let metric = Metric::from_code(r.u8()?)
        .ok_or_else(|| RagError::corrupt("unknown metric code"))?;
    let kind = IndexKind::from_code(r.u8()?)
        .ok_or_else(|| RagError::corrupt("unknown index kind code"))?;
    let dimension = r.u32()? as usize;
    let model = r.str16()?;
    let count = r.u64()?;
    let header = &bytes[..r.pos];
    let checksum = r.take(32)?;

    let payload = r.rest();
    if digest(header, payload).as_slice() != checksum {
        return Err(RagError::corrupt("checksum mismatch"));
    }

    let mut p = Reader::new(payload);
    let mut entries = Vec::new();
    while !p.is_empty() {
        let chunk_id = p.str16()?;
        let document_id = p.str16()?;
        let source = p.str16()?;
        let chunk_index = p.u32()?;
        let start = p.u64()? as usize;
        let end = p.u64()? as usize;
        let text_len = p.u32()? as usize;
        let text = utf8(p.take(text_len)?)?;
        let values = (0..dimension)
            .map(|_| p.f32())
            .collect::<Result<Vec<f32>>>()?;

        entries.push(IndexEntry {
            chunk_id,
            vector: EmbeddingVector::new(model.clone(), values),
            meta: ChunkMeta {
                document_id,
                source,
                chunk_index,
                start,
                end,
                text,
            },
        });
    }

    if entries.len() as u64 != count {
        return Err(RagError::corrupt(format!(
            "header declares {} entries but {} records were found",
            count,
            entries.len()
        )));
    }

    Ok(Snapshot {
        metric,
        kind,
        dimension,
        model,
        entries,
    })
}

fn put_str16(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| RagError::config(format!("string too long to persist ({} bytes)", s.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| RagError::corrupt("invalid UTF-8 in record"))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| RagError::corrupt("unexpected end of file"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn str16(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        utf8(self.take(len)?)
    }
}
