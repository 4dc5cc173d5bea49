//! Compact binary encoding of an [`Entry`] subtree.
//!
//! Each entry is written as a fixed-width little-endian header followed by
//! its path and then, recursively, its children in order:
//!
//! | field         | width |
//! |---------------|-------|
//! | mod time      | i64   |
//! | size          | u64   |
//! | local dirs    | u64   |
//! | local files   | u64   |
//! | total dirs    | u64   |
//! | total files   | u64   |
//! | is dir        | u8    |
//! | child count   | u32   |
//! | path length   | u32   |
//! | path          | UTF-8 |

use std::io::{self, Read, Write};
use std::sync::Arc;

use dirscope_core::{Entry, EntryRecord};

use crate::error::CacheError;

/// Bytes of the fixed part of a record, including the path length.
pub const HEADER_LEN: usize = 8 * 6 + 1 + 4 + 4;

/// Deepest nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 4096;

/// Largest child list preallocated from an untrusted count.
const MAX_PREALLOC: usize = 1024;

/// Largest path accepted by the decoder.
const MAX_PATH_LEN: usize = 64 * 1024;

/// Writes entries to a byte sink.
pub struct Encoder<W> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode `entry` and its whole subtree.
    pub fn encode(&mut self, entry: &Entry) -> Result<(), CacheError> {
        let children = entry.children();
        let count = u32::try_from(children.len())
            .map_err(|_| CacheError::malformed(format!("too many children in {}", entry.path())))?;

        self.write_record(&entry.record(), count)?;

        for child in &children {
            self.encode(child)?;
        }

        Ok(())
    }

    fn write_record(&mut self, record: &EntryRecord, count: u32) -> Result<(), CacheError> {
        let path = record.path.as_bytes();
        let path_len = u32::try_from(path.len())
            .map_err(|_| CacheError::malformed("path does not fit the record"))?;

        let mut header = [0u8; HEADER_LEN];
        header[0..8].copy_from_slice(&record.mod_time.to_le_bytes());
        header[8..16].copy_from_slice(&record.size.to_le_bytes());
        header[16..24].copy_from_slice(&record.local_dirs.to_le_bytes());
        header[24..32].copy_from_slice(&record.local_files.to_le_bytes());
        header[32..40].copy_from_slice(&record.total_dirs.to_le_bytes());
        header[40..48].copy_from_slice(&record.total_files.to_le_bytes());
        header[48] = u8::from(record.is_dir);
        header[49..53].copy_from_slice(&count.to_le_bytes());
        header[53..57].copy_from_slice(&path_len.to_le_bytes());

        self.writer.write_all(&header)?;
        self.writer.write_all(path)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads entries back from a byte source.
pub struct Decoder<R> {
    reader: R,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Decode one entry and its subtree.
    pub fn decode(&mut self) -> Result<Arc<Entry>, CacheError> {
        self.decode_at(0)
    }

    fn decode_at(&mut self, depth: usize) -> Result<Arc<Entry>, CacheError> {
        if depth > MAX_DEPTH {
            return Err(CacheError::malformed("tree is nested too deeply"));
        }

        let (record, count) = self.read_record()?;

        if !record.is_dir && count > 0 {
            return Err(CacheError::malformed(format!(
                "file {} declares {count} children",
                record.path
            )));
        }

        if record.is_dir && record.local_dirs.saturating_add(record.local_files) != count as u64 {
            return Err(CacheError::malformed(format!(
                "child count mismatch in {}: {} declared, {} counted",
                record.path,
                count,
                record.local_dirs.saturating_add(record.local_files)
            )));
        }

        let mut children = Vec::with_capacity((count as usize).min(MAX_PREALLOC));
        for _ in 0..count {
            children.push(self.decode_at(depth + 1)?);
        }

        Ok(Arc::new(Entry::from_record(record, children)))
    }

    fn read_record(&mut self) -> Result<(EntryRecord, u32), CacheError> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header)?;

        let is_dir = match header[48] {
            0 => false,
            1 => true,
            other => {
                return Err(CacheError::malformed(format!("invalid directory flag {other}")));
            }
        };

        let count = u32_at(&header, 49);
        let path_len = u32_at(&header, 53) as usize;
        if path_len > MAX_PATH_LEN {
            return Err(CacheError::malformed(format!("path length {path_len} out of range")));
        }

        let mut path = vec![0u8; path_len];
        self.read_exact(&mut path)?;
        let path = String::from_utf8(path)
            .map_err(|_| CacheError::malformed("path is not valid UTF-8"))?;

        let record = EntryRecord {
            path,
            is_dir,
            mod_time: i64::from_le_bytes(array_at(&header, 0)),
            size: u64_at(&header, 8),
            local_dirs: u64_at(&header, 16),
            local_files: u64_at(&header, 24),
            total_dirs: u64_at(&header, 32),
            total_files: u64_at(&header, 40),
        };

        Ok((record, count))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CacheError> {
        self.reader.read_exact(buf).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                CacheError::malformed("truncated record")
            } else {
                CacheError::Stream(err)
            }
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn array_at<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

fn u64_at(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(array_at(buf, offset))
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(array_at(buf, offset))
}

/// Encode a subtree into a new buffer.
pub fn encode(entry: &Entry) -> Result<Vec<u8>, CacheError> {
    let mut encoder = Encoder::new(Vec::new());
    encoder.encode(entry)?;
    Ok(encoder.into_inner())
}

/// Decode a buffer holding exactly one encoded subtree.
pub fn decode(bytes: &[u8]) -> Result<Arc<Entry>, CacheError> {
    let mut decoder = Decoder::new(bytes);
    let entry = decoder.decode()?;

    let rest = decoder.into_inner();
    if !rest.is_empty() {
        return Err(CacheError::malformed(format!(
            "{} trailing bytes after the root entry",
            rest.len()
        )));
    }

    Ok(entry)
}
