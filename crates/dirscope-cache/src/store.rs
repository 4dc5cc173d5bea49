//! On-disk cache of scan results, keyed by the SHA-256 of a caller key.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dirscope_core::Entry;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::codec::{Decoder, Encoder};
use crate::error::CacheError;

/// Name of the cache directory under the user cache directory.
pub const CACHE_DIR_NAME: &str = "dirscope";

/// Leading bytes of every cache file.
pub const MAGIC: [u8; 3] = *b"DSC";

/// Current file format version.
pub const FORMAT_VERSION: u8 = 1;

const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Directory of cache files, one per key.
///
/// Each file holds a 5-byte preamble (magic, version, flags) followed by
/// the codec stream, gzip-compressed when the flags say so. Reads honour
/// the flags of the file, so a cache can switch compression on or off
/// without invalidating existing entries.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    compress: bool,
}

impl Cache {
    /// Open a cache rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(Self { dir, compress })
    }

    /// Open the cache under the platform cache directory, optionally
    /// wiping it first.
    pub fn open_default(clear: bool, compress: bool) -> Result<Self, CacheError> {
        let dir = dirs::cache_dir()
            .ok_or(CacheError::NoCacheDir)?
            .join(CACHE_DIR_NAME);

        let cache = Self::new(dir, compress)?;
        if clear {
            cache.clear()?;
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Lowercase hex SHA-256 of a key.
    pub fn key_hash(key: &str) -> String {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }

    /// File that stores the value for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::key_hash(key))
    }

    pub fn has(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Load the tree stored under `key`.
    ///
    /// A missing file is reported as [`CacheError::NoCache`].
    pub fn get(&self, key: &str) -> Result<Arc<Entry>, CacheError> {
        let path = self.path_for(key);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(key, "cache miss");
                return Err(CacheError::NoCache);
            }
            Err(err) => return Err(CacheError::io(&path, err)),
        };

        let mut reader = BufReader::new(file);
        let mut preamble = [0u8; 5];
        reader.read_exact(&mut preamble).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => CacheError::malformed("missing file preamble"),
            _ => CacheError::io(&path, err),
        })?;

        let magic = [preamble[0], preamble[1], preamble[2]];
        let version = preamble[3];
        if magic != MAGIC || version != FORMAT_VERSION {
            return Err(CacheError::UnsupportedFormat { magic, version });
        }

        let entry = if preamble[4] & FLAG_COMPRESSED != 0 {
            read_tree(GzDecoder::new(reader))?
        } else {
            read_tree(reader)?
        };

        debug!(key, path = %path.display(), "cache hit");
        Ok(entry)
    }

    /// Store the tree rooted at `entry` under `key`, replacing any previous
    /// value. The file is written to a temporary sibling and renamed into
    /// place.
    pub fn set(&self, key: &str, entry: &Entry) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");

        if let Err(err) = self.write_file(&tmp, entry) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        fs::rename(&tmp, &path).map_err(|e| CacheError::io(&path, e))?;
        debug!(key, path = %path.display(), compressed = self.compress, "cache written");
        Ok(())
    }

    fn write_file(&self, path: &Path, entry: &Entry) -> Result<(), CacheError> {
        let file = File::create(path).map_err(|e| CacheError::io(path, e))?;
        let mut writer = BufWriter::new(file);

        let flags = if self.compress { FLAG_COMPRESSED } else { 0 };
        writer.write_all(&MAGIC)?;
        writer.write_all(&[FORMAT_VERSION, flags])?;

        let mut writer = if self.compress {
            let mut encoder = Encoder::new(GzEncoder::new(writer, Compression::fast()));
            encoder.encode(entry)?;
            encoder.into_inner().finish()?
        } else {
            let mut encoder = Encoder::new(writer);
            encoder.encode(entry)?;
            encoder.into_inner()
        };

        writer.flush()?;
        Ok(())
    }

    /// Drop the value stored under `key`. Missing values are not an error.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(&path, err)),
        }
    }

    /// Delete every cache file. Files that do not look like cache entries
    /// are left alone.
    pub fn clear(&self) -> Result<(), CacheError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

        let mut removed = 0usize;
        for dent in entries {
            let dent = dent.map_err(|e| CacheError::io(&self.dir, e))?;
            let name = dent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            let stem = name.strip_suffix(".tmp").unwrap_or(name);
            if !is_key_hash(stem) {
                continue;
            }

            match fs::remove_file(dent.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %dent.path().display(), %err, "failed to remove cache file"),
            }
        }

        debug!(dir = %self.dir.display(), removed, "cache cleared");
        Ok(())
    }
}

fn read_tree<R: Read>(reader: R) -> Result<Arc<Entry>, CacheError> {
    let mut decoder = Decoder::new(reader);
    let entry = decoder.decode()?;

    let mut probe = [0u8; 1];
    if decoder.into_inner().read(&mut probe)? != 0 {
        return Err(CacheError::malformed("trailing data after the root entry"));
    }

    Ok(entry)
}

fn is_key_hash(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
