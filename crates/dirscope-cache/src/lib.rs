//! Scan-result persistence for dirscope.
//!
//! [`codec`] turns an [`Entry`](dirscope_core::Entry) subtree into a compact
//! binary stream and back. [`Cache`] stores those streams on disk, one file
//! per key, so a finished scan can seed the tree on the next start instead
//! of walking the filesystem again.
//!
//! ```rust,no_run
//! use dirscope_cache::{Cache, CacheError};
//!
//! let cache = Cache::open_default(false, true)?;
//! match cache.get("/home") {
//!     Ok(root) => println!("cached: {} bytes", root.size()),
//!     Err(CacheError::NoCache) => println!("not cached yet"),
//!     Err(err) => return Err(err),
//! }
//! # Ok::<(), CacheError>(())
//! ```

pub mod codec;
mod error;
mod store;

pub use codec::{Decoder, Encoder};
pub use error::CacheError;
pub use store::{CACHE_DIR_NAME, Cache, FORMAT_VERSION, MAGIC};
