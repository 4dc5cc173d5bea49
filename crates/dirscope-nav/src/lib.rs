//! Navigation for dirscope.
//!
//! [`Navigation`] walks from the volume list into a scanned tree and back,
//! and serializes the operations that mutate it: background scans,
//! in-place refreshes and deletions.

mod error;
mod navigation;
mod opener;

pub use error::NavError;
pub use navigation::{Navigation, State};
pub use opener::{Opener, SystemOpener};
