//! Hand-off of paths to the OS file manager.

use std::io;
use std::path::Path;

/// Opens a path outside the process.
pub trait Opener: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<()>;
}

/// Opens paths with the platform default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl Opener for SystemOpener {
    fn open(&self, path: &Path) -> io::Result<()> {
        open::that_detached(path)
    }
}

impl<F> Opener for F
where
    F: Fn(&Path) -> io::Result<()> + Send + Sync,
{
    fn open(&self, path: &Path) -> io::Result<()> {
        self(path)
    }
}
