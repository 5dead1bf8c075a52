use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::warn;

use crate::error::{MigrateError, Result};

/// Write-then-publish file writer. Bytes go to a temporary file in the
/// destination's parent directory; only a successful `close` renames it onto
/// the destination. A writer that is dropped or abandoned removes its temp
/// file and leaves the destination untouched, so the destination path only
/// ever holds a complete file.
pub struct AtomicWriter {
    dest_path: PathBuf,
    temp: Option<NamedTempFile>,
}

impl AtomicWriter {
    pub fn create(dest_path: &Path) -> Result<Self> {
        let dir = dest_path.parent().ok_or_else(|| {
            MigrateError::Config(format!("destination {} has no parent", dest_path.display()))
        })?;
        let base = dest_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment");
        let temp = Builder::new()
            .prefix(&format!("tmp-{}", base))
            .tempfile_in(dir)?;
        Ok(Self {
            dest_path: dest_path.to_path_buf(),
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dest_path
    }

    /// Flushes and atomically renames the temp file onto the destination.
    pub fn close(mut self) -> Result<()> {
        let mut temp = match self.temp.take() {
            Some(t) => t,
            None => return Ok(()),
        };
        temp.flush()?;
        temp.persist(&self.dest_path)
            .map_err(|e| MigrateError::Io(e.error))?;
        Ok(())
    }

    /// Discards the pending write. The destination is never created.
    pub fn abandon(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if let Some(temp) = self.temp.take() {
            let path = temp.path().to_path_buf();
            if let Err(e) = temp.close() {
                warn!("failed to remove temporary file {}: {}", path.display(), e);
            }
        }
    }

    fn temp_mut(&mut self) -> io::Result<&mut NamedTempFile> {
        self.temp
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer already closed"))
    }
}

impl Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp_mut()?.flush()
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        self.discard();
    }
}
