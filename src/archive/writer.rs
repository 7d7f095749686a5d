//! Destination side of the tar stream layer.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tar::Builder;

use super::{padded_size, ExactReader, SourceEntry, BLOCK_SIZE};
use crate::error::SplitError;

/// One output archive being assembled from verbatim source entries.
///
/// The inner `tar::Builder` owns the end-of-archive marker: `finish` writes it
/// explicitly, and dropping an unfinished writer (e.g. when the pass aborts)
/// still attempts it before the underlying handle is closed.
pub struct TarWriter<W: Write> {
    builder: Builder<W>,
    path: PathBuf,
    entries: usize,
    bytes: u64,
}

impl<W: Write> TarWriter<W> {
    /// `path` is only used to label errors.
    pub fn new(inner: W, path: impl Into<PathBuf>) -> Self {
        Self {
            builder: Builder::new(inner),
            path: path.into(),
            entries: 0,
            bytes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries appended so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Bytes written so far, end marker excluded.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Appends the entry's extension records, its header block as read, and
    /// its payload. `on_read` sees every payload chunk taken from the source.
    pub fn append<R, F>(
        &mut self,
        entry: &mut SourceEntry<'_, R>,
        on_read: F,
    ) -> Result<(), SplitError>
    where
        R: Read,
        F: FnMut(u64),
    {
        for ext in &entry.extensions {
            self.builder
                .append(&ext.header, ext.data.as_slice())
                .map_err(|e| SplitError::write(&self.path, e))?;
            self.bytes += BLOCK_SIZE + padded_size(ext.data.len() as u64).unwrap_or(0);
        }

        let header = entry.entry.header().clone();
        let mut payload = ExactReader::new(&mut entry.entry, entry.size, on_read);
        if let Err(e) = self.builder.append(&header, &mut payload) {
            if payload.source_failed() {
                return Err(SplitError::read(format!("payload of '{}'", entry.key.name), e));
            }
            return Err(SplitError::write(&self.path, e));
        }
        self.bytes += BLOCK_SIZE + padded_size(entry.size).unwrap_or(entry.size);
        self.entries += 1;
        Ok(())
    }

    /// Appends the end-of-archive marker, flushes, and hands back the inner
    /// writer.
    pub fn finish(self) -> Result<W, SplitError> {
        let path = self.path;
        let mut inner = self
            .builder
            .into_inner()
            .map_err(|e| SplitError::write(&path, e))?;
        inner.flush().map_err(|e| SplitError::write(&path, e))?;
        Ok(inner)
    }
}
