//! Archive index pass: one record per header, payloads skipped.

use std::io::Read;
use std::path::Path;

use tar::Archive;
use tracing::info;

use crate::archive::{finish_source, TarEntryStream};
use crate::common::EntryRecord;
use crate::compress::open_source;
use crate::error::SplitError;

/// Lazy sequence of [`EntryRecord`]s in source order, read from an archive the
/// caller owns. Stops after the first error.
pub struct Inventory<'a, R: 'a + Read> {
    stream: TarEntryStream<'a, R>,
    failed: bool,
}

impl<'a, R: Read> Inventory<'a, R> {
    pub fn new(archive: &'a mut Archive<R>) -> Result<Self, SplitError> {
        Ok(Self {
            stream: TarEntryStream::new(archive)?,
            failed: false,
        })
    }
}

impl<'a, R: Read> Iterator for Inventory<'a, R> {
    type Item = Result<EntryRecord, SplitError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.stream.next_entry() {
            Ok(Some(entry)) => Some(Ok(EntryRecord {
                name: entry.key.name,
                occurrence: entry.key.occurrence,
                size: entry.size,
                kind: entry.kind,
            })),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Scans an already-opened (and already decompressed) tar stream, then drains
/// what follows the last entry.
pub fn read_inventory_from<R: Read>(reader: R) -> Result<Vec<EntryRecord>, SplitError> {
    let mut archive = Archive::new(reader);
    let records = Inventory::new(&mut archive)?.collect::<Result<Vec<_>, _>>()?;
    finish_source(archive)?;
    Ok(records)
}

/// Opens `path`, decompressing if needed, and lists every entry.
pub fn read_inventory(path: &Path) -> Result<Vec<EntryRecord>, SplitError> {
    let (reader, compression) = open_source(path)?;
    let records = read_inventory_from(reader)?;
    let regular = records.iter().filter(|r| r.kind.is_regular()).count();
    info!(
        path = %path.display(),
        ?compression,
        entries = records.len(),
        regular,
        "indexed source archive"
    );
    Ok(records)
}

/// Orders records by descending size. Equal sizes keep source order.
pub fn sort_inventory(records: &mut [EntryRecord]) {
    records.sort_by(|a, b| b.size.cmp(&a.size));
}
