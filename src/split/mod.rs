//! # Archive Splitter
//!
//! Second pass over the source: one destination archive per plan, every
//! regular file copied (extension records, header block, padded payload) into
//! the destination its plan names, in source order. Directories, links and
//! every other non-regular entry are skipped.
//!
//! Destinations are opened before the pass and owned by this function. On any
//! failure the remaining destinations are dropped, which attempts their end
//! marker and closes their handles, before the error is returned.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tar::Archive;
use tracing::{debug, info};

use crate::archive::{finish_source, TarEntryStream, TarWriter};
use crate::compress::{open_source, Compression};
use crate::error::SplitError;
use crate::plan::{Plan, RoutingTable};
use crate::progress::{ProgressCallback, ProgressTracker};

/// use 8 MiB buffer to reduce syscall overhead on destination writes
const DEST_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Maps a plan index to an output path: `<dir>/<index>-<source basename>`,
/// with any compression suffix on the basename dropped.
#[derive(Debug, Clone)]
pub struct OutputNaming {
    dir: PathBuf,
    file_name: String,
}

impl OutputNaming {
    pub fn for_source(source: &Path, dir: impl Into<PathBuf>) -> Self {
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive.tar".to_string());
        Self {
            dir: dir.into(),
            file_name: Compression::plain_file_name(&base),
        }
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index}-{}", self.file_name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSummary {
    pub path: PathBuf,
    pub entries: usize,
    /// Archive bytes written before the end marker.
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub outputs: Vec<OutputSummary>,
    pub copied_entries: usize,
    pub copied_payload_bytes: u64,
    /// Non-regular entries left out of every output.
    pub skipped_entries: usize,
}

/// Rewrites `source` (plain tar bytes) into one destination per plan.
///
/// `open_destination(i)` creates the writer for plan `i` and returns the path
/// used to label it.
pub fn split_archive<R, W, F>(
    source: R,
    plans: &[Plan],
    mut open_destination: F,
    progress: Option<&ProgressCallback>,
) -> Result<SplitSummary, SplitError>
where
    R: Read,
    W: Write,
    F: FnMut(usize) -> Result<(PathBuf, W), SplitError>,
{
    let routing = RoutingTable::from_plans(plans);

    let mut destinations = Vec::with_capacity(plans.len());
    for index in 0..plans.len() {
        let (path, writer) = open_destination(index)?;
        debug!(index, path = %path.display(), "opened destination");
        destinations.push(TarWriter::new(writer, path));
    }

    let total_entries: u64 = (0..plans.len()).map(|i| routing.expected_regular(i) as u64).sum();
    let total_bytes: u64 = plans
        .iter()
        .flat_map(|p| p.regular_entries())
        .map(|e| e.size)
        .sum();
    let mut tracker = ProgressTracker::new(progress, total_entries, total_bytes);

    let mut summary = SplitSummary::default();
    let mut delivered = vec![0usize; plans.len()];
    let mut archive = Archive::new(source);
    let mut stream = TarEntryStream::new(&mut archive)?;

    while let Some(mut entry) = stream.next_entry()? {
        if !entry.kind.is_regular() {
            debug!(name = entry.name(), kind = ?entry.kind, "skipping non-regular entry");
            summary.skipped_entries += 1;
            continue;
        }
        let index = routing.lookup(&entry.key).ok_or_else(|| SplitError::Routing {
            name: entry.key.name.clone(),
            occurrence: entry.key.occurrence,
        })?;
        debug!(name = entry.name(), size = entry.size, index, "routing entry");

        destinations[index].append(&mut entry, |n| tracker.record_bytes(n))?;
        tracker.record_entry();

        delivered[index] += 1;
        summary.copied_entries += 1;
        summary.copied_payload_bytes += entry.size;
    }
    drop(stream);
    finish_source(archive)?;

    for (index, count) in delivered.iter().enumerate() {
        let expected = routing.expected_regular(index);
        if *count != expected {
            return Err(SplitError::Verify {
                reason: format!(
                    "plan {index} expected {expected} regular entries \
                     but the source delivered {count}"
                ),
            });
        }
    }

    for dest in destinations {
        let path = dest.path().to_path_buf();
        let entries = dest.entries();
        let bytes = dest.bytes_written();
        dest.finish()?;
        summary.outputs.push(OutputSummary { path, entries, bytes });
    }
    tracker.finish();

    Ok(summary)
}

/// Splits the archive at `source` into files named by `naming`, creating the
/// output directory if needed.
pub fn split_to_files(
    source: &Path,
    plans: &[Plan],
    naming: &OutputNaming,
    progress: Option<&ProgressCallback>,
) -> Result<SplitSummary, SplitError> {
    let (reader, _) = open_source(source)?;
    if !plans.is_empty() {
        fs::create_dir_all(naming.dir()).map_err(|e| SplitError::write(naming.dir(), e))?;
    }

    let summary = split_archive(
        reader,
        plans,
        |index| {
            let path = naming.path_for(index);
            let file = File::create(&path).map_err(|e| SplitError::write(&path, e))?;
            Ok((path, BufWriter::with_capacity(DEST_BUF_SIZE, file)))
        },
        progress,
    )?;

    info!(
        outputs = summary.outputs.len(),
        copied = summary.copied_entries,
        skipped = summary.skipped_entries,
        bytes = summary.copied_payload_bytes,
        "split complete"
    );
    Ok(summary)
}
