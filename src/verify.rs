//! Post-split check: re-reads the source and every output and confirms that
//! each regular file of the source sits, byte for byte, in exactly the output
//! its plan names, and that every output is a complete archive.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tar::Archive;
use tracing::info;

use crate::archive::{finish_source, SourceEntry, TarEntryStream, BLOCK_SIZE};
use crate::compress::open_source;
use crate::error::SplitError;
use crate::plan::{Plan, RoutingTable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub outputs_checked: usize,
    pub entries_checked: usize,
}

/// Digest of everything the splitter copies for one entry: extension records,
/// header block and payload.
fn entry_digest<R: Read>(entry: &mut SourceEntry<'_, R>) -> Result<blake3::Hash, SplitError> {
    let mut hasher = blake3::Hasher::new();
    for ext in &entry.extensions {
        hasher.update(ext.header.as_bytes());
        hasher.update(&ext.data);
    }
    hasher.update(entry.header().as_bytes());
    entry.copy_payload(&mut hasher)?;
    Ok(hasher.finalize())
}

fn fail(reason: String) -> SplitError {
    SplitError::Verify { reason }
}

/// An output must end right after its last entry with exactly the two zero
/// blocks `tar::Builder` writes.
fn check_end_marker(path: &Path, data_end: u64) -> Result<(), SplitError> {
    let mut file = File::open(path).map_err(|e| SplitError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    let context = || format!("end of '{}'", path.display());
    file.seek(SeekFrom::Start(data_end))
        .map_err(|e| SplitError::read(context(), e))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)
        .map_err(|e| SplitError::read(context(), e))?;
    if tail.len() as u64 != 2 * BLOCK_SIZE || tail.iter().any(|b| *b != 0) {
        return Err(fail(format!(
            "'{}' does not end with a clean end-of-archive marker",
            path.display()
        )));
    }
    Ok(())
}

/// `outputs[i]` must be the archive written for `plans[i]`.
pub fn verify_split(
    source: &Path,
    plans: &[Plan],
    outputs: &[PathBuf],
) -> Result<VerifyReport, SplitError> {
    if outputs.len() != plans.len() {
        return Err(fail(format!(
            "{} plans but {} output archives",
            plans.len(),
            outputs.len()
        )));
    }
    let routing = RoutingTable::from_plans(plans);

    // (name, plan index) -> digests in source order
    let mut expected: HashMap<(String, usize), VecDeque<blake3::Hash>> = HashMap::new();
    let (reader, _) = open_source(source)?;
    let mut archive = Archive::new(reader);
    let mut stream = TarEntryStream::new(&mut archive)?;
    let mut pending = 0usize;
    while let Some(mut entry) = stream.next_entry()? {
        if !entry.kind.is_regular() {
            continue;
        }
        let index = routing.lookup(&entry.key).ok_or_else(|| SplitError::Routing {
            name: entry.key.name.clone(),
            occurrence: entry.key.occurrence,
        })?;
        let digest = entry_digest(&mut entry)?;
        expected
            .entry((entry.key.name.clone(), index))
            .or_default()
            .push_back(digest);
        pending += 1;
    }
    drop(stream);
    finish_source(archive)?;

    let mut report = VerifyReport::default();
    for (index, path) in outputs.iter().enumerate() {
        let file = File::open(path).map_err(|e| SplitError::Open {
            path: path.clone(),
            source: e,
        })?;
        let mut archive = Archive::new(BufReader::new(file));
        let mut stream = TarEntryStream::new(&mut archive)?;
        while let Some(mut entry) = stream.next_entry()? {
            let name = entry.key.name.clone();
            if !entry.kind.is_regular() {
                return Err(fail(format!(
                    "'{}' holds non-regular entry '{name}'",
                    path.display()
                )));
            }
            let digest = entry_digest(&mut entry)?;
            let want = expected
                .get_mut(&(name.clone(), index))
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| {
                    fail(format!("'{}' holds unexpected entry '{name}'", path.display()))
                })?;
            if want != digest {
                return Err(fail(format!(
                    "entry '{name}' in '{}' differs from the source",
                    path.display()
                )));
            }
            pending -= 1;
            report.entries_checked += 1;
        }
        let data_end = stream.data_end();
        drop(stream);
        check_end_marker(path, data_end)?;
        report.outputs_checked += 1;
    }

    if pending != 0 {
        let missing = expected
            .iter()
            .find(|(_, left)| !left.is_empty())
            .map(|((name, index), _)| format!("'{name}' missing from output {index}"))
            .unwrap_or_default();
        return Err(fail(format!("{pending} source entries not found in outputs: {missing}")));
    }

    info!(
        outputs = report.outputs_checked,
        entries = report.entries_checked,
        "verified split outputs"
    );
    Ok(report)
}
