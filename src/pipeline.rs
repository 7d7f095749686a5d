//! Index pass, planning, rewrite pass and verification, run strictly in
//! sequence.

use std::path::PathBuf;

use tracing::info;

use crate::error::SplitError;
use crate::index::{read_inventory, sort_inventory};
use crate::plan::{build_plans, Plan, PlanManifest, PlanSummary};
use crate::progress::ProgressCallback;
use crate::split::{split_to_files, OutputNaming, OutputSummary};
use crate::verify::{verify_split, VerifyReport};

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct SplitJob {
    pub source: PathBuf,
    pub target_size: u64,
    pub output_dir: PathBuf,
    /// Plan only; write no archive.
    pub dry_run: bool,
    pub manifest: Option<PathBuf>,
    pub verify: bool,
}

impl SplitJob {
    pub fn new(
        source: impl Into<PathBuf>,
        target_size: u64,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            target_size,
            output_dir: output_dir.into(),
            dry_run: false,
            manifest: None,
            verify: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub plans: Vec<Plan>,
    pub summary: PlanSummary,
    pub outputs: Vec<OutputSummary>,
    pub verification: Option<VerifyReport>,
    /// Set for dry runs; the caller decides where to print it.
    pub dry_run_manifest: Option<PlanManifest>,
}

pub fn run(
    job: &SplitJob,
    progress: Option<&ProgressCallback>,
) -> Result<SplitOutcome, SplitError> {
    if job.target_size == 0 {
        return Err(SplitError::Config("target size must be greater than zero".into()));
    }

    let mut inventory = read_inventory(&job.source)?;
    sort_inventory(&mut inventory);
    let plans = build_plans(inventory, job.target_size);
    let summary = PlanSummary::new(&plans, job.target_size);
    info!(
        plans = summary.plans,
        entries = summary.entries,
        regular = summary.regular_entries,
        total_size = summary.total_size,
        target = job.target_size,
        "planned split"
    );

    let naming = OutputNaming::for_source(&job.source, &job.output_dir);
    let manifest = PlanManifest::new(&job.source, job.target_size, &plans, |i| naming.path_for(i));
    if let Some(path) = &job.manifest {
        manifest.write_to(path)?;
        info!(path = %path.display(), "wrote plan manifest");
    }

    if job.dry_run {
        return Ok(SplitOutcome {
            plans,
            summary,
            outputs: Vec::new(),
            verification: None,
            dry_run_manifest: Some(manifest),
        });
    }

    let split = split_to_files(&job.source, &plans, &naming, progress)?;
    let verification = if job.verify {
        let paths: Vec<PathBuf> = split.outputs.iter().map(|o| o.path.clone()).collect();
        Some(verify_split(&job.source, &plans, &paths)?)
    } else {
        None
    };

    Ok(SplitOutcome {
        plans,
        summary,
        outputs: split.outputs,
        verification,
        dry_run_manifest: None,
    })
}
