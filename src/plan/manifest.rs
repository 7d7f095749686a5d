//! JSON description of a plan set, written by `--manifest` and printed by
//! `--dry-run`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Plan, PlanSummary};
use crate::common::EntryRecord;
use crate::error::SplitError;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ManifestPlan {
    pub index: usize,
    pub output: PathBuf,
    pub total_size: u64,
    pub oversized: bool,
    pub entries: Vec<EntryRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlanManifest {
    pub source: PathBuf,
    pub target_size: u64,
    pub created_at: DateTime<Utc>,
    pub plan_count: usize,
    pub total_size: u64,
    pub plans: Vec<ManifestPlan>,
}

impl PlanManifest {
    /// `output_for` maps a plan index to the archive that will hold it.
    pub fn new<F>(source: &Path, target_size: u64, plans: &[Plan], output_for: F) -> Self
    where
        F: Fn(usize) -> PathBuf,
    {
        let summary = PlanSummary::new(plans, target_size);
        PlanManifest {
            source: source.to_path_buf(),
            target_size,
            created_at: Utc::now(),
            plan_count: summary.plans,
            total_size: summary.total_size,
            plans: plans
                .iter()
                .enumerate()
                .map(|(index, plan)| ManifestPlan {
                    index,
                    output: output_for(index),
                    total_size: plan.total_size,
                    oversized: plan.is_oversized(target_size),
                    entries: plan.entries.clone(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, SplitError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), SplitError> {
        let file = File::create(path).map_err(|e| SplitError::write(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| SplitError::write(path, e))
    }
}
