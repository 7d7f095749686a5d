//! # Bin Packer
//!
//! Partitions a size-descending inventory into plans whose totals fit a target
//! budget. The heuristic is a single two-ended sweep:
//!
//! 1. Take entries from the large end while they fit (`total + size <= target`).
//! 2. When the next large entry does not fit, top the plan off from the small
//!    end while the result stays strictly under the target
//!    (`total + size < target`).
//! 3. Close the plan and seed the next one with the entry that did not fit.
//!
//! This is not optimal bin packing. It favours a few large entries per plan
//! topped off with many small ones, which suits archives holding a handful of
//! big blobs next to lots of small auxiliary files. An entry larger than the
//! target ends up alone in its own plan.

mod manifest;

pub use manifest::{ManifestPlan, PlanManifest};

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{EntryKey, EntryRecord};

/// A group of entries destined for one output archive.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub entries: Vec<EntryRecord>,
    /// Always the sum of `entries[..].size`.
    pub total_size: u64,
}

impl Plan {
    fn push(&mut self, entry: EntryRecord) {
        self.total_size = self.total_size.saturating_add(entry.size);
        self.entries.push(entry);
    }

    fn fits(&self, size: u64, target: u64) -> bool {
        self.total_size.saturating_add(size) <= target
    }

    fn fits_below(&self, size: u64, target: u64) -> bool {
        self.total_size.saturating_add(size) < target
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A single entry larger than the target. Expected, not an error.
    pub fn is_oversized(&self, target: u64) -> bool {
        self.total_size > target
    }

    /// Entries that the splitter will actually copy.
    pub fn regular_entries(&self) -> impl Iterator<Item = &EntryRecord> {
        self.entries.iter().filter(|e| e.kind.is_regular())
    }
}

/// Partitions `inventory` (sorted by descending size) into plans of at most
/// `target` bytes each. Every record ends up in exactly one plan; empty plans
/// are never emitted.
pub fn build_plans(inventory: Vec<EntryRecord>, target: u64) -> Vec<Plan> {
    let mut plans = Vec::new();
    let mut pending: VecDeque<EntryRecord> = inventory.into();
    let mut current = Plan::default();

    while let Some(next) = pending.front() {
        if current.fits(next.size, target) {
            if let Some(entry) = pending.pop_front() {
                current.push(entry);
            }
            continue;
        }

        // The front entry never passes the strict check here, so backfilling
        // cannot reach past it.
        while let Some(small) = pending.back() {
            if !current.fits_below(small.size, target) {
                break;
            }
            if let Some(entry) = pending.pop_back() {
                current.push(entry);
            }
        }

        close(&mut plans, &mut current, target);
        if let Some(seed) = pending.pop_front() {
            current.push(seed);
        }
    }
    close(&mut plans, &mut current, target);

    debug!(plans = plans.len(), target, "built plan set");
    plans
}

fn close(plans: &mut Vec<Plan>, current: &mut Plan, target: u64) {
    if current.is_empty() {
        return;
    }
    let plan = std::mem::take(current);
    if plan.is_oversized(target) {
        warn!(
            index = plans.len(),
            name = %plan.entries[0].name,
            size = plan.total_size,
            target,
            "entry exceeds target size; it gets an archive of its own"
        );
    }
    plans.push(plan);
}

/// Aggregate numbers about a plan set, for logging and manifests.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub plans: usize,
    pub entries: usize,
    pub regular_entries: usize,
    pub total_size: u64,
    pub largest_plan: u64,
    pub oversized_plans: Vec<usize>,
}

impl PlanSummary {
    pub fn new(plans: &[Plan], target: u64) -> Self {
        let mut summary = PlanSummary {
            plans: plans.len(),
            ..Default::default()
        };
        for (index, plan) in plans.iter().enumerate() {
            summary.entries += plan.len();
            summary.regular_entries += plan.regular_entries().count();
            summary.total_size = summary.total_size.saturating_add(plan.total_size);
            summary.largest_plan = summary.largest_plan.max(plan.total_size);
            if plan.is_oversized(target) {
                summary.oversized_plans.push(index);
            }
        }
        summary
    }
}

/// Immutable `entry → plan index` map, built once before the rewrite pass.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<EntryKey, usize>,
    expected: Vec<usize>,
}

impl RoutingTable {
    pub fn from_plans(plans: &[Plan]) -> Self {
        let mut routes = HashMap::with_capacity(plans.iter().map(Plan::len).sum());
        let mut expected = Vec::with_capacity(plans.len());
        for (index, plan) in plans.iter().enumerate() {
            for entry in &plan.entries {
                routes.insert(entry.key(), index);
            }
            expected.push(plan.regular_entries().count());
        }
        Self { routes, expected }
    }

    pub fn lookup(&self, key: &EntryKey) -> Option<usize> {
        self.routes.get(key).copied()
    }

    /// How many regular files the rewrite pass must deliver to plan `index`.
    pub fn expected_regular(&self, index: usize) -> usize {
        self.expected.get(index).copied().unwrap_or(0)
    }

    pub fn plan_count(&self) -> usize {
        self.expected.len()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
