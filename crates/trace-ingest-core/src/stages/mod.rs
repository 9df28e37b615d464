//! The three batch stages. Each is idempotent against re-entry and reports
//! per-item results instead of failing the batch.

pub mod discover;
pub mod measure;
pub mod relocate;

use crate::error::{Error, Result};
use crate::events::EventSink;
use rayon::prelude::*;
use std::fmt;
use std::path::PathBuf;
use tracing::error;

pub use discover::discover;
pub use measure::{measure, MeasureOptions};
pub use relocate::move_batch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discover,
    Move,
    Measure,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Discover => "discover",
            Stage::Move => "move",
            Stage::Measure => "measure",
        })
    }
}

/// A package that failed inside a stage. Its state was not advanced.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub stage: Stage,
    pub package: String,
    pub path: PathBuf,
    pub message: String,
    pub detail: String,
}

/// Per-stage outcome of one invocation.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub stage: Stage,
    /// Items the stage looked at (selected rows, or enumerated entries).
    pub selected: usize,
    /// Transitions written.
    pub completed: usize,
    pub skipped: Vec<(String, String)>,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            selected: 0,
            completed: 0,
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.completed
    }

    /// Fold one item's outcome into the report, emitting the matching event.
    pub(crate) fn absorb(
        &mut self,
        package: &str,
        path: PathBuf,
        outcome: ItemOutcome,
        sink: &dyn EventSink,
    ) {
        match outcome {
            ItemOutcome::Done { rows } => {
                self.completed += 1;
                sink.on_item_complete(self.stage, package, rows);
            }
            ItemOutcome::Unchanged => {}
            ItemOutcome::Skipped(reason) => {
                sink.on_item_skipped(self.stage, package, &reason);
                self.skipped.push((package.to_string(), reason));
            }
            ItemOutcome::Failed(err) => {
                self.failures.push(report_failure(self.stage, package, path, &err, sink));
            }
        }
    }
}

/// What happened to a single unit of work.
#[derive(Debug)]
pub(crate) enum ItemOutcome {
    /// A transition was written.
    Done { rows: usize },
    /// Already past this stage; nothing to do.
    Unchanged,
    Skipped(String),
    Failed(Error),
}

impl From<Result<ItemOutcome>> for ItemOutcome {
    fn from(result: Result<ItemOutcome>) -> Self {
        result.unwrap_or_else(ItemOutcome::Failed)
    }
}

pub(crate) fn report_failure(
    stage: Stage,
    package: &str,
    path: PathBuf,
    err: &Error,
    sink: &dyn EventSink,
) -> ItemFailure {
    if let Error::InvariantViolation {
        package,
        expected,
        found,
    } = err
    {
        error!("{}", err);
        sink.on_invariant_violation(package, *expected, *found);
    }
    let failure = ItemFailure {
        stage,
        package: package.to_string(),
        path,
        message: err.to_string(),
        detail: err.detail(),
    };
    sink.on_item_failed(&failure);
    failure
}

/// Run `work` over `items` on a dedicated pool of at most `throttle` threads
/// and wait for every item before returning.
pub(crate) fn run_bounded<T, R, F>(
    stage: Stage,
    throttle: usize,
    items: Vec<T>,
    work: F,
) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(throttle.max(1))
        .thread_name(move |idx| format!("{}-worker-{}", stage, idx))
        .build()?;
    Ok(pool.install(|| items.into_par_iter().map(work).collect()))
}
