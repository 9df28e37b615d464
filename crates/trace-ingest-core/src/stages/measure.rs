use super::{report_failure, run_bounded, BatchReport, Stage};
use crate::analysis::{Analyzer, MeasurementSet};
use crate::catalog::{Catalog, ProcessingState, StagedPackage};
use crate::error::{Error, Result};
use crate::events::EventSink;
use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct MeasureOptions {
    pub throttle: usize,
    /// Upper bound on a single analysis call. `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

/// Analyze up to `throttle` `Moved` packages in parallel, then persist the
/// successful results one package at a time.
///
/// Analysis failures leave the package `Moved` so the next run retries it.
pub fn measure(
    catalog: &Catalog,
    analyzer: &Arc<dyn Analyzer>,
    options: MeasureOptions,
    sink: &dyn EventSink,
) -> Result<BatchReport> {
    let start = Instant::now();
    sink.on_stage_start(Stage::Measure);

    let staged = catalog.select_by_state(ProcessingState::Moved, options.throttle)?;
    info!("Measuring {} moved packages", staged.len());

    let mut report = BatchReport::new(Stage::Measure);
    report.selected = staged.len();

    // Compute phase: parallel, no catalog writes.
    let results = run_bounded(Stage::Measure, options.throttle, staged, |pkg| {
        sink.on_item_start(Stage::Measure, &pkg.name);
        let result = analyze_isolated(analyzer, &pkg.path, options.deadline);
        (pkg, result)
    })?;

    // Persist phase: sequential, so workers never contend on the catalog.
    for (pkg, result) in results {
        let outcome = result.and_then(|set| persist(catalog, &pkg, &set));
        match outcome {
            Ok(rows) => {
                report.completed += 1;
                sink.on_item_complete(Stage::Measure, &pkg.name, rows);
            }
            Err(err) => {
                report
                    .failures
                    .push(report_failure(Stage::Measure, &pkg.name, pkg.path.clone(), &err, sink));
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Measure complete in {:.2}s: {} measured, {} failed",
        elapsed,
        report.completed,
        report.failures.len()
    );
    sink.on_stage_complete(Stage::Measure, report.completed, elapsed);
    Ok(report)
}

fn persist(catalog: &Catalog, pkg: &StagedPackage, set: &MeasurementSet) -> Result<usize> {
    let rows = catalog.record_measured(pkg.id, set, &pkg.path, Utc::now())?;
    debug!("Saved {} ({} rows)", pkg.name, rows);
    Ok(rows)
}

/// Run one analysis so that a panic or a hang cannot take siblings down.
fn analyze_isolated(
    analyzer: &Arc<dyn Analyzer>,
    path: &Path,
    deadline: Option<Duration>,
) -> Result<MeasurementSet> {
    let Some(limit) = deadline else {
        return catch_panic(analyzer.as_ref(), path);
    };

    let (tx, rx) = mpsc::channel();
    let engine = Arc::clone(analyzer);
    let owned = path.to_path_buf();
    thread::Builder::new()
        .name("analysis".to_string())
        .spawn(move || {
            // Receiver may have given up already.
            let _ = tx.send(catch_panic(engine.as_ref(), &owned));
        })?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(Error::DeadlineExceeded {
            path: path.to_path_buf(),
            secs: limit.as_secs(),
        }),
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::analysis(path, "analysis thread exited without a result"))
        }
    }
}

fn catch_panic(analyzer: &dyn Analyzer, path: &Path) -> Result<MeasurementSet> {
    match panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(path))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "analysis panicked".to_string());
            Err(Error::Analysis {
                path: path.to_path_buf(),
                message: format!("analysis panicked: {}", message),
                detail: message,
            })
        }
    }
}
