use super::{run_bounded, BatchReport, ItemOutcome, Stage};
use crate::catalog::{Catalog, ProcessingState, StagedPackage};
use crate::config::ProcessingConfig;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::resolver::{locate_in_archive, PathResolver};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Move up to `move_throttle` `Discovered` packages into the archive tree,
/// in parallel, and record `Moved` for each one that lands.
pub fn move_batch(
    config: &ProcessingConfig,
    catalog: &Catalog,
    resolver: &PathResolver<'_>,
    sink: &dyn EventSink,
) -> Result<BatchReport> {
    let start = Instant::now();
    sink.on_stage_start(Stage::Move);

    let staged = catalog.select_by_state(ProcessingState::Discovered, config.move_throttle)?;
    info!("Moving {} discovered packages", staged.len());

    let mut report = BatchReport::new(Stage::Move);
    report.selected = staged.len();

    let outcomes = run_bounded(Stage::Move, config.move_throttle, staged, |pkg| {
        let outcome: ItemOutcome = move_one(&pkg, config, catalog, resolver).into();
        (pkg, outcome)
    })?;
    for (pkg, outcome) in outcomes {
        report.absorb(&pkg.name, pkg.path, outcome, sink);
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Move complete in {:.2}s: {} moved, {} skipped, {} failed",
        elapsed,
        report.completed,
        report.skipped.len(),
        report.failures.len()
    );
    sink.on_stage_complete(Stage::Move, report.completed, elapsed);
    Ok(report)
}

fn move_one(
    pkg: &StagedPackage,
    config: &ProcessingConfig,
    catalog: &Catalog,
    resolver: &PathResolver<'_>,
) -> Result<ItemOutcome> {
    let source = pkg.path.as_path();

    if !source.exists() {
        // Either moved by an earlier run that died before recording it, or
        // removed externally. Only the archive can tell which.
        return match locate_in_archive(&config.archive_root, &pkg.name)? {
            Some(found) => {
                warn!(
                    "{} already in archive at {}, recording move",
                    pkg.name,
                    found.display()
                );
                catalog.append_transition(pkg.id, ProcessingState::Moved, &found, Utc::now())?;
                Ok(ItemOutcome::Done { rows: 1 })
            }
            None => Ok(ItemOutcome::Skipped(
                Error::FileMissing(source.to_path_buf()).to_string(),
            )),
        };
    }

    let destination = resolver
        .resolve_destination(source, &config.archive_root, &config.date_pattern, true)?
        .destination;

    if destination != source {
        // Last write wins: a stale copy at the destination is replaced.
        if destination.exists() {
            debug!("Replacing existing {}", destination.display());
            fs::remove_file(&destination)?;
        }
        match relocate(source, &destination) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ItemOutcome::Skipped(
                    Error::FileMissing(source.to_path_buf()).to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Re-resolve by the natural key now that the file sits at its canonical path.
    let package = catalog
        .package_by_name(&pkg.name)?
        .ok_or_else(|| Error::NotFound(pkg.name.clone()))?;
    catalog.append_transition(package.id, ProcessingState::Moved, &destination, Utc::now())?;
    debug!("Moved {} -> {}", source.display(), destination.display());
    Ok(ItemOutcome::Done { rows: 1 })
}

/// Rename, falling back to copy + delete when rename is not possible
/// (e.g. across volumes).
fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(rename_err) => {
            debug!(
                "Rename of {} failed ({}), copying instead",
                source.display(),
                rename_err
            );
            if let Err(copy_err) = fs::copy(source, destination) {
                // Leave nothing half-written behind; the source is untouched.
                if destination.is_file() {
                    let _ = fs::remove_file(destination);
                }
                return Err(copy_err);
            }
            fs::remove_file(source)
        }
    }
}
