use super::{BatchReport, ItemOutcome, Stage};
use crate::catalog::{Catalog, ProcessingState};
use crate::config::{self, ProcessingConfig};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::resolver::PathResolver;
use chrono::Utc;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Register every matching file under the incoming directories and record
/// `Discovered` for packages with no transitions yet. Nothing is moved.
///
/// Re-running over an unchanged tree writes nothing.
pub fn discover(
    config: &ProcessingConfig,
    catalog: &Catalog,
    resolver: &PathResolver<'_>,
    sink: &dyn EventSink,
) -> Result<BatchReport> {
    let start = Instant::now();
    sink.on_stage_start(Stage::Discover);

    let patterns = compile_patterns(&config.file_patterns)?;
    let dirs = config::non_overlapping_directories(&config.incoming_dirs);
    // Enumeration roots must be readable up front; failure here aborts the stage.
    for dir in &dirs {
        fs::read_dir(dir)?;
    }

    let mut report = BatchReport::new(Stage::Discover);
    for dir in &dirs {
        info!("Discovering packages in {}", dir.display());
        let before = report.completed;
        for pattern in &patterns {
            scan_directory(dir, pattern, config, catalog, resolver, sink, &mut report);
        }
        sink.on_directory_scanned(dir, report.completed - before);
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Discovery complete in {:.2}s: {} entries, {} new",
        elapsed, report.selected, report.completed
    );
    sink.on_stage_complete(Stage::Discover, report.completed, elapsed);
    Ok(report)
}

fn compile_patterns(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|glob| {
            Pattern::new(glob).map_err(|e| Error::InvalidPattern {
                pattern: glob.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn scan_directory(
    dir: &Path,
    pattern: &Pattern,
    config: &ProcessingConfig,
    catalog: &Catalog,
    resolver: &PathResolver<'_>,
    sink: &dyn EventSink,
    report: &mut BatchReport,
) {
    let archive_root = config.archive_root.as_path();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !config::is_within(entry.path(), archive_root));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !pattern.matches_with(&name, MATCH_OPTIONS) {
            continue;
        }

        report.selected += 1;
        let outcome = discover_one(entry.path(), &name, config, catalog, resolver).into();
        report.absorb(&name, entry.path().to_path_buf(), outcome, sink);
    }
}

fn discover_one(
    source: &Path,
    name: &str,
    config: &ProcessingConfig,
    catalog: &Catalog,
    resolver: &PathResolver<'_>,
) -> Result<ItemOutcome> {
    let resolution =
        resolver.resolve_destination(source, &config.archive_root, &config.date_pattern, true)?;
    let id = catalog.register_if_absent(
        name,
        &resolution.destination,
        Some(resolution.captured_at),
    )?;

    if let Some(state) = catalog.latest_state(id)? {
        debug!("{} already {}, not rediscovering {}", name, state, source.display());
        return Ok(ItemOutcome::Unchanged);
    }

    catalog.append_transition(id, ProcessingState::Discovered, source, Utc::now())?;
    debug!("Discovered {} at {}", name, source.display());
    Ok(ItemOutcome::Done { rows: 1 })
}
