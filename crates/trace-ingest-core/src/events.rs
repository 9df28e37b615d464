use crate::catalog::models::ProcessingState;
use crate::stages::{ItemFailure, Stage};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Structured pipeline events.
///
/// Passed into every stage instead of a process-wide logger. The CLI
/// implements it with indicatif spinners, tests with recorders. All methods
/// default to no-ops.
pub trait EventSink: Send + Sync {
    fn on_pipeline_start(&self) {}
    fn on_pipeline_complete(&self, _moved: usize, _measured: usize, _duration_secs: f64) {}
    fn on_stage_start(&self, _stage: Stage) {}
    fn on_stage_complete(&self, _stage: Stage, _count: usize, _duration_secs: f64) {}
    fn on_directory_scanned(&self, _dir: &Path, _discovered: usize) {}
    fn on_item_start(&self, _stage: Stage, _package: &str) {}
    fn on_item_complete(&self, _stage: Stage, _package: &str, _rows_written: usize) {}
    fn on_item_skipped(&self, _stage: Stage, _package: &str, _reason: &str) {}
    fn on_item_failed(&self, _failure: &ItemFailure) {}
    fn on_invariant_violation(
        &self,
        _package: &str,
        _expected: Option<ProcessingState>,
        _found: Option<ProcessingState>,
    ) {
    }
}

/// No-op sink for silent operation.
pub struct SilentSink;

impl EventSink for SilentSink {}

/// Forwards every event to `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_pipeline_start(&self) {
        info!("Pipeline run starting");
    }

    fn on_pipeline_complete(&self, moved: usize, measured: usize, duration_secs: f64) {
        info!(moved, measured, "Pipeline run complete in {:.2}s", duration_secs);
    }

    fn on_stage_start(&self, stage: Stage) {
        debug!(%stage, "Stage starting");
    }

    fn on_stage_complete(&self, stage: Stage, count: usize, duration_secs: f64) {
        info!(%stage, count, "Stage complete in {:.2}s", duration_secs);
    }

    fn on_directory_scanned(&self, dir: &Path, discovered: usize) {
        debug!(dir = %dir.display(), discovered, "Directory scanned");
    }

    fn on_item_complete(&self, stage: Stage, package: &str, rows_written: usize) {
        debug!(%stage, package, rows_written, "Item complete");
    }

    fn on_item_skipped(&self, stage: Stage, package: &str, reason: &str) {
        warn!(%stage, package, reason, "Item skipped");
    }

    fn on_item_failed(&self, failure: &ItemFailure) {
        warn!(
            stage = %failure.stage,
            package = %failure.package,
            detail = %failure.detail,
            "Unable to process {}: {}",
            failure.path.display(),
            failure.message
        );
    }

    fn on_invariant_violation(
        &self,
        package: &str,
        expected: Option<ProcessingState>,
        found: Option<ProcessingState>,
    ) {
        error!(
            package,
            expected = ?expected,
            found = ?found,
            "Package advanced concurrently; transition refused"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::Level;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_at(level: Level, emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_skipped_items_are_visible_at_warn() {
        let output = capture_at(Level::WARN, || {
            TracingSink.on_item_skipped(Stage::Move, "gone.zip", "file vanished");
        });
        assert!(output.contains("Item skipped"), "{}", output);
        assert!(output.contains("gone.zip"));
        assert!(output.contains("file vanished"));
    }

    #[test]
    fn test_routine_progress_stays_below_warn() {
        let output = capture_at(Level::WARN, || {
            TracingSink.on_stage_start(Stage::Discover);
            TracingSink.on_item_complete(Stage::Measure, "ok.zip", 3);
        });
        assert!(output.is_empty(), "{}", output);
    }
}
