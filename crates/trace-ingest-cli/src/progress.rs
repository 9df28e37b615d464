use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use trace_ingest_core::stages::{ItemFailure, Stage};
use trace_ingest_core::{EventSink, ProcessingState};

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Console sink: one spinner per stage, a summary line when it finishes.
pub struct CliSink {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliSink {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.bar().take() {
            pb.finish_and_clear();
        }
    }

    fn set_message(&self, message: String) {
        if let Some(pb) = self.bar().as_ref() {
            pb.set_message(message);
        }
    }

    /// Print above the spinner without tearing it.
    fn println(&self, line: String) {
        match self.bar().as_ref() {
            Some(pb) => pb.println(line),
            None => eprintln!("{}", line),
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    // Template is a literal; fall back to the default style if it is ever rejected.
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_chars(TICK_CHARS));
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Discover => "Discovering packages",
        Stage::Move => "Moving packages",
        Stage::Measure => "Measuring packages",
    }
}

impl EventSink for CliSink {
    fn on_stage_start(&self, stage: Stage) {
        self.set_bar(spinner(format!("{}...", stage_label(stage))));
    }

    fn on_stage_complete(&self, stage: Stage, count: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m {} complete: {} in {:.2}s",
            stage, count, duration_secs
        );
    }

    fn on_directory_scanned(&self, dir: &Path, discovered: usize) {
        self.set_message(format!("Scanned {} ({} new)", dir.display(), discovered));
    }

    fn on_item_start(&self, stage: Stage, package: &str) {
        self.set_message(format!("{}... {}", stage_label(stage), package));
    }

    fn on_item_skipped(&self, stage: Stage, package: &str, reason: &str) {
        self.println(format!("  \x1b[33m-\x1b[0m {} skipped {}: {}", stage, package, reason));
    }

    fn on_item_failed(&self, failure: &ItemFailure) {
        self.println(format!(
            "  \x1b[31m✗\x1b[0m {} failed {}: {}",
            failure.stage, failure.package, failure.message
        ));
    }

    fn on_invariant_violation(
        &self,
        package: &str,
        expected: Option<ProcessingState>,
        found: Option<ProcessingState>,
    ) {
        let show = |s: Option<ProcessingState>| s.map_or("none".to_string(), |s| s.to_string());
        self.println(format!(
            "  \x1b[31m!\x1b[0m {} changed underneath us (expected {}, found {})",
            package,
            show(expected),
            show(found)
        ));
    }
}
