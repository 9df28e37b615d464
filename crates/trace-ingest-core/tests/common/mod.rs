#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use trace_ingest_core::stages::{ItemFailure, Stage};
use trace_ingest_core::{
    Analyzer, Error, EventSink, FileAnalyzer, MeasurementSet, ProcessingState, Result,
};

/// Analyzer stub driven by file names:
/// - `corrupt` in the name fails analysis
/// - `panic` in the name panics
/// - `slow` in the name sleeps for `slow_for` first
/// Everything else is measured by the built-in analyzer.
pub struct ScriptedAnalyzer {
    pub calls: AtomicUsize,
    pub slow_for: Duration,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            slow_for: Duration::from_secs(2),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze(&self, path: &Path) -> Result<MeasurementSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().unwrap().to_string_lossy().to_lowercase();
        if name.contains("corrupt") {
            return Err(Error::analysis(path, "unreadable package header"));
        }
        if name.contains("panic") {
            panic!("engine crashed on {}", name);
        }
        if name.contains("slow") {
            thread::sleep(self.slow_for);
        }
        FileAnalyzer.analyze(path)
    }

    fn inspect_intrinsic_date(&self, path: &Path) -> Option<DateTime<Utc>> {
        FileAnalyzer.inspect_intrinsic_date(path)
    }
}

/// Sink that records event names for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventSink for RecordingSink {
    fn on_pipeline_start(&self) {
        self.push("pipeline_start".to_string());
    }

    fn on_pipeline_complete(&self, moved: usize, measured: usize, _duration_secs: f64) {
        self.push(format!("pipeline_complete moved={} measured={}", moved, measured));
    }

    fn on_stage_start(&self, stage: Stage) {
        self.push(format!("stage_start {}", stage));
    }

    fn on_stage_complete(&self, stage: Stage, count: usize, _d: f64) {
        self.push(format!("stage_complete {} {}", stage, count));
    }

    fn on_item_failed(&self, failure: &ItemFailure) {
        self.push(format!("item_failed {}", failure.package));
    }

    fn on_invariant_violation(
        &self,
        package: &str,
        _expected: Option<ProcessingState>,
        _found: Option<ProcessingState>,
    ) {
        self.push(format!("invariant_violation {}", package));
    }
}

/// Write `count` dated packages named `capture_NN_20240115.zip`.
pub fn write_packages(dir: &Path, count: usize) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|i| {
            let path = dir.join(format!("capture_{:02}_20240115.zip", i));
            fs::write(&path, format!("package body {}", i)).unwrap();
            path
        })
        .collect()
}

pub fn write_file(path: &Path, body: &str) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
    path.to_path_buf()
}
