use crate::analysis::{Analyzer, FileAnalyzer};
use crate::catalog::Catalog;
use crate::config::ProcessingConfig;
use crate::error::Result;
use crate::events::EventSink;
use crate::resolver::PathResolver;
use crate::stages::{self, BatchReport, ItemFailure, MeasureOptions, Stage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Runs Discover → Move → Measure once against a shared catalog.
///
/// No looping or scheduling happens here; an external timer is expected to
/// call [`Pipeline::run_once`] repeatedly.
pub struct Pipeline {
    config: ProcessingConfig,
    catalog: Catalog,
    analyzer: Arc<dyn Analyzer>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub discovered: usize,
    pub moved: usize,
    pub measured: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
    /// Stages that could not select their batch at all.
    pub stage_errors: Vec<(Stage, String)>,
    pub duration: Duration,
}

impl RunSummary {
    /// `(moved, measured)` for this invocation.
    pub fn counts(&self) -> (usize, usize) {
        (self.moved, self.measured)
    }

    fn absorb(&mut self, report: BatchReport) {
        match report.stage {
            Stage::Discover => self.discovered = report.completed,
            Stage::Move => self.moved = report.completed,
            Stage::Measure => self.measured = report.completed,
        }
        self.skipped += report.skipped.len();
        self.failures.extend(report.failures);
    }
}

impl Pipeline {
    pub fn new(config: ProcessingConfig, catalog: Catalog, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            config,
            catalog,
            analyzer,
        }
    }

    /// Open the catalog at `config.catalog_path` with the built-in analyzer.
    pub fn open(config: ProcessingConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Catalog::open(&config.catalog_path)?;
        Ok(Self::new(config, catalog, Arc::new(FileAnalyzer::new())))
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn run_once(&self, sink: &dyn EventSink) -> Result<RunSummary> {
        self.config.validate()?;
        let start = Instant::now();
        sink.on_pipeline_start();
        info!("Processing run starting");

        let resolver = PathResolver::new(self.analyzer.as_ref());
        let mut summary = RunSummary {
            discovered: 0,
            moved: 0,
            measured: 0,
            skipped: 0,
            failures: Vec::new(),
            stage_errors: Vec::new(),
            duration: Duration::ZERO,
        };

        let discovered = stages::discover(&self.config, &self.catalog, &resolver, sink);
        self.collect(&mut summary, Stage::Discover, discovered);

        let moved = stages::move_batch(&self.config, &self.catalog, &resolver, sink);
        self.collect(&mut summary, Stage::Move, moved);

        let options = MeasureOptions {
            throttle: self.config.measure_throttle,
            deadline: self.config.measure_deadline_secs.map(Duration::from_secs),
        };
        let measured = stages::measure(&self.catalog, &self.analyzer, options, sink);
        self.collect(&mut summary, Stage::Measure, measured);

        summary.duration = start.elapsed();
        info!(
            "Processing run complete: {} discovered, {} moved, {} measured, {} failed",
            summary.discovered,
            summary.moved,
            summary.measured,
            summary.failures.len()
        );
        sink.on_pipeline_complete(summary.moved, summary.measured, summary.duration.as_secs_f64());
        Ok(summary)
    }

    fn collect(&self, summary: &mut RunSummary, stage: Stage, result: Result<BatchReport>) {
        match result {
            Ok(report) => summary.absorb(report),
            Err(err) => {
                error!("Stage {} aborted: {}", stage, err);
                summary.stage_errors.push((stage, err.to_string()));
            }
        }
    }
}
