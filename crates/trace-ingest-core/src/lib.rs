pub mod analysis;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod resolver;
pub mod stages;

pub use analysis::{Analyzer, FileAnalyzer, KindRegistry, Measurement, MeasurementSet};
pub use catalog::{Catalog, Package, PackageId, ProcessingRecord, ProcessingState};
pub use config::ProcessingConfig;
pub use error::{Error, Result};
pub use events::{EventSink, SilentSink, TracingSink};
pub use pipeline::{Pipeline, RunSummary};
pub use resolver::PathResolver;
