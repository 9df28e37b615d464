//! Seam to the external analysis engine.
//!
//! The pipeline never interprets measurements. It hands a package path to an
//! [`Analyzer`] and stores whatever [`MeasurementSet`] comes back.

pub mod file;
pub mod registry;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub use file::FileAnalyzer;
pub use registry::{KindRegistry, MeasurementKind};

/// Engine that turns a package into measurements.
pub trait Analyzer: Send + Sync {
    /// Measure the package at `path`. Errors are reported per package and
    /// never abort sibling invocations.
    fn analyze(&self, path: &Path) -> Result<MeasurementSet>;

    /// Capture time recorded inside the package, if the format is known.
    fn inspect_intrinsic_date(&self, _path: &Path) -> Option<DateTime<Utc>> {
        None
    }
}

/// One opaque measurement payload tagged with its registered kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub kind: String,
    pub payload: Value,
}

impl Measurement {
    pub fn encode<M: MeasurementKind>(measurement: &M) -> Result<Self> {
        Ok(Measurement {
            kind: M::KIND.to_string(),
            payload: serde_json::to_value(measurement)?,
        })
    }

    /// Decode into `M`, or `None` if this measurement is of another kind.
    pub fn decode<M: MeasurementKind + DeserializeOwned>(&self) -> Result<Option<M>> {
        if self.kind != M::KIND {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(self.payload.clone())?))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSet {
    pub measurements: Vec<Measurement>,
}

impl MeasurementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<M: MeasurementKind>(&mut self, measurement: &M) -> Result<()> {
        self.measurements.push(Measurement::encode(measurement)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.iter()
    }

    /// All measurements of kind `M`.
    pub fn of_kind<M: MeasurementKind + DeserializeOwned>(&self) -> Result<Vec<M>> {
        let mut out = Vec::new();
        for m in &self.measurements {
            if let Some(decoded) = m.decode::<M>()? {
                out.push(decoded);
            }
        }
        Ok(out)
    }
}

/// Named attribute extracted from a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageAttribute {
    pub name: String,
    pub value: String,
}

impl MeasurementKind for PackageAttribute {
    const KIND: &'static str = "package_attribute";
}

/// Size and content fingerprint of the package file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDigest {
    pub size_bytes: u64,
    pub xxhash64: u64,
}

impl MeasurementKind for ContentDigest {
    const KIND: &'static str = "content_digest";
}
