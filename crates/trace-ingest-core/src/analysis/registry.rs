use super::{ContentDigest, MeasurementSet, PackageAttribute};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeSet;

/// A typed measurement the catalog knows how to store.
pub trait MeasurementKind: Serialize {
    const KIND: &'static str;
}

/// Statically declared set of measurement kinds accepted by the catalog.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeSet<&'static str>,
}

impl KindRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the kinds produced by the built-in analyzer.
    pub fn builtin() -> Self {
        Self::empty()
            .with::<PackageAttribute>()
            .with::<ContentDigest>()
    }

    pub fn with<M: MeasurementKind>(mut self) -> Self {
        self.kinds.insert(M::KIND);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().copied()
    }

    /// Fail on the first measurement whose kind is not registered.
    pub fn check(&self, set: &MeasurementSet) -> Result<()> {
        match set.iter().find(|m| !self.contains(&m.kind)) {
            Some(m) => Err(Error::UnknownMeasurementKind(m.kind.clone())),
            None => Ok(()),
        }
    }
}
