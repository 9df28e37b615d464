use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Row id of a package in the catalog.
pub type PackageId = i64;

/// Where a package sits in the pipeline.
///
/// Variants are declared in pipeline order, so `Ord` matches the
/// `Discovered < Moved < Measured` progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessingState {
    Discovered,
    Moved,
    Measured,
    PostMeasureActionInvoked,
}

impl ProcessingState {
    pub const ALL: [ProcessingState; 4] = [
        ProcessingState::Discovered,
        ProcessingState::Moved,
        ProcessingState::Measured,
        ProcessingState::PostMeasureActionInvoked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingState::Discovered => "discovered",
            ProcessingState::Moved => "moved",
            ProcessingState::Measured => "measured",
            ProcessingState::PostMeasureActionInvoked => "post_measure_action_invoked",
        }
    }

    /// The state a package must currently be in for a transition into
    /// `self` to be legal. `None` means "no transition recorded yet".
    pub fn predecessor(self) -> Option<ProcessingState> {
        match self {
            ProcessingState::Discovered => None,
            ProcessingState::Moved => Some(ProcessingState::Discovered),
            ProcessingState::Measured => Some(ProcessingState::Moved),
            ProcessingState::PostMeasureActionInvoked => Some(ProcessingState::Measured),
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ProcessingState::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| format!("unknown processing state '{}'", s))
    }
}

/// One discovered data unit, keyed by its case-insensitive file name.
#[derive(Debug, Clone)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    /// Canonical location inside the archive tree.
    pub full_path: PathBuf,
    pub captured_at: Option<DateTime<Utc>>,
    pub state: Option<ProcessingState>,
}

/// One immutable state transition.
#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    pub id: i64,
    pub package_id: PackageId,
    pub state: ProcessingState,
    pub changed_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// A package selected as stage input: id, name and the path valid as of
/// its latest transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPackage {
    pub id: PackageId,
    pub name: String,
    pub path: PathBuf,
}

/// Natural key for a package name.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}
