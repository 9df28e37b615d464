//! Maps an incoming package to its place in the dated archive tree.

use crate::analysis::Analyzer;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// How a package's capture date was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// Read from the package itself by the analysis engine.
    Intrinsic,
    /// Fallback: the file's modification time. Changes whenever the file is
    /// copied or touched, so destinations derived from it are not stable.
    ModifiedTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub destination: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub date_source: DateSource,
}

pub struct PathResolver<'a> {
    analyzer: &'a dyn Analyzer,
}

impl<'a> PathResolver<'a> {
    pub fn new(analyzer: &'a dyn Analyzer) -> Self {
        Self { analyzer }
    }

    /// `archive_root/<capture date formatted with date_pattern>/<file name>`.
    ///
    /// With `create_dirs` the dated subdirectory is created if missing.
    /// `date_pattern` must already be validated.
    pub fn resolve_destination(
        &self,
        source: &Path,
        archive_root: &Path,
        date_pattern: &str,
        create_dirs: bool,
    ) -> Result<Resolution> {
        let file_name = source
            .file_name()
            .ok_or_else(|| Error::NotFound(format!("no file name in {}", source.display())))?;

        let (captured_at, date_source) = match self.analyzer.inspect_intrinsic_date(source) {
            Some(dt) => (dt, DateSource::Intrinsic),
            None => {
                trace!("No intrinsic date for {}, using mtime", source.display());
                (modified_time(source)?, DateSource::ModifiedTime)
            }
        };

        let bucket = captured_at.format(date_pattern).to_string();
        let folder = archive_root.join(bucket);
        if create_dirs {
            fs::create_dir_all(&folder)?;
        }

        Ok(Resolution {
            destination: folder.join(file_name),
            captured_at,
            date_source,
        })
    }
}

fn modified_time(path: &Path) -> io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(fs::metadata(path)?.modified()?))
}

/// Find `file_name` (case-insensitive) anywhere below `archive_root`. Used
/// to recover a package whose move completed but whose transition was never
/// recorded.
pub fn locate_in_archive(archive_root: &Path, file_name: &str) -> io::Result<Option<PathBuf>> {
    if !archive_root.is_dir() {
        return Ok(None);
    }
    let wanted = file_name.to_lowercase();
    for entry in WalkDir::new(archive_root).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().to_lowercase() == wanted
        {
            debug!("Located {} at {}", file_name, entry.path().display());
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FileAnalyzer, MeasurementSet};
    use chrono::TimeZone;
    use tempfile::tempdir;

    struct FixedDate(Option<DateTime<Utc>>);

    impl Analyzer for FixedDate {
        fn analyze(&self, _path: &Path) -> Result<MeasurementSet> {
            Ok(MeasurementSet::new())
        }

        fn inspect_intrinsic_date(&self, _path: &Path) -> Option<DateTime<Utc>> {
            self.0
        }
    }

    #[test]
    fn test_intrinsic_date_bucket() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("archive");
        let analyzer = FixedDate(Some(Utc.with_ymd_and_hms(2021, 3, 9, 12, 0, 0).unwrap()));
        let resolver = PathResolver::new(&analyzer);

        let res = resolver
            .resolve_destination(Path::new("/in/sub/Trace.ZIP"), &archive, "%Y-%m", false)
            .unwrap();
        assert_eq!(res.destination, archive.join("2021-03").join("Trace.ZIP"));
        assert_eq!(res.date_source, DateSource::Intrinsic);
        assert!(!archive.join("2021-03").exists());
    }

    #[test]
    fn test_create_dirs_is_idempotent() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("archive");
        let analyzer = FileAnalyzer;
        let resolver = PathResolver::new(&analyzer);
        let source = Path::new("/in/boot_20200115.etl");

        for _ in 0..2 {
            let res = resolver
                .resolve_destination(source, &archive, "%Y/%m-%d", true)
                .unwrap();
            assert_eq!(res.destination, archive.join("2020/01-15/boot_20200115.etl"));
        }
        assert!(archive.join("2020").join("01-15").is_dir());
    }

    #[test]
    fn test_falls_back_to_mtime() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("undated.zip");
        fs::write(&source, b"x").unwrap();
        let analyzer = FixedDate(None);
        let resolver = PathResolver::new(&analyzer);

        let res = resolver
            .resolve_destination(&source, &tmp.path().join("archive"), "%Y", true)
            .unwrap();
        assert_eq!(res.date_source, DateSource::ModifiedTime);
        let modified = fs::metadata(&source).unwrap().modified().unwrap();
        let expected_year = DateTime::<Utc>::from(modified).format("%Y").to_string();
        assert!(res.destination.starts_with(tmp.path().join("archive").join(expected_year)));
    }

    #[test]
    fn test_mtime_fallback_needs_the_file() {
        let analyzer = FixedDate(None);
        let resolver = PathResolver::new(&analyzer);
        let err = resolver
            .resolve_destination(Path::new("/nope/gone.zip"), Path::new("/archive"), "%Y", false)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_locate_in_archive_is_case_insensitive() {
        let tmp = tempdir().unwrap();
        let bucket = tmp.path().join("2024-02");
        fs::create_dir_all(&bucket).unwrap();
        fs::write(bucket.join("Capture.zip"), b"x").unwrap();

        let found = locate_in_archive(tmp.path(), "capture.ZIP").unwrap();
        assert_eq!(found, Some(bucket.join("Capture.zip")));
        assert_eq!(locate_in_archive(tmp.path(), "other.zip").unwrap(), None);
        assert_eq!(locate_in_archive(&tmp.path().join("missing"), "x").unwrap(), None);
    }
}
