use super::{Analyzer, ContentDigest, MeasurementSet, PackageAttribute};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use twox_hash::XxHash64;

const READ_CHUNK: usize = 64 * 1024;

lazy_static::lazy_static! {
    // 20240131, 2024-01-31, optionally followed by _153000 / T153000 / -153000
    static ref NAME_DATE: Regex = Regex::new(
        r"(?:^|\D)(\d{4})-?(\d{2})-?(\d{2})(?:[T_-](\d{2})(\d{2})(\d{2}))?(?:\D|$)"
    )
    .expect("file-name date pattern is valid");
}

/// Built-in engine: dates packages from their file names and measures them
/// as size plus XxHash64 content digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAnalyzer;

impl FileAnalyzer {
    pub fn new() -> Self {
        FileAnalyzer
    }
}

impl Analyzer for FileAnalyzer {
    fn analyze(&self, path: &Path) -> Result<MeasurementSet> {
        let (size_bytes, xxhash64) =
            hash_file(path).map_err(|e| Error::analysis(path, e))?;
        if size_bytes == 0 {
            return Err(Error::Analysis {
                path: path.to_path_buf(),
                message: "package is empty".to_string(),
                detail: format!("{} has zero length", path.display()),
            });
        }

        let mut set = MeasurementSet::new();
        set.push(&ContentDigest {
            size_bytes,
            xxhash64,
        })?;
        if let Some(ext) = path.extension() {
            set.push(&PackageAttribute {
                name: "package_type".to_string(),
                value: ext.to_string_lossy().to_lowercase(),
            })?;
        }
        if let Some(captured) = self.inspect_intrinsic_date(path) {
            set.push(&PackageAttribute {
                name: "captured_at".to_string(),
                value: captured.to_rfc3339(),
            })?;
        }
        Ok(set)
    }

    fn inspect_intrinsic_date(&self, path: &Path) -> Option<DateTime<Utc>> {
        let name = path.file_name()?.to_string_lossy();
        date_from_file_name(&name)
    }
}

/// Capture time encoded in a file name, if any.
pub fn date_from_file_name(name: &str) -> Option<DateTime<Utc>> {
    for caps in NAME_DATE.captures_iter(name) {
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let (Some(year), Some(month), Some(day)) = (num(1), num(2), num(3)) else {
            continue;
        };
        let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) else {
            continue;
        };
        let time = match (num(4), num(5), num(6)) {
            (Some(h), Some(m), Some(s)) => NaiveTime::from_hms_opt(h, m, s),
            _ => NaiveTime::from_hms_opt(0, 0, 0),
        };
        if let Some(time) = time {
            return Some(Utc.from_utc_datetime(&date.and_time(time)));
        }
    }
    None
}

/// Stream the file through XxHash64, returning (length, hash).
pub fn hash_file(path: &Path) -> io::Result<(u64, u64)> {
    let mut f = File::open(path)?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        let read = f.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.write(&buffer[..read]);
        total += read as u64;
    }
    Ok((total, hasher.finish()))
}

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}
