//! CSV persistence for collected records.
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! reader never observes a half-written output.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::PersistError;

pub const COMBINED_FILE_STEM: &str = "combined";
const DAY_FILE_PREFIX: &str = "date=";

/// Where and how collector outputs are laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub dir: PathBuf,
    pub gzip: bool,
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>, gzip: bool) -> Self {
        Self {
            dir: dir.into(),
            gzip,
        }
    }

    fn extension(&self) -> &'static str {
        if self.gzip { "csv.gz" } else { "csv" }
    }

    /// `<dir>/date=YYYY-MM-DD.csv[.gz]`
    pub fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{DAY_FILE_PREFIX}{}.{}",
            date.format("%Y-%m-%d"),
            self.extension()
        ))
    }

    /// `<dir>/combined.csv[.gz]`
    pub fn combined_path(&self) -> PathBuf {
        self.dir
            .join(format!("{COMBINED_FILE_STEM}.{}", self.extension()))
    }

    /// Per-day files currently on disk, sorted by date.
    pub fn existing_days(&self) -> Result<Vec<(NaiveDate, PathBuf)>, PersistError> {
        let io_err = |source| PersistError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut days = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(rest) = name.strip_prefix(DAY_FILE_PREFIX) else {
                continue;
            };
            let Some(stem) = rest.strip_suffix(&format!(".{}", self.extension())) else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                days.push((date, entry.path()));
            }
        }

        days.sort_by_key(|(date, _)| *date);
        Ok(days)
    }
}

/// Writes `rows` as a CSV with a header row, replacing any existing file.
///
/// A `.gz` suffix on `path` gzip-compresses the output.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), PersistError> {
    let tmp = temp_sibling(path);
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV");

    let result = write_to(&tmp, is_gzip(path), rows).and_then(|()| {
        fs::rename(&tmp, path).map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })
    });

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Reads every row of a CSV written by [`write_rows`].
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistError> {
    let file = File::open(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut rdr = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result.map_err(|source| PersistError::Csv {
            path: path.to_path_buf(),
            source,
        })?);
    }
    Ok(rows)
}

fn write_to<T: Serialize>(tmp: &Path, gzip: bool, rows: &[T]) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: tmp.to_path_buf(),
        source,
    };

    let file = File::create(tmp).map_err(io_err)?;
    if gzip {
        let encoder = serialize_into(GzEncoder::new(file, Compression::default()), rows, tmp)?;
        encoder.finish().map_err(io_err)?;
    } else {
        let file = serialize_into(file, rows, tmp)?;
        file.sync_all().map_err(io_err)?;
    }

    Ok(())
}

fn serialize_into<W: Write, T: Serialize>(
    sink: W,
    rows: &[T],
    path: &Path,
) -> Result<W, PersistError> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(sink);
    for row in rows {
        writer.serialize(row).map_err(|source| PersistError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    }

    writer.into_inner().map_err(|e| PersistError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(e.error().kind(), e.error().to_string()),
    })
}

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
