//! Append-only JSONL persistence for [`RunRecord`]s.
//!
//! Each record is one self-contained line written with a single `write_all`
//! on a file opened in append mode, then flushed and synced. Concurrent
//! writers in separate processes therefore interleave whole lines; existing
//! lines are never rewritten.

use chrono::{NaiveDate, Utc};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use crate::config::short_hash;
use crate::error::{self, ProbeError};
use crate::record::{ParseMode, RunRecord};

/// A results file holding one [`RunRecord`] per line.
#[derive(Debug, Clone)]
pub struct JsonlStorage {
    path: PathBuf,
}

impl JsonlStorage {
    /// Point at `path` without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Point at `path`, creating its parent directory.
    pub fn create(path: impl Into<PathBuf>) -> error::Result<Self> {
        let storage = Self::new(path);
        ensure_parent_dir(&storage.path)?;
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate `record` and append it durably. A record that fails
    /// validation is rejected before the file is opened.
    pub fn append(&self, record: &RunRecord) -> error::Result<()> {
        record.validate()?;
        let line = record.to_json_line()?;
        append_line(&self.path, &line, true).map_err(|e| ProbeError::storage(&self.path, e))
    }

    /// Iterate records in file order. A missing file yields nothing.
    pub fn iter(&self, mode: ParseMode) -> error::Result<RecordIter> {
        let lines = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(ProbeError::storage(&self.path, e)),
        };
        Ok(RecordIter {
            path: self.path.clone(),
            lines,
            line_no: 0,
            mode,
        })
    }

    /// Read every record, stopping at the first invalid line.
    pub fn read_all(&self, mode: ParseMode) -> error::Result<Vec<RunRecord>> {
        self.iter(mode)?.collect()
    }
}

/// Iterator over the records of a [`JsonlStorage`] file.
///
/// Blank lines are skipped. Parse and validation errors carry the 1-based
/// line number; iteration can continue past them.
pub struct RecordIter {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
    mode: ParseMode,
}

impl Iterator for RecordIter {
    type Item = error::Result<RunRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let next = lines.next()?;
            self.line_no += 1;
            let line = match next {
                Ok(line) => line,
                // The reader has already consumed the bad line, so iteration can go on.
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Some(Err(ProbeError::serialization(format!(
                        "line {}: invalid UTF-8",
                        self.line_no
                    ))));
                }
                Err(e) => return Some(Err(ProbeError::storage(&self.path, e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            let line_no = self.line_no;
            return Some(
                RunRecord::from_json_line(&line, self.mode).map_err(|e| at_line(e, line_no)),
            );
        }
    }
}

fn at_line(err: ProbeError, line_no: usize) -> ProbeError {
    match err {
        ProbeError::Validation { field, message } => ProbeError::Validation {
            field,
            message: format!("line {line_no}: {message}"),
        },
        ProbeError::Serialization { message } => ProbeError::Serialization {
            message: format!("line {line_no}: {message}"),
        },
        other => other,
    }
}

/// Append `line` plus a newline in one write. `durable` also fsyncs the data.
pub(crate) fn append_line(path: &Path, line: &str, durable: bool) -> io::Result<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buf.as_bytes())?;
    file.flush()?;
    if durable {
        file.sync_data()?;
    }
    Ok(())
}

pub(crate) fn ensure_parent_dir(path: &Path) -> error::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| ProbeError::storage(parent, e))
        }
        _ => Ok(()),
    }
}

/// `<base>/<dataset>__<YYYY-MM-DD>__<short-hash>.jsonl`. Pure: no IO.
pub fn output_path(base: &Path, dataset_id: &str, config_hash: &str, date: NaiveDate) -> PathBuf {
    base.join(format!(
        "{}__{}__{}.jsonl",
        file_component(dataset_id),
        date.format("%Y-%m-%d"),
        short_hash(config_hash)
    ))
}

/// [`output_path`] for today's UTC date.
pub fn default_output_path(base: &Path, dataset_id: &str, config_hash: &str) -> PathBuf {
    output_path(base, dataset_id, config_hash, Utc::now().date_naive())
}

fn file_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "experiment".to_string()
    } else {
        cleaned
    }
}
