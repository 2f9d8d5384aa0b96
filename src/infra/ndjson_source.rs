use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::domain::RawRecord;
use crate::error::PipelineError;
use crate::observability::metrics;

const EXCERPT_CHARS: usize = 100;

/// Counters shared between the reader and whoever reports on the run
#[derive(Debug, Default)]
pub struct SourceStats {
    files: AtomicUsize,
    records: AtomicUsize,
    malformed: AtomicUsize,
    unreadable_files: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStatsSnapshot {
    pub files: usize,
    pub records: usize,
    pub malformed: usize,
    pub unreadable_files: usize,
}

impl SourceStats {
    pub fn snapshot(&self) -> SourceStatsSnapshot {
        SourceStatsSnapshot {
            files: self.files.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unreadable_files: self.unreadable_files.load(Ordering::Relaxed),
        }
    }
}

/// Lazily reads an NDJSON knowledge export, one [`RawRecord`] per line.
///
/// The path may be a single file or a directory, in which case every export
/// file in it is read in file-name order. Blank lines are skipped; lines that
/// are not JSON objects are logged, counted and skipped.
pub struct NdjsonRecordSource {
    pending: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    stats: Arc<SourceStats>,
}

struct OpenFile {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl NdjsonRecordSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            list_export_files(path)?
        } else {
            // Surface a missing input before the run starts
            fs::metadata(path)?;
            vec![path.to_path_buf()]
        };

        info!("Reading export from {} ({} file(s))", path.display(), files.len());
        Ok(Self {
            pending: files.into(),
            current: None,
            stats: Arc::new(SourceStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<SourceStats> {
        Arc::clone(&self.stats)
    }

    fn open_next_file(&mut self) -> bool {
        while let Some(path) = self.pending.pop_front() {
            match File::open(&path) {
                Ok(file) => {
                    debug!("Opened export file {}", path.display());
                    self.stats.files.fetch_add(1, Ordering::Relaxed);
                    metrics::source::file_opened();
                    self.current = Some(OpenFile {
                        path,
                        lines: BufReader::new(file).lines(),
                        line_number: 0,
                    });
                    return true;
                }
                Err(e) => {
                    error!("Failed to open export file {}: {}", path.display(), e);
                    self.stats.unreadable_files.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        false
    }
}

impl Iterator for NdjsonRecordSource {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            if self.current.is_none() && !self.open_next_file() {
                return None;
            }
            let file = self.current.as_mut()?;

            let line = match file.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    error!("Failed to read {} after line {}: {}", file.path.display(), file.line_number, e);
                    self.stats.unreadable_files.fetch_add(1, Ordering::Relaxed);
                    self.current = None;
                    continue;
                }
                None => {
                    self.current = None;
                    continue;
                }
            };
            file.line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line) {
                Some(record) => {
                    self.stats.records.fetch_add(1, Ordering::Relaxed);
                    return Some(record);
                }
                None => {
                    warn!(
                        "Skipping malformed line {} of {}: {}...",
                        file.line_number,
                        file.path.display(),
                        excerpt(line)
                    );
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    metrics::source::malformed_line();
                }
            }
        }
    }
}

/// A record for a JSON object line, `None` for anything else
pub fn parse_line(line: &str) -> Option<RawRecord> {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(object)) => Some(RawRecord::from_json_object(object)),
        _ => None,
    }
}

fn list_export_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let extensions = constants::supported_input_extensions();
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn excerpt(line: &str) -> String {
    line.chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_reads_objects_and_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.ndjson");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"Id": "kA1", "Title": "Reset PIN", "Views": 12, "UrlName": null}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file, "[1, 2]").unwrap();
        writeln!(file, r#"{{"Id": "kA2", "Tags": ["a", "b"]}}"#).unwrap();

        let mut source = NdjsonRecordSource::open(&path).unwrap();
        let stats = source.stats();
        let records: Vec<RawRecord> = source.by_ref().collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("Views"), Some(Some("12")));
        assert_eq!(records[0].get("UrlName"), Some(None));
        assert_eq!(records[1].get("Tags"), Some(Some(r#"["a","b"]"#)));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.records, 2);
        assert_eq!(snapshot.malformed, 2);
        assert_eq!(snapshot.files, 1);
    }

    #[test]
    fn test_directory_files_read_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.jsonl"), "{\"Id\": \"kB\"}\n").unwrap();
        fs::write(dir.path().join("a.ndjson"), "{\"Id\": \"kA\"}\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "{\"Id\": \"kX\"}\n").unwrap();

        let ids: Vec<String> = NdjsonRecordSource::open(dir.path())
            .unwrap()
            .map(|record| record.get("Id").flatten().unwrap_or_default().to_string())
            .collect();

        assert_eq!(ids, vec!["kA", "kB"]);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            NdjsonRecordSource::open(dir.path().join("absent.ndjson")),
            Err(PipelineError::Io(_))
        ));
    }

    #[test]
    fn test_excerpt_is_char_safe() {
        let line = "é".repeat(150);
        assert_eq!(excerpt(&line).chars().count(), 100);
    }
}
