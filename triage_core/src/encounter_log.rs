//! Append-only encounter log.
//!
//! Encoded notes are appended to a JSONL (JSON Lines) file with file locking
//! to ensure safe concurrent access. The note string is stored verbatim.

use crate::{Disposition, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One logged encounter
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EncounterRecord {
    pub id: Uuid,
    pub protocol_id: String,
    pub recorded_at: DateTime<Utc>,
    pub note: String,
    pub disposition: Option<Disposition>,
}

impl EncounterRecord {
    pub fn new(
        protocol_id: impl Into<String>,
        note: impl Into<String>,
        disposition: Option<Disposition>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            protocol_id: protocol_id.into(),
            recorded_at: Utc::now(),
            note: note.into(),
            disposition,
        }
    }
}

/// Encounter sink trait for persisting encounters
pub trait EncounterSink {
    fn append(&mut self, record: &EncounterRecord) -> Result<()>;
}

/// JSONL-based encounter sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl EncounterSink for JsonlSink {
    fn append(&mut self, record: &EncounterRecord) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Appended encounter {} to log", record.id);
        Ok(())
    }
}

/// Read all encounters from a log file
///
/// Corrupted lines are skipped with a warning.
pub fn read_encounters(path: &Path) -> Result<Vec<EncounterRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<EncounterRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse encounter at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} encounters from log", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record() -> EncounterRecord {
        EncounterRecord::new(
            "A-1",
            "A-1|R1|F7|1.1.0",
            Some(Disposition::new("CAT I", "Provider Now")),
        )
    }

    #[test]
    fn test_append_and_read_single_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("encounters.jsonl");

        let record = create_test_record();
        let mut sink = JsonlSink::new(&log_path);
        sink.append(&record).unwrap();

        let records = read_encounters(&log_path).unwrap();
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn test_append_multiple_records() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("nested").join("encounters.jsonl");

        let mut sink = JsonlSink::new(&log_path);
        for _ in 0..5 {
            sink.append(&create_test_record()).unwrap();
        }

        let records = read_encounters(&log_path).unwrap();
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn test_read_missing_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("nonexistent.jsonl");

        let records = read_encounters(&log_path).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_corrupted_lines_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("encounters.jsonl");

        let mut sink = JsonlSink::new(&log_path);
        sink.append(&create_test_record()).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
            writeln!(file, "{{ not json").unwrap();
        }
        sink.append(&create_test_record()).unwrap();

        let records = read_encounters(&log_path).unwrap();
        assert_eq!(records.len(), 2);
    }
}
