//! Append-only log file store (spec §4.3, §6).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

/// Column order mandated by spec §6.
pub const HEADER: &str = "timestamp,level,component,config_id,message,details";

/// One row destined for the log file.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// `info`, `warn` or `error`.
    pub level: &'static str,
    /// Originating component, e.g. `engine`, `exchange`, `validator`.
    pub component: &'static str,
    /// Rule id the entry concerns, if any.
    pub config_id: String,
    /// Human-readable summary.
    pub message: String,
    /// Free-form extra detail (e.g. a formatted error).
    pub details: String,
}

impl LogEntry {
    fn to_csv_row(&self) -> String {
        let fields = vec![
            self.timestamp.to_rfc3339(),
            self.level.to_owned(),
            self.component.to_owned(),
            self.config_id.clone(),
            self.message.clone(),
            self.details.clone(),
        ];
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(vec![]);
        writer.write_record(&fields).expect("writing to an in-memory buffer cannot fail");
        let bytes = writer.into_inner().expect("buffer flush cannot fail");
        String::from_utf8(bytes).expect("csv writer emits valid utf8 for utf8 input")
    }
}

/// Ensures the target file exists with a header row, then appends one row per flush.
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    /// Open (creating if needed, with header) the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or its header written.
    pub async fn open(path: PathBuf) -> Result<Self> {
        if tokio::fs::metadata(&path).await.is_err() {
            tokio::fs::write(&path, format!("{HEADER}\n"))
                .await
                .with_context(|| format!("creating log file {}", path.display()))?;
        }
        Ok(Self { path })
    }

    /// Append `entry`, flushing immediately (spec §4.3: "each write is a single flush").
    ///
    /// # Errors
    ///
    /// Returns an error if the append or flush fails.
    pub async fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening log file {}", self.path.display()))?;
        file.write_all(entry.to_csv_row().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Default path for the log file.
#[must_use]
pub fn default_path() -> PathBuf {
    PathBuf::from("ttslo.log.csv")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttslo.log.csv");
        let store = LogStore::open(path.clone()).await.unwrap();
        store
            .append(&LogEntry {
                timestamp: Utc::now(),
                level: "info",
                component: "engine",
                config_id: "r1".to_owned(),
                message: "tick completed".to_owned(),
                details: String::new(),
            })
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with(HEADER));
        assert_eq!(contents.lines().count(), 2);
    }
}
