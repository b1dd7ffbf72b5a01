//! Per-run artifact directory under `.bore/runs/<execution_id>/`.
//!
//! Holds `execution.json` (row snapshot), `events.log` (append-only JSONL
//! mirror of the event timeline), and `diff.patch` (combined diff captured
//! when the run reaches its terminal write). The relational store stays the
//! source of truth; these files carry detail for inspection.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bore_core::types::{EventLevel, Execution};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to create run directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize run artifact: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write run artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One line of `events.log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEvent {
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub event_type: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    runs_root: PathBuf,
}

impl RunArtifacts {
    pub fn new(runs_root: impl Into<PathBuf>) -> Self {
        Self {
            runs_root: runs_root.into(),
        }
    }

    pub fn run_dir(&self, execution_id: i64) -> PathBuf {
        self.runs_root.join(execution_id.to_string())
    }

    pub fn append_event(
        &self,
        execution_id: i64,
        level: EventLevel,
        event_type: &str,
        message: &str,
    ) -> Result<(), ArtifactError> {
        let dir = self.ensure_dir(execution_id)?;
        let event = ArtifactEvent {
            ts: Utc::now(),
            level,
            event_type: event_type.to_string(),
            message: message.to_string(),
        };
        let line =
            serde_json::to_string(&event).map_err(|source| ArtifactError::Serialize { source })?;

        let path = dir.join("events.log");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|source| ArtifactError::Write { path, source })
    }

    /// Writes (or rewrites) the execution row snapshot.
    pub fn write_execution(&self, execution: &Execution) -> Result<(), ArtifactError> {
        let dir = self.ensure_dir(execution.id)?;
        let body = serde_json::to_string_pretty(execution)
            .map_err(|source| ArtifactError::Serialize { source })?;
        let path = dir.join("execution.json");
        fs::write(&path, body).map_err(|source| ArtifactError::Write { path, source })
    }

    pub fn write_diff(&self, execution_id: i64, patch: &str) -> Result<(), ArtifactError> {
        let dir = self.ensure_dir(execution_id)?;
        let path = dir.join("diff.patch");
        fs::write(&path, patch).map_err(|source| ArtifactError::Write { path, source })
    }

    fn ensure_dir(&self, execution_id: i64) -> Result<PathBuf, ArtifactError> {
        let dir = self.run_dir(execution_id);
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }
}
