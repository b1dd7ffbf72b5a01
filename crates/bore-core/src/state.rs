//! Ephemeral UI state stored as `.bore/state.json`.
//!
//! The UI itself lives outside this workspace; the file format is part of the
//! cluster layout contract and losing it must never lose user work.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to read state file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse state at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize state: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write state file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub selected_items: BTreeMap<String, String>,
}

impl SessionState {
    /// Loads state from `path`; a missing file yields default state.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path_ref = path.as_ref();
        match fs::read_to_string(path_ref) {
            Ok(body) => serde_json::from_str(&body).map_err(|source| StateError::Parse {
                path: path_ref.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(StateError::Read {
                path: path_ref.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StateError> {
        let path_ref = path.as_ref();
        let body = serde_json::to_string_pretty(self)
            .map_err(|source| StateError::Serialize { source })?;
        fs::write(path_ref, body).map_err(|source| StateError::Write {
            path: path_ref.to_path_buf(),
            source,
        })
    }
}
