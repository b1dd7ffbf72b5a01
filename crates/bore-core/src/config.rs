//! User configuration stored as `.bore/config.json` inside the managed repo.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {problems}")]
    Invalid { problems: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub theme: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: "navy_red_dark".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub claude_cli_path: String,
    pub default_model: String,
    pub commander_context_limit: i64,
    pub max_total_workers: i64,
    pub max_workers_basic: i64,
    pub max_workers_medium: i64,
    pub max_workers_complex: i64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            claude_cli_path: "claude".to_string(),
            default_model: String::new(),
            commander_context_limit: 5,
            max_total_workers: 6,
            max_workers_basic: 1,
            max_workers_medium: 2,
            max_workers_complex: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub worktree_strategy: String,
    pub review_required: bool,
    pub auto_commit: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            worktree_strategy: "worktree".to_string(),
            review_required: true,
            auto_commit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub to_console: bool,
    pub rotation_mb: i64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_console: true,
            rotation_mb: 10,
        }
    }
}

/// Top-level configuration for bore.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ui: UiConfig,
    pub agents: AgentsConfig,
    pub git: GitConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads the config at `path`, merging file contents over defaults.
    /// A missing file yields a fully-default config. The result is validated;
    /// an invalid config fails the load so callers never see partial state.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        let mut cfg = match fs::read_to_string(path_ref) {
            Ok(body) => {
                serde_json::from_str::<Config>(&body).map_err(|source| ConfigError::Parse {
                    path: path_ref.to_path_buf(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path_ref.to_path_buf(),
                    source,
                })
            }
        };

        cfg.ensure_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Writes the config to `path` as pretty JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let body = serde_json::to_string_pretty(self)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path_ref, body).map_err(|source| ConfigError::Write {
            path: path_ref.to_path_buf(),
            source,
        })
    }

    /// Fills empty string fields with their defaults. Numeric fields are left
    /// alone: zero may be the caller's explicit (invalid) intent and should
    /// be reported by `validate` instead of silently patched.
    pub fn ensure_defaults(&mut self) {
        let d = Config::default();

        if self.ui.theme.is_empty() {
            self.ui.theme = d.ui.theme;
        }
        if self.agents.claude_cli_path.is_empty() {
            self.agents.claude_cli_path = d.agents.claude_cli_path;
        }
        // default_model intentionally left alone: empty means "no override".
        if self.git.worktree_strategy.is_empty() {
            self.git.worktree_strategy = d.git.worktree_strategy;
        }
        if self.logging.level.is_empty() {
            self.logging.level = d.logging.level;
        }
    }

    /// Checks every constraint and reports all violations in one error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if !matches!(self.logging.level.as_str(), "debug" | "info" | "warn" | "error") {
            problems.push(format!(
                "logging.level must be one of debug, info, warn, error; got {:?}",
                self.logging.level
            ));
        }
        if self.logging.rotation_mb < 1 {
            problems.push(format!(
                "logging.rotation_mb must be >= 1; got {}",
                self.logging.rotation_mb
            ));
        }

        if self.agents.max_total_workers < 1 {
            problems.push(format!(
                "agents.max_total_workers must be >= 1; got {}",
                self.agents.max_total_workers
            ));
        }
        if self.agents.max_workers_basic < 1 {
            problems.push(format!(
                "agents.max_workers_basic must be >= 1; got {}",
                self.agents.max_workers_basic
            ));
        }
        if self.agents.max_workers_medium < 1 {
            problems.push(format!(
                "agents.max_workers_medium must be >= 1; got {}",
                self.agents.max_workers_medium
            ));
        }
        if self.agents.max_workers_complex < 1 {
            problems.push(format!(
                "agents.max_workers_complex must be >= 1; got {}",
                self.agents.max_workers_complex
            ));
        }
        if self.agents.commander_context_limit < 0 {
            problems.push(format!(
                "agents.commander_context_limit must be >= 0; got {}",
                self.agents.commander_context_limit
            ));
        }

        if self.git.worktree_strategy != "worktree" {
            problems.push(format!(
                "git.worktree_strategy must be \"worktree\"; got {:?}",
                self.git.worktree_strategy
            ));
        }
        if !self.git.review_required {
            problems.push("git.review_required must be true".to_string());
        }
        if self.git.auto_commit {
            problems.push("git.auto_commit must be false".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                problems: problems.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError};

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().expect("defaults must validate");
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load(dir.path().join("config.json")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_merges_partial_file_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"agents": {"max_total_workers": 2}}"#).expect("write");

        let cfg = Config::load(&path).expect("load");
        assert_eq!(cfg.agents.max_total_workers, 2);
        assert_eq!(cfg.agents.claude_cli_path, "claude");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut cfg = Config::default();
        cfg.logging.level = "loud".to_string();
        cfg.agents.max_total_workers = 0;
        cfg.git.worktree_strategy = "clone".to_string();

        let err = cfg.validate().expect_err("invalid config");
        let ConfigError::Invalid { problems } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert!(problems.contains("logging.level"));
        assert!(problems.contains("max_total_workers"));
        assert!(problems.contains("worktree_strategy"));
    }

    #[test]
    fn ensure_defaults_patches_empty_strings_only() {
        let mut cfg = Config::default();
        cfg.agents.claude_cli_path = String::new();
        cfg.agents.default_model = String::new();
        cfg.agents.max_total_workers = 0;

        cfg.ensure_defaults();
        assert_eq!(cfg.agents.claude_cli_path, "claude");
        assert_eq!(cfg.agents.default_model, "");
        assert_eq!(cfg.agents.max_total_workers, 0);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = Config::default();
        cfg.agents.default_model = "sonnet".to_string();
        cfg.save(&path).expect("save");

        let loaded = Config::load(&path).expect("load");
        assert_eq!(loaded, cfg);
    }
}
