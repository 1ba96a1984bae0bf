//! Settings for the `codeweave` command line tool.
//!
//! [`ConfigLoader`] stacks `~/.codeweave/config.toml`, the workspace's
//! `.codeweave/config.toml` and [`ConfigOverrides`] from the command line
//! into one validated [`CodeweaveConfig`].
//!
//! # Example TOML
//!
//! ```toml
//! [patterns]
//! paths = ["patterns/python.json", "patterns/extra.toml"]
//!
//! [processing]
//! parallelism = 4
//! language = "python"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Log levels accepted in `[logging] level`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Effective settings after all layers are merged.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CodeweaveConfig {
    /// Pattern documents to load
    pub patterns: PatternsConfig,

    /// How source files are processed
    pub processing: ProcessingConfig,

    /// Diagnostics written to stderr
    pub logging: LoggingConfig,
}

/// Pattern document locations.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PatternsConfig {
    /// JSON or TOML pattern documents, relative to the workspace root
    pub paths: Vec<PathBuf>,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Worker threads for parallel file processing (0 = one per CPU)
    pub parallelism: usize,

    /// Force a language instead of detecting it from the file extension
    pub language: Option<String>,

    /// Skip files larger than this
    pub max_file_size_kb: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            language: None,
            max_file_size_kb: 1024,
        }
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of [`LOG_LEVELS`]; `RUST_LOG` takes precedence when set
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Values given on the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replace the configured pattern documents
    pub pattern_paths: Option<Vec<PathBuf>>,

    /// Override language detection
    pub language: Option<String>,

    pub log_level: Option<String>,

    pub parallelism: Option<usize>,
}

impl ConfigOverrides {
    /// Anchor relative pattern paths at `base`, usually the directory the
    /// command was run from. Unanchored paths resolve against the workspace.
    pub fn anchor_pattern_paths(mut self, base: &Path) -> Self {
        if let Some(paths) = &mut self.pattern_paths {
            for path in paths.iter_mut().filter(|p| p.is_relative()) {
                *path = base.join(&*path);
            }
        }
        self
    }
}

impl CodeweaveConfig {
    /// Overlay command-line values. Pattern paths are replaced, not extended.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref paths) = overrides.pattern_paths {
            self.patterns.paths = paths.clone();
        }

        if let Some(ref language) = overrides.language {
            self.processing.language = Some(language.clone());
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }

        if let Some(parallelism) = overrides.parallelism {
            self.processing.parallelism = parallelism;
        }
    }

    /// Reject values no run could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!(
                    "must be one of {} (got '{}')",
                    LOG_LEVELS.join(", "),
                    self.logging.level
                ),
            ));
        }
        if self.processing.max_file_size_kb == 0 {
            return Err(ConfigError::invalid_value(
                "processing.max_file_size_kb",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Pattern document paths resolved against the workspace root.
    pub fn pattern_paths(&self, workspace_root: &Path) -> Vec<PathBuf> {
        self.patterns
            .paths
            .iter()
            .map(|path| {
                if path.is_absolute() {
                    path.clone()
                } else {
                    workspace_root.join(path)
                }
            })
            .collect()
    }
}
