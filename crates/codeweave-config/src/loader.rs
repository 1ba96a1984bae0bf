//! Layered loading of `config.toml`.
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. `~/.codeweave/config.toml`
//! 3. `<workspace>/.codeweave/config.toml`
//! 4. Command-line overrides
//!
//! A file only overrides the keys it actually sets. Pattern paths are
//! additive: every layer appends its documents after those of the layers
//! below it.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::{CodeweaveConfig, ConfigOverrides, LogFormat};

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR: &str = ".codeweave";

// ============================================================================
// Layers
// ============================================================================

/// One config file as written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigLayer {
    patterns: PatternsLayer,
    processing: ProcessingLayer,
    logging: LoggingLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PatternsLayer {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProcessingLayer {
    parallelism: Option<usize>,
    language: Option<String>,
    max_file_size_kb: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggingLayer {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl ConfigLayer {
    fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.is_file() {
            trace!("No config at {:?}", path);
            return Ok(None);
        }

        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| ConfigError::parse_toml(path, e))
    }

    /// Anchor relative pattern paths at `base`.
    fn rebase_patterns(mut self, base: &Path) -> Self {
        for path in &mut self.patterns.paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    fn apply_to(self, config: &mut CodeweaveConfig) {
        for path in self.patterns.paths {
            if !config.patterns.paths.contains(&path) {
                config.patterns.paths.push(path);
            }
        }

        let processing = &mut config.processing;
        if let Some(parallelism) = self.processing.parallelism {
            processing.parallelism = parallelism;
        }
        if let Some(language) = self.processing.language {
            processing.language = Some(language);
        }
        if let Some(max) = self.processing.max_file_size_kb {
            processing.max_file_size_kb = max;
        }

        if let Some(level) = self.logging.level {
            config.logging.level = level;
        }
        if let Some(format) = self.logging.format {
            config.logging.format = format;
        }
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Resolves the effective configuration for a workspace.
///
/// The global file is read once per loader and reused across workspaces.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    global_dir: Option<PathBuf>,
    global_layer: Option<ConfigLayer>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader using `~/.codeweave` for the global layer, if a home
    /// directory can be found.
    pub fn new() -> Self {
        Self {
            global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
            global_layer: None,
        }
    }

    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_dir: Some(global_dir.into()),
            global_layer: None,
        }
    }

    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_dir.as_ref().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Merge every layer for `workspace_root` and validate the result.
    pub fn load(
        &mut self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CodeweaveConfig, ConfigError> {
        let mut config = CodeweaveConfig::default();

        if let Some(layer) = self.global_layer()? {
            layer.apply_to(&mut config);
        }
        if let Some(layer) = ConfigLayer::read(&self.local_config_path(workspace_root))? {
            layer.apply_to(&mut config);
        }
        if let Some(overrides) = overrides {
            config.apply_overrides(overrides);
        }

        config.validate()?;
        Ok(config)
    }

    /// Forget the cached global layer so the next `load` reads it again.
    pub fn clear_cache(&mut self) {
        self.global_layer = None;
    }

    fn global_layer(&mut self) -> Result<Option<ConfigLayer>, ConfigError> {
        if let Some(layer) = &self.global_layer {
            return Ok(Some(layer.clone()));
        }
        let (Some(dir), Some(path)) = (self.global_dir.clone(), self.global_config_path()) else {
            debug!("No home directory, skipping global config");
            return Ok(None);
        };

        // Global pattern paths are relative to the global config directory
        let layer = ConfigLayer::read(&path)?.map(|layer| layer.rebase_patterns(&dir));
        self.global_layer = layer.clone();
        Ok(layer)
    }
}
