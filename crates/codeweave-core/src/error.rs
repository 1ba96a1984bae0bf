//! Error taxonomy for loading patterns, resolving arguments and running the engine.

use std::path::PathBuf;

use thiserror::Error;

/// A pattern, predicate or converter document is malformed.
///
/// Raised while loading, never mid-match.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Failed to read a document
    #[error("failed to read pattern document '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid JSON
    #[error("failed to parse JSON pattern document: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid TOML
    #[error("failed to parse TOML pattern document: {0}")]
    Toml(#[from] toml::de::Error),

    /// Extension not recognised
    #[error("unsupported pattern document format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Document is well-formed but describes an invalid entry
    #[error("pattern entry {entry}: {message}")]
    InvalidEntry { entry: usize, message: String },
}

impl ConfigurationError {
    pub fn invalid(entry: usize, message: impl Into<String>) -> Self {
        Self::InvalidEntry {
            entry,
            message: message.into(),
        }
    }
}

/// Argument or capture resolution failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// A required capture is not bound in the current match
    #[error("missing capture '@{name}'")]
    MissingCapture { name: String },

    /// No enclosing match has a graph node yet
    #[error("missing ancestor for '@{name}': no enclosing match has a graph node")]
    MissingAncestor { name: String },

    /// A kind expression did not resolve to a known entity kind
    #[error("unknown entity kind '{0}'")]
    UnknownEntityKind(String),

    /// The syntax node has no graph node in the current file
    #[error("no graph node is associated with the syntax node bound to '@{name}'")]
    UnmappedSyntaxNode { name: String },
}

impl ResolveError {
    pub fn missing_capture(name: impl Into<String>) -> Self {
        Self::MissingCapture { name: name.into() }
    }

    pub fn missing_ancestor(name: impl Into<String>) -> Self {
        Self::MissingAncestor { name: name.into() }
    }

    /// True for every flavour of absent capture, including missing ancestors.
    pub fn is_missing_capture(&self) -> bool {
        matches!(
            self,
            Self::MissingCapture { .. } | Self::MissingAncestor { .. } | Self::UnmappedSyntaxNode { .. }
        )
    }

    pub fn is_missing_ancestor(&self) -> bool {
        matches!(self, Self::MissingAncestor { .. })
    }
}

/// Unrecoverable failure of a matching and conversion run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Resolution failure that a converter cannot skip
    #[error("converter {converter} of pattern {pattern} failed: {source}")]
    Converter {
        pattern: usize,
        converter: usize,
        #[source]
        source: ResolveError,
    },
}
