//! Pattern Model
//!
//! Declarative descriptions of syntax-tree shapes, plus the metadata that
//! turns a match into graph mutations.
//!
//! A document is a list of entries, each `{pattern, predicates?, converters?}`:
//!
//! ```json
//! [
//!   {
//!     "pattern": {
//!       "rule": "class_definition",
//!       "captures": ["class"],
//!       "children": [{ "rule": "identifier", "captures": ["name"] }]
//!     },
//!     "predicates": [{ "type": "not_equals", "left": "@name", "right": "'_'" }],
//!     "converters": [{ "type": "node", "name": "@name", "kind": "'class'" }]
//!   }
//! ]
//! ```
//!
//! The serde wire types ([`PatternSpec`], [`PatternEntrySpec`]) are converted
//! once into the core types ([`Pattern`], [`PatternMetadata`]) and any
//! malformed entry is rejected at load time with a [`ConfigurationError`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::converter::{Converter, ConverterSpec};
use crate::error::ConfigurationError;
use crate::predicate::{Predicate, PredicateSpec};

/// Rule matching any single node.
pub const WILDCARD: &str = ".";

/// Rule matching any node and, transitively, its descendants.
pub const DESCENDANTS: &str = ".+";

// ============================================================================
// Core Pattern Types
// ============================================================================

/// What to match at one syntax node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Node(NodePattern),
    Alternatives(AlternativesPattern),
}

/// Match a node by rule, binding captures and matching child patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePattern {
    /// Rule name, [`WILDCARD`] or [`DESCENDANTS`]
    pub rule: String,
    /// Names bound to the matched node; empty binds it under its own rule
    pub captures: Vec<String>,
    /// Ordered, not necessarily contiguous, child patterns
    pub children: Vec<Pattern>,
    /// Rules that must not appear among the direct children
    pub not_children: BTreeSet<String>,
    pub optional: bool,
}

/// Match any of several patterns at the same node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativesPattern {
    pub alternatives: Vec<Pattern>,
    pub optional: bool,
}

impl Pattern {
    /// A node pattern with no captures or children.
    pub fn node(rule: impl Into<String>) -> Self {
        Pattern::Node(NodePattern {
            rule: rule.into(),
            captures: Vec::new(),
            children: Vec::new(),
            not_children: BTreeSet::new(),
            optional: false,
        })
    }

    pub fn alternatives(alternatives: Vec<Pattern>) -> Self {
        Pattern::Alternatives(AlternativesPattern {
            alternatives,
            optional: false,
        })
    }

    /// Add a capture name. No-op on alternatives.
    pub fn capture(mut self, name: impl Into<String>) -> Self {
        if let Pattern::Node(node) = &mut self {
            node.captures.push(name.into());
        }
        self
    }

    /// Add a child pattern. No-op on alternatives.
    pub fn child(mut self, child: Pattern) -> Self {
        if let Pattern::Node(node) = &mut self {
            node.children.push(child);
        }
        self
    }

    /// Forbid a direct child rule. No-op on alternatives.
    pub fn not_child(mut self, rule: impl Into<String>) -> Self {
        if let Pattern::Node(node) = &mut self {
            node.not_children.insert(rule.into());
        }
        self
    }

    /// Mark the pattern as optional when used as a child.
    pub fn optional(mut self) -> Self {
        match &mut self {
            Pattern::Node(node) => node.optional = true,
            Pattern::Alternatives(alts) => alts.optional = true,
        }
        self
    }

    pub fn is_optional(&self) -> bool {
        match self {
            Pattern::Node(node) => node.optional,
            Pattern::Alternatives(alts) => alts.optional,
        }
    }

    /// Convert a deserialized pattern, validating its shape.
    pub fn from_spec(spec: PatternSpec, entry: usize) -> Result<Self, ConfigurationError> {
        match spec {
            PatternSpec::Alternatives {
                alternatives,
                optional,
            } => {
                if alternatives.is_empty() {
                    return Err(ConfigurationError::invalid(
                        entry,
                        "alternatives pattern has no alternatives",
                    ));
                }
                let alternatives = alternatives
                    .into_iter()
                    .map(|alt| Self::from_spec(alt, entry))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Pattern::Alternatives(AlternativesPattern {
                    alternatives,
                    optional,
                }))
            }
            PatternSpec::Node {
                rule,
                captures,
                children,
                not_children,
                optional,
            } => {
                if rule.trim().is_empty() {
                    return Err(ConfigurationError::invalid(entry, "node pattern has an empty rule"));
                }
                if let Some(bad) = captures.iter().find(|c| c.trim().is_empty() || c.starts_with('@')) {
                    return Err(ConfigurationError::invalid(
                        entry,
                        format!("invalid capture name '{}'", bad),
                    ));
                }
                let children = children
                    .into_iter()
                    .map(|child| Self::from_spec(child, entry))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Pattern::Node(NodePattern {
                    rule,
                    captures,
                    children,
                    not_children: not_children.into_iter().collect(),
                    optional,
                }))
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_optional() {
            write!(f, "?")?;
        }
        match self {
            Pattern::Node(node) => {
                write!(f, "{}", node.rule)?;
                for capture in &node.captures {
                    write!(f, " @{}", capture)?;
                }
                for rule in &node.not_children {
                    write!(f, " !{}", rule)?;
                }
                if !node.children.is_empty() {
                    write!(f, "(")?;
                    for (i, child) in node.children.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", child)?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            Pattern::Alternatives(alts) => {
                write!(f, "[")?;
                for (i, alt) in alts.alternatives.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", alt)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A pattern with the predicates gating it and the converters it drives.
///
/// Applied atomically: a candidate match is discarded if any predicate
/// fails, and converters run only for accepted matches.
#[derive(Debug, Clone)]
pub struct PatternMetadata {
    pub pattern: Pattern,
    pub predicates: Vec<Predicate>,
    pub converters: Vec<Converter>,
}

impl PatternMetadata {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            predicates: Vec::new(),
            converters: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converters.push(converter);
        self
    }

    /// Convert a deserialized entry. Macro converters are expanded here.
    pub fn from_spec(spec: PatternEntrySpec, entry: usize) -> Result<Self, ConfigurationError> {
        let pattern = Pattern::from_spec(spec.pattern, entry)?;
        let predicates = spec
            .predicates
            .into_iter()
            .map(|p| Predicate::from_spec(p, entry))
            .collect::<Result<Vec<_>, _>>()?;
        let mut converters = Vec::new();
        for converter in spec.converters {
            converters.extend(Converter::from_spec(converter, entry)?);
        }
        Ok(Self {
            pattern,
            predicates,
            converters,
        })
    }
}

// ============================================================================
// Wire Format
// ============================================================================

/// Deserialized form of [`Pattern`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum PatternSpec {
    Alternatives {
        alternatives: Vec<PatternSpec>,
        #[serde(default)]
        optional: bool,
    },
    Node {
        rule: String,
        #[serde(default)]
        captures: Vec<String>,
        #[serde(default)]
        children: Vec<PatternSpec>,
        #[serde(default, alias = "notChildren")]
        not_children: Vec<String>,
        #[serde(default)]
        optional: bool,
    },
}

/// Deserialized form of [`PatternMetadata`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternEntrySpec {
    pub pattern: PatternSpec,
    #[serde(default)]
    pub predicates: Vec<PredicateSpec>,
    #[serde(default)]
    pub converters: Vec<ConverterSpec>,
}

/// A whole document: a bare list, or a table with a `patterns` list (TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum DocumentSpec {
    List(Vec<PatternEntrySpec>),
    Table { patterns: Vec<PatternEntrySpec> },
}

impl DocumentSpec {
    pub fn into_entries(self) -> Vec<PatternEntrySpec> {
        match self {
            DocumentSpec::List(entries) => entries,
            DocumentSpec::Table { patterns } => patterns,
        }
    }
}

// ============================================================================
// Pattern Set
// ============================================================================

/// Immutable, ordered collection of patterns reused across files.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    entries: Vec<PatternMetadata>,
}

impl PatternSet {
    pub fn new(entries: Vec<PatternMetadata>) -> Self {
        Self { entries }
    }

    /// Convert deserialized entries.
    pub fn from_specs(specs: Vec<PatternEntrySpec>) -> Result<Self, ConfigurationError> {
        let entries = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| PatternMetadata::from_spec(spec, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigurationError> {
        let doc: DocumentSpec = serde_json::from_str(source)?;
        Self::from_specs(doc.into_entries())
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let doc: DocumentSpec = toml::from_str(source)?;
        Self::from_specs(doc.into_entries())
    }

    /// Load a `.json` or `.toml` document.
    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigurationError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let set = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&source)?,
            Some("toml") => Self::from_toml_str(&source)?,
            _ => return Err(ConfigurationError::UnsupportedFormat(path.to_path_buf())),
        };
        debug!("Loaded {} patterns from {:?}", set.len(), path);
        Ok(set)
    }

    /// Load and concatenate several documents, preserving order.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigurationError> {
        let mut set = Self::default();
        for path in paths {
            set.entries.extend(Self::from_path(path.as_ref())?.entries);
        }
        Ok(set)
    }

    pub fn push(&mut self, entry: PatternMetadata) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PatternMetadata] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
