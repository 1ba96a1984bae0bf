//! Codeweave Core - declarative syntax-tree queries that build code graphs
//!
//! This crate provides:
//! - An arena syntax tree model with a bottom-up tree processor
//! - A pattern language with backtracking child matching
//! - An argument expression resolver over match captures
//! - Predicates and converters that turn matches into graph mutations
//! - A petgraph-backed knowledge graph and graph builder
//! - A tree-sitter front end for Python and Rust

pub mod converter;
pub mod engine;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod pattern;
pub mod predicate;
pub mod processor;
pub mod resolver;
pub mod syntax;
pub mod ts;

// Re-exports for convenience
pub use converter::{Converter, ConverterAction, ConverterSpec};
pub use engine::{
    EngineEvent, EngineObserver, ExecutionStats, MatchTreeNode, QueryEngine, RecordingObserver,
    TracingObserver,
};
pub use error::{ConfigurationError, EngineError, ResolveError};
pub use graph::{
    CodeGraph, Edge, EdgeType, EntityKind, FileImport, GraphBuilder, GraphDocument, GraphNode,
    NodeStatus, GRAPH_SCHEMA_VERSION,
};
pub use matcher::{match_at, QueryMatch};
pub use pattern::{Pattern, PatternMetadata, PatternSet, PatternSpec};
pub use predicate::{Predicate, PredicateSpec};
pub use processor::{process_bottom_up, BottomUpTransform, ProcessingError, SubtreeStats};
pub use resolver::{resolve_argument, Argument, Captures, ResolveContext};
pub use syntax::{NodeId, Span, SyntaxError, SyntaxNode, SyntaxTree};
pub use ts::{CodeParser, ParserError, SupportedLanguage};
