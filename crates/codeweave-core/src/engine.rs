//! Query Engine
//!
//! Runs a [`PatternSet`] over a [`SyntaxTree`] in two phases:
//!
//! 1. **Search**: a pre-order walk calls [`match_at`] for every pattern at
//!    every node. A candidate is accepted when its pattern's predicates pass.
//!    Accepted matches form a [`MatchTreeNode`] forest: the last match
//!    accepted at a node is the parent of every match accepted below it.
//! 2. **Execute**: the forest is walked in the same order and each match's
//!    converters run in declaration order against one [`GraphBuilder`].
//!
//! Diagnostics that are not errors (lenient predicate passes, skipped
//! converters, self-connections, unknown identifiers) go to an injected
//! [`EngineObserver`].

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::converter::ConversionContext;
use crate::error::{EngineError, ResolveError};
use crate::graph::GraphBuilder;
use crate::matcher::{match_at, QueryMatch};
use crate::pattern::PatternSet;
use crate::predicate::all_pass;
use crate::resolver::ResolveContext;
use crate::syntax::{NodeId, SyntaxTree};

// ============================================================================
// Observer
// ============================================================================

/// Diagnostic outcome of a run. None of these abort it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A pattern predicate needed an enclosing match that has no graph node
    /// yet; the match was accepted anyway
    LenientAncestorPass {
        pattern: usize,
        node: NodeId,
        error: ResolveError,
    },
    /// A pattern predicate referenced an absent capture; the match was dropped
    MatchRejected {
        pattern: usize,
        node: NodeId,
        error: ResolveError,
    },
    /// A converter referenced an absent capture and was skipped
    ConverterSkipped {
        pattern: usize,
        converter: usize,
        error: ResolveError,
    },
    /// A connection from a node to itself was not added
    SelfConnectionSkipped { id: String },
    /// An identifier matched neither a graph node nor an import
    IdentifierNotFound { identifier: String, file: String },
}

/// Receives diagnostics from the engine.
pub trait EngineObserver {
    fn observe(&mut self, event: &EngineEvent);
}

/// Logs every event with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn observe(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::LenientAncestorPass { pattern, node, error } => {
                debug!("Pattern {} at {}: accepting despite {}", pattern, node, error);
            }
            EngineEvent::MatchRejected { pattern, node, error } => {
                debug!("Pattern {} at {}: rejected, {}", pattern, node, error);
            }
            EngineEvent::ConverterSkipped {
                pattern,
                converter,
                error,
            } => {
                debug!("Pattern {} converter {}: skipped, {}", pattern, converter, error);
            }
            EngineEvent::SelfConnectionSkipped { id } => {
                debug!("Skipping self-connection on '{}'", id);
            }
            EngineEvent::IdentifierNotFound { identifier, file } => {
                warn!("Identifier '{}' in {} not found in graph or imports", identifier, file);
            }
        }
    }
}

/// Collects events, for tests and reporting.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    pub events: Vec<EngineEvent>,
}

impl EngineObserver for RecordingObserver {
    fn observe(&mut self, event: &EngineEvent) {
        self.events.push(event.clone());
    }
}

// ============================================================================
// Match Tree
// ============================================================================

/// An accepted match and the matches accepted beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchTreeNode {
    #[serde(rename = "match")]
    pub query_match: QueryMatch,
    pub children: Vec<MatchTreeNode>,
}

impl MatchTreeNode {
    fn new(query_match: QueryMatch) -> Self {
        Self {
            query_match,
            children: Vec::new(),
        }
    }

    /// Number of matches in this subtree.
    pub fn match_count(&self) -> usize {
        1 + self.children.iter().map(MatchTreeNode::match_count).sum::<usize>()
    }
}

/// Matches of a forest in execution order.
pub fn flatten(forest: &[MatchTreeNode]) -> Vec<&QueryMatch> {
    let mut out = Vec::new();
    let mut stack: Vec<&MatchTreeNode> = forest.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(&node.query_match);
        stack.extend(node.children.iter().rev());
    }
    out
}

// ============================================================================
// Execution Statistics
// ============================================================================

/// Counters for one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub matches: usize,
    pub converters_executed: usize,
    /// Held back by their predicates or by a missing capture
    pub converters_skipped: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
}

impl ExecutionStats {
    pub fn absorb(&mut self, other: &ExecutionStats) {
        self.matches += other.matches;
        self.converters_executed += other.converters_executed;
        self.converters_skipped += other.converters_skipped;
        self.nodes_added += other.nodes_added;
        self.edges_added += other.edges_added;
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Applies a pattern set to syntax trees. Holds no per-run state, so one
/// engine can serve many files, including concurrently.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'p> {
    patterns: &'p PatternSet,
}

impl<'p> QueryEngine<'p> {
    pub fn new(patterns: &'p PatternSet) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &'p PatternSet {
        self.patterns
    }

    /// Search and execute, logging diagnostics with `tracing`.
    pub fn run(&self, tree: &SyntaxTree, builder: &mut GraphBuilder) -> Result<ExecutionStats, EngineError> {
        self.run_with_observer(tree, builder, &mut TracingObserver)
    }

    pub fn run_with_observer(
        &self,
        tree: &SyntaxTree,
        builder: &mut GraphBuilder,
        observer: &mut dyn EngineObserver,
    ) -> Result<ExecutionStats, EngineError> {
        let forest = self.search(tree, Some(&*builder), observer);
        let stats = self.execute(tree, &forest, builder, observer)?;
        info!(
            "Applied {} matches to {}: {} nodes, {} edges added",
            stats.matches,
            builder.file_path(),
            stats.nodes_added,
            stats.edges_added
        );
        Ok(stats)
    }

    /// Find every accepted match, arranged as a forest.
    pub fn search(
        &self,
        tree: &SyntaxTree,
        graph: Option<&GraphBuilder>,
        observer: &mut dyn EngineObserver,
    ) -> Vec<MatchTreeNode> {
        let Some(root) = tree.root() else {
            return Vec::new();
        };
        let mut ancestors = Vec::new();
        let forest = self.search_from(tree, root, graph, &mut ancestors, observer);
        debug!("Search found {} top-level matches", forest.len());
        forest
    }

    /// Accepted matches in execution order, without the hierarchy.
    pub fn find_matches(&self, tree: &SyntaxTree) -> Vec<QueryMatch> {
        let forest = self.search(tree, None, &mut TracingObserver);
        flatten(&forest).into_iter().cloned().collect()
    }

    fn search_from(
        &self,
        tree: &SyntaxTree,
        node: NodeId,
        graph: Option<&GraphBuilder>,
        ancestors: &mut Vec<NodeId>,
        observer: &mut dyn EngineObserver,
    ) -> Vec<MatchTreeNode> {
        let mut here = Vec::new();
        for (index, entry) in self.patterns.entries().iter().enumerate() {
            for captures in match_at(tree, node, &entry.pattern) {
                let mut ctx = ResolveContext::new(tree, node, &captures).with_ancestors(ancestors.as_slice());
                if let Some(graph) = graph {
                    ctx = ctx.with_graph(graph);
                }
                let accepted = match all_pass(&entry.predicates, &ctx) {
                    Ok(passed) => passed,
                    Err(error) if error.is_missing_ancestor() => {
                        observer.observe(&EngineEvent::LenientAncestorPass {
                            pattern: index,
                            node,
                            error,
                        });
                        true
                    }
                    Err(error) => {
                        observer.observe(&EngineEvent::MatchRejected {
                            pattern: index,
                            node,
                            error,
                        });
                        false
                    }
                };
                if accepted {
                    here.push(MatchTreeNode::new(QueryMatch {
                        start: node,
                        pattern: index,
                        captures,
                    }));
                }
            }
        }

        let children = tree.node(node).children();
        if here.is_empty() {
            for &child in children {
                here.extend(self.search_from(tree, child, graph, ancestors, observer));
            }
        } else {
            ancestors.push(node);
            let mut below = Vec::new();
            for &child in children {
                below.extend(self.search_from(tree, child, graph, ancestors, observer));
            }
            ancestors.pop();
            if let Some(parent) = here.last_mut() {
                parent.children = below;
            }
        }
        here
    }

    /// Run the converters of every match in the forest.
    ///
    /// A converter that references an absent capture is skipped and the
    /// rest continue. A missing enclosing match, or any other resolution
    /// failure, aborts the run.
    pub fn execute(
        &self,
        tree: &SyntaxTree,
        forest: &[MatchTreeNode],
        builder: &mut GraphBuilder,
        observer: &mut dyn EngineObserver,
    ) -> Result<ExecutionStats, EngineError> {
        let nodes_before = builder.graph().node_count();
        let edges_before = builder.graph().edge_count();

        let mut stats = ExecutionStats::default();
        let mut ancestors = Vec::new();
        for node in forest {
            self.execute_node(tree, node, builder, &mut ancestors, observer, &mut stats)?;
        }

        stats.nodes_added = builder.graph().node_count().saturating_sub(nodes_before);
        stats.edges_added = builder.graph().edge_count().saturating_sub(edges_before);
        Ok(stats)
    }

    fn execute_node(
        &self,
        tree: &SyntaxTree,
        node: &MatchTreeNode,
        builder: &mut GraphBuilder,
        ancestors: &mut Vec<NodeId>,
        observer: &mut dyn EngineObserver,
        stats: &mut ExecutionStats,
    ) -> Result<(), EngineError> {
        let query_match = &node.query_match;
        stats.matches += 1;

        if let Some(entry) = self.patterns.entries().get(query_match.pattern) {
            let ctx = ConversionContext {
                tree,
                start: query_match.start,
                captures: &query_match.captures,
                ancestors: ancestors.as_slice(),
            };
            for (index, converter) in entry.converters.iter().enumerate() {
                match converter.execute(&ctx, builder, observer) {
                    Ok(true) => stats.converters_executed += 1,
                    Ok(false) => stats.converters_skipped += 1,
                    Err(error) if error.is_missing_capture() && !error.is_missing_ancestor() => {
                        stats.converters_skipped += 1;
                        observer.observe(&EngineEvent::ConverterSkipped {
                            pattern: query_match.pattern,
                            converter: index,
                            error,
                        });
                    }
                    Err(source) => {
                        return Err(EngineError::Converter {
                            pattern: query_match.pattern,
                            converter: index,
                            source,
                        });
                    }
                }
            }
        }

        ancestors.push(query_match.start);
        for child in &node.children {
            self.execute_node(tree, child, builder, ancestors, observer, stats)?;
        }
        ancestors.pop();
        Ok(())
    }
}
