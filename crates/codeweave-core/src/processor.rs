//! Bottom-Up Tree Processor
//!
//! Generic dependency-driven evaluator that runs a transform once per node,
//! children before parents. Used by auxiliary analyses over a
//! [`SyntaxTree`]; pattern matching does not go through it.
//!
//! The driver seeds a FIFO queue with every leaf, and a parent is enqueued as
//! soon as its last child has been transformed. Sibling order is otherwise
//! unspecified. Any transform failure aborts the whole run.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::debug;

use crate::syntax::{NodeId, SyntaxTree};

/// Errors that abort a bottom-up run.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The transform rejected a node
    #[error("transform failed at node {node}: {message}")]
    Transform { node: NodeId, message: String },

    /// The finalize step failed
    #[error("finalize failed: {0}")]
    Finalize(String),

    /// The tree has no root to start from
    #[error("tree has no root")]
    EmptyTree,
}

impl ProcessingError {
    pub fn transform(node: NodeId, message: impl Into<String>) -> Self {
        Self::Transform {
            node,
            message: message.into(),
        }
    }
}

/// Per-node results produced so far, keyed by node id.
pub type Results<T> = HashMap<NodeId, T>;

/// A transform evaluated bottom-up over a tree.
pub trait BottomUpTransform {
    /// Value computed for each node
    type Output;
    /// Overall result of the run
    type Summary;

    /// Compute the value for `node`. Results for all of its children are
    /// already present in `results`.
    fn transform(
        &mut self,
        tree: &SyntaxTree,
        node: NodeId,
        results: &Results<Self::Output>,
    ) -> Result<Self::Output, ProcessingError>;

    /// Produce the overall result once every node has been transformed.
    fn finalize(
        &mut self,
        tree: &SyntaxTree,
        results: Results<Self::Output>,
    ) -> Result<Self::Summary, ProcessingError>;
}

/// Run `transform` over every node reachable from the root.
pub fn process_bottom_up<T: BottomUpTransform>(
    tree: &SyntaxTree,
    transform: &mut T,
) -> Result<T::Summary, ProcessingError> {
    let order = tree.topological_order();
    if order.is_empty() {
        return Err(ProcessingError::EmptyTree);
    }

    let mut remaining: HashMap<NodeId, usize> = order
        .iter()
        .map(|&id| (id, tree.node(id).child_count()))
        .collect();

    let mut queue: VecDeque<NodeId> = tree.leaves().into();
    let mut results: Results<T::Output> = HashMap::with_capacity(order.len());

    while let Some(node) = queue.pop_front() {
        let value = transform.transform(tree, node, &results)?;
        results.insert(node, value);

        if let Some(parent) = tree.node(node).parent() {
            if let Some(count) = remaining.get_mut(&parent) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(parent);
                }
            }
        }
    }

    debug!("Bottom-up run transformed {} nodes", results.len());
    transform.finalize(tree, results)
}

// ============================================================================
// Subtree Statistics
// ============================================================================

/// Size and shape of one subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtreeStats {
    /// Number of nodes including the subtree root
    pub size: usize,
    /// Longest root-to-leaf path, counted in nodes
    pub height: usize,
    /// Number of childless nodes
    pub leaves: usize,
}

/// Computes [`SubtreeStats`] for every node; the summary is the root's.
#[derive(Debug, Default)]
pub struct SubtreeStatsTransform {
    per_node: Results<SubtreeStats>,
}

impl SubtreeStatsTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for every node, available after a successful run.
    pub fn per_node(&self) -> &Results<SubtreeStats> {
        &self.per_node
    }
}

impl BottomUpTransform for SubtreeStatsTransform {
    type Output = SubtreeStats;
    type Summary = SubtreeStats;

    fn transform(
        &mut self,
        tree: &SyntaxTree,
        node: NodeId,
        results: &Results<SubtreeStats>,
    ) -> Result<SubtreeStats, ProcessingError> {
        let children = tree.node(node).children();
        if children.is_empty() {
            return Ok(SubtreeStats {
                size: 1,
                height: 1,
                leaves: 1,
            });
        }

        let mut stats = SubtreeStats {
            size: 1,
            height: 0,
            leaves: 0,
        };
        for child in children {
            let child_stats = results
                .get(child)
                .ok_or_else(|| ProcessingError::transform(node, "child processed out of order"))?;
            stats.size += child_stats.size;
            stats.leaves += child_stats.leaves;
            stats.height = stats.height.max(child_stats.height);
        }
        stats.height += 1;
        Ok(stats)
    }

    fn finalize(
        &mut self,
        tree: &SyntaxTree,
        results: Results<SubtreeStats>,
    ) -> Result<SubtreeStats, ProcessingError> {
        let root = tree.root().ok_or(ProcessingError::EmptyTree)?;
        let summary = results
            .get(&root)
            .copied()
            .ok_or_else(|| ProcessingError::Finalize("root was never processed".to_string()))?;
        self.per_node = results;
        Ok(summary)
    }
}
