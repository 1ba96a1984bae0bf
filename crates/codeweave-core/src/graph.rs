//! Knowledge Graph
//!
//! This module defines the language-agnostic graph that converters populate:
//! nodes keyed by fully-qualified id and tagged with an [`EntityKind`], and
//! directed, typed multi-edges carrying the file path and source span of the
//! reference that produced them.
//!
//! [`CodeGraph`] is backed by `petgraph::StableGraph` for efficient traversal.
//! [`GraphBuilder`] wraps a graph with the per-file state converters need:
//! the syntax-node ↔ graph-node index and the file's recorded imports.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::syntax::{NodeId, Span};

/// Schema version constant
pub const GRAPH_SCHEMA_VERSION: &str = "1.0";

// ============================================================================
// Kinds and Status
// ============================================================================

/// Unknown entity kind or edge type name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {what} '{value}'")]
pub struct KindParseError {
    pub what: &'static str,
    pub value: String,
}

/// Kind of code entity a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Class,
    Package,
    Property,
    Alias,
    Object,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Class => "class",
            EntityKind::Package => "package",
            EntityKind::Property => "property",
            EntityKind::Alias => "alias",
            EntityKind::Object => "object",
        }
    }
}

impl FromStr for EntityKind {
    type Err = KindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "function" => Ok(EntityKind::Function),
            "class" => Ok(EntityKind::Class),
            "package" => Ok(EntityKind::Package),
            "property" => Ok(EntityKind::Property),
            "alias" => Ok(EntityKind::Alias),
            "object" => Ok(EntityKind::Object),
            _ => Err(KindParseError {
                what: "entity kind",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a node has been defined by a match or only referenced so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Claimed by a node converter
    Resolved,
    /// Placeholder created by an edge before its definition was matched
    Dangling,
}

/// Types of relationships between code entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Container defines member
    Defines,
    /// Class inherits from supertype
    Inherits,
    /// Source references target
    Uses,
    /// Callable invokes target
    Calls,
    /// Package or module imports target
    Imports,
    /// Structural containment
    Contains,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Defines => "DEFINES",
            EdgeType::Inherits => "INHERITS",
            EdgeType::Uses => "USES",
            EdgeType::Calls => "CALLS",
            EdgeType::Imports => "IMPORTS",
            EdgeType::Contains => "CONTAINS",
        }
    }
}

impl FromStr for EdgeType {
    type Err = KindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "defines" => Ok(EdgeType::Defines),
            "inherits" => Ok(EdgeType::Inherits),
            "uses" => Ok(EdgeType::Uses),
            "calls" => Ok(EdgeType::Calls),
            "imports" => Ok(EdgeType::Imports),
            "contains" => Ok(EdgeType::Contains),
            _ => Err(KindParseError {
                what: "edge type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Node and Edge
// ============================================================================

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Globally unique fully-qualified id (e.g. "pkg.module.Class.method")
    pub id: String,

    /// Entity kind
    pub kind: EntityKind,

    /// Resolved or dangling
    pub status: NodeStatus,

    /// File that defined (or first referenced) the node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Definition span; None for dangling nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,

    /// Nearest enclosing graph node when the placeholder was materialized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl GraphNode {
    /// Create a resolved node.
    pub fn resolved(id: String, kind: EntityKind, file: Option<String>, span: Option<Span>) -> Self {
        Self {
            id,
            kind,
            status: NodeStatus::Resolved,
            file,
            span,
            context: None,
        }
    }

    /// Create a dangling placeholder.
    pub fn dangling(id: String, kind: EntityKind, context: Option<String>) -> Self {
        Self {
            id,
            kind,
            status: NodeStatus::Dangling,
            file: None,
            span: None,
            context,
        }
    }

    pub fn is_dangling(&self) -> bool {
        self.status == NodeStatus::Dangling
    }

    /// Last dot-separated segment of the id.
    pub fn name(&self) -> &str {
        self.id.rsplit('.').next().unwrap_or(&self.id)
    }
}

/// A directed, typed edge between two graph nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id
    pub source: String,

    /// Target node id
    pub target: String,

    /// Relationship type
    #[serde(rename = "type")]
    pub edge_type: EdgeType,

    /// File containing the reference
    pub file: String,

    /// Span of the reference
    pub span: Span,
}

impl Edge {
    pub fn new(source: String, target: String, edge_type: EdgeType, file: String, span: Span) -> Self {
        Self {
            source,
            target,
            edge_type,
            file,
            span,
        }
    }
}

/// Edge weight stored in petgraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeData {
    pub edge_type: EdgeType,
    pub file: String,
    pub span: Span,
}

impl From<&Edge> for EdgeData {
    fn from(edge: &Edge) -> Self {
        Self {
            edge_type: edge.edge_type,
            file: edge.file.clone(),
            span: edge.span,
        }
    }
}

/// Serializable snapshot of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub schema_version: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
}

// ============================================================================
// Code Graph
// ============================================================================

/// A petgraph-based knowledge graph.
#[derive(Debug, Clone)]
pub struct CodeGraph {
    /// The underlying petgraph instance
    graph: StableGraph<GraphNode, EdgeData, petgraph::Directed>,

    /// Map from node ID (string) to petgraph NodeIndex for O(1) lookup
    node_index_map: HashMap<String, NodeIndex>,
}

impl Default for CodeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGraph {
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Node Operations
    // ------------------------------------------------------------------------

    /// Add a node, returning its index.
    ///
    /// An existing node with the same id is updated in place so its edges
    /// survive.
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(&idx) = self.node_index_map.get(&node.id) {
            self.graph[idx] = node;
            return idx;
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_index_map.insert(id, idx);
        idx
    }

    /// Create a resolved node at `id`, or claim an existing one.
    ///
    /// Claiming a dangling placeholder turns it into a resolved node with the
    /// given kind and location. An already resolved node is left unchanged.
    pub fn claim_node(
        &mut self,
        id: &str,
        kind: EntityKind,
        file: Option<String>,
        span: Option<Span>,
    ) -> &GraphNode {
        let idx = match self.node_index_map.get(id).copied() {
            Some(idx) => {
                let node = &mut self.graph[idx];
                if node.is_dangling() {
                    node.kind = kind;
                    node.status = NodeStatus::Resolved;
                    node.file = file;
                    node.span = span;
                }
                idx
            }
            None => self.add_node(GraphNode::resolved(id.to_string(), kind, file, span)),
        };
        &self.graph[idx]
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index_map
            .get(id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn get_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.node_index_map
            .get(id)
            .copied()
            .and_then(|idx| self.graph.node_weight_mut(idx))
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_index_map.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn nodes_by_kind(&self, kind: EntityKind) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights().filter(move |n| n.kind == kind)
    }

    // ------------------------------------------------------------------------
    // Edge Operations
    // ------------------------------------------------------------------------

    /// Add an edge between two existing nodes.
    ///
    /// Returns `None` if either endpoint is missing.
    pub fn add_edge(&mut self, edge: &Edge) -> Option<EdgeIndex> {
        let source = *self.node_index_map.get(&edge.source)?;
        let target = *self.node_index_map.get(&edge.target)?;
        Some(self.graph.add_edge(source, target, EdgeData::from(edge)))
    }

    /// Add an edge, materializing missing endpoints as dangling placeholders.
    ///
    /// The fallback factories build the placeholder for a missing source or
    /// target; `context` is the nearest enclosing graph node, recorded on
    /// each placeholder.
    pub fn add_edge_and_materialize_missing_endpoints<F, T>(
        &mut self,
        edge: &Edge,
        from_fallback: F,
        to_fallback: T,
        context: Option<&str>,
    ) -> EdgeIndex
    where
        F: FnOnce(&str, Option<&str>) -> GraphNode,
        T: FnOnce(&str, Option<&str>) -> GraphNode,
    {
        let source = match self.node_index_map.get(&edge.source).copied() {
            Some(idx) => idx,
            None => self.add_node(from_fallback(&edge.source, context)),
        };
        let target = match self.node_index_map.get(&edge.target).copied() {
            Some(idx) => idx,
            None => self.add_node(to_fallback(&edge.target, context)),
        };
        self.graph.add_edge(source, target, EdgeData::from(edge))
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Iterate over all edges, returning Edge structs.
    pub fn iter_edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.graph.edge_references().filter_map(move |edge_ref| {
            let source = self.graph.node_weight(edge_ref.source())?;
            let target = self.graph.node_weight(edge_ref.target())?;
            let data = edge_ref.weight();
            Some(Edge {
                source: source.id.clone(),
                target: target.id.clone(),
                edge_type: data.edge_type,
                file: data.file.clone(),
                span: data.span,
            })
        })
    }

    pub fn edges_by_type(
        &self,
        edge_type: EdgeType,
    ) -> impl Iterator<Item = (&GraphNode, &GraphNode, &EdgeData)> {
        self.graph.edge_references().filter_map(move |edge_ref| {
            if edge_ref.weight().edge_type != edge_type {
                return None;
            }
            let source = self.graph.node_weight(edge_ref.source())?;
            let target = self.graph.node_weight(edge_ref.target())?;
            Some((source, target, edge_ref.weight()))
        })
    }

    pub fn outgoing_edges(&self, id: &str) -> Vec<(&GraphNode, &EdgeData)> {
        self.directed_edges(id, Direction::Outgoing)
    }

    pub fn incoming_edges(&self, id: &str) -> Vec<(&GraphNode, &EdgeData)> {
        self.directed_edges(id, Direction::Incoming)
    }

    fn directed_edges(&self, id: &str, direction: Direction) -> Vec<(&GraphNode, &EdgeData)> {
        let Some(&idx) = self.node_index_map.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(idx, direction).collect();
        edges.sort_by_key(|edge_ref| edge_ref.id());
        edges
            .into_iter()
            .filter_map(|edge_ref| {
                let other = match direction {
                    Direction::Outgoing => edge_ref.target(),
                    Direction::Incoming => edge_ref.source(),
                };
                Some((self.graph.node_weight(other)?, edge_ref.weight()))
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Hierarchy Queries
    // ------------------------------------------------------------------------

    /// The node that defines or contains `id`, if any.
    pub fn parent_of(&self, id: &str) -> Option<&GraphNode> {
        self.incoming_edges(id)
            .into_iter()
            .find(|(_, data)| matches!(data.edge_type, EdgeType::Defines | EdgeType::Contains))
            .map(|(node, _)| node)
    }

    /// Targets of `id`'s outgoing inheritance edges, in insertion order.
    pub fn supertypes_of(&self, id: &str) -> Vec<&GraphNode> {
        self.outgoing_edges(id)
            .into_iter()
            .filter(|(_, data)| data.edge_type == EdgeType::Inherits)
            .map(|(node, _)| node)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Whole-graph Operations
    // ------------------------------------------------------------------------

    /// Fold another graph into this one.
    ///
    /// Resolved nodes win over dangling placeholders; edges are appended.
    pub fn merge(&mut self, other: CodeGraph) {
        let edges: Vec<Edge> = other.iter_edges().collect();
        let nodes: Vec<GraphNode> = other.iter_nodes().cloned().collect();
        for node in nodes {
            match self.get_node(&node.id) {
                Some(existing) if !existing.is_dangling() || node.is_dangling() => {}
                _ => {
                    self.add_node(node);
                }
            }
        }
        for edge in &edges {
            self.add_edge(edge);
        }
    }

    /// Snapshot nodes and edges for serialization.
    pub fn to_document(&self) -> GraphDocument {
        let mut nodes: Vec<GraphNode> = self.iter_nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        GraphDocument {
            schema_version: GRAPH_SCHEMA_VERSION.to_string(),
            nodes,
            edges: self.iter_edges().collect(),
        }
    }
}

// ============================================================================
// Graph Builder
// ============================================================================

/// An import recorded while converting one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileImport {
    pub data: BTreeMap<String, String>,
}

/// The graph being built plus per-file conversion state.
///
/// One builder is shared by every converter of a file. Separate files may
/// use separate builders whose graphs are merged afterwards.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: CodeGraph,
    file_path: String,
    syntax_to_graph: HashMap<NodeId, String>,
    graph_to_syntax: HashMap<String, NodeId>,
    file_imports: Vec<FileImport>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue building on top of an existing graph.
    pub fn with_graph(graph: CodeGraph) -> Self {
        Self {
            graph,
            ..Self::default()
        }
    }

    /// Reset per-file state before converting `file_path`.
    pub fn begin_file(&mut self, file_path: impl Into<String>) {
        self.file_path = file_path.into();
        self.syntax_to_graph.clear();
        self.graph_to_syntax.clear();
        self.file_imports.clear();
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn graph(&self) -> &CodeGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut CodeGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> CodeGraph {
        self.graph
    }

    /// Associate a syntax node of the current file with a graph node.
    pub fn associate(&mut self, syntax: NodeId, graph_id: impl Into<String>) {
        let graph_id = graph_id.into();
        self.graph_to_syntax.insert(graph_id.clone(), syntax);
        self.syntax_to_graph.insert(syntax, graph_id);
    }

    /// The graph node created for `syntax`, if any.
    pub fn graph_node_for_syntax_node(&self, syntax: NodeId) -> Option<&GraphNode> {
        self.syntax_to_graph
            .get(&syntax)
            .and_then(|id| self.graph.get_node(id))
    }

    /// The syntax node `graph_id` was created from in the current file.
    pub fn syntax_node_for_graph_node(&self, graph_id: &str) -> Option<NodeId> {
        self.graph_to_syntax.get(graph_id).copied()
    }

    pub fn record_import(&mut self, import: FileImport) {
        self.file_imports.push(import);
    }

    pub fn file_imports(&self) -> &[FileImport] {
        &self.file_imports
    }

    pub fn parent_of(&self, id: &str) -> Option<&GraphNode> {
        self.graph.parent_of(id)
    }

    pub fn supertypes_of(&self, id: &str) -> Vec<&GraphNode> {
        self.graph.supertypes_of(id)
    }
}
