//! Syntax Tree Model
//!
//! Arena-backed syntax trees consumed by the pattern matcher.
//!
//! A [`SyntaxTree`] exclusively owns every [`SyntaxNode`] of one parse. Nodes
//! refer to each other through [`NodeId`]s issued sequentially by the owning
//! tree, so ids are unique per tree and deterministic across runs.
//!
//! Child order is appearance order in the source and is significant for
//! matching; nothing in this crate ever permutes it.
//!
//! ## Outline notation
//!
//! Trees can also be written in a compact outline form, which is handy for
//! fixtures and debugging:
//!
//! ```
//! use codeweave_core::syntax::SyntaxTree;
//!
//! let tree = SyntaxTree::parse_outline(r#"call(identifier="print", arguments(string="'hi'"))"#).unwrap();
//! let root = tree.root().unwrap();
//! assert_eq!(tree.rule(root), "call");
//! assert_eq!(tree.node(root).child_count(), 2);
//! ```

use std::cell::OnceCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Identifiers and Spans
// ============================================================================

/// Stable identifier of a node within its owning [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Position of the node in the owning arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source location of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first byte
    pub start_byte: usize,
    /// Byte offset one past the last byte
    pub end_byte: usize,
    /// Starting line (1-indexed)
    pub line: usize,
    /// Starting column (0-indexed)
    pub column: usize,
}

impl Span {
    pub fn new(start_byte: usize, end_byte: usize, line: usize, column: usize) -> Self {
        Self {
            start_byte,
            end_byte,
            line,
            column,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by tree construction and navigation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    /// Child access outside `[0, count)`
    #[error("child index {index} out of range for node {node} with {count} children")]
    IndexOutOfRange {
        node: NodeId,
        index: usize,
        count: usize,
    },

    /// Id not issued by this tree
    #[error("node {0} does not belong to this tree")]
    UnknownNode(NodeId),

    /// Node already has a parent listing it as a child
    #[error("node {child} is already attached to {parent}")]
    AlreadyAttached { child: NodeId, parent: NodeId },

    /// Malformed outline text
    #[error("invalid outline at byte {position}: {message}")]
    Outline { position: usize, message: String },
}

// ============================================================================
// Syntax Node
// ============================================================================

/// One node of a parsed source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    id: NodeId,
    rule: String,
    text: String,
    span: Span,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SyntaxNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Grammar rule name; empty for terminals.
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Source text covered by this node.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in appearance order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// A node is terminal iff it has no children and an empty rule name.
    pub fn is_terminal(&self) -> bool {
        self.children.is_empty() && self.rule.is_empty()
    }
}

// ============================================================================
// Syntax Tree
// ============================================================================

/// Owns all nodes of one parse.
#[derive(Debug, Default, Clone)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
    root: Option<NodeId>,
    /// Children-before-parent order, dropped on every structural edit
    topological: OnceCell<Vec<NodeId>>,
}

impl SyntaxTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tree holding a single root node.
    pub fn with_root(rule: impl Into<String>, text: impl Into<String>, span: Span) -> Self {
        let mut tree = Self::new();
        tree.root = Some(tree.alloc(None, rule.into(), text.into(), span));
        tree
    }

    fn alloc(&mut self, parent: Option<NodeId>, rule: String, text: String, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SyntaxNode {
            id,
            rule,
            text,
            span,
            parent,
            children: Vec::new(),
        });
        self.topological.take();
        id
    }

    fn check(&self, id: NodeId) -> Result<(), SyntaxError> {
        if id.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(SyntaxError::UnknownNode(id))
        }
    }

    /// Construct a node under `parent`.
    ///
    /// The node records `parent` but is not listed among its children until
    /// [`attach_child`](Self::attach_child) is called. The first parentless
    /// node created in an empty tree becomes the root.
    pub fn add_node(
        &mut self,
        parent: Option<NodeId>,
        rule: impl Into<String>,
        text: impl Into<String>,
        span: Span,
    ) -> Result<NodeId, SyntaxError> {
        if let Some(parent) = parent {
            self.check(parent)?;
        }
        let id = self.alloc(parent, rule.into(), text.into(), span);
        if parent.is_none() && self.root.is_none() {
            self.root = Some(id);
        }
        Ok(id)
    }

    /// Append `child` to the children of `parent`.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SyntaxError> {
        self.check(parent)?;
        self.check(child)?;
        self.ensure_detached(child)?;
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
        self.topological.take();
        Ok(())
    }

    /// Construct a node and attach it as the last child of `parent`.
    pub fn push_child(
        &mut self,
        parent: NodeId,
        rule: impl Into<String>,
        text: impl Into<String>,
        span: Span,
    ) -> Result<NodeId, SyntaxError> {
        let id = self.add_node(Some(parent), rule, text, span)?;
        self.attach_child(parent, id)?;
        Ok(id)
    }

    /// Replace the `index`-th child of `parent`, returning the detached child.
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        index: usize,
        replacement: NodeId,
    ) -> Result<NodeId, SyntaxError> {
        self.check(replacement)?;
        let old = self.child(parent, index)?;
        if old == replacement {
            return Ok(old);
        }
        self.ensure_detached(replacement)?;
        self.nodes[parent.index()].children[index] = replacement;
        self.nodes[old.index()].parent = None;
        self.nodes[replacement.index()].parent = Some(parent);
        self.topological.take();
        Ok(old)
    }

    fn ensure_detached(&self, child: NodeId) -> Result<(), SyntaxError> {
        match self.nodes[child.index()].parent {
            Some(current) if self.nodes[current.index()].children.contains(&child) => {
                Err(SyntaxError::AlreadyAttached {
                    child,
                    parent: current,
                })
            }
            _ => Ok(()),
        }
    }

    /// Copy the subtree rooted at `id` into fresh nodes of this tree.
    ///
    /// The copy has identical rules, text, spans and structure. Its root is
    /// detached; attach it with [`attach_child`](Self::attach_child) or
    /// [`replace_child`](Self::replace_child).
    pub fn deep_copy(&mut self, id: NodeId) -> Result<NodeId, SyntaxError> {
        self.check(id)?;
        let source = &self.nodes[id.index()];
        let (rule, text, span) = (source.rule.clone(), source.text.clone(), source.span);
        let copy = self.alloc(None, rule, text, span);

        let mut pending = vec![(id, copy)];
        while let Some((original, copied)) = pending.pop() {
            let children = self.nodes[original.index()].children.clone();
            for child in children {
                let node = &self.nodes[child.index()];
                let (rule, text, span) = (node.rule.clone(), node.text.clone(), node.span);
                let fresh = self.alloc(Some(copied), rule, text, span);
                self.nodes[copied.index()].children.push(fresh);
                pending.push((child, fresh));
            }
        }
        Ok(copy)
    }

    /// Make `id` the root of the tree.
    pub fn set_root(&mut self, id: NodeId) -> Result<(), SyntaxError> {
        self.check(id)?;
        self.root = Some(id);
        self.topological.take();
        Ok(())
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Get a node by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this tree.
    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&SyntaxNode> {
        self.nodes.get(id.index())
    }

    pub fn rule(&self, id: NodeId) -> &str {
        self.node(id).rule()
    }

    pub fn text(&self, id: NodeId) -> &str {
        self.node(id).text()
    }

    /// The `index`-th child of `id`.
    pub fn child(&self, id: NodeId, index: usize) -> Result<NodeId, SyntaxError> {
        self.check(id)?;
        let children = &self.nodes[id.index()].children;
        children
            .get(index)
            .copied()
            .ok_or(SyntaxError::IndexOutOfRange {
                node: id,
                index,
                count: children.len(),
            })
    }

    /// Every node owned by the tree, in allocation order.
    pub fn nodes(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes reachable from the root, parents before children, siblings in order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.index()].children.iter().rev().copied());
        }
        order
    }

    /// Children-before-parent order of the nodes reachable from the root.
    ///
    /// Computed on first use and cached until the next structural edit.
    pub fn topological_order(&self) -> &[NodeId] {
        self.topological.get_or_init(|| {
            let mut order = Vec::with_capacity(self.nodes.len());
            let mut stack: Vec<(NodeId, bool)> = self.root.map(|r| (r, false)).into_iter().collect();
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    order.push(id);
                    continue;
                }
                stack.push((id, true));
                stack.extend(
                    self.nodes[id.index()]
                        .children
                        .iter()
                        .rev()
                        .map(|&child| (child, false)),
                );
            }
            order
        })
    }

    /// Reachable nodes without children.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.nodes[id.index()].children.is_empty())
            .collect()
    }

    /// Walk from `id`'s parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).parent, move |p| self.node(*p).parent)
    }

    // ------------------------------------------------------------------------
    // Outline notation
    // ------------------------------------------------------------------------

    /// Parse the compact outline notation.
    ///
    /// Grammar: `node := rule ('=' quoted)? ('(' node (',' node)* ')')?`.
    /// A rule of `_` denotes a terminal (empty rule). Without an explicit
    /// text, leaves use their rule name and inner nodes join their
    /// children's text with a space. Spans are synthesised from that text
    /// on a single line.
    pub fn parse_outline(source: &str) -> Result<Self, SyntaxError> {
        let mut parser = OutlineParser {
            src: source.as_bytes(),
            pos: 0,
        };
        let outline = parser.node()?;
        parser.skip_ws();
        if parser.pos != parser.src.len() {
            return Err(parser.error("trailing input"));
        }

        let mut tree = Self::new();
        let mut offset = 0;
        tree.build_outline(None, &outline, &mut offset)?;
        Ok(tree)
    }

    fn build_outline(
        &mut self,
        parent: Option<NodeId>,
        outline: &OutlineNode,
        offset: &mut usize,
    ) -> Result<NodeId, SyntaxError> {
        let text = outline.rendered_text();
        let start = *offset;
        let span = Span::new(start, start + text.len(), 1, start);
        let id = self.add_node(parent, outline.rule.clone(), text, span)?;
        if let Some(parent) = parent {
            self.attach_child(parent, id)?;
        }

        let mut child_offset = start;
        for child in &outline.children {
            self.build_outline(Some(id), child, &mut child_offset)?;
            child_offset += 1;
        }
        *offset = start + self.nodes[id.index()].text.len();
        Ok(id)
    }

    /// Render the subtree at `id` in outline notation.
    pub fn to_outline(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_outline(id, &mut out);
        out
    }

    fn write_outline(&self, id: NodeId, out: &mut String) {
        let node = self.node(id);
        out.push_str(if node.rule.is_empty() { "_" } else { &node.rule });
        out.push_str("=\"");
        for c in node.text.chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
        if !node.children.is_empty() {
            out.push('(');
            for (i, child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.write_outline(*child, out);
            }
            out.push(')');
        }
    }
}

struct OutlineNode {
    rule: String,
    text: Option<String>,
    children: Vec<OutlineNode>,
}

impl OutlineNode {
    fn rendered_text(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        if self.children.is_empty() {
            return self.rule.clone();
        }
        self.children
            .iter()
            .map(OutlineNode::rendered_text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

struct OutlineParser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl OutlineParser<'_> {
    fn error(&self, message: &str) -> SyntaxError {
        SyntaxError::Outline {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn node(&mut self) -> Result<OutlineNode, SyntaxError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len() {
            let b = self.src[self.pos];
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected rule name"));
        }
        let raw = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let rule = if raw == "_" { String::new() } else { raw };

        let mut text = None;
        if self.peek() == Some(b'=') {
            self.pos += 1;
            text = Some(self.quoted()?);
        }

        let mut children = Vec::new();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            if self.peek() == Some(b')') {
                self.pos += 1;
            } else {
                loop {
                    children.push(self.node()?);
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        _ => return Err(self.error("expected ',' or ')'")),
                    }
                }
            }
        }

        Ok(OutlineNode {
            rule,
            text,
            children,
        })
    }

    fn quoted(&mut self) -> Result<String, SyntaxError> {
        if self.peek() != Some(b'"') {
            return Err(self.error("expected '\"'"));
        }
        self.pos += 1;
        let mut bytes = Vec::new();
        while let Some(&b) = self.src.get(self.pos) {
            self.pos += 1;
            match b {
                b'\\' => {
                    if let Some(&escaped) = self.src.get(self.pos) {
                        bytes.push(escaped);
                        self.pos += 1;
                    }
                }
                b'"' => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
                _ => bytes.push(b),
            }
        }
        Err(self.error("unterminated string"))
    }
}
