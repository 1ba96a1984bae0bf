//! Tree-sitter front end
//!
//! Parses Python or Rust source and converts the concrete syntax tree into a
//! [`SyntaxTree`]. Named nodes keep their grammar kind as rule; anonymous
//! tokens (punctuation, keywords) get an empty rule and become terminals.

use std::path::Path;

use thiserror::Error;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::syntax::{NodeId, Span, SyntaxError, SyntaxTree};

// ============================================================================
// Languages
// ============================================================================

/// Languages with a bundled grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedLanguage {
    Python,
    Rust,
}

impl SupportedLanguage {
    pub const ALL: [SupportedLanguage; 2] = [SupportedLanguage::Python, SupportedLanguage::Rust];

    /// Name used in configuration and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Rust => "rust",
        }
    }

    /// File extensions, without the dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py", "pyi"],
            Self::Rust => &["rs"],
        }
    }

    pub fn grammar(self) -> Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    /// Case-insensitive extension lookup.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|language| language.extensions().contains(&extension.as_str()))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(path.extension()?.to_str()?)
    }

    /// Accepts the language name or any of its extensions.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|language| language.name().eq_ignore_ascii_case(name))
            .or_else(|| Self::from_extension(name))
    }
}

impl std::fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ParserError {
    /// The grammar was built for an incompatible tree-sitter version
    #[error("cannot load the {language} grammar: {message}")]
    Grammar {
        language: SupportedLanguage,
        message: String,
    },

    /// tree-sitter returned no tree
    #[error("tree-sitter produced no tree")]
    NoTree,

    #[error("no grammar for {0}")]
    UnsupportedLanguage(String),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("cannot read source: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Parser
// ============================================================================

/// A tree-sitter parser producing [`SyntaxTree`]s.
pub struct CodeParser {
    parser: Parser,
    language: SupportedLanguage,
}

impl CodeParser {
    pub fn new(language: SupportedLanguage) -> Result<Self, ParserError> {
        let mut parser = Parser::new();
        parser
            .set_language(&language.grammar())
            .map_err(|e| ParserError::Grammar {
                language,
                message: e.to_string(),
            })?;

        Ok(Self { parser, language })
    }

    /// Parser for the language implied by `path`'s extension.
    pub fn for_path(path: &Path) -> Result<Self, ParserError> {
        let language = SupportedLanguage::from_path(path)
            .ok_or_else(|| ParserError::UnsupportedLanguage(path.display().to_string()))?;
        Self::new(language)
    }

    pub fn language(&self) -> SupportedLanguage {
        self.language
    }

    /// Parse into a raw tree-sitter tree.
    pub fn parse_raw(&mut self, source: &str) -> Result<Tree, ParserError> {
        self.parser
            .parse(source, None)
            .ok_or(ParserError::NoTree)
    }

    /// Parse into a [`SyntaxTree`].
    pub fn parse(&mut self, source: &str) -> Result<SyntaxTree, ParserError> {
        let tree = self.parse_raw(source)?;
        convert_tree(&tree, source)
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<SyntaxTree, ParserError> {
        let source = std::fs::read_to_string(path)?;
        self.parse(&source)
    }
}

/// Convert a tree-sitter tree. Node ids follow pre-order.
pub fn convert_tree(tree: &Tree, source: &str) -> Result<SyntaxTree, ParserError> {
    let mut out = SyntaxTree::new();
    let mut stack: Vec<(Node<'_>, Option<NodeId>)> = vec![(tree.root_node(), None)];

    while let Some((node, parent)) = stack.pop() {
        let rule = if node.is_named() { node.kind() } else { "" };
        let text = source.get(node.byte_range()).unwrap_or_default();
        let position = node.start_position();
        let span = Span::new(node.start_byte(), node.end_byte(), position.row + 1, position.column);

        let id = out.add_node(parent, rule, text, span)?;
        match parent {
            Some(parent) => out.attach_child(parent, id)?,
            None => out.set_root(id)?,
        }

        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push((child, Some(id)));
        }
    }

    Ok(out)
}
