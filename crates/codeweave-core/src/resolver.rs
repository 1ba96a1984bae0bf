//! Argument & Capture Resolver
//!
//! A small expression language evaluated against the captures of one match.
//!
//! ## Grammar
//!
//! ```text
//! argument := term ('+' term)*
//! term     := quoted-literal | capture | bare-literal
//! capture  := '@' name '?'? ('.' call)* '?'?
//! call     := ident ('(' argument (',' argument)* ')')?
//! ```
//!
//! - `'text'` / `"text"` resolve to `text`.
//! - `@name` resolves to the source text of the node bound to `name`.
//! - `@name.node` maps the bound syntax node to its graph node.
//! - Dot calls dispatch on the runtime kind of the current value: strings
//!   support `split(sep)`, `hash` and `until(marker)`, lists support `last`,
//!   syntax nodes support `node`. Values of other kinds are stringified and
//!   retried against the string calls; unknown calls pass the value through.
//! - A `?` marks the capture optional: if it cannot be resolved the term is
//!   skipped instead of raising [`ResolveError::MissingCapture`].
//!
//! Four names are available without being declared by the pattern:
//! `@parent` (graph node of the nearest enclosing match), `@self` (the
//! match's start node), `@enclosing_class` and `@superclass`.
//!
//! Arguments are parsed once when a pattern document is loaded and evaluated
//! for every match.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::ResolveError;
use crate::graph::{EntityKind, GraphBuilder, GraphNode};
use crate::syntax::{NodeId, SyntaxTree};

/// Capture name → bound syntax node, for one match.
pub type Captures = BTreeMap<String, NodeId>;

/// Nearest enclosing matched ancestor, as a graph node.
pub const PARENT_CAPTURE: &str = "parent";
/// The start node of the current match.
pub const SELF_CAPTURE: &str = "self";
/// Nearest enclosing class graph node.
pub const ENCLOSING_CLASS_CAPTURE: &str = "enclosing_class";
/// First class-typed supertype of the enclosing class.
pub const SUPERCLASS_CAPTURE: &str = "superclass";

// ============================================================================
// Resolution Context and Values
// ============================================================================

/// Everything an expression may look at while being resolved.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub tree: &'a SyntaxTree,
    /// Start node of the current match
    pub start: NodeId,
    pub captures: &'a Captures,
    /// Start nodes of the enclosing matches, outermost first
    pub ancestors: &'a [NodeId],
    /// Graph under construction, when available
    pub graph: Option<&'a GraphBuilder>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(tree: &'a SyntaxTree, start: NodeId, captures: &'a Captures) -> Self {
        Self {
            tree,
            start,
            captures,
            ancestors: &[],
            graph: None,
        }
    }

    pub fn with_ancestors(mut self, ancestors: &'a [NodeId]) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn with_graph(mut self, graph: &'a GraphBuilder) -> Self {
        self.graph = Some(graph);
        self
    }
}

/// Intermediate value produced while resolving a capture reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    List(Vec<String>),
    Syntax(NodeId),
    /// Graph node id
    Graph(String),
}

impl Value {
    /// Render the value the way final formatting does.
    pub fn render(&self, tree: &SyntaxTree) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::List(items) => items.join("."),
            Value::Syntax(id) => tree.text(*id).to_string(),
            Value::Graph(id) => id.clone(),
        }
    }
}

// ============================================================================
// Parsed Arguments
// ============================================================================

/// Malformed argument expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid argument '{source_text}': {message}")]
pub struct ArgumentParseError {
    pub source_text: String,
    pub message: String,
}

/// A parsed argument expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    source: String,
    terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Literal(String),
    Capture(CaptureRef),
}

/// `@name?.call(args)...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRef {
    name: String,
    optional: bool,
    calls: Vec<DotCall>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DotCall {
    name: String,
    args: Vec<Argument>,
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Argument {
    /// Parse an argument expression.
    pub fn parse(source: &str) -> Result<Self, ArgumentParseError> {
        let fail = |message: &str| ArgumentParseError {
            source_text: source.to_string(),
            message: message.to_string(),
        };

        let parts = split_top_level(source, '+').map_err(|m| fail(&m))?;
        let mut terms = Vec::with_capacity(parts.len());
        for part in parts {
            let part = part.trim();
            if let Some(literal) = strip_quotes(part) {
                terms.push(Term::Literal(literal.to_string()));
            } else if let Some(reference) = part.strip_prefix('@') {
                terms.push(Term::Capture(CaptureRef::parse(reference).map_err(|m| fail(&m))?));
            } else {
                terms.push(Term::Literal(part.to_string()));
            }
        }

        Ok(Self {
            source: source.to_string(),
            terms,
        })
    }

    /// The expression as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Capture references appearing at the top level of the expression.
    pub fn captures(&self) -> impl Iterator<Item = &CaptureRef> {
        self.terms.iter().filter_map(|t| match t {
            Term::Capture(c) => Some(c),
            Term::Literal(_) => None,
        })
    }

    /// Resolve every term; absent optional captures contribute nothing.
    pub fn resolve_values(&self, ctx: &ResolveContext<'_>) -> Result<Vec<Value>, ResolveError> {
        let mut values = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            match term {
                Term::Literal(text) => values.push(Value::Text(text.clone())),
                Term::Capture(capture) => {
                    if let Some(value) = capture.resolve(ctx)? {
                        values.push(value);
                    }
                }
            }
        }
        Ok(values)
    }

    /// Resolve and format the expression as a single string.
    pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, ResolveError> {
        let values = self.resolve_values(ctx)?;
        Ok(format_values(ctx.tree, &values))
    }
}

/// Parse and resolve `source` in one step.
pub fn resolve_argument(ctx: &ResolveContext<'_>, source: &str) -> Result<String, ResolveError> {
    match Argument::parse(source) {
        Ok(argument) => argument.resolve(ctx),
        // Unparsable text is taken literally
        Err(_) => Ok(strip_newlines(source)),
    }
}

/// Concatenate rendered values and strip newlines.
pub fn format_values(tree: &SyntaxTree, values: &[Value]) -> String {
    let joined: String = values.iter().map(|v| v.render(tree)).collect();
    strip_newlines(&joined)
}

fn strip_newlines(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

impl CaptureRef {
    fn parse(reference: &str) -> Result<Self, String> {
        let mut reference = reference.trim();
        let mut optional = false;
        if let Some(stripped) = reference.strip_suffix('?') {
            reference = stripped;
            optional = true;
        }

        let segments = split_top_level(reference, '.')?;
        let mut segments = segments.into_iter();
        let mut name = segments.next().unwrap_or_default().trim();
        if let Some(stripped) = name.strip_suffix('?') {
            name = stripped;
            optional = true;
        }
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(format!("invalid capture name '{}'", name));
        }

        let calls = segments
            .map(DotCall::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            optional,
            calls,
        })
    }

    /// Capture name without `@`, `?` or dot calls.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Resolve the reference. `Ok(None)` means an optional capture was absent.
    pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<Value>, ResolveError> {
        match self.resolve_required(ctx) {
            Ok(value) => Ok(Some(value)),
            Err(err) if self.optional && err.is_missing_capture() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn resolve_required(&self, ctx: &ResolveContext<'_>) -> Result<Value, ResolveError> {
        let mut value = match ctx.captures.get(&self.name) {
            Some(&id) => Value::Syntax(id),
            None => match special_captures().get(self.name.as_str()) {
                Some(handler) => handler(ctx, &self.name)?,
                None => return Err(ResolveError::missing_capture(&self.name)),
            },
        };
        for call in &self.calls {
            value = apply_call(ctx, value, call, &self.name)?;
        }
        Ok(value)
    }
}

impl DotCall {
    fn parse(segment: &str) -> Result<Self, String> {
        let segment = segment.trim();
        let Some(open) = segment.find('(') else {
            if segment.is_empty() {
                return Err("empty dot call".to_string());
            }
            return Ok(Self {
                name: segment.to_string(),
                args: Vec::new(),
            });
        };
        let Some(inner) = segment[open + 1..].strip_suffix(')') else {
            return Err(format!("unclosed call '{}'", segment));
        };
        let args = if inner.trim().is_empty() {
            Vec::new()
        } else {
            split_top_level(inner, ',')?
                .into_iter()
                .map(|arg| Argument::parse(arg).map_err(|e| e.message))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            name: segment[..open].trim().to_string(),
            args,
        })
    }
}

/// `'x'` or `"x"` → `x`.
fn strip_quotes(term: &str) -> Option<&str> {
    let bytes = term.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' || first == b'"') && first == last {
            return Some(&term[1..term.len() - 1]);
        }
    }
    None
}

/// Split on `separator` outside quotes and parentheses, in a single pass.
pub fn split_top_level(source: &str, separator: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in source.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| "unbalanced ')'".to_string())?;
                }
                c if c == separator && depth == 0 => {
                    parts.push(&source[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    parts.push(&source[start..]);
    Ok(parts)
}

// ============================================================================
// Special Captures
// ============================================================================

type SpecialCapture = fn(&ResolveContext<'_>, &str) -> Result<Value, ResolveError>;

static SPECIAL_CAPTURES: OnceLock<HashMap<&'static str, SpecialCapture>> = OnceLock::new();

fn special_captures() -> &'static HashMap<&'static str, SpecialCapture> {
    SPECIAL_CAPTURES.get_or_init(|| {
        let mut map: HashMap<&'static str, SpecialCapture> = HashMap::new();
        map.insert(PARENT_CAPTURE, resolve_parent);
        map.insert(SELF_CAPTURE, |ctx, _| Ok(Value::Syntax(ctx.start)));
        map.insert(ENCLOSING_CLASS_CAPTURE, |ctx, name| {
            enclosing_class(ctx)
                .map(|class| Value::Graph(class.id.clone()))
                .ok_or_else(|| ResolveError::missing_capture(name))
        });
        map.insert(SUPERCLASS_CAPTURE, |ctx, name| {
            let graph = ctx.graph.ok_or_else(|| ResolveError::missing_capture(name))?;
            let class = enclosing_class(ctx).ok_or_else(|| ResolveError::missing_capture(name))?;
            graph
                .supertypes_of(&class.id)
                .into_iter()
                .find(|s| s.kind == EntityKind::Class)
                .map(|s| Value::Graph(s.id.clone()))
                .ok_or_else(|| ResolveError::missing_capture(name))
        });
        map
    })
}

/// Names resolvable without being captured.
pub fn is_special_capture(name: &str) -> bool {
    special_captures().contains_key(name)
}

/// Graph node of the nearest syntax ancestor of the current match.
///
/// Converters may map a captured node rather than a match start, so the
/// whole ancestor chain is searched, bounded by the outermost enclosing match.
pub fn nearest_graph_ancestor<'a>(ctx: &ResolveContext<'a>) -> Option<&'a GraphNode> {
    let graph = ctx.graph?;
    let outermost = *ctx.ancestors.first()?;
    for node in ctx.tree.ancestors(ctx.start) {
        if let Some(found) = graph.graph_node_for_syntax_node(node) {
            return Some(found);
        }
        if node == outermost {
            break;
        }
    }
    None
}

fn resolve_parent(ctx: &ResolveContext<'_>, name: &str) -> Result<Value, ResolveError> {
    nearest_graph_ancestor(ctx)
        .map(|node| Value::Graph(node.id.clone()))
        .ok_or_else(|| ResolveError::missing_ancestor(name))
}

/// Walk the parent-of chain from the current match's graph node (or the
/// nearest enclosing one) to the first class.
fn enclosing_class<'a>(ctx: &ResolveContext<'a>) -> Option<&'a GraphNode> {
    let graph = ctx.graph?;
    let mut current = graph
        .graph_node_for_syntax_node(ctx.start)
        .or_else(|| nearest_graph_ancestor(ctx));
    let mut visited = HashSet::new();
    while let Some(node) = current {
        if node.kind == EntityKind::Class {
            return Some(node);
        }
        if !visited.insert(node.id.as_str()) {
            return None;
        }
        current = graph.parent_of(&node.id);
    }
    None
}

// ============================================================================
// Dot Calls
// ============================================================================

type StringCall = fn(&str, &[String]) -> Value;
type ListCall = fn(&[String], &[String]) -> Value;
type SyntaxCall = fn(&ResolveContext<'_>, NodeId, &str) -> Result<Value, ResolveError>;

static STRING_CALLS: OnceLock<HashMap<&'static str, StringCall>> = OnceLock::new();
static LIST_CALLS: OnceLock<HashMap<&'static str, ListCall>> = OnceLock::new();
static SYNTAX_CALLS: OnceLock<HashMap<&'static str, SyntaxCall>> = OnceLock::new();

fn string_calls() -> &'static HashMap<&'static str, StringCall> {
    STRING_CALLS.get_or_init(|| {
        let mut map: HashMap<&'static str, StringCall> = HashMap::new();
        map.insert("split", |text, args| {
            let separator = args.first().map(String::as_str).unwrap_or("");
            if separator.is_empty() {
                Value::List(vec![text.to_string()])
            } else {
                Value::List(text.split(separator).map(str::to_string).collect())
            }
        });
        map.insert("hash", |text, _| {
            Value::Text(format!("{:x}", Sha256::digest(text.as_bytes())))
        });
        map.insert("until", |text, args| {
            let marker = args.first().map(String::as_str).unwrap_or("");
            match text.find(marker) {
                Some(end) if !marker.is_empty() => Value::Text(text[..end].to_string()),
                _ => Value::Text(text.to_string()),
            }
        });
        map
    })
}

fn list_calls() -> &'static HashMap<&'static str, ListCall> {
    LIST_CALLS.get_or_init(|| {
        let mut map: HashMap<&'static str, ListCall> = HashMap::new();
        map.insert("last", |items, _| {
            Value::Text(items.last().cloned().unwrap_or_default())
        });
        map
    })
}

fn syntax_calls() -> &'static HashMap<&'static str, SyntaxCall> {
    SYNTAX_CALLS.get_or_init(|| {
        let mut map: HashMap<&'static str, SyntaxCall> = HashMap::new();
        map.insert("node", |ctx, id, name| {
            ctx.graph
                .and_then(|g| g.graph_node_for_syntax_node(id))
                .map(|node| Value::Graph(node.id.clone()))
                .ok_or_else(|| ResolveError::UnmappedSyntaxNode {
                    name: name.to_string(),
                })
        });
        map
    })
}

fn apply_call(
    ctx: &ResolveContext<'_>,
    value: Value,
    call: &DotCall,
    capture: &str,
) -> Result<Value, ResolveError> {
    let args = call
        .args
        .iter()
        .map(|arg| arg.resolve(ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let name = call.name.as_str();

    match &value {
        Value::Text(text) => {
            if let Some(f) = string_calls().get(name) {
                return Ok(f(text, &args));
            }
            return Ok(value);
        }
        Value::List(items) => {
            if let Some(f) = list_calls().get(name) {
                return Ok(f(items, &args));
            }
        }
        Value::Syntax(id) => {
            if let Some(f) = syntax_calls().get(name) {
                return f(ctx, *id, capture);
            }
        }
        Value::Graph(_) => {}
    }

    match string_calls().get(name) {
        Some(f) => Ok(f(&value.render(ctx.tree), &args)),
        None => Ok(value),
    }
}
