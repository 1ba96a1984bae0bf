//! Converters: turn accepted matches into graph mutations.
//!
//! Every converter carries its own predicate list; it runs only when that
//! list is empty or all of it passes. The two macro forms in the document
//! format (`node_with_parent`, `argument_connection`) are expanded into a
//! node converter followed by a connection converter when loaded.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{EngineEvent, EngineObserver};
use crate::error::{ConfigurationError, ResolveError};
use crate::graph::{Edge, EdgeType, EntityKind, FileImport, GraphBuilder, GraphNode};
use crate::predicate::{all_pass, base_capture_name, Predicate, PredicateSpec};
use crate::resolver::{nearest_graph_ancestor, Argument, Captures, ResolveContext};
use crate::syntax::{NodeId, SyntaxTree};

/// Kind given to dangling endpoints when no fallback kind is configured.
pub const DEFAULT_FALLBACK_KIND: EntityKind = EntityKind::Object;

/// Where a converter is being applied.
#[derive(Clone, Copy)]
pub struct ConversionContext<'a> {
    pub tree: &'a SyntaxTree,
    pub start: NodeId,
    pub captures: &'a Captures,
    /// Start nodes of the enclosing matches, outermost first
    pub ancestors: &'a [NodeId],
}

impl<'a> ConversionContext<'a> {
    fn resolver<'b>(&self, builder: &'b GraphBuilder) -> ResolveContext<'b>
    where
        'a: 'b,
    {
        ResolveContext::new(self.tree, self.start, self.captures)
            .with_ancestors(self.ancestors)
            .with_graph(builder)
    }
}

/// A side-effecting unit applied to an accepted match.
#[derive(Debug, Clone)]
pub struct Converter {
    pub action: ConverterAction,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone)]
pub enum ConverterAction {
    /// Create or claim a graph node and remember its syntax node
    Node {
        name: Argument,
        kind: Argument,
        /// Capture whose node is associated; the start node when absent
        syntax_node: Option<String>,
    },
    /// Add a directed edge, materialising missing endpoints
    Connection {
        from: Argument,
        to: Argument,
        edge: EdgeType,
        from_kind: Option<Argument>,
        to_kind: Option<Argument>,
        /// Capture whose span the edge carries; the start node when absent
        position: Option<String>,
    },
    /// Warn when an identifier is unknown to the graph and the imports
    ValidateIdentifier { identifier: Argument },
    /// Record one import of the current file
    Import { fields: BTreeMap<String, Argument> },
}

impl Converter {
    pub fn new(action: ConverterAction) -> Self {
        Self {
            action,
            predicates: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self.action {
            ConverterAction::Node { .. } => "node",
            ConverterAction::Connection { .. } => "connection",
            ConverterAction::ValidateIdentifier { .. } => "validate_identifier",
            ConverterAction::Import { .. } => "import",
        }
    }

    /// True when the converter's own predicates allow it to run.
    pub fn should_execute(&self, ctx: &ResolveContext<'_>) -> Result<bool, ResolveError> {
        all_pass(&self.predicates, ctx)
    }

    /// Apply the converter. Returns `false` if its predicates held it back.
    pub fn execute(
        &self,
        ctx: &ConversionContext<'_>,
        builder: &mut GraphBuilder,
        observer: &mut dyn EngineObserver,
    ) -> Result<bool, ResolveError> {
        if !self.should_execute(&ctx.resolver(builder))? {
            return Ok(false);
        }

        match &self.action {
            ConverterAction::Node {
                name,
                kind,
                syntax_node,
            } => {
                let resolver = ctx.resolver(builder);
                let id = name.resolve(&resolver)?;
                let kind = resolve_kind(kind, &resolver)?;
                let syntax = match syntax_node {
                    Some(capture) => *ctx
                        .captures
                        .get(capture)
                        .ok_or_else(|| ResolveError::missing_capture(capture))?,
                    None => ctx.start,
                };
                let span = ctx.tree.node(syntax).span();
                let file = builder.file_path().to_string();

                debug!("Claiming {} '{}'", kind, id);
                builder
                    .graph_mut()
                    .claim_node(&id, kind, Some(file), Some(span));
                builder.associate(syntax, id);
            }

            ConverterAction::Connection {
                from,
                to,
                edge,
                from_kind,
                to_kind,
                position,
            } => {
                let resolver = ctx.resolver(builder);
                let source = from.resolve(&resolver)?;
                let target = to.resolve(&resolver)?;
                let from_kind = match from_kind {
                    Some(kind) => resolve_kind(kind, &resolver)?,
                    None => DEFAULT_FALLBACK_KIND,
                };
                let to_kind = match to_kind {
                    Some(kind) => resolve_kind(kind, &resolver)?,
                    None => DEFAULT_FALLBACK_KIND,
                };

                if source.trim() == target.trim() && from_kind == to_kind {
                    observer.observe(&EngineEvent::SelfConnectionSkipped { id: source });
                    return Ok(true);
                }

                let anchor = match position {
                    Some(capture) => *ctx
                        .captures
                        .get(capture)
                        .ok_or_else(|| ResolveError::missing_capture(capture))?,
                    None => ctx.start,
                };
                let context = nearest_graph_ancestor(&resolver).map(|node| node.id.clone());
                let edge = Edge::new(
                    source,
                    target,
                    *edge,
                    builder.file_path().to_string(),
                    ctx.tree.node(anchor).span(),
                );

                debug!("Adding {} edge {} -> {}", edge.edge_type, edge.source, edge.target);
                builder.graph_mut().add_edge_and_materialize_missing_endpoints(
                    &edge,
                    |id, context| GraphNode::dangling(id.to_string(), from_kind, context.map(str::to_string)),
                    |id, context| GraphNode::dangling(id.to_string(), to_kind, context.map(str::to_string)),
                    context.as_deref(),
                );
            }

            ConverterAction::ValidateIdentifier { identifier } => {
                let identifier = identifier.resolve(&ctx.resolver(builder))?;
                let in_graph = builder
                    .graph()
                    .iter_nodes()
                    .any(|node| node.id.contains(identifier.as_str()));
                let in_imports = builder
                    .file_imports()
                    .iter()
                    .flat_map(|import| import.data.values())
                    .any(|value| value.contains(identifier.as_str()));
                if !in_graph && !in_imports {
                    observer.observe(&EngineEvent::IdentifierNotFound {
                        identifier,
                        file: builder.file_path().to_string(),
                    });
                }
            }

            ConverterAction::Import { fields } => {
                let resolver = ctx.resolver(builder);
                let mut data = BTreeMap::new();
                for (key, value) in fields {
                    data.insert(key.clone(), value.resolve(&resolver)?);
                }
                builder.record_import(FileImport { data });
            }
        }

        Ok(true)
    }

    /// Convert a deserialized converter. Macro forms yield two converters.
    pub fn from_spec(spec: ConverterSpec, entry: usize) -> Result<Vec<Self>, ConfigurationError> {
        let arg = |source: &str| {
            Argument::parse(source).map_err(|e| ConfigurationError::invalid(entry, e.to_string()))
        };
        let opt_arg = |source: Option<&str>| source.map(|s| arg(s)).transpose();
        let edge = |name: Option<&str>, default: EdgeType| match name {
            Some(name) => EdgeType::from_str(name).map_err(|e| ConfigurationError::invalid(entry, e.to_string())),
            None => Ok(default),
        };
        let predicates = |specs: Vec<PredicateSpec>| {
            specs
                .into_iter()
                .map(|p| Predicate::from_spec(p, entry))
                .collect::<Result<Vec<_>, _>>()
        };
        let capture = |name: Option<String>| name.map(|n| base_capture_name(&n).to_string());

        let converters = match spec {
            ConverterSpec::Node {
                name,
                kind,
                syntax_node,
                predicates: p,
            } => vec![Self {
                action: ConverterAction::Node {
                    name: arg(&name)?,
                    kind: arg(&kind)?,
                    syntax_node: capture(syntax_node),
                },
                predicates: predicates(p)?,
            }],

            ConverterSpec::Connection {
                from,
                to,
                edge: edge_name,
                from_kind,
                to_kind,
                position,
                predicates: p,
            } => vec![Self {
                action: ConverterAction::Connection {
                    from: arg(&from)?,
                    to: arg(&to)?,
                    edge: edge(edge_name.as_deref(), EdgeType::Uses)?,
                    from_kind: opt_arg(from_kind.as_deref())?,
                    to_kind: opt_arg(to_kind.as_deref())?,
                    position: capture(position),
                },
                predicates: predicates(p)?,
            }],

            ConverterSpec::ValidateIdentifier {
                identifier,
                predicates: p,
            } => vec![Self {
                action: ConverterAction::ValidateIdentifier {
                    identifier: arg(&identifier)?,
                },
                predicates: predicates(p)?,
            }],

            ConverterSpec::Import { fields, predicates: p } => {
                if fields.is_empty() {
                    return Err(ConfigurationError::invalid(entry, "import converter has no fields"));
                }
                let fields = fields
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), arg(value)?)))
                    .collect::<Result<BTreeMap<_, _>, ConfigurationError>>()?;
                vec![Self {
                    action: ConverterAction::Import { fields },
                    predicates: predicates(p)?,
                }]
            }

            ConverterSpec::NodeWithParent {
                name,
                kind,
                syntax_node,
                edge: edge_name,
                predicates: p,
            } => {
                let predicates = predicates(p)?;
                vec![
                    Self {
                        action: ConverterAction::Node {
                            name: arg(&name)?,
                            kind: arg(&kind)?,
                            syntax_node: capture(syntax_node),
                        },
                        predicates: predicates.clone(),
                    },
                    Self {
                        action: ConverterAction::Connection {
                            from: arg("@parent")?,
                            to: arg(&name)?,
                            edge: edge(edge_name.as_deref(), EdgeType::Defines)?,
                            from_kind: None,
                            to_kind: Some(arg(&kind)?),
                            position: None,
                        },
                        predicates,
                    },
                ]
            }

            ConverterSpec::ArgumentConnection {
                name,
                kind,
                target,
                target_kind,
                edge: edge_name,
                predicates: p,
            } => {
                let predicates = predicates(p)?;
                vec![
                    Self {
                        action: ConverterAction::Node {
                            name: arg(&name)?,
                            kind: arg(&kind)?,
                            syntax_node: None,
                        },
                        predicates: predicates.clone(),
                    },
                    Self {
                        action: ConverterAction::Connection {
                            from: arg(&name)?,
                            to: arg(&target)?,
                            edge: edge(edge_name.as_deref(), EdgeType::Uses)?,
                            from_kind: Some(arg(&kind)?),
                            to_kind: opt_arg(target_kind.as_deref())?,
                            position: None,
                        },
                        predicates,
                    },
                ]
            }
        };
        Ok(converters)
    }
}

fn resolve_kind(kind: &Argument, ctx: &ResolveContext<'_>) -> Result<EntityKind, ResolveError> {
    let kind = kind.resolve(ctx)?;
    EntityKind::from_str(&kind).map_err(|_| ResolveError::UnknownEntityKind(kind))
}

/// Converter as written in a pattern document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ConverterSpec {
    Node {
        name: String,
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        syntax_node: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        predicates: Vec<PredicateSpec>,
    },
    Connection {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        predicates: Vec<PredicateSpec>,
    },
    ValidateIdentifier {
        identifier: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        predicates: Vec<PredicateSpec>,
    },
    Import {
        fields: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        predicates: Vec<PredicateSpec>,
    },
    /// Node plus a `@parent` → node connection (default edge: defines)
    NodeWithParent {
        name: String,
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        syntax_node: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        predicates: Vec<PredicateSpec>,
    },
    /// Node plus a node → target connection (default edge: uses)
    ArgumentConnection {
        name: String,
        kind: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        predicates: Vec<PredicateSpec>,
    },
}
