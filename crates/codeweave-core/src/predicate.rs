//! Predicates gating matches and converters.
//!
//! A predicate is a pure function of the match context. Lists of predicates
//! are evaluated in declaration order and short-circuit on the first failure.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, ResolveError};
use crate::resolver::{Argument, ResolveContext};

/// A boolean gate, parsed and compiled at load time.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Both sides resolve to the same string
    Equals { left: Argument, right: Argument },
    EndsWith { value: Argument, suffix: Argument },
    Contains { value: Argument, substring: Argument },
    /// The whole value matches the regex
    FullMatch { value: Argument, regex: Regex },
    /// The value equals one of the options
    AnyOf { value: Argument, options: Vec<Argument> },
    /// The base capture name is bound; nothing is resolved
    Exists { capture: String },
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equals(left: &str, right: &str) -> Result<Self, ConfigurationError> {
        Self::from_spec(
            PredicateSpec::Equals {
                left: left.to_string(),
                right: right.to_string(),
            },
            0,
        )
    }

    pub fn exists(capture: &str) -> Self {
        Self::Exists {
            capture: base_capture_name(capture).to_string(),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against one match.
    pub fn evaluate(&self, ctx: &ResolveContext<'_>) -> Result<bool, ResolveError> {
        Ok(match self {
            Self::Equals { left, right } => left.resolve(ctx)? == right.resolve(ctx)?,
            Self::EndsWith { value, suffix } => value.resolve(ctx)?.ends_with(&suffix.resolve(ctx)?),
            Self::Contains { value, substring } => {
                value.resolve(ctx)?.contains(&substring.resolve(ctx)?)
            }
            Self::FullMatch { value, regex } => regex.is_match(&value.resolve(ctx)?),
            Self::AnyOf { value, options } => {
                let value = value.resolve(ctx)?;
                let mut found = false;
                for option in options {
                    if option.resolve(ctx)? == value {
                        found = true;
                        break;
                    }
                }
                found
            }
            Self::Exists { capture } => ctx.captures.contains_key(capture),
            Self::Not(inner) => !inner.evaluate(ctx)?,
        })
    }

    /// Convert a deserialized predicate, compiling regexes and parsing
    /// argument expressions.
    pub fn from_spec(spec: PredicateSpec, entry: usize) -> Result<Self, ConfigurationError> {
        let arg = |source: &str| {
            Argument::parse(source).map_err(|e| ConfigurationError::invalid(entry, e.to_string()))
        };
        let regex = |pattern: &str| {
            Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| ConfigurationError::invalid(entry, format!("invalid regex '{}': {}", pattern, e)))
        };

        let predicate = match spec {
            PredicateSpec::Equals { left, right } => Self::Equals {
                left: arg(&left)?,
                right: arg(&right)?,
            },
            PredicateSpec::NotEquals { left, right } => Self::Equals {
                left: arg(&left)?,
                right: arg(&right)?,
            }
            .negate(),
            PredicateSpec::EndsWith { value, suffix } => Self::EndsWith {
                value: arg(&value)?,
                suffix: arg(&suffix)?,
            },
            PredicateSpec::NotEndsWith { value, suffix } => Self::EndsWith {
                value: arg(&value)?,
                suffix: arg(&suffix)?,
            }
            .negate(),
            PredicateSpec::Contains { value, substring } => Self::Contains {
                value: arg(&value)?,
                substring: arg(&substring)?,
            },
            PredicateSpec::NotContains { value, substring } => Self::Contains {
                value: arg(&value)?,
                substring: arg(&substring)?,
            }
            .negate(),
            PredicateSpec::FullMatch { value, regex: pattern } => Self::FullMatch {
                value: arg(&value)?,
                regex: regex(&pattern)?,
            },
            PredicateSpec::NotFullMatch { value, regex: pattern } => Self::FullMatch {
                value: arg(&value)?,
                regex: regex(&pattern)?,
            }
            .negate(),
            PredicateSpec::AnyOf { value, options } => Self::AnyOf {
                value: arg(&value)?,
                options: options.iter().map(|o| arg(o)).collect::<Result<_, _>>()?,
            },
            PredicateSpec::Exists { capture } => Self::exists(&capture),
            PredicateSpec::NotExists { capture } => Self::exists(&capture).negate(),
            PredicateSpec::Not { predicate } => Self::from_spec(*predicate, entry)?.negate(),
        };
        Ok(predicate)
    }
}

/// Evaluate in order, stopping at the first failure.
pub fn all_pass(predicates: &[Predicate], ctx: &ResolveContext<'_>) -> Result<bool, ResolveError> {
    for predicate in predicates {
        if !predicate.evaluate(ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `@x.y?` → `x`.
pub fn base_capture_name(reference: &str) -> &str {
    let name = reference.trim();
    let name = name.strip_prefix('@').unwrap_or(name);
    let name = name.split('.').next().unwrap_or(name);
    name.strip_suffix('?').unwrap_or(name)
}

/// Predicate as written in a pattern document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum PredicateSpec {
    Equals { left: String, right: String },
    NotEquals { left: String, right: String },
    EndsWith { value: String, suffix: String },
    NotEndsWith { value: String, suffix: String },
    Contains { value: String, substring: String },
    NotContains { value: String, substring: String },
    FullMatch { value: String, regex: String },
    NotFullMatch { value: String, regex: String },
    AnyOf { value: String, options: Vec<String> },
    Exists { capture: String },
    NotExists { capture: String },
    Not { predicate: Box<PredicateSpec> },
}
