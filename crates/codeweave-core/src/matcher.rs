//! Matching Engine
//!
//! [`match_at`] decides whether a [`Pattern`] matches at one syntax node and
//! returns one capture map per way it matches. It is a pure function of the
//! tree and the pattern; an empty result means "no match" and is never an
//! error.
//!
//! Child patterns are matched in order against the node's direct children by
//! a backtracking search ([`match_children`]). Consecutive child patterns
//! need not bind contiguous siblings, but each one searches strictly after
//! the sibling consumed by the previous one. The search is exponential in the
//! worst case; result order and multiplicity are significant, so nothing is
//! memoised or deduplicated.

use serde::Serialize;

use crate::pattern::{AlternativesPattern, NodePattern, Pattern, DESCENDANTS, WILDCARD};
use crate::resolver::Captures;
use crate::syntax::{NodeId, SyntaxTree};

/// One successful match of a configured pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMatch {
    /// Node the pattern matched at
    pub start: NodeId,
    /// Index of the pattern entry in its [`PatternSet`](crate::pattern::PatternSet)
    pub pattern: usize,
    pub captures: Captures,
}

/// Every capture map with which `pattern` matches at `node`.
pub fn match_at(tree: &SyntaxTree, node: NodeId, pattern: &Pattern) -> Vec<Captures> {
    match pattern {
        Pattern::Node(p) => match_node(tree, node, p),
        Pattern::Alternatives(p) => match_alternatives(tree, node, p),
    }
}

fn match_alternatives(tree: &SyntaxTree, node: NodeId, pattern: &AlternativesPattern) -> Vec<Captures> {
    pattern
        .alternatives
        .iter()
        .flat_map(|alternative| match_at(tree, node, alternative))
        .collect()
}

fn match_node(tree: &SyntaxTree, node: NodeId, pattern: &NodePattern) -> Vec<Captures> {
    let syntax = tree.node(node);
    let descends = pattern.rule == DESCENDANTS;
    if !(descends || pattern.rule == WILDCARD || pattern.rule == syntax.rule()) {
        return Vec::new();
    }
    if syntax
        .children()
        .iter()
        .any(|&child| pattern.not_children.contains(tree.rule(child)))
    {
        return Vec::new();
    }

    let mut seed = Captures::new();
    if pattern.captures.is_empty() {
        seed.insert(syntax.rule().to_string(), node);
    } else {
        for name in &pattern.captures {
            seed.insert(name.clone(), node);
        }
    }

    let mut results = if pattern.children.is_empty() {
        vec![seed]
    } else {
        match_children(tree, syntax.children(), &pattern.children, &seed, 0)
    };

    // One or more levels of descent under the same pattern
    if descends {
        let as_pattern = Pattern::Node(pattern.clone());
        for &child in syntax.children() {
            results.extend(match_at(tree, child, &as_pattern));
        }
    }

    results
}

/// Match `patterns` in order against `children[from..]`.
///
/// Each result is `captures` merged with the bindings of one combination.
pub fn match_children(
    tree: &SyntaxTree,
    children: &[NodeId],
    patterns: &[Pattern],
    captures: &Captures,
    from: usize,
) -> Vec<Captures> {
    let Some((pattern, rest)) = patterns.split_first() else {
        return vec![captures.clone()];
    };

    let mut results = Vec::new();
    for index in from..children.len() {
        for found in match_at(tree, children[index], pattern) {
            let mut merged = captures.clone();
            merge_captures(tree, &mut merged, found);
            results.extend(match_children(tree, children, rest, &merged, index + 1));
        }
    }

    if results.is_empty() && pattern.is_optional() {
        results = match_children(tree, children, rest, captures, from);
    }
    results
}

/// Merge `incoming` into `captures`.
///
/// A new binding replaces an existing one, except when the capture name is
/// identical to the source text of the node it is currently bound to.
pub fn merge_captures(tree: &SyntaxTree, captures: &mut Captures, incoming: Captures) {
    for (name, node) in incoming {
        match captures.get(&name) {
            Some(&existing) if tree.text(existing) == name => {}
            _ => {
                captures.insert(name, node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id_of(tree: &SyntaxTree, rule: &str) -> NodeId {
        tree.nodes().find(|n| n.rule() == rule).unwrap().id()
    }

    #[test]
    fn test_rule_mismatch() {
        let tree = SyntaxTree::parse_outline("foo(bar)").unwrap();
        let root = tree.root().unwrap();
        assert!(match_at(&tree, root, &Pattern::node("bar")).is_empty());
        assert_eq!(match_at(&tree, root, &Pattern::node("foo")).len(), 1);
    }

    #[test]
    fn test_default_capture_uses_node_rule() {
        let tree = SyntaxTree::parse_outline("foo(bar)").unwrap();
        let root = tree.root().unwrap();
        let results = match_at(&tree, root, &Pattern::node(WILDCARD));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("foo"), Some(&root));
    }

    #[test]
    fn test_multiple_captures_bind_same_node() {
        let tree = SyntaxTree::parse_outline("foo").unwrap();
        let root = tree.root().unwrap();
        let results = match_at(&tree, root, &Pattern::node("foo").capture("a").capture("b"));
        assert_eq!(results[0].len(), 2);
        assert_eq!(results[0]["a"], root);
        assert_eq!(results[0]["b"], root);
    }

    #[test]
    fn test_children_in_order_not_contiguous() {
        let tree = SyntaxTree::parse_outline("f(a, x, b)").unwrap();
        let root = tree.root().unwrap();
        let pattern = Pattern::node("f")
            .child(Pattern::node("a"))
            .child(Pattern::node("b"));
        assert_eq!(match_at(&tree, root, &pattern).len(), 1);

        let reversed = Pattern::node("f")
            .child(Pattern::node("b"))
            .child(Pattern::node("a"));
        assert!(match_at(&tree, root, &reversed).is_empty());
    }

    #[test]
    fn test_every_combination_is_reported() {
        let tree = SyntaxTree::parse_outline("f(x, x, x)").unwrap();
        let root = tree.root().unwrap();
        let pattern = Pattern::node("f")
            .child(Pattern::node("x").capture("first"))
            .child(Pattern::node("x").capture("second"));
        let results = match_at(&tree, root, &pattern);
        // (0,1) (0,2) (1,2)
        assert_eq!(results.len(), 3);
        let children = tree.node(root).children();
        assert_eq!(results[0]["first"], children[0]);
        assert_eq!(results[0]["second"], children[1]);
        assert_eq!(results[2]["first"], children[1]);
        assert_eq!(results[2]["second"], children[2]);
    }

    #[test]
    fn test_optional_child_present_and_absent() {
        let tree = SyntaxTree::parse_outline("f(a, b)").unwrap();
        let root = tree.root().unwrap();
        let pattern = Pattern::node("f")
            .child(Pattern::node("z").capture("z").optional())
            .child(Pattern::node("b").capture("b"));
        let results = match_at(&tree, root, &pattern);
        assert_eq!(results.len(), 1);
        assert!(!results[0].contains_key("z"));
        assert_eq!(results[0]["b"], id_of(&tree, "b"));

        let pattern = Pattern::node("f")
            .child(Pattern::node("a").capture("a").optional())
            .child(Pattern::node("b").capture("b"));
        let results = match_at(&tree, root, &pattern);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["a"], id_of(&tree, "a"));
    }

    #[test]
    fn test_optional_child_skipped_only_when_it_yields_nothing() {
        // `b` matches at index 1 but leaves nothing for `a`, so it is retried as absent
        let tree = SyntaxTree::parse_outline("f(a, b)").unwrap();
        let root = tree.root().unwrap();
        let pattern = Pattern::node("f")
            .child(Pattern::node("b").optional())
            .child(Pattern::node("a"));
        let results = match_at(&tree, root, &pattern);
        assert_eq!(results.len(), 1);
        assert!(!results[0].contains_key("b"));

        // One successful combination suppresses the absent retry
        let tree = SyntaxTree::parse_outline("f(b, a, b)").unwrap();
        let root = tree.root().unwrap();
        let results = match_at(&tree, root, &pattern);
        assert_eq!(results.len(), 1);
        assert!(results[0].contains_key("b"));
    }

    #[test]
    fn test_alternatives_concatenate() {
        let tree = SyntaxTree::parse_outline("foo").unwrap();
        let root = tree.root().unwrap();
        let p1 = Pattern::node("foo").capture("one");
        let p2 = Pattern::node(WILDCARD).capture("two");
        let both = Pattern::alternatives(vec![p1.clone(), p2.clone(), p1.clone()]);

        let mut expected = match_at(&tree, root, &p1);
        expected.extend(match_at(&tree, root, &p2));
        expected.extend(match_at(&tree, root, &p1));
        assert_eq!(match_at(&tree, root, &both), expected);
    }

    #[test]
    fn test_descendants_without_children() {
        let tree = SyntaxTree::parse_outline("a(b(c), d)").unwrap();
        let root = tree.root().unwrap();
        let results = match_at(&tree, root, &Pattern::node(DESCENDANTS).capture("n"));
        // a, then b and its c, then d
        let bound: Vec<&str> = results.iter().map(|c| tree.rule(c["n"])).collect();
        assert_eq!(bound, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_descendants_with_children_patterns() {
        let tree = SyntaxTree::parse_outline("a(b(x), x)").unwrap();
        let root = tree.root().unwrap();
        let pattern = Pattern::node(DESCENDANTS)
            .capture("n")
            .child(Pattern::node("x").capture("leaf"));
        let results = match_at(&tree, root, &pattern);
        // Direct match at `a`, then the descent finds `b`; `x` itself has no children
        let bound: Vec<(&str, &str)> = results
            .iter()
            .map(|c| (tree.rule(c["n"]), tree.text(c["leaf"])))
            .collect();
        assert_eq!(bound, vec![("a", "x"), ("b", "x")]);
    }

    #[test]
    fn test_descendants_children_fail_falls_back_to_extras() {
        let tree = SyntaxTree::parse_outline("a(b(x), y)").unwrap();
        let root = tree.root().unwrap();
        let pattern = Pattern::node(DESCENDANTS)
            .capture("n")
            .child(Pattern::node("x"));
        let results = match_at(&tree, root, &pattern);
        assert_eq!(results.len(), 1);
        assert_eq!(tree.rule(results[0]["n"]), "b");
    }

    #[test]
    fn test_not_children_rejects_whole_descent() {
        let tree = SyntaxTree::parse_outline("a(b(d), c)").unwrap();
        let root = tree.root().unwrap();
        let pattern = Pattern::node(DESCENDANTS).not_child("c");
        assert!(match_at(&tree, root, &pattern).is_empty());

        let b = id_of(&tree, "b");
        let bound: Vec<NodeId> = match_at(&tree, b, &pattern)
            .iter()
            .flat_map(|c| c.values().copied())
            .collect();
        assert_eq!(bound, vec![b, id_of(&tree, "d")]);
    }

    #[test]
    fn test_merge_overwrites_existing_binding() {
        let tree = SyntaxTree::parse_outline("f(x, y)").unwrap();
        let (x, y) = (id_of(&tree, "x"), id_of(&tree, "y"));
        let mut captures = Captures::new();
        captures.insert("n".into(), x);
        merge_captures(&tree, &mut captures, Captures::from([("n".to_string(), y)]));
        assert_eq!(captures["n"], y);
    }

    #[test]
    fn test_merge_keeps_binding_named_after_its_text() {
        // Leaf `x` has source text "x"; a capture named "x" bound to it survives
        let tree = SyntaxTree::parse_outline("f(x, y)").unwrap();
        let (x, y) = (id_of(&tree, "x"), id_of(&tree, "y"));
        let mut captures = Captures::new();
        captures.insert("x".into(), x);
        merge_captures(&tree, &mut captures, Captures::from([("x".to_string(), y)]));
        assert_eq!(captures["x"], x);
    }
}
