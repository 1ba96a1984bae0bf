//! Matching and conversion scenarios over hand-built syntax trees.

use codeweave_core::engine::RecordingObserver;
use codeweave_core::matcher::match_at;
use codeweave_core::{
    resolve_argument, Captures, EdgeType, EngineEvent, EntityKind, GraphBuilder, NodeId, Pattern,
    PatternSet, Predicate, QueryEngine, ResolveContext, SyntaxTree,
};
use pretty_assertions::assert_eq;

fn outline(source: &str) -> SyntaxTree {
    SyntaxTree::parse_outline(source).unwrap()
}

fn captures(pairs: &[(&str, NodeId)]) -> Captures {
    pairs
        .iter()
        .map(|(name, id)| (name.to_string(), *id))
        .collect()
}

fn foo_bar() -> Pattern {
    Pattern::node("foo").child(Pattern::node("bar").capture("b"))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_child_capture_is_bound() {
    let tree = outline("foo(bar, baz)");
    let root = tree.root().unwrap();
    let bar = tree.child(root, 0).unwrap();

    let matches = match_at(&tree, root, &foo_bar());
    assert_eq!(matches, vec![captures(&[("foo", root), ("b", bar)])]);
}

#[test]
fn scenario_missing_required_child_fails() {
    let tree = outline("foo(baz)");
    let root = tree.root().unwrap();
    assert!(match_at(&tree, root, &foo_bar()).is_empty());
}

#[test]
fn scenario_missing_optional_child_keeps_seed() {
    let tree = outline("foo(baz)");
    let root = tree.root().unwrap();
    let pattern = Pattern::node("foo").child(Pattern::node("bar").capture("b").optional());

    let matches = match_at(&tree, root, &pattern);
    assert_eq!(matches, vec![captures(&[("foo", root)])]);
}

#[test]
fn scenario_self_connection_is_skipped() {
    let tree = outline(r#"foo(bar="run")"#);
    let patterns = PatternSet::from_json_str(
        r#"[{
            "pattern": {"rule": "foo", "children": [{"rule": "bar", "captures": ["b"]}]},
            "converters": [
                {"type": "node", "name": "@b", "kind": "'function'"},
                {"type": "connection", "from": "@b", "to": "@b",
                 "from_kind": "'function'", "to_kind": "'function'", "edge": "calls"}
            ]
        }]"#,
    )
    .unwrap();

    let mut builder = GraphBuilder::new();
    builder.begin_file("a.py");
    let mut observer = RecordingObserver::default();
    let stats = QueryEngine::new(&patterns)
        .run_with_observer(&tree, &mut builder, &mut observer)
        .unwrap();

    assert_eq!(builder.graph().node_count(), 1);
    assert_eq!(builder.graph().edge_count(), 0);
    assert_eq!(stats.converters_executed, 2);
    assert_eq!(
        observer.events,
        vec![EngineEvent::SelfConnectionSkipped {
            id: "run".to_string()
        }]
    );
}

#[test]
fn scenario_exists_checks_only_the_base_capture() {
    let tree = outline("foo(bar)");
    let root = tree.root().unwrap();
    let bar = tree.child(root, 0).unwrap();
    let bound = captures(&[("x", bar)]);
    let ctx = ResolveContext::new(&tree, root, &bound);

    // `.y` is never resolved
    assert!(Predicate::exists("@x.y").evaluate(&ctx).unwrap());
    assert!(Predicate::exists("@x?.y.z").evaluate(&ctx).unwrap());
    assert!(!Predicate::exists("@missing.y").evaluate(&ctx).unwrap());
    assert!(Predicate::exists("@missing").negate().evaluate(&ctx).unwrap());
}

// ============================================================================
// Matching properties
// ============================================================================

#[test]
fn wildcard_matches_every_node() {
    let tree = outline(r#"module(class(identifier="A", _="{"), def(identifier="f", block(pass)))"#);
    for id in tree.preorder() {
        assert!(
            !match_at(&tree, id, &Pattern::node(".")).is_empty(),
            "wildcard failed at {}",
            tree.rule(id)
        );
    }
}

#[test]
fn rule_mismatch_never_matches() {
    let tree = outline(r#"module(class(identifier="A"), def(identifier="f"))"#);
    let pattern = Pattern::node("def").child(Pattern::node(".").optional());
    for id in tree.preorder() {
        let matches = match_at(&tree, id, &pattern);
        if tree.rule(id) == "def" {
            assert_eq!(matches.len(), 1);
        } else {
            assert!(matches.is_empty());
        }
    }
}

#[test]
fn forbidden_direct_child_rejects_node() {
    let tree = outline("foo(bar, baz(qux))");
    let root = tree.root().unwrap();

    assert!(match_at(&tree, root, &foo_bar().not_child("baz")).is_empty());
    // Only direct children are inspected
    assert_eq!(match_at(&tree, root, &foo_bar().not_child("qux")).len(), 1);
}

#[test]
fn alternatives_concatenate_in_order() {
    let tree = outline("foo(bar, bar)");
    let root = tree.root().unwrap();
    let first = Pattern::node("foo").child(Pattern::node("bar").capture("b"));
    let second = Pattern::node(".").capture("any");

    let mut expected = match_at(&tree, root, &first);
    expected.extend(match_at(&tree, root, &second));
    assert_eq!(expected.len(), 3);

    let alternatives = Pattern::alternatives(vec![first, second]);
    assert_eq!(match_at(&tree, root, &alternatives), expected);
}

#[test]
fn children_match_in_order_without_contiguity() {
    let tree = outline("call(name, comma, args, paren)");
    let root = tree.root().unwrap();
    let pattern = Pattern::node("call")
        .child(Pattern::node("name").capture("n"))
        .child(Pattern::node("paren").capture("p"));
    assert_eq!(match_at(&tree, root, &pattern).len(), 1);

    let reversed = Pattern::node("call")
        .child(Pattern::node("paren"))
        .child(Pattern::node("name"));
    assert!(match_at(&tree, root, &reversed).is_empty());
}

#[test]
fn capture_overwrite_keeps_node_named_like_its_key() {
    // Neither child declares captures, so each binds under its own rule. The
    // first `x` leaf has text "x", equal to its key, and is never overwritten.
    let tree = outline(r#"f(x, x="other")"#);
    let root = tree.root().unwrap();
    let first = tree.child(root, 0).unwrap();

    let pattern = Pattern::node("f")
        .child(Pattern::node("x"))
        .child(Pattern::node("x"));
    let matches = match_at(&tree, root, &pattern);
    assert_eq!(matches, vec![captures(&[("f", root), ("x", first)])]);
}

#[test]
fn capture_overwrite_replaces_other_bindings() {
    let tree = outline(r#"f(x="a", x="b")"#);
    let root = tree.root().unwrap();
    let second = tree.child(root, 1).unwrap();

    let pattern = Pattern::node("f")
        .child(Pattern::node("x").capture("v"))
        .child(Pattern::node("x").capture("v"));
    let matches = match_at(&tree, root, &pattern);
    assert_eq!(matches, vec![captures(&[("f", root), ("v", second)])]);
}

#[test]
fn descendants_rule_reaches_every_level() {
    let tree = outline("a(b(c), d)");
    let root = tree.root().unwrap();

    let matches = match_at(&tree, root, &Pattern::node(".+").capture("n"));
    let bound: Vec<&str> = matches.iter().map(|c| tree.rule(c["n"])).collect();
    assert_eq!(bound, vec!["a", "b", "c", "d"]);
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn literal_resolution_strips_quotes_and_newlines() {
    let tree = outline("foo");
    let root = tree.root().unwrap();
    let empty = Captures::new();
    let ctx = ResolveContext::new(&tree, root, &empty);

    assert_eq!(resolve_argument(&ctx, "'hello'").unwrap(), "hello");
    assert_eq!(resolve_argument(&ctx, "\"two\nlines\"").unwrap(), "twolines");
    assert_eq!(resolve_argument(&ctx, "'a' + 'b'").unwrap(), "ab");
}

#[test]
fn graph_node_segment_resolves_mapped_capture() {
    let tree = outline(r#"class(identifier="Dog")"#);
    let root = tree.root().unwrap();
    let name = tree.child(root, 0).unwrap();

    let mut builder = GraphBuilder::new();
    builder.begin_file("zoo.py");
    builder
        .graph_mut()
        .claim_node("zoo.Dog", EntityKind::Class, None, None);
    builder.associate(name, "zoo.Dog");

    let bound = captures(&[("x", name)]);
    let ctx = ResolveContext::new(&tree, root, &bound).with_graph(&builder);
    assert_eq!(resolve_argument(&ctx, "@x.node.name").unwrap(), "zoo.Dog");
    assert_eq!(resolve_argument(&ctx, "@x.node").unwrap(), "zoo.Dog");
    assert_eq!(resolve_argument(&ctx, "@x").unwrap(), "Dog");
}

// ============================================================================
// Engine
// ============================================================================

#[test]
fn converters_run_in_traversal_order_and_share_builder() {
    let tree = outline(
        r#"module(class(identifier="A", block(def(identifier="f"))), class(identifier="B", argument_list(identifier="A")))"#,
    );
    let patterns = PatternSet::from_json_str(
        r#"{"patterns": [
            {"pattern": {"rule": "module"},
             "converters": [{"type": "node", "name": "'pkg'", "kind": "'package'"}]},
            {"pattern": {"rule": "class", "children": [{"rule": "identifier", "captures": ["name"]}]},
             "converters": [{"type": "node_with_parent", "name": "@parent + '.' + @name", "kind": "'class'"}]},
            {"pattern": {"rule": "class", "children": [
                {"rule": "identifier", "captures": ["name"]},
                {"rule": "argument_list", "children": [{"rule": "identifier", "captures": ["base"]}]}
             ]},
             "converters": [{"type": "connection", "from": "@self.node", "to": "'pkg.' + @base",
                             "edge": "inherits", "to_kind": "'class'"}]},
            {"pattern": {"rule": "def", "children": [{"rule": "identifier", "captures": ["name"]}]},
             "converters": [{"type": "node_with_parent", "name": "@parent + '.' + @name", "kind": "'function'"},
                            {"type": "validate_identifier", "identifier": "@name + '_missing'"}]}
        ]}"#,
    )
    .unwrap();

    let mut builder = GraphBuilder::new();
    builder.begin_file("pkg/__init__.py");
    let mut observer = RecordingObserver::default();
    QueryEngine::new(&patterns)
        .run_with_observer(&tree, &mut builder, &mut observer)
        .unwrap();

    let graph = builder.graph();
    assert_eq!(graph.parent_of("pkg.A.f").unwrap().id, "pkg.A");
    let supertypes: Vec<&str> = graph
        .supertypes_of("pkg.B")
        .iter()
        .map(|n| n.id.as_str())
        .collect();
    assert_eq!(supertypes, vec!["pkg.A"]);
    assert_eq!(graph.edges_by_type(EdgeType::Inherits).count(), 1);
    assert!(graph.iter_nodes().all(|n| !n.is_dangling()));

    assert_eq!(
        observer.events,
        vec![EngineEvent::IdentifierNotFound {
            identifier: "f_missing".to_string(),
            file: "pkg/__init__.py".to_string(),
        }]
    );
}

#[test]
fn forward_reference_is_claimed_later() {
    let tree = outline(r#"module(call(identifier="later"), def(identifier="later"))"#);
    let patterns = PatternSet::from_json_str(
        r#"[
            {"pattern": {"rule": "module"},
             "converters": [{"type": "node", "name": "'m'", "kind": "'package'"}]},
            {"pattern": {"rule": "call", "children": [{"rule": "identifier", "captures": ["callee"]}]},
             "converters": [{"type": "connection", "from": "@parent", "to": "'m.' + @callee",
                             "edge": "calls", "to_kind": "'function'"}]},
            {"pattern": {"rule": "def", "children": [{"rule": "identifier", "captures": ["name"]}]},
             "converters": [{"type": "node_with_parent", "name": "@parent + '.' + @name", "kind": "'function'"}]}
        ]"#,
    )
    .unwrap();

    let mut builder = GraphBuilder::new();
    builder.begin_file("m.py");
    QueryEngine::new(&patterns).run(&tree, &mut builder).unwrap();

    let later = builder.graph().get_node("m.later").unwrap();
    assert!(!later.is_dangling());
    assert_eq!(later.kind, EntityKind::Function);
    assert_eq!(later.file.as_deref(), Some("m.py"));
    assert_eq!(builder.graph().edges_by_type(EdgeType::Calls).count(), 1);
}

#[test]
fn parent_is_found_through_a_mapped_capture() {
    let tree = outline(r#"module(class(identifier="A", block(def(identifier="f"))))"#);
    let patterns = PatternSet::from_json_str(
        r#"[
            {"pattern": {"rule": "module"},
             "converters": [{"type": "node", "name": "'m'", "kind": "'package'"}]},
            {"pattern": {"rule": "class", "children": [
                {"rule": "identifier", "captures": ["name"]},
                {"rule": "block", "captures": ["body"]}
             ]},
             "converters": [{"type": "node_with_parent", "name": "@parent + '.' + @name",
                             "kind": "'class'", "syntax_node": "@body"}]},
            {"pattern": {"rule": "def", "children": [{"rule": "identifier", "captures": ["name"]}]},
             "converters": [{"type": "node_with_parent", "name": "@parent + '.' + @name", "kind": "'function'"}]}
        ]"#,
    )
    .unwrap();

    let mut builder = GraphBuilder::new();
    builder.begin_file("m.py");
    QueryEngine::new(&patterns).run(&tree, &mut builder).unwrap();

    let graph = builder.graph();
    let mut ids: Vec<&str> = graph.iter_nodes().map(|n| n.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["m", "m.A", "m.A.f"]);
    assert_eq!(graph.parent_of("m.A.f").unwrap().id, "m.A");
}

#[test]
fn per_file_graphs_merge_with_resolved_winning() {
    let patterns = PatternSet::from_json_str(
        r#"[
            {"pattern": {"rule": "call", "children": [{"rule": "identifier", "captures": ["callee"]}]},
             "converters": [{"type": "connection", "from": "'main'", "to": "@callee",
                             "edge": "calls", "to_kind": "'function'"}]},
            {"pattern": {"rule": "def", "children": [{"rule": "identifier", "captures": ["name"]}]},
             "converters": [{"type": "node", "name": "@name", "kind": "'function'"}]}
        ]"#,
    )
    .unwrap();
    let engine = QueryEngine::new(&patterns);

    let run = |source: &str, file: &str| {
        let tree = outline(source);
        let mut builder = GraphBuilder::new();
        builder.begin_file(file);
        engine.run(&tree, &mut builder).unwrap();
        builder.into_graph()
    };

    let mut merged = run(r#"def(identifier="helper")"#, "b.py");
    merged.merge(run(r#"module(call(identifier="helper"))"#, "a.py"));

    let helper = merged.get_node("helper").unwrap();
    assert!(!helper.is_dangling());
    assert_eq!(helper.file.as_deref(), Some("b.py"));
    assert!(merged.get_node("main").unwrap().is_dangling());
    assert_eq!(merged.edge_count(), 1);
}
