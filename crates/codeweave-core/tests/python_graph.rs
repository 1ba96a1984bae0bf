//! End-to-end: Python source through tree-sitter into a code graph.

use std::fs;

use codeweave_core::engine::RecordingObserver;
use codeweave_core::pattern::PatternEntrySpec;
use codeweave_core::{
    CodeParser, ConfigurationError, EdgeType, EntityKind, GraphBuilder, GraphDocument, NodeStatus,
    PatternSet, QueryEngine, SupportedLanguage,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const SOURCE: &str = "import os


class Animal:
    def speak(self):
        return helper()


class Dog(Animal):
    def bark(self):
        pass


def helper():
    return os.getcwd()
";

const PATTERNS_JSON: &str = r#"[
  {
    "pattern": {"rule": "module"},
    "converters": [{"type": "node", "name": "'zoo'", "kind": "'package'"}]
  },
  {
    "pattern": {
      "rule": "class_definition",
      "children": [{"rule": "identifier", "captures": ["name"]}]
    },
    "converters": [
      {"type": "node_with_parent", "name": "@parent + '.' + @name", "kind": "'class'"}
    ]
  },
  {
    "pattern": {
      "rule": "class_definition",
      "children": [
        {"rule": "identifier", "captures": ["name"]},
        {"rule": "argument_list", "children": [{"rule": "identifier", "captures": ["base"]}]}
      ]
    },
    "converters": [
      {"type": "connection", "from": "@self.node", "to": "@base",
       "edge": "inherits", "to_kind": "'class'"}
    ]
  },
  {
    "pattern": {
      "rule": "function_definition",
      "children": [{"rule": "identifier", "captures": ["name"]}]
    },
    "predicates": [{"type": "not_full_match", "value": "@name", "regex": "__\\w+__"}],
    "converters": [
      {"type": "node_with_parent", "name": "@parent + '.' + @name", "kind": "'function'"}
    ]
  },
  {
    "pattern": {"rule": "call", "children": [{"rule": "identifier", "captures": ["callee"]}]},
    "converters": [
      {"type": "connection", "from": "@parent", "to": "@callee", "edge": "calls"}
    ]
  },
  {
    "pattern": {"rule": "import_statement", "children": [{"rule": "dotted_name", "captures": ["module"]}]},
    "converters": [{"type": "import", "fields": {"module": "@module"}}]
  }
]"#;

fn write_patterns(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn build(patterns: &PatternSet, source: &str) -> GraphBuilder {
    let mut parser = CodeParser::new(SupportedLanguage::Python).unwrap();
    let tree = parser.parse(source).unwrap();
    let mut builder = GraphBuilder::new();
    builder.begin_file("zoo.py");
    let mut observer = RecordingObserver::default();
    QueryEngine::new(patterns)
        .run_with_observer(&tree, &mut builder, &mut observer)
        .unwrap();
    assert!(observer.events.is_empty(), "{:?}", observer.events);
    builder
}

#[test]
fn test_python_module_graph() {
    let dir = TempDir::new().unwrap();
    let path = write_patterns(&dir, "python.json", PATTERNS_JSON);
    let patterns = PatternSet::from_path(&path).unwrap();
    assert_eq!(patterns.len(), 6);

    let builder = build(&patterns, SOURCE);
    let graph = builder.graph();

    let mut resolved: Vec<&str> = graph
        .iter_nodes()
        .filter(|n| n.status == NodeStatus::Resolved)
        .map(|n| n.id.as_str())
        .collect();
    resolved.sort();
    assert_eq!(
        resolved,
        vec![
            "zoo",
            "zoo.Animal",
            "zoo.Animal.speak",
            "zoo.Dog",
            "zoo.Dog.bark",
            "zoo.helper",
        ]
    );

    let bark = graph.get_node("zoo.Dog.bark").unwrap();
    assert_eq!(bark.kind, EntityKind::Function);
    assert_eq!(bark.file.as_deref(), Some("zoo.py"));
    assert_eq!(bark.span.unwrap().line, 10);
    assert_eq!(graph.parent_of("zoo.Dog.bark").unwrap().id, "zoo.Dog");

    // Base class and callee are referenced by bare name and stay dangling
    let animal = graph.get_node("Animal").unwrap();
    assert!(animal.is_dangling());
    assert_eq!(animal.kind, EntityKind::Class);
    assert_eq!(animal.context.as_deref(), Some("zoo"));
    let helper = graph.get_node("helper").unwrap();
    assert_eq!(helper.kind, EntityKind::Object);
    assert_eq!(helper.context.as_deref(), Some("zoo.Animal.speak"));

    assert_eq!(graph.edges_by_type(EdgeType::Defines).count(), 5);
    assert_eq!(graph.edges_by_type(EdgeType::Inherits).count(), 1);
    let calls: Vec<(String, String)> = graph
        .edges_by_type(EdgeType::Calls)
        .map(|(from, to, _)| (from.id.clone(), to.id.clone()))
        .collect();
    // `os.getcwd()` calls through an attribute and is not matched
    assert_eq!(
        calls,
        vec![("zoo.Animal.speak".to_string(), "helper".to_string())]
    );

    let imports: Vec<&str> = builder
        .file_imports()
        .iter()
        .map(|i| i.data["module"].as_str())
        .collect();
    assert_eq!(imports, vec!["os"]);
}

#[test]
fn test_dunder_methods_are_filtered() {
    let patterns = PatternSet::from_json_str(PATTERNS_JSON).unwrap();
    let builder = build(
        &patterns,
        "class Point:\n    def __init__(self):\n        pass\n\n    def norm(self):\n        pass\n",
    );

    let graph = builder.graph();
    assert!(graph.contains_node("zoo.Point.norm"));
    assert!(!graph.contains_node("zoo.Point.__init__"));
}

#[test]
fn test_document_serialization() {
    let patterns = PatternSet::from_json_str(PATTERNS_JSON).unwrap();
    let builder = build(&patterns, "def main():\n    pass\n");
    let document = builder.graph().to_document();

    let json = serde_json::to_string(&document).unwrap();
    let parsed: GraphDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, document);

    let ids: Vec<&str> = document.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["zoo", "zoo.main"]);
    assert!(json.contains("\"DEFINES\""));
}

#[test]
fn test_toml_document() {
    let dir = TempDir::new().unwrap();
    let path = write_patterns(
        &dir,
        "functions.toml",
        r#"
[[patterns]]
pattern = { rule = "function_definition", children = [{ rule = "identifier", captures = ["name"] }] }

[[patterns.converters]]
type = "node"
name = "@name"
kind = "'function'"

[[patterns.converters]]
type = "validate_identifier"
identifier = "'os'"
"#,
    );
    let patterns = PatternSet::from_path(&path).unwrap();

    let mut parser = CodeParser::new(SupportedLanguage::Python).unwrap();
    let tree = parser.parse("def a():\n    pass\n\ndef b():\n    pass\n").unwrap();
    let mut builder = GraphBuilder::new();
    builder.begin_file("ab.py");
    let mut observer = RecordingObserver::default();
    let stats = QueryEngine::new(&patterns)
        .run_with_observer(&tree, &mut builder, &mut observer)
        .unwrap();

    assert_eq!(stats.matches, 2);
    assert_eq!(stats.nodes_added, 2);
    assert!(builder.graph().contains_node("a"));
    assert!(builder.graph().contains_node("b"));
    // `os` is neither a node nor an import here
    assert_eq!(observer.events.len(), 2);
}

#[test]
fn test_yaml_entries() {
    let yaml = r#"
- pattern:
    rule: class_definition
    children:
      - rule: identifier
        captures: [name]
  predicates:
    - type: not
      predicate:
        type: ends_with
        value: "@name"
        suffix: "'Mixin'"
  converters:
    - type: node
      name: "@name"
      kind: "'class'"
"#;
    let specs: Vec<PatternEntrySpec> = serde_yaml::from_str(yaml).unwrap();
    let patterns = PatternSet::from_specs(specs).unwrap();

    let mut parser = CodeParser::new(SupportedLanguage::Python).unwrap();
    let tree = parser
        .parse("class LogMixin:\n    pass\n\nclass Service(LogMixin):\n    pass\n")
        .unwrap();
    let mut builder = GraphBuilder::new();
    builder.begin_file("svc.py");
    QueryEngine::new(&patterns).run(&tree, &mut builder).unwrap();

    let ids: Vec<&str> = builder.graph().iter_nodes().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["Service"]);
}

#[test]
fn test_malformed_documents_fail_at_load() {
    let dir = TempDir::new().unwrap();

    let bad_regex = write_patterns(
        &dir,
        "regex.json",
        r#"[{"pattern": {"rule": "x"}, "predicates": [{"type": "full_match", "value": "@x", "regex": "("}]}]"#,
    );
    assert!(matches!(
        PatternSet::from_path(&bad_regex),
        Err(ConfigurationError::InvalidEntry { entry: 0, .. })
    ));

    let bad_edge = write_patterns(
        &dir,
        "edge.json",
        r#"[{"pattern": {"rule": "x"}}, {"pattern": {"rule": "y"}, "converters": [{"type": "connection", "from": "@y", "to": "'z'", "edge": "likes"}]}]"#,
    );
    assert!(matches!(
        PatternSet::from_path(&bad_edge),
        Err(ConfigurationError::InvalidEntry { entry: 1, .. })
    ));

    let unknown_kind = write_patterns(
        &dir,
        "kind.json",
        r#"[{"pattern": {"rule": "x"}, "predicates": [{"type": "sounds_like", "value": "@x"}]}]"#,
    );
    assert!(matches!(
        PatternSet::from_path(&unknown_kind),
        Err(ConfigurationError::Json(_))
    ));

    // Misspelled or conflicting keys are rejected rather than ignored
    for (name, content) in [
        ("optional.json", r#"[{"pattern": {"rule": "x", "optinal": true}}]"#),
        ("children.json", r#"[{"pattern": {"rule": "x", "childern": [{"rule": "y"}]}}]"#),
        ("mixed.json", r#"[{"pattern": {"rule": "x", "alternatives": [{"rule": "y"}]}}]"#),
        ("entry.json", r#"[{"pattern": {"rule": "x"}, "converter": []}]"#),
        (
            "predicate.json",
            r#"[{"pattern": {"rule": "x"}, "predicates": [{"type": "exists", "capture": "@x", "negate": true}]}]"#,
        ),
        (
            "converter.json",
            r#"[{"pattern": {"rule": "x"}, "converters": [{"type": "node", "name": "@x", "kind": "'class'", "syntaxnode": "@x"}]}]"#,
        ),
    ] {
        let path = write_patterns(&dir, name, content);
        assert!(
            matches!(PatternSet::from_path(&path), Err(ConfigurationError::Json(_))),
            "{}",
            name
        );
    }

    let yaml = write_patterns(&dir, "patterns.yaml", "[]");
    assert!(matches!(
        PatternSet::from_path(&yaml),
        Err(ConfigurationError::UnsupportedFormat(_))
    ));

    assert!(matches!(
        PatternSet::from_path(&dir.path().join("missing.json")),
        Err(ConfigurationError::ReadFile { .. })
    ));
}
