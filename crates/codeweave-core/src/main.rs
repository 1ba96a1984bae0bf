//! Codeweave CLI - run declarative syntax-tree queries over source files
//!
//! Commands:
//! - `run` - Build a code graph from files or directories
//! - `check` - Validate pattern documents and show what they contain
//! - `tree` - Dump a file's syntax tree with subtree statistics

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use walkdir::WalkDir;

use codeweave_config::{CodeweaveConfig, ConfigLoader, ConfigOverrides, LogFormat};
use codeweave_core::processor::SubtreeStatsTransform;
use codeweave_core::{
    process_bottom_up, CodeGraph, CodeParser, ExecutionStats, GraphBuilder, NodeId, PatternSet,
    QueryEngine, SupportedLanguage, SyntaxTree,
};

/// Codeweave - declarative syntax-tree queries that build code graphs
#[derive(Parser)]
#[command(name = "codeweave")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Workspace root used to find `.codeweave/config.toml`
    #[arg(short, long, global = true, default_value = ".", env = "CODEWEAVE_WORKSPACE")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a code graph from source files
    Run {
        /// Files or directories to process
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Pattern documents (.json or .toml), replacing the configured ones
        #[arg(short, long = "patterns")]
        patterns: Vec<PathBuf>,

        /// Parse every file as this language
        #[arg(short, long)]
        language: Option<String>,

        /// Worker threads (0 = one per CPU)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Print the graph document as JSON
        #[arg(long)]
        json: bool,

        /// Write the graph document to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load pattern documents and report their contents
    Check {
        /// Pattern documents, replacing the configured ones
        patterns: Vec<PathBuf>,
    },

    /// Dump the syntax tree of a source file
    Tree {
        /// Source file to parse
        file: PathBuf,

        /// Parse as this language instead of detecting it
        #[arg(short, long)]
        language: Option<String>,

        /// Print the compact outline notation instead of the indented view
        #[arg(long)]
        outline: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            log_level: self.verbose.then(|| "debug".to_string()),
            ..Default::default()
        };

        match &self.command {
            Commands::Run {
                patterns,
                language,
                jobs,
                ..
            } => {
                if !patterns.is_empty() {
                    overrides.pattern_paths = Some(patterns.clone());
                }
                overrides.language = language.clone();
                overrides.parallelism = *jobs;
            }
            Commands::Check { patterns } => {
                if !patterns.is_empty() {
                    overrides.pattern_paths = Some(patterns.clone());
                }
            }
            Commands::Tree { language, .. } => {
                overrides.language = language.clone();
            }
        }
        overrides
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("Cannot determine current directory")?;
    let overrides = cli.overrides().anchor_pattern_paths(&cwd);
    let mut loader = ConfigLoader::new();
    let config = loader
        .load(&cli.workspace, Some(&overrides))
        .context("Failed to load configuration")?;

    init_logging(&config)?;
    debug!("Effective configuration: {:?}", config);

    match cli.command {
        Commands::Run {
            paths,
            json,
            output,
            ..
        } => cmd_run(&config, &cli.workspace, &paths, json, output),
        Commands::Check { .. } => cmd_check(&config, &cli.workspace),
        Commands::Tree { file, outline, .. } => cmd_tree(&config, &file, outline),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(config: &CodeweaveConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

// ============================================================================
// run
// ============================================================================

/// Build a code graph from source files
fn cmd_run(
    config: &CodeweaveConfig,
    workspace: &Path,
    paths: &[PathBuf],
    json_output: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let start = Instant::now();

    let patterns = load_patterns(config, workspace)?;
    let language = forced_language(config)?;
    let files = collect_files(paths, language, config.processing.max_file_size_kb * 1024)?;
    info!(
        "Processing {} files with {} patterns",
        files.len(),
        patterns.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.processing.parallelism)
        .build()
        .context("Failed to create worker pool")?;

    let engine = QueryEngine::new(&patterns);
    let results: Vec<(PathBuf, Result<(CodeGraph, ExecutionStats)>)> = pool.install(|| {
        files
            .par_iter()
            .map(|file| (file.clone(), process_file(engine, file, language)))
            .collect()
    });

    let mut graph = CodeGraph::new();
    let mut stats = ExecutionStats::default();
    let mut failed = 0usize;
    for (file, result) in results {
        match result {
            Ok((file_graph, file_stats)) => {
                graph.merge(file_graph);
                stats.absorb(&file_stats);
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", file.display(), e);
                failed += 1;
            }
        }
    }

    let document = graph.to_document();
    if let Some(ref output) = output {
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write graph to {}", output.display()))?;
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    let elapsed = start.elapsed();
    let dangling = graph.iter_nodes().filter(|n| n.is_dangling()).count();

    println!("\nRun complete!");
    if let Some(output) = output {
        println!("  Output: {:?}", output);
    }
    println!("  Files: {} ({} failed)", files.len(), failed);
    println!("  Matches: {}", stats.matches);
    println!(
        "  Converters: {} executed, {} skipped",
        stats.converters_executed, stats.converters_skipped
    );
    println!("  Nodes: {} ({} dangling)", graph.node_count(), dangling);
    println!("  Edges: {}", graph.edge_count());
    println!("  Time: {:.2}s", elapsed.as_secs_f64());

    print_breakdown("Node kinds", graph.iter_nodes().map(|n| n.kind.to_string()));
    print_breakdown(
        "Edge types",
        graph.iter_edges().map(|e| e.edge_type.to_string()),
    );

    Ok(())
}

/// Parse one file and run the engine into a fresh per-file graph.
fn process_file(
    engine: QueryEngine<'_>,
    path: &Path,
    language: Option<SupportedLanguage>,
) -> Result<(CodeGraph, ExecutionStats)> {
    let mut parser = match language {
        Some(language) => CodeParser::new(language)?,
        None => CodeParser::for_path(path)?,
    };
    let tree = parser
        .parse_file(path)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let mut builder = GraphBuilder::new();
    builder.begin_file(path.display().to_string());
    let stats = engine.run(&tree, &mut builder)?;
    Ok((builder.into_graph(), stats))
}

fn load_patterns(config: &CodeweaveConfig, workspace: &Path) -> Result<PatternSet> {
    let paths = config.pattern_paths(workspace);
    if paths.is_empty() {
        anyhow::bail!(
            "No pattern documents configured. Pass --patterns or set [patterns] paths in {:?}",
            ConfigLoader::new().local_config_path(workspace)
        );
    }
    PatternSet::from_paths(&paths).context("Failed to load pattern documents")
}

fn forced_language(config: &CodeweaveConfig) -> Result<Option<SupportedLanguage>> {
    config
        .processing
        .language
        .as_deref()
        .map(|name| {
            SupportedLanguage::from_name(name).ok_or_else(|| anyhow!("Unsupported language: {}", name))
        })
        .transpose()
}

/// Expand directories into the source files below them, sorted.
///
/// Files named explicitly are always kept; files found by walking must have
/// a supported extension (or the forced language's) and fit the size limit.
fn collect_files(
    paths: &[PathBuf],
    language: Option<SupportedLanguage>,
    max_bytes: u64,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            anyhow::bail!("Path not found: {:?}", path);
        }

        for entry in WalkDir::new(path).into_iter().filter_entry(|e| {
            // Always descend into the root, even when it is hidden
            e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
        }) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking directory: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let detected = SupportedLanguage::from_path(entry.path());
            let wanted = match language {
                Some(language) => detected == Some(language),
                None => detected.is_some(),
            };
            if !wanted {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > max_bytes {
                debug!("Skipping {:?}: {} bytes exceeds limit", entry.path(), size);
                continue;
            }
            files.push(entry.into_path());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn print_breakdown(title: &str, labels: impl Iterator<Item = String>) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    if counts.is_empty() {
        return;
    }

    println!("\n{}", title);
    for (label, count) in counts {
        println!("  {:<10} {}", label, count);
    }
}

// ============================================================================
// check
// ============================================================================

/// Load pattern documents and report their contents
fn cmd_check(config: &CodeweaveConfig, workspace: &Path) -> Result<()> {
    let paths = config.pattern_paths(workspace);
    if paths.is_empty() {
        anyhow::bail!("No pattern documents given");
    }

    let mut total = 0;
    for path in &paths {
        let set = PatternSet::from_path(path)
            .with_context(|| format!("Invalid pattern document {}", path.display()))?;
        println!("{}: {} patterns", path.display(), set.len());
        for (i, entry) in set.entries().iter().enumerate() {
            println!(
                "  [{}] {}  ({} predicates, {} converters)",
                i,
                entry.pattern,
                entry.predicates.len(),
                entry.converters.len()
            );
        }
        total += set.len();
    }

    println!("\nAll documents valid: {} patterns", total);
    Ok(())
}

// ============================================================================
// tree
// ============================================================================

/// Dump the syntax tree of a source file
fn cmd_tree(config: &CodeweaveConfig, file: &Path, outline: bool) -> Result<()> {
    let mut parser = match forced_language(config)? {
        Some(language) => CodeParser::new(language)?,
        None => CodeParser::for_path(file)?,
    };
    let tree = parser
        .parse_file(file)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    let root = tree.root().ok_or_else(|| anyhow!("Empty syntax tree"))?;

    if outline {
        println!("{}", tree.to_outline(root));
        return Ok(());
    }

    let mut transform = SubtreeStatsTransform::new();
    let summary = process_bottom_up(&tree, &mut transform).context("Failed to compute subtree stats")?;

    print_node(&tree, root, 0, &transform);
    println!(
        "\n{} nodes, height {}, {} leaves",
        summary.size, summary.height, summary.leaves
    );
    Ok(())
}

fn print_node(tree: &SyntaxTree, id: NodeId, depth: usize, stats: &SubtreeStatsTransform) {
    let node = tree.node(id);
    let span = node.span();
    let indent = "  ".repeat(depth);

    if node.children().is_empty() {
        println!(
            "{}{} {:?} [{}:{}]",
            indent,
            if node.rule().is_empty() { "_" } else { node.rule() },
            node.text(),
            span.line,
            span.column
        );
    } else {
        let size = stats.per_node().get(&id).map(|s| s.size).unwrap_or(0);
        println!(
            "{}{} [{}:{}] size={}",
            indent,
            node.rule(),
            span.line,
            span.column,
            size
        );
    }

    for &child in node.children() {
        print_node(tree, child, depth + 1, stats);
    }
}
