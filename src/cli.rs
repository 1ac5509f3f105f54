//! Command-line interface for faultline.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::adapter::{FactsAdapter, SyntaxAdapter};
use crate::config::{RunConfig, DEFAULT_CONFIG_FILES};
use crate::engine::{AnalysisInput, CancellationToken, ChangeSet, Engine};
use crate::facts::Severity;
use crate::logging;
use crate::report;
use crate::resolve::ConfigDocument;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Extensions handed to the syntax adapter.
const SOURCE_EXTENSIONS: &[&str] = &["java"];

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "build", "node_modules", "vendor", "out"];

/// Commented default run configuration written by `init`.
const DEFAULT_TEMPLATE: &str = include_str!("templates/default.yaml");

/// Resilience risk detection for service code.
///
/// Faultline finds calls without timeouts, retry storms, unobserved async
/// results, message consumers without dead-letter handling, and timing
/// invariants that cannot hold under the configured values.
#[derive(Parser)]
#[command(name = "faultline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a source tree for resilience risks
    #[command(visible_alias = "check")]
    Scan(ScanArgs),
    /// Write a default faultline.yaml
    Init(InitArgs),
}

/// Arguments for the scan command.
#[derive(Parser)]
pub struct ScanArgs {
    /// Path to scan (file or directory)
    pub path: PathBuf,

    /// Path to run configuration YAML (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pre-extracted facts JSON to analyze instead of parsing sources
    #[arg(long)]
    pub facts: Option<PathBuf>,

    /// Change set JSON (changed symbols and API changes)
    #[arg(long)]
    pub changes: Option<PathBuf>,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,

    /// Lowest severity that fails the run: low, medium, high, critical
    #[arg(long)]
    pub fail_on: Option<String>,

    /// SLA threshold in milliseconds for retry amplification
    #[arg(long)]
    pub sla_ms: Option<u64>,

    /// Maximum caller depth for blast radius
    #[arg(long)]
    pub depth: Option<usize>,

    /// Files analyzed concurrently
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "faultline.yaml")]
    pub output: PathBuf,
}

/// Source files and configuration documents found under a root.
#[derive(Debug, Default)]
pub struct Discovered {
    /// Paths relative to the root, sorted.
    pub sources: Vec<String>,
    pub config_documents: Vec<ConfigDocument>,
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Walk `root` collecting source files and configuration documents.
pub fn discover(root: &Path, config: &RunConfig) -> anyhow::Result<Discovered> {
    let mut found = Discovered::default();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref())
        })
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative(root, entry.path());
        let rel_path = Path::new(&rel);
        if config.is_path_excluded(rel_path) {
            debug!(path = rel.as_str(), "excluded");
            continue;
        }

        if config.is_config_document(rel_path) {
            match std::fs::read_to_string(entry.path()) {
                Ok(text) => found.config_documents.push(ConfigDocument::new(&rel, &text)),
                Err(e) => debug!(path = rel.as_str(), error = %e, "unreadable config document"),
            }
            continue;
        }

        let ext = rel_path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if SOURCE_EXTENSIONS.contains(&ext) {
            found.sources.push(rel);
        }
    }

    found.sources.sort();
    found.config_documents.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

/// Find a run configuration in `dir`.
fn discover_config(dir: &Path) -> Option<PathBuf> {
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Load the run configuration and apply command-line overrides.
pub fn load_config(args: &ScanArgs, root: &Path) -> anyhow::Result<RunConfig> {
    let path = args.config.clone().or_else(|| discover_config(root));
    let mut config = match &path {
        Some(p) => {
            debug!(path = %p.display(), "loading run configuration");
            RunConfig::parse_file(p)?
        }
        None => RunConfig::default(),
    };

    if let Some(sla) = args.sla_ms {
        config.sla_threshold_ms = sla;
    }
    if let Some(depth) = args.depth {
        config.blast_radius_depth = depth;
    }
    if let Some(jobs) = args.jobs {
        config.concurrency_limit = jobs;
    }
    if let Some(level) = &args.fail_on {
        config.fail_on = level.parse::<Severity>().map_err(anyhow::Error::msg)?;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "tree-sitter")]
fn source_adapter(root: &Path) -> anyhow::Result<Arc<dyn SyntaxAdapter>> {
    Ok(Arc::new(crate::adapter::JavaAdapter::new(root)?))
}

#[cfg(not(feature = "tree-sitter"))]
fn source_adapter(_root: &Path) -> anyhow::Result<Arc<dyn SyntaxAdapter>> {
    anyhow::bail!("built without the tree-sitter feature; pass --facts to analyze extracted facts")
}

/// Run the scan command.
pub fn run_scan(args: &ScanArgs) -> anyhow::Result<i32> {
    if args.format != "pretty" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let abs_path = match args.path.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: cannot access path {:?}: {}", args.path, e);
            return Ok(EXIT_ERROR);
        }
    };
    let (root, single_file) = if abs_path.is_dir() {
        (abs_path.clone(), None)
    } else {
        let parent = abs_path.parent().unwrap_or(Path::new("/")).to_path_buf();
        let name = relative(&parent, &abs_path);
        (parent, Some(name))
    };

    let config = match load_config(args, &root) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: invalid run configuration: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let discovered = discover(&root, &config)?;
    let changes = match &args.changes {
        Some(p) => ChangeSet::from_file(p)?,
        None => ChangeSet::default(),
    };

    let (adapter, files): (Arc<dyn SyntaxAdapter>, Vec<String>) = match &args.facts {
        Some(p) => {
            let facts = FactsAdapter::from_file(p)?;
            let files = facts
                .paths()
                .into_iter()
                .filter(|f| !config.is_path_excluded(Path::new(f)))
                .collect();
            (Arc::new(facts), files)
        }
        None => {
            let files = match single_file {
                Some(name) => vec![name],
                None => discovered.sources,
            };
            (source_adapter(&root)?, files)
        }
    };

    if files.is_empty() {
        eprintln!("Warning: no files to scan");
        return Ok(EXIT_SUCCESS);
    }
    info!(
        files = files.len(),
        config_documents = discovered.config_documents.len(),
        "discovered inputs"
    );

    let fail_on = config.fail_on;
    let engine = Engine::new(adapter, config);
    let input = AnalysisInput {
        files,
        config_documents: discovered.config_documents,
        changes,
    };
    let analysis = match engine.run(&input, &CancellationToken::new()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let path_str = args.path.to_string_lossy().to_string();
    match args.format.as_str() {
        "json" => report::write_json(&analysis)?,
        _ => report::write_pretty(&path_str, &analysis, fail_on),
    }

    if analysis.count_at_or_above(fail_on) > 0 {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if args.output.exists() {
        eprintln!("Error: file already exists: {}", args.output.display());
        eprintln!("Remove it or use --output to specify a different path");
        return Ok(EXIT_ERROR);
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() && parent != Path::new(".") {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Error: failed to create directory: {}", e);
                return Ok(EXIT_ERROR);
            }
        }
    }

    if let Err(e) = std::fs::write(&args.output, DEFAULT_TEMPLATE) {
        eprintln!("Error: failed to write configuration: {}", e);
        return Ok(EXIT_ERROR);
    }

    println!("Created {}", args.output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to match your SLAs", args.output.display());
    println!("  2. Run: faultline scan . --config {}", args.output.display());

    Ok(EXIT_SUCCESS)
}

/// Parse arguments, set up logging and dispatch.
pub fn run(cli: Cli) -> i32 {
    logging::init_logger(cli.verbose, cli.quiet, cli.no_color);
    if !logging::colors_enabled(cli.no_color) {
        colored::control::set_override(false);
    }

    let result = match &cli.command {
        Commands::Scan(args) => run_scan(args),
        Commands::Init(args) => run_init(args),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    }
}
