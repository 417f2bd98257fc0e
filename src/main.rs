use anyhow::{bail, Context};
use clap::Parser;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vaultlens::{Document, DocumentSet, EngineConfig, InvalidateScope, RawConfig, WidgetEngine};
use walkdir::WalkDir;

const DEFINITION_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];
const DOCUMENT_EXTENSIONS: &[&str] = &["md"];

/// Compute declarative widgets over a directory of documents
#[derive(Parser, Debug)]
#[command(name = "vaultlens")]
#[command(about = "Compute declarative widgets over a document collection", long_about = None)]
struct Args {
    /// Definition file, or a directory of .yaml/.yml/.json definitions
    #[arg(long)]
    definitions: PathBuf,

    /// Directory whose Markdown files (searched recursively) are the documents
    #[arg(long)]
    documents: PathBuf,

    /// Collection id used for cache keys (defaults to the directory name)
    #[arg(long)]
    vault: Option<String>,

    /// Directory for the persistent cache; omitted keeps results in memory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Document id similarity widgets are computed for
    #[arg(long)]
    target: Option<String>,

    /// Only compute the named widget
    #[arg(long)]
    widget: Option<String>,

    /// Clear the collection's cache before computing
    #[arg(long)]
    invalidate: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting vaultlens v{}", env!("CARGO_PKG_VERSION"));

    let vault = match &args.vault {
        Some(vault) => vault.clone(),
        None => args
            .documents
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "default".to_string()),
    };

    let mut config = EngineConfig::default();
    if let Some(dir) = &args.cache_dir {
        config = config.with_cache_dir(dir);
    }
    let engine = WidgetEngine::new(config);

    let raw = read_definitions(&args.definitions)?;
    let outcome = engine.load_definitions(&raw);
    for error in &outcome.errors {
        eprintln!("{}", error);
    }
    info!(
        "Loaded {} definition(s), {} rejected",
        outcome.definitions.len(),
        outcome.errors.len()
    );

    let documents = read_documents(&args.documents)?;
    info!("Read {} document(s) from {:?}", documents.len(), args.documents);

    if args.invalidate {
        let removed = engine.invalidate(&InvalidateScope::Vault(vault.clone()));
        println!("{}", json!({ "invalidated": removed }));
    }

    let mut set = DocumentSet::new(vault, documents);
    set.target = args.target.clone();

    let mut failed = 0usize;
    for definition in &outcome.definitions {
        if args.widget.as_deref().is_some_and(|w| w != definition.name()) {
            continue;
        }
        match engine.compute(definition, &set) {
            Ok(result) => println!("{}", serde_json::to_string(&result)?),
            Err(e) => {
                failed += 1;
                warn!("Widget '{}' failed: {}", definition.name(), e);
                println!("{}", json!({ "widget": definition.name(), "error": e.to_string() }));
            }
        }
    }

    if let Some(widget) = &args.widget {
        if outcome.get(widget).is_none() {
            bail!("no definition named '{}'", widget);
        }
    }

    engine.close();
    info!("Shutting down...");

    if failed > 0 || !outcome.errors.is_empty() {
        bail!(
            "{} widget(s) failed, {} definition(s) rejected",
            failed,
            outcome.errors.len()
        );
    }
    Ok(())
}

/// One file, or every definition file directly inside a directory
fn read_definitions(path: &Path) -> anyhow::Result<Vec<RawConfig>> {
    if path.is_file() {
        let raw = RawConfig::from_file(path).with_context(|| format!("reading {}", path.display()))?;
        return Ok(vec![raw]);
    }
    if !path.is_dir() {
        bail!("definitions path {} does not exist", path.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), DEFINITION_EXTENSIONS))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    files
        .iter()
        .map(|f| RawConfig::from_file(f).with_context(|| format!("reading {}", f.display())))
        .collect()
}

/// Every Markdown file under `root`, with ids relative to it using `/` separators
fn read_documents(root: &Path) -> anyhow::Result<Vec<Document>> {
    if !root.is_dir() {
        bail!("documents directory {} does not exist", root.display());
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !has_extension(path, DOCUMENT_EXTENSIONS) {
            continue;
        }
        let id = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match std::fs::read_to_string(path) {
            Ok(source) => documents.push(Document::new(id, source)),
            Err(e) => warn!("Skipping unreadable file {:?}: {}", path, e),
        }
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(documents)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e))
}
