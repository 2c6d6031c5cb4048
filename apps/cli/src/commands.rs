//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use learnbits_core::{HttpFetcher, IngestReport, Pipeline, SourceDocument};
use learnbits_shared::{
    AnalysisScope, AppConfig, BitFilter, Category, LearningBit, Pattern, PatternFilter,
    init_config, load_config,
};
use learnbits_storage::PatternStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LearnBits: turn documentation into classified, deduplicated learning bits.
#[derive(Parser)]
#[command(
    name = "learnbits",
    version,
    about = "Extract classified learning bits from documents and mine them for patterns.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest one document.
    Ingest {
        /// Source URL the content is attributed to.
        #[arg(long)]
        url: String,

        /// Read content from this file (`-` for stdin) instead of fetching the URL.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Ingest every `url<TAB>path` line of a manifest file.
    IngestBatch {
        /// Manifest path. Relative document paths resolve against its directory.
        manifest: PathBuf,
    },

    /// List stored learning bits.
    Query {
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        source_url: Option<String>,

        #[arg(long)]
        limit: Option<u32>,

        /// Print JSON instead of a summary table.
        #[arg(long)]
        json: bool,
    },

    /// Recompute patterns for a scope.
    Analyze {
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,

        #[arg(long)]
        source_url: Option<String>,
    },

    /// List stored patterns.
    Patterns {
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        min_strength: Option<f64>,

        /// Print JSON instead of a summary table.
        #[arg(long)]
        json: bool,
    },

    /// Show the crawl history of a source URL.
    Crawls {
        source_url: String,
    },

    /// Delete every bit ingested from a source URL.
    Purge {
        source_url: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_category(s: &str) -> std::result::Result<Category, String> {
    s.parse::<Category>().map_err(|_| {
        let names: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
        format!("expected one of: {}", names.join(", "))
    })
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "learnbits=info",
        1 => "learnbits=debug",
        _ => "learnbits=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `--json` output stays parseable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest { url, file } => cmd_ingest(&url, file.as_deref()).await,
        Command::IngestBatch { manifest } => cmd_ingest_batch(&manifest).await,
        Command::Query {
            category,
            tag,
            source_url,
            limit,
            json,
        } => {
            let filter = BitFilter {
                category,
                tag,
                source_url,
                limit,
            };
            cmd_query(&filter, json).await
        }
        Command::Analyze {
            category,
            source_url,
        } => cmd_analyze(&AnalysisScope {
            category,
            source_url,
        })
        .await,
        Command::Patterns {
            category,
            tag,
            min_strength,
            json,
        } => {
            let filter = PatternFilter {
                category,
                tag,
                min_strength,
                scope_key: None,
            };
            cmd_patterns(&filter, json).await
        }
        Command::Crawls { source_url } => cmd_crawls(&source_url).await,
        Command::Purge { source_url } => cmd_purge(&source_url).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_pipeline(config: &AppConfig) -> Result<Pipeline> {
    let db_path = config.storage.resolved_db_path()?;
    let store = PatternStore::open(&db_path).await?;
    Ok(Pipeline::new(Arc::new(store), config)?)
}

async fn open_readonly(config: &AppConfig) -> Result<PatternStore> {
    let db_path = config.storage.resolved_db_path()?;
    Ok(PatternStore::open_readonly(&db_path).await?)
}

/// Token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current chunk");
            token.cancel();
        }
    });
    cancel
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

fn print_report(report: &IngestReport) {
    println!(
        "  {}  seq {}  extracted {}  new {}  {}",
        report.source_url,
        report.crawl_sequence,
        report.bits_extracted,
        report.bits_new,
        report.title
    );
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

async fn cmd_ingest(url: &str, file: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let pipeline = open_pipeline(&config).await?;
    let cancel = cancel_on_ctrl_c();

    let report = match file {
        Some(path) => {
            let content = read_source(path).await?;
            info!(url, path = %path.display(), "ingesting local document");
            pipeline.ingest(url, &content, &cancel).await?
        }
        None => {
            let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
            let fetcher = HttpFetcher::new(config.ingest.fetch_timeout_secs)?;
            info!(url, "fetching document");
            pipeline.ingest_url(&parsed, &fetcher, &cancel).await?
        }
    };

    println!();
    print_report(&report);
    println!();
    Ok(())
}

async fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        tokio::io::stdin()
            .read_to_string(&mut content)
            .await
            .wrap_err("failed to read stdin")?;
        return Ok(content);
    }
    tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("failed to read {}", path.display()))
}

/// One `url<TAB>path` manifest entry.
#[derive(Debug, PartialEq, Eq)]
struct ManifestEntry {
    url: String,
    path: PathBuf,
}

/// Parse a manifest. Blank lines and `#` comments are skipped.
fn parse_manifest(text: &str, base_dir: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((url, path)) = line.split_once('\t') else {
            return Err(eyre!("manifest line {}: expected `url<TAB>path`", lineno + 1));
        };
        let path = PathBuf::from(path.trim());
        entries.push(ManifestEntry {
            url: url.trim().to_string(),
            path: if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            },
        });
    }
    Ok(entries)
}

async fn cmd_ingest_batch(manifest: &Path) -> Result<()> {
    let config = load_config()?;
    let text = tokio::fs::read_to_string(manifest)
        .await
        .wrap_err_with(|| format!("failed to read manifest {}", manifest.display()))?;
    let base_dir = manifest.parent().unwrap_or_else(|| Path::new("."));
    let entries = parse_manifest(&text, base_dir)?;

    let mut docs = Vec::with_capacity(entries.len());
    for entry in entries {
        let content = tokio::fs::read_to_string(&entry.path)
            .await
            .wrap_err_with(|| format!("failed to read {}", entry.path.display()))?;
        docs.push(SourceDocument::new(entry.url, content));
    }

    let pipeline = open_pipeline(&config).await?;
    let cancel = cancel_on_ctrl_c();
    let total = docs.len();
    let urls: Vec<String> = docs.iter().map(|d| d.source_url.clone()).collect();

    let progress = spinner(format!(
        "Ingesting {total} documents ({} workers)",
        config.ingest.concurrency
    ));
    let results = pipeline.ingest_batch(docs, &cancel).await;
    progress.finish_and_clear();

    let mut failed = 0;
    println!();
    for (url, result) in urls.iter().zip(&results) {
        match result {
            Ok(report) => print_report(report),
            Err(e) => {
                failed += 1;
                println!("  {url}  FAILED: {e}");
            }
        }
    }
    println!();
    println!("  {} of {total} documents ingested", total - failed);
    println!();

    if failed > 0 {
        return Err(eyre!("{failed} document(s) failed"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn preview(content: &str) -> String {
    let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut out: String = first.chars().take(72).collect();
    if first.chars().count() > 72 {
        out.push('…');
    }
    out
}

async fn cmd_query(filter: &BitFilter, json: bool) -> Result<()> {
    let config = load_config()?;
    let store = open_readonly(&config).await?;
    let bits: Vec<LearningBit> = store.query(filter).await?.collect_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&bits)?);
        return Ok(());
    }

    for bit in &bits {
        println!(
            "{:<32} imp {:.2}  conf {:.2}  {}#{}",
            format!("{}/{}", bit.category, bit.subcategory),
            bit.importance_score,
            bit.confidence_score,
            bit.source_url,
            bit.chunk_index
        );
        println!("    {}", preview(&bit.content));
    }
    println!("{} bit(s)", bits.len());
    Ok(())
}

fn print_patterns(patterns: &[Pattern]) {
    for pattern in patterns {
        println!(
            "{:>7.2}  {:<16} {}",
            pattern.strength,
            pattern.category.as_str(),
            pattern.description
        );
    }
    println!("{} pattern(s)", patterns.len());
}

async fn cmd_analyze(scope: &AnalysisScope) -> Result<()> {
    let config = load_config()?;
    let pipeline = open_pipeline(&config).await?;
    info!(scope = %scope.scope_key(), "analyzing");
    let patterns = pipeline.analyze(scope).await?;
    print_patterns(&patterns);
    Ok(())
}

async fn cmd_patterns(filter: &PatternFilter, json: bool) -> Result<()> {
    let config = load_config()?;
    let store = open_readonly(&config).await?;
    let patterns = store.query_patterns(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&patterns)?);
    } else {
        print_patterns(&patterns);
    }
    Ok(())
}

async fn cmd_crawls(source_url: &str) -> Result<()> {
    let config = load_config()?;
    let store = open_readonly(&config).await?;
    for crawl in store.list_crawls(source_url).await? {
        let finished = crawl
            .finished_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unfinished".to_string());
        println!(
            "#{:<4} {}  {}  {}",
            crawl.sequence,
            crawl.started_at.to_rfc3339(),
            finished,
            crawl.stats_json.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_purge(source_url: &str) -> Result<()> {
    let config = load_config()?;
    let db_path = config.storage.resolved_db_path()?;
    let store = PatternStore::open(&db_path).await?;
    let removed = store.purge_source(source_url).await?;
    println!("Removed {removed} bit(s) from {source_url}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_query_flags() {
        let cli = Cli::try_parse_from([
            "learnbits",
            "query",
            "--category",
            "reference-table",
            "--limit",
            "5",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Query {
                category,
                limit,
                json,
                ..
            } => {
                assert_eq!(category, Some(Category::ReferenceTable));
                assert_eq!(limit, Some(5));
                assert!(json);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn rejects_unknown_category() {
        assert!(Cli::try_parse_from(["learnbits", "query", "--category", "poetry"]).is_err());
    }

    #[test]
    fn manifest_resolves_relative_paths() {
        let text = "# docs\nhttps://a.example.com/\tpages/a.html\n\nhttps://b.example.com/\t/abs/b.md\n";
        let entries = parse_manifest(text, Path::new("/data")).unwrap();
        assert_eq!(
            entries,
            vec![
                ManifestEntry {
                    url: "https://a.example.com/".into(),
                    path: PathBuf::from("/data/pages/a.html"),
                },
                ManifestEntry {
                    url: "https://b.example.com/".into(),
                    path: PathBuf::from("/abs/b.md"),
                },
            ]
        );
    }

    #[test]
    fn manifest_without_tab_is_rejected() {
        let err = parse_manifest("https://a.example.com/ a.html", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn preview_truncates_first_line() {
        assert_eq!(preview("\n  short line\nmore"), "  short line");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).chars().count(), 73);
    }
}
