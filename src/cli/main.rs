use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use pixiv_download_helper::config::Config;
use pixiv_download_helper::fetcher::{ImageFetcher, UrlOutcome};
use pixiv_download_helper::inspector;
use pixiv_download_helper::metadata::{self, EmbedOutcome};
use pixiv_download_helper::record::IllustrationRecord;

#[derive(Parser, Debug)]
#[command(
    name = "pixiv-download-helper",
    version,
    about = "Download pixiv illustrations with embedded metadata, and inspect the metadata of saved images"
)]
struct Cli {
    /// Image files or directories to inspect (interactive prompt if omitted)
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Download the images of an illustration record (JSON file) instead of inspecting
    #[arg(long, value_name = "RECORD")]
    fetch: Option<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Output inspected metadata as a single JSON array
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Handle --fetch
    if let Some(ref record_path) = cli.fetch {
        let config = Config::load(cli.config.as_deref())?;
        return fetch(record_path, &config).await;
    }

    if cli.paths.is_empty() {
        let stdin = std::io::stdin();
        return inspector::run_interactive(stdin.lock(), std::io::stdout());
    }

    let images = inspector::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No image files found in the specified paths.");
    }

    if cli.json {
        let entries: Vec<serde_json::Value> = images
            .iter()
            .map(|path| {
                serde_json::json!({
                    "path": path.display().to_string(),
                    "metadata": metadata::read_metadata(path),
                })
            })
            .collect();
        println!("{}", inspector::render(&serde_json::Value::Array(entries))?);
        return Ok(());
    }

    for path in &images {
        println!("\n{}", path.display());
        println!("{}", inspector::describe(path)?);
    }

    Ok(())
}

async fn fetch(record_path: &std::path::Path, config: &Config) -> Result<()> {
    let contents = std::fs::read_to_string(record_path)
        .with_context(|| format!("Failed to read {}", record_path.display()))?;
    let record: IllustrationRecord =
        serde_json::from_str(&contents).context("Failed to parse illustration record")?;
    record.validate()?;

    let fetcher = ImageFetcher::new(config)?;
    log::info!(
        "Downloading {} image(s) for illustration {} into {}",
        record.image_urls.len(),
        record.illust_id,
        fetcher.image_dir().display()
    );

    let report = fetcher.fetch_all(&record).await?;

    for outcome in &report.outcomes {
        match outcome {
            UrlOutcome::Saved { path, embed: Some(EmbedOutcome::Embedded(format)), .. } => {
                log::info!("  {} ({format} metadata)", path.display());
            }
            UrlOutcome::Saved { path, embed: Some(EmbedOutcome::Unsupported(format)), .. } => {
                log::info!("  {} (no metadata, {format} unsupported)", path.display());
            }
            UrlOutcome::Saved { path, embed: None, .. } => {
                log::warn!("  {} (metadata embedding failed)", path.display());
            }
            UrlOutcome::Failed { url, error } => {
                log::error!("  {url}: {error}");
            }
        }
    }

    log::info!(
        "Done: {} saved, {} failed out of {} images",
        report.saved(),
        report.failed(),
        report.outcomes.len()
    );
    Ok(())
}
