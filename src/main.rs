use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use chat_migrate::config::Config;
use chat_migrate::cookies;
use chat_migrate::download::{Downloader, DownloaderOptions, RetryPolicy};
use chat_migrate::logging::init_logging;
use chat_migrate::manifest::FetchManifest;
use chat_migrate::store::atomic::AtomicWriter;
use chat_migrate::store::AttachmentStore;

#[derive(Parser)]
#[command(name = "chat-migrate")]
#[command(about = "Chat archive attachment fetcher and bulk-import exporter")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every attachment listed in a fetch manifest
    Fetch {
        /// JSON manifest of {key, urls} items produced by the archive parser
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Load a snapshot and report which entries still exist on disk
    SnapshotCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Fetch { manifest } => fetch(&config, &manifest).await,
        Commands::SnapshotCheck => snapshot_check(&config),
    }
}

async fn fetch(config: &Config, manifest_path: &PathBuf) -> anyhow::Result<()> {
    let manifest = FetchManifest::load(manifest_path)
        .with_context(|| format!("loading manifest {}", manifest_path.display()))?;
    info!("loaded manifest with {} item(s)", manifest.items.len());

    std::fs::create_dir_all(&config.store.base_path)?;
    let store = Arc::new(AttachmentStore::new(
        Some(config.store.base_path.clone()),
        config.store.overwrite,
    ));

    // Resume from the previous run's snapshot if one exists.
    match std::fs::File::open(&config.store.snapshot_path) {
        Ok(file) => {
            store.load_snapshot(std::io::BufReader::new(file))?;
            info!("resumed {} entries from snapshot", store.len());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let cookie_list = match &config.downloader.cookies_file {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening cookies file {}", path.display()))?;
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                cookies::load_from_json(std::io::BufReader::new(file))?
            } else {
                cookies::load_from_text(std::io::BufReader::new(file))?
            }
        }
        None => Vec::new(),
    };

    let downloader = Arc::new(Downloader::new(
        Arc::clone(&store),
        DownloaderOptions {
            concurrency: config.downloader.concurrency,
            retry: RetryPolicy {
                wait_min: Duration::from_secs(config.downloader.retry_wait_min_secs),
                wait_max: Duration::from_secs(config.downloader.retry_wait_max_secs),
                max_retries: config.downloader.max_retries,
            },
            cookies: cookie_list,
        },
    ));

    let mut submitted = 0usize;
    for (i, item) in manifest.items.iter().enumerate() {
        if downloader.submit(&item.key, &item.urls).await {
            submitted += 1;
        }
        // Periodic checkpoint so a killed run loses little work.
        if config.store.snapshot_every > 0 && (i + 1) % config.store.snapshot_every == 0 {
            save_snapshot(&store, &config.store.snapshot_path)?;
        }
    }

    downloader.await_idle().await;
    save_snapshot(&store, &config.store.snapshot_path)?;

    let stats = downloader.stats();
    info!(
        "fetch complete: {} submitted, {} stored, {} skipped, {} failed",
        submitted, stats.stored, stats.skipped_existing, stats.failed
    );
    println!("\n📦 Fetch results:");
    println!("   Items in manifest: {}", manifest.items.len());
    println!("   Scheduled: {}", submitted);
    println!("   Stored: {}", stats.stored);
    println!("   Skipped (already present): {}", stats.skipped_existing);
    println!("   Failed: {}", stats.failed);
    println!("   Index entries: {}", store.len());
    Ok(())
}

fn save_snapshot(store: &AttachmentStore, path: &PathBuf) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Snapshots go through the same write-then-publish path as attachments,
    // so a crash mid-save cannot corrupt the previous snapshot.
    let mut writer = AtomicWriter::create(path)?;
    store.save_snapshot(&mut writer)?;
    writer.close()?;
    Ok(())
}

fn snapshot_check(config: &Config) -> anyhow::Result<()> {
    let file = std::fs::File::open(&config.store.snapshot_path).with_context(|| {
        format!("opening snapshot {}", config.store.snapshot_path.display())
    })?;

    // load_snapshot drops (and warns about) entries whose file is gone, so
    // the surviving count is the live count.
    let store = AttachmentStore::new(Some(config.store.base_path.clone()), true);
    store.load_snapshot(std::io::BufReader::new(file))?;
    if store.is_empty() {
        warn!("snapshot has no live entries");
    }
    println!("{} live entries in snapshot", store.len());
    Ok(())
}
