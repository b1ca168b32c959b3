//! lazy-asset-cache: two-tier asset cache with coalesced fetching.
//!
//! `serve` exposes the cache over HTTP; `warm` resolves a list of locators
//! into the memory and disk tiers and reports what was found.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use lazy_asset_cache::config::{Cli, Command, Config};
use lazy_asset_cache::server::api::{build_router, AppState};
use lazy_asset_cache::{
    AssetCache, BytesDecoder, FileFetcher, Locator, ResolveOptions, SchemeFetcher,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "lazy_asset_cache=debug,tower_http=debug"
    } else {
        "lazy_asset_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("lazy-asset-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);
    let config = Arc::new(config);

    info!(
        directory = %config.cache.directory.display(),
        persist = config.cache.persist,
        fetch_timeout_secs = config.fetch.timeout_secs,
        file_root = ?config.fetch.file_root,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            // Remote clients only reach files below `fetch.file_root`.
            let fetcher = Arc::new(SchemeFetcher::new(&config.fetch)?);
            let cache = AssetCache::from_config(&config, fetcher, BytesDecoder).await?;
            serve(cache, config).await
        }
        Command::Warm {
            locators,
            no_persist,
        } => {
            let file = match &config.fetch.file_root {
                Some(root) => FileFetcher::with_root(root),
                None => FileFetcher::new(),
            };
            let fetcher = Arc::new(SchemeFetcher::with_file_fetcher(&config.fetch, file)?);
            let cache = AssetCache::from_config(&config, fetcher, BytesDecoder).await?;
            warm(cache, locators, !no_persist).await
        }
    }
}

async fn serve(cache: AssetCache<BytesDecoder>, config: Arc<Config>) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = Arc::new(AppState {
        cache,
        config,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn warm(
    cache: AssetCache<BytesDecoder>,
    locators: Vec<String>,
    persist: bool,
) -> anyhow::Result<()> {
    let options = ResolveOptions { persist };
    let started = Instant::now();

    let pending: Vec<_> = locators
        .into_iter()
        .map(|raw| {
            let locator = Locator::new(raw);
            let (tx, rx) = tokio::sync::oneshot::channel();
            cache.resolve_with_options(locator.clone(), options, move |asset| {
                let _ = tx.send(asset.map(|a| a.len()));
            });
            (locator, rx)
        })
        .collect();

    let mut missing = 0usize;
    for (locator, rx) in pending {
        match rx.await.ok().flatten() {
            Some(size) => info!(locator = %locator, size, "Cached"),
            None => {
                missing += 1;
                warn!(locator = %locator, "Not available");
            }
        }
    }

    let stats = cache.stats();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        fetches = stats.fetches,
        disk_hits = stats.disk_hits,
        memory_hits = stats.memory_hits,
        missing,
        "Warm-up complete"
    );

    if missing > 0 {
        anyhow::bail!("{missing} locator(s) could not be resolved");
    }
    Ok(())
}
