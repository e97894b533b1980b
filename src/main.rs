use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

use crate_fulfillment::app::AppContext;
use crate_fulfillment::cli::{Cli, Command, FixtureActions};
use crate_fulfillment::domain::wishlist::{AlbumDescriptor, SourceType, TrackDescriptor};
use crate_fulfillment::fulfillment::{Engine, FulfillmentRequest, TaskStatus};
use crate_fulfillment::scanner::DEFAULT_SCAN_INTERVAL;
use crate_fulfillment::utils::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Command::Fixtures { action } = cli.command {
        match action {
            FixtureActions::Prepare => {
                let paths = crate_fulfillment::cli::fixtures::prepare().context("preparing dev fixtures")?;
                for path in paths {
                    println!("{}", path.display());
                }
            }
            FixtureActions::Cleanup => {
                crate_fulfillment::cli::fixtures::cleanup().context("cleaning up dev fixtures")?;
            }
        }
        return Ok(());
    }

    let config = Config::load(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;
    let ctx = AppContext::build(config).await.context("wiring application dependencies")?;

    match cli.command {
        Command::Fixtures { .. } => unreachable!("handled above"),

        Command::Run => run_all_services(&ctx).await,

        Command::ScanWatchlist => {
            let summary = ctx.watchlist_scanner().run_once().await.context("running watchlist scan")?;
            println!(
                "scanned {} artists, added {} tracks to wishlist, refreshed {} similar-artist caches",
                summary.artists_scanned, summary.tracks_added_to_wishlist, summary.similar_artist_caches_refreshed
            );
            Ok(())
        }

        Command::Enrich { ticks } => {
            let worker = ctx.enrichment_worker();
            let mut remaining = ticks;
            loop {
                if let Some(n) = remaining {
                    if n == 0 {
                        break;
                    }
                }
                let outcome = worker.tick().await.context("running enrichment tick")?;
                println!("{outcome:?}");
                if outcome == crate_fulfillment::enrichment::TickOutcome::Idle {
                    break;
                }
                remaining = remaining.map(|n| n - 1);
            }
            Ok(())
        }

        Command::RetryWishlist => {
            let (monitor_handle, healing_handle) = spawn_drain_support(&ctx.engine);
            let summary = ctx.wishlist_scheduler().tick().await.context("draining wishlist auto-retry")?;
            monitor_handle.abort();
            healing_handle.abort();
            println!(
                "submitted {}, {} succeeded, {} failed",
                summary.submitted, summary.succeeded, summary.failed
            );
            Ok(())
        }

        Command::Fulfill { artist, title } => fulfill_one(&ctx, artist, title).await,
    }
}

/// Spawns the monitor and healing loops an `Engine` needs to make progress
/// on its own: the monitor is the only thing that advances a task out of
/// `Queued` (it reads the transfer cache and notifies the parked worker),
/// and the healing tick reconciles `active_count` drift. Every entry point
/// that submits a batch and waits for it — the `run` command's full
/// service set as well as the one-shot `retry-wishlist`/`fulfill` commands —
/// needs both running for as long as it's waiting.
fn spawn_drain_support(engine: &Engine) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let monitor_engine = engine.clone();
    let monitor_handle = tokio::spawn(async move { monitor_engine.run_monitor_loop().await });

    let healing_engine = engine.clone();
    let healing_handle = tokio::spawn(async move { healing_engine.run_healing_loop().await });

    (monitor_handle, healing_handle)
}

/// Spawns all four background services (spec §5) and runs until SIGINT,
/// tearing down on a shared shutdown signal rather than aborting tasks.
async fn run_all_services(ctx: &AppContext) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (monitor_handle, healing_handle) = spawn_drain_support(&ctx.engine);

    let enrichment_worker = ctx.enrichment_worker();
    let enrichment_shutdown = shutdown_rx.clone();
    let enrichment_handle = tokio::spawn(async move {
        enrichment_worker
            .run_loop(crate_fulfillment::enrichment::DEFAULT_TICK_INTERVAL, enrichment_shutdown)
            .await
    });

    let scanner = ctx.watchlist_scanner();
    let scanner_shutdown = shutdown_rx.clone();
    let scanner_handle = tokio::spawn(async move { scanner.run_loop(DEFAULT_SCAN_INTERVAL, scanner_shutdown).await });

    let wishlist_interval = Duration::from_secs(ctx.config.wishlist.auto_interval_seconds);
    let scheduler = ctx.wishlist_scheduler();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run_loop(wishlist_interval, scheduler_shutdown).await });

    log::info!("all services started; waiting for shutdown signal");
    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    log::info!("shutdown signal received, stopping background services");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(enrichment_handle, scanner_handle, scheduler_handle);

    // The monitor/healing loops have no shutdown watch of their own (spec
    // §9: they're process-lifetime backstops, not per-request workers).
    monitor_handle.abort();
    healing_handle.abort();

    Ok(())
}

/// Manual one-off submission (spec §3 `source_type: manual`): no provider
/// lookup backs it, since C3 exposes no fetch-by-id call for an arbitrary
/// external track id, only search and per-entity listing endpoints.
async fn fulfill_one(ctx: &AppContext, artist: String, title: String) -> anyhow::Result<()> {
    let descriptor = TrackDescriptor {
        id: format!("manual:{artist}:{title}"),
        name: title,
        artists: vec![artist],
        album: AlbumDescriptor { id: String::new(), name: String::new(), images: Vec::new(), release_date: None, album_type: None },
        duration_ms: 0,
        popularity: 0,
    };

    let request = FulfillmentRequest {
        descriptor,
        source_type: SourceType::Manual,
        source_info: serde_json::json!({}),
        is_album_download: true,
        track_number: None,
    };

    let (monitor_handle, healing_handle) = spawn_drain_support(&ctx.engine);

    let batch_id = ctx.engine.submit_batch(vec![request], None).await;
    while !ctx.engine.is_batch_complete(batch_id).await.unwrap_or(true) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    monitor_handle.abort();
    healing_handle.abort();

    let outcomes = ctx.engine.batch_outcomes(batch_id).await.context("reading batch outcome")?;
    ctx.engine.forget_batch(batch_id).await;

    match outcomes.into_iter().next() {
        Some(outcome) if outcome.status == TaskStatus::Done => println!("done"),
        Some(outcome) => println!("failed: {}", outcome.failure_reason.unwrap_or_else(|| "unknown".into())),
        None => println!("no outcome recorded"),
    }

    Ok(())
}
