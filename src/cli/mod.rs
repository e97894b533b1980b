//! Process-level CLI (spec §6: CLI wiring beyond "it runs the requested
//! service" is out of scope). Generalized from the teacher's `Cli`/`Command`
//! shape: one subcommand per background service, plus the local dev
//! fixture generator.

pub mod fixtures;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "crate-fulfillment", about = "Personal music library fulfillment core")]
pub struct Cli {
    /// Path to the TOML config file (spec §6).
    #[arg(long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Starts all four background services (C5 engine + monitor + healing,
    /// C7 enrichment, C8 watchlist scanner on its own cadence, C9 wishlist
    /// auto-retry) and runs until a shutdown signal arrives.
    Run,

    /// Runs one Watchlist Scanner pass (C8) and exits.
    ScanWatchlist,

    /// Runs Metadata Enrichment Worker (C7) ticks until the catalog has no
    /// more eligible items, or exits after `--ticks` iterations if given.
    Enrich {
        #[arg(long)]
        ticks: Option<u32>,
    },

    /// Drains one Wishlist Auto-Retry (C9) tick and exits.
    RetryWishlist,

    /// Submits a one-off fulfillment batch (C5) for a single track named
    /// directly on the command line — the manual-entry path spec §3's
    /// wishlist `source_type: manual` exists for, since C3 exposes no
    /// fetch-by-id call to resolve an arbitrary external track id. Waits
    /// for the task to finish and reports its terminal status.
    Fulfill {
        #[arg(long)]
        artist: String,
        #[arg(long)]
        title: String,
    },

    /// Local dev fixture management.
    Fixtures {
        #[command(subcommand)]
        action: FixtureActions,
    },
}

#[derive(Subcommand)]
pub enum FixtureActions {
    Prepare,
    Cleanup,
}
