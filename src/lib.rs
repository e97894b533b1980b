//! Personal music library orchestrator — fulfillment core (spec §1, §2).
//!
//! Four background services coordinate through a single catalog database:
//! the Download Fulfillment Engine (C5), the Watchlist Scanner (C8), the
//! Metadata Enrichment Worker (C7) and the Wishlist Auto-Retry Scheduler
//! (C9). [`app`] builds the explicit dependency graph that wires them
//! together (spec §9 redesign: no module-level singleton, no lazy global).

pub mod app;
pub mod catalog;
pub mod cli;
pub mod domain;
pub mod enrichment;
pub mod fulfillment;
pub mod matching;
pub mod p2p;
pub mod postprocess;
pub mod provider;
pub mod scanner;
pub mod scheduler;
pub mod utils;
