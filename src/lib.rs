//! aoscan - AO / AR.IO network explorer
//!
//! This library provides the core of aoscan, a terminal explorer for AO
//! messages, processes, Arweave blocks and ArNS names.
//!
//! ## Architecture
//!
//! - **Loading**: `loader` drives cursor pagination over any `PageFetcher`,
//!   discarding results from superseded requests.
//! - **Backends**: `graphql` talks to an Arweave GraphQL gateway, `dryrun`
//!   and `arns` to an AO compute unit.
//! - **Shared plumbing**: `throttle` spaces outbound calls, `net` retries on
//!   rate limits, `cache` keeps short-lived lookups.
//! - **Native**: terminal UI using crossterm and ratatui, with SQLite history.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -- --view messages
//! ```

// Core modules (available on all platforms)
pub mod config;
pub mod error;
pub mod types;
pub mod util_text;

// Loading engine
pub mod loader;
pub mod pagination;

// Request plumbing
pub mod cache;
pub mod net;
pub mod throttle;

// Backends
pub mod arns;
pub mod dryrun;
pub mod fetchers;
pub mod graphql;

// Native-only modules
#[cfg(feature = "native")]
pub mod app;
#[cfg(feature = "native")]
pub mod history;
#[cfg(feature = "native")]
pub mod ui;

pub use error::{Error, Result};
