//! # Riverbed
//!
//! A river-of-news feed aggregator. Riverbed polls the RSS, Atom and
//! RSS-in-JSON feeds named in a folder of subscription lists, remembers what
//! it has seen, and publishes one river per list as a JSONP file
//! (`onGetRiverStream (...)`).
//!
//! ## Architecture
//!
//! ```text
//! lists → Scheduler → Fetcher → Normalizer → History → Rivers → <list>.js
//!                                                 ↘ listeners, hooks, podcasts
//! ```
//!
//! A single [`Aggregator`](aggregator::Aggregator) holds all state and is
//! owned by the [`Daemon`](daemon::Daemon) task. Network work runs in spawned
//! tasks that report back through [`daemon::Command`] messages; the HTTP and
//! websocket servers talk to it through an
//! [`AggregatorHandle`](daemon::AggregatorHandle).
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the aggregator with its HTTP (1337) and websocket (1338) servers
//! riverbed
//!
//! # Read everything once and rebuild changed rivers
//! riverbed read-all
//!
//! # Renew one feed's rssCloud subscription
//! riverbed renew http://example.com/rss.xml
//! ```

/// The aggregator's state and operations.
pub mod aggregator;

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// fetcher, hub client and downloader.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// rssCloud client: hub renewals.
pub mod cloud;

/// Configuration loaded from `~/.config/riverbed/config.toml`.
pub mod config;

/// Timer-driven event loop that owns the aggregator.
pub mod daemon;

/// Persisted documents and in-memory records.
///
/// - [`FeedRecord`](domain::FeedRecord): per-feed history, stats and prefs
/// - [`FeedSubscription`](domain::FeedSubscription): one row of `feedsStats.json`
/// - [`RiverItem`](domain::RiverItem): an item as it sits in a river
pub mod domain;

/// HTTP feed fetching and podcast downloads.
pub mod fetcher;

/// Deduplication of items against each feed's history.
pub mod history;

/// Item-added and river-built extension points.
pub mod hooks;

/// Websocket listener sessions.
pub mod listeners;

/// Subscription list files (OPML, text, JSON).
pub mod lists;

/// Feed parsing into one item shape.
pub mod normalizer;

/// Bounded write-back and podcast download queues.
pub mod queue;

/// River storage, caching and rendering.
pub mod river;

/// Chooses the next feed to read.
pub mod scheduler;

/// HTTP endpoints and the websocket listener server.
pub mod server;

/// JSON document persistence.
pub mod store;

/// The table of known feeds.
pub mod subscriptions;

#[cfg(test)]
mod test_support;
