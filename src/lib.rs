//! Coordination and broadcast engine for a bounded pileup of radio
//! callsigns: a FIFO waiting queue, one exclusive active-contact slot, a
//! retention-bounded worked history, and live fan-out of every committed
//! change to any number of stream subscribers.
//!
//! All mutations flow through a single-writer coordinator loop backed by an
//! append-only SQLite journal; change events publish after commit on a
//! broadcast bus that the SSE gateway fans out per connection.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::PileupStore`]:
//! ```
//! use pileup::core::store::{PileupStore, StoreConfig};
//!
//! let mut store = PileupStore::new(StoreConfig {
//!     queue_max: 4,
//!     worked_ttl_ms: 3_600_000,
//! });
//! store.set_active(true, 0);
//!
//! let (entry, _op) = store.register("ei6lf", 1).expect("register");
//! assert_eq!(entry.callsign, "EI6LF");
//!
//! let (contact, _op) = store.promote_next(2).expect("promote").expect("queued caller");
//! assert_eq!(contact.callsign, "EI6LF");
//!
//! let (record, _op) = store.complete_current(3).expect("complete");
//! assert_eq!(record.callsign, "EI6LF");
//! ```
//!
//! Full server with SQLite journaling:
//! ```no_run
//! use pileup::{
//!     core::store::StoreConfig,
//!     persist::sqlite::SqliteOpSink,
//!     runtime::handle::{RuntimeConfig, spawn_pileup},
//!     server::{ServerConfig, serve},
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let sink = SqliteOpSink::open("pileup.db")?;
//! let store = sink.load_store(StoreConfig::default())?;
//! let handle = spawn_pileup(store, Some(Box::new(sink)), None, RuntimeConfig::default());
//! serve(ServerConfig::default(), handle).await?;
//! # Ok(())
//! # }
//! ```

/// Callsign normalization and validation.
pub mod callsign;
/// Domain records and derived views.
pub mod contact;
/// In-memory authoritative store.
pub mod core;
/// Asynchronous profile enrichment seam.
pub mod enrich;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer coordinator runtime and events.
pub mod runtime;
/// HTTP surfaces and the SSE stream gateway.
pub mod server;
/// Shared primitive types and enums.
pub mod types;
