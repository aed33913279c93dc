//! Server-Sent Events (SSE) client for the gestion-ventes sync stream.
//!
//! The backend pushes a notification on `GET /api/sync/events` whenever
//! products, sales, loans or monthly expenses change. This crate keeps that
//! stream open and hands decoded events to the realtime layer.
//!
//! # Architecture
//!
//! - **Single connection**: `EventSourceManager` owns one stream at a time.
//!   Connecting again tears the previous stream (and its reconnect timer) down
//!   first, so two reconnect loops never run side by side.
//! - **Capped exponential backoff**: after an error the manager waits
//!   `min(base * 1.5^n, 30s)` before attempt `n + 1`, and stops after
//!   `max_attempts` reconnects without a successful open. From then on the
//!   caller is expected to poll.
//! - **Ephemeral events**: there is no replay. Events published while the
//!   stream is down are lost; a full pull sync is the way to catch up.
//! - **Observable failures**: malformed payloads are dropped, logged and
//!   counted rather than silently discarded.
//!
//! # Message Flow
//!
//! 1. `EventSourceManager::connect` spawns a task that opens the stream
//!    through a `Transport` (`HttpTransport` in production)
//! 2. Each raw event is decoded by `message::parse` into a `ServerEvent`
//! 3. The task forwards `ConnectionEvent`s (open, message, disconnect,
//!    reconnect scheduled, gave up) over an unbounded channel
//! 4. The receiver (the realtime service) decides what to refresh
//!
//! # Modules
//!
//! - `backoff`: reconnect delay policy and attempt counting
//! - `connection`: connection config, forwarded events and shared status
//! - `manager`: the connection task and its lifecycle
//! - `message`: decoding of `data-changed`, `force-sync` and `heartbeat` payloads
//! - `transport`: the `Transport` seam and its reqwest implementation

pub mod backoff;
pub mod connection;
pub mod error;
pub mod manager;
pub mod message;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transport;

pub use connection::{ConnectionConfig, ConnectionEvent};
pub use error::Error;
pub use manager::EventSourceManager;
pub use message::ServerEvent;
