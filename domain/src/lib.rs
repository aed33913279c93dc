//! Realtime synchronisation of the gestion-ventes dashboard data.
//!
//! This crate is the layer application code talks to. It re-exports the
//! event vocabulary from the `events` crate so consumers do not need to
//! depend on it directly, and hides the `sse` crate's connection details
//! behind `RealtimeService`.

pub use events::{
    DataType, DataUpdate, Listener, ListenerError, ListenerFault, ListenerId, ListenerResult,
    Subscription, SyncNotice,
};

pub mod cache;
pub mod error;
pub mod gateway;
pub mod period;
pub mod realtime;

pub use cache::DataCacheManager;
pub use period::Period;
pub use realtime::{ForceSyncOutcome, MonthSnapshot, RealtimeOptions, RealtimeService};
