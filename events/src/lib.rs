//! Shared event vocabulary for the gestion-ventes sync client.
//!
//! This crate holds the types that flow between the SSE connection layer, the
//! realtime orchestration layer and application code that subscribes to data
//! changes.
//!
//! # Architecture
//!
//! - **DataType**: the closed set of data kinds the backend pushes changes for
//! - **DataUpdate**: a batch of changed payloads, keyed by data type
//! - **SyncNotice**: connection lifecycle and sync progress notifications
//! - **ListenerRegistry**: ordered callback registry that reports listener
//!   failures instead of discarding them
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Business entities (products, sales, loans, expenses) are
//! carried as `serde_json::Value` since the backend owns their shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod listener;

pub use listener::{
    Listener, ListenerError, ListenerFault, ListenerId, ListenerRegistry, ListenerResult,
    Subscription,
};

/// The kinds of data the backend announces changes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "products")]
    Products,
    #[serde(rename = "sales")]
    Sales,
    #[serde(rename = "pretfamilles")]
    PretFamilles,
    #[serde(rename = "pretproduits")]
    PretProduits,
    #[serde(rename = "depensedumois")]
    DepenseDuMois,
}

impl DataType {
    /// Every data type, in the order the fallback sync requests them.
    pub const ALL: [DataType; 5] = [
        DataType::Products,
        DataType::Sales,
        DataType::PretFamilles,
        DataType::PretProduits,
        DataType::DepenseDuMois,
    ];

    /// Wire name used in SSE payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Products => "products",
            DataType::Sales => "sales",
            DataType::PretFamilles => "pretfamilles",
            DataType::PretProduits => "pretproduits",
            DataType::DepenseDuMois => "depensedumois",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct DataTypeParseError(pub String);

impl fmt::Display for DataTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown data type: {}", self.0)
    }
}

impl std::error::Error for DataTypeParseError {}

impl FromStr for DataType {
    type Err = DataTypeParseError;

    fn from_str(name: &str) -> Result<DataType, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|data_type| data_type.as_str() == name)
            .ok_or_else(|| DataTypeParseError(name.to_string()))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of changed payloads delivered to data listeners.
///
/// Serializes as a plain object, e.g. `{"products": [{"id": "p1"}]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DataUpdate {
    changes: BTreeMap<DataType, Value>,
}

impl DataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update carrying a single changed data type.
    pub fn single(data_type: DataType, data: Value) -> Self {
        let mut update = Self::new();
        update.insert(data_type, data);
        update
    }

    pub fn insert(&mut self, data_type: DataType, data: Value) {
        self.changes.insert(data_type, data);
    }

    pub fn get(&self, data_type: DataType) -> Option<&Value> {
        self.changes.get(&data_type)
    }

    pub fn data_types(&self) -> impl Iterator<Item = DataType> + '_ {
        self.changes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DataType, &Value)> {
        self.changes.iter().map(|(data_type, data)| (*data_type, data))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Notifications about the state of the realtime link and of pull syncs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SyncNotice {
    /// The event stream opened (initially or after a reconnect).
    Connected,
    /// The event stream dropped.
    Disconnected { reason: String },
    /// A reconnect was scheduled after `delay`. `attempt` starts at 1.
    Reconnecting {
        attempt: u32,
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    /// Reconnect attempts are exhausted; data now only refreshes by polling.
    GaveUp { attempts: u32 },
    /// Keep-alive received from the server.
    Heartbeat,
    /// A pull-based sync of the month's data started.
    SyncStarted,
    /// A pull-based sync finished. `failed` lists the endpoints that errored.
    SyncCompleted { failed: Vec<DataType> },
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(delay.as_millis() as u64)
    }
}
