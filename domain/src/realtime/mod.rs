//! Realtime data synchronisation.
//!
//! `RealtimeService` ties the event stream, the payload cache and the REST
//! gateway together. Application code subscribes to three channels:
//!
//! - **data**: `DataUpdate`s carrying payloads that actually changed
//! - **sync**: `SyncNotice`s about the stream and about pull syncs
//! - **fault**: `ListenerFault`s raised by data or sync listeners
//!
//! Events arrive through a single pump task that drains the connection
//! channel, so listeners observe them in the order the server sent them.

mod snapshot;

pub use snapshot::{ForceSyncOutcome, MonthSnapshot};

use crate::cache::DataCacheManager;
use crate::error::Error;
use crate::gateway::{HttpSalesApi, SalesApi};
use crate::period::Period;
use events::{
    DataType, DataUpdate, Listener, ListenerFault, ListenerRegistry, Subscription, SyncNotice,
};
use futures::future::join_all;
use log::*;
use serde_json::Value;
use service::config::Config;
use sse::backoff::ReconnectPolicy;
use sse::transport::{HttpTransport, Transport};
use sse::{ConnectionConfig, ConnectionEvent, EventSourceManager, ServerEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Optional behaviours on top of plain event forwarding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealtimeOptions {
    /// Once the stream has given up reconnecting, pull the current month at
    /// this interval. `None` leaves the data stale until the next `start`.
    pub fallback_poll_interval: Option<Duration>,
    /// Pull the current month after the stream reopens, to catch up on
    /// events sent while it was down.
    pub resync_on_reconnect: bool,
}

/// Handle to the realtime sync machinery. Clones share the same connection,
/// cache and listeners.
#[derive(Clone)]
pub struct RealtimeService {
    inner: Arc<Inner>,
}

struct Inner {
    connection: EventSourceManager,
    api: Arc<dyn SalesApi>,
    cache: DataCacheManager,
    data_listeners: Arc<ListenerRegistry<DataUpdate>>,
    sync_listeners: Arc<ListenerRegistry<SyncNotice>>,
    fault_listeners: Arc<ListenerRegistry<ListenerFault>>,
    options: RealtimeOptions,
    pump: Mutex<Option<JoinHandle<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeService {
    pub fn new(
        connection: ConnectionConfig,
        transport: Arc<dyn Transport>,
        api: Arc<dyn SalesApi>,
        mut options: RealtimeOptions,
    ) -> Self {
        // A zero interval means polling is off
        options.fallback_poll_interval = options
            .fallback_poll_interval
            .filter(|every| !every.is_zero());

        Self {
            inner: Arc::new(Inner {
                connection: EventSourceManager::new(connection, transport),
                api,
                cache: DataCacheManager::new(),
                data_listeners: Arc::new(ListenerRegistry::new("data")),
                sync_listeners: Arc::new(ListenerRegistry::new("sync")),
                fault_listeners: Arc::new(ListenerRegistry::new("fault")),
                options,
                pump: Mutex::new(None),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Build the service with the HTTP transport and REST gateway described
    /// by `config`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let policy = ReconnectPolicy::new(
            config.reconnect_interval(),
            config.max_reconnect_delay(),
            config.max_reconnect_attempts,
        );
        let connection = ConnectionConfig::new(config.sync_events_url(), policy);
        let transport = HttpTransport::new(config.connect_timeout())?;
        let api = HttpSalesApi::from_config(config)?;
        let options = RealtimeOptions {
            fallback_poll_interval: config.fallback_poll_interval(),
            resync_on_reconnect: config.resync_on_reconnect,
        };

        Ok(Self::new(
            connection,
            Arc::new(transport),
            Arc::new(api),
            options,
        ))
    }

    pub fn add_data_listener<L>(&self, listener: L) -> Subscription
    where
        L: Listener<DataUpdate> + 'static,
    {
        self.inner.data_listeners.subscribe(listener)
    }

    pub fn add_sync_listener<L>(&self, listener: L) -> Subscription
    where
        L: Listener<SyncNotice> + 'static,
    {
        self.inner.sync_listeners.subscribe(listener)
    }

    /// Listeners told about data or sync listeners that failed. Failures of
    /// fault listeners themselves are only logged.
    pub fn add_fault_listener<L>(&self, listener: L) -> Subscription
    where
        L: Listener<ListenerFault> + 'static,
    {
        self.inner.fault_listeners.subscribe(listener)
    }

    /// Connect to the event stream and start forwarding its events. A running
    /// connection is replaced.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, token: Option<String>) {
        self.inner.stop_tasks();
        let events = self.inner.connection.connect(token);
        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), events));
        *lock(&self.inner.pump) = Some(pump);
    }

    /// Disconnect and stop any fallback polling. Safe to call repeatedly.
    pub fn stop(&self) {
        self.inner.stop_tasks();
        self.inner.connection.disconnect();
    }

    pub fn get_connection_status(&self) -> bool {
        self.inner.connection.get_connection_status()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.connection.reconnect_attempts()
    }

    /// Stream events dropped because their payload could not be decoded.
    pub fn parse_error_count(&self) -> u64 {
        self.inner.connection.parse_error_count()
    }

    /// Forget the last payloads seen, so the next update of every type is
    /// delivered even if it matches what listeners already have.
    pub fn clear_cache(&self) {
        self.inner.cache.clear_cache();
    }

    pub async fn sync_current_month_data(&self) -> MonthSnapshot {
        self.inner.sync_month_data(Period::current()).await
    }

    /// Pull every data type for `period`. Never fails: an endpoint that errors
    /// contributes an empty list and is listed in `MonthSnapshot::failed`.
    pub async fn sync_month_data(&self, period: Period) -> MonthSnapshot {
        self.inner.sync_month_data(period).await
    }

    /// Ask the backend to broadcast a refresh; pull locally if that fails.
    pub async fn force_sync(&self) -> ForceSyncOutcome {
        match self.inner.api.request_force_sync().await {
            Ok(()) => ForceSyncOutcome::Requested,
            Err(err) => {
                warn!("Force sync request failed, pulling instead: {err}");
                ForceSyncOutcome::FellBack(self.sync_current_month_data().await)
            }
        }
    }
}

async fn pump(inner: Weak<Inner>, mut events: UnboundedReceiver<ConnectionEvent>) {
    let mut link = LinkState::default();

    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle(event, &mut link).await;
    }
    debug!("Sync event stream channel closed");
}

#[derive(Debug, Default)]
struct LinkState {
    /// The stream was lost since it last opened.
    dropped: bool,
}

impl Inner {
    async fn handle(self: &Arc<Self>, event: ConnectionEvent, link: &mut LinkState) {
        match event {
            ConnectionEvent::Connected => {
                self.notify_sync(&SyncNotice::Connected);
                let reopened = std::mem::take(&mut link.dropped);
                if reopened && self.options.resync_on_reconnect {
                    info!("Sync event stream reopened, pulling current month");
                    self.sync_month_data(Period::current()).await;
                }
            }
            ConnectionEvent::Message(message) => self.handle_message(message).await,
            ConnectionEvent::Disconnected { reason } => {
                link.dropped = true;
                self.notify_sync(&SyncNotice::Disconnected { reason });
            }
            ConnectionEvent::ReconnectScheduled { attempt, delay } => {
                self.notify_sync(&SyncNotice::Reconnecting { attempt, delay });
            }
            ConnectionEvent::GaveUp { attempts } => {
                self.notify_sync(&SyncNotice::GaveUp { attempts });
                match self.options.fallback_poll_interval {
                    Some(every) => self.start_polling(every),
                    None => {
                        warn!("Sync event stream gave up; data will not refresh until restarted")
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: ServerEvent) {
        match message {
            ServerEvent::DataChanged { data_type, data } => {
                if self.cache.has_data_changed(data_type, &data) {
                    self.notify_data(&DataUpdate::single(data_type, data));
                }
            }
            ServerEvent::ForceSync { data } if data.is_empty() => {
                info!("Server requested a full sync");
                self.sync_month_data(Period::current()).await;
            }
            ServerEvent::ForceSync { data } => {
                let mut update = DataUpdate::new();
                for (data_type, payload) in data {
                    if self.cache.has_data_changed(data_type, &payload) {
                        update.insert(data_type, payload);
                    }
                }
                if !update.is_empty() {
                    self.notify_data(&update);
                }
            }
            ServerEvent::Heartbeat => self.notify_sync(&SyncNotice::Heartbeat),
            ServerEvent::Other { event_type, .. } => {
                debug!("Ignoring {event_type:?} event");
            }
        }
    }

    async fn sync_month_data(&self, period: Period) -> MonthSnapshot {
        self.notify_sync(&SyncNotice::SyncStarted);
        debug!("Pulling data for {period}");

        let api = &self.api;
        let results = join_all(DataType::ALL.into_iter().map(|data_type| async move {
            (data_type, api.fetch(data_type, period).await)
        }))
        .await;

        let mut snapshot = MonthSnapshot::empty(period);
        let mut update = DataUpdate::new();
        for (data_type, result) in results {
            match result {
                Ok(items) => {
                    let payload = Value::Array(items);
                    if self.cache.has_data_changed(data_type, &payload) {
                        update.insert(data_type, payload.clone());
                    }
                    if let Value::Array(items) = payload {
                        snapshot.set(data_type, items);
                    }
                }
                Err(err) => {
                    warn!("Failed to pull {data_type} for {period}: {err}");
                    snapshot.failed.push(data_type);
                }
            }
        }

        if !update.is_empty() {
            self.notify_data(&update);
        }
        info!(
            "Pulled data for {period}: {} changed, {} failed",
            update.len(),
            snapshot.failed.len()
        );
        self.notify_sync(&SyncNotice::SyncCompleted {
            failed: snapshot.failed.clone(),
        });
        snapshot
    }

    fn start_polling(self: &Arc<Self>, every: Duration) {
        info!("Polling for data every {}s", every.as_secs());
        let inner = Arc::downgrade(self);
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.sync_month_data(Period::current()).await;
            }
        });

        if let Some(previous) = lock(&self.poller).replace(poller) {
            previous.abort();
        }
    }

    fn stop_tasks(&self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        if let Some(poller) = lock(&self.poller).take() {
            debug!("Stopping fallback polling");
            poller.abort();
        }
    }

    fn notify_data(&self, update: &DataUpdate) {
        let faults = self.data_listeners.dispatch(update);
        self.report(faults);
    }

    fn notify_sync(&self, notice: &SyncNotice) {
        let faults = self.sync_listeners.dispatch(notice);
        self.report(faults);
    }

    fn report(&self, faults: Vec<ListenerFault>) {
        for fault in &faults {
            self.fault_listeners.dispatch(fault);
        }
    }
}

fn lock(slot: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
