use crate::backoff::{ReconnectPolicy, ReconnectState};
use crate::connection::{ConnectionConfig, ConnectionEvent, ConnectionStatus};
use crate::error::{ConnectionErrorKind, Error};
use crate::message::{self, EventType, ServerEvent};
use crate::transport::{EventStream, Transport};
use futures::StreamExt;
use log::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Owns the single sync event stream connection and its reconnect loop.
pub struct EventSourceManager {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    status: Arc<ConnectionStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventSourceManager {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            status: Arc::new(ConnectionStatus::new()),
            task: Mutex::new(None),
        }
    }

    /// Open the stream and return the channel its events arrive on.
    ///
    /// Any previous connection (including a pending reconnect timer) is torn
    /// down first. `token`, when present, is sent as a bearer token. The
    /// channel closes when the task gives up or `disconnect` is called.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, token: Option<String>) -> UnboundedReceiver<ConnectionEvent> {
        let mut task = self.lock_task();
        if let Some(previous) = task.take() {
            debug!("Replacing existing sync event stream connection");
            previous.abort();
        }

        let generation = self.status.next_generation();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            url: self.config.url.clone(),
            policy: self.config.policy.clone(),
            transport: Arc::clone(&self.transport),
            status: Arc::clone(&self.status),
            generation,
            token,
            tx,
        };

        info!("Connecting to sync event stream {}", self.config.url);
        *task = Some(tokio::spawn(worker.run()));
        rx
    }

    /// Close the stream and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        let mut task = self.lock_task();
        self.status.next_generation();
        if let Some(handle) = task.take() {
            handle.abort();
            info!("Disconnected from sync event stream");
        }
    }

    pub fn get_connection_status(&self) -> bool {
        self.status.is_connected()
    }

    /// Reconnects scheduled since the stream last opened.
    pub fn reconnect_attempts(&self) -> u32 {
        self.status.reconnect_attempts()
    }

    /// Events dropped because their payload could not be decoded.
    pub fn parse_error_count(&self) -> u64 {
        self.status.parse_errors()
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EventSourceManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Why the stream loop stopped reading.
enum StreamEnd {
    Lost(String),
    ReceiverGone,
}

struct Worker {
    url: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    status: Arc<ConnectionStatus>,
    generation: u64,
    token: Option<String>,
    tx: UnboundedSender<ConnectionEvent>,
}

impl Worker {
    async fn run(self) {
        self.connect_loop().await;
        self.status.mark_disconnected(self.generation);
    }

    async fn connect_loop(&self) {
        let mut reconnect = ReconnectState::new(self.policy.clone());

        loop {
            let reason = match self.transport.open(&self.url, self.token.as_deref()).await {
                Ok(stream) => {
                    if !self.status.mark_connected(self.generation) {
                        return;
                    }
                    reconnect.reset();
                    info!("Sync event stream connected");
                    if !self.emit(ConnectionEvent::Connected) {
                        return;
                    }
                    match self.read(stream).await {
                        StreamEnd::Lost(reason) => reason,
                        StreamEnd::ReceiverGone => return,
                    }
                }
                Err(err) => err.to_string(),
            };

            self.status.mark_disconnected(self.generation);
            warn!("Sync event stream disconnected: {reason}");
            if !self.emit(ConnectionEvent::Disconnected { reason }) {
                return;
            }

            let Some(delay) = reconnect.schedule() else {
                warn!(
                    "Giving up on sync event stream after {} reconnect attempts",
                    reconnect.attempts()
                );
                self.emit(ConnectionEvent::GaveUp {
                    attempts: reconnect.attempts(),
                });
                return;
            };

            let attempt = reconnect.attempts();
            self.status.set_reconnect_attempts(self.generation, attempt);
            info!(
                "Reconnecting to sync event stream in {}ms (attempt {attempt}/{})",
                delay.as_millis(),
                self.policy.max_attempts
            );
            if !self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay }) {
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn read(&self, mut stream: EventStream) -> StreamEnd {
        while let Some(item) = stream.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(err) => return StreamEnd::Lost(err.to_string()),
            };

            match message::parse(&raw.event_type, &raw.data) {
                Ok(event) => {
                    if matches!(event, ServerEvent::Heartbeat) {
                        trace!("Sync event stream heartbeat");
                    } else {
                        debug!("Received {} event", event.event_type());
                    }
                    if !self.emit(ConnectionEvent::Message(event)) {
                        return StreamEnd::ReceiverGone;
                    }
                }
                Err(err) => {
                    let total = self.status.record_parse_error();
                    warn!(
                        "Dropping malformed {:?} event ({total} dropped so far): {err}",
                        raw.event_type
                    );
                }
            }
        }

        StreamEnd::Lost(
            Error::connection(ConnectionErrorKind::Closed, "stream closed by server").to_string(),
        )
    }

    /// Returns false once nobody is listening (or this task was superseded).
    fn emit(&self, event: ConnectionEvent) -> bool {
        if !self.status.is_current(self.generation) {
            return false;
        }
        if self.tx.send(event).is_err() {
            debug!("Sync event receiver dropped, stopping connection task");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{event, Script, ScriptedTransport};
    use events::DataType;
    use serde_json::json;
    use std::time::Duration;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(1000), Duration::from_secs(30), 5)
    }

    fn manager(transport: &Arc<ScriptedTransport>) -> EventSourceManager {
        let transport: Arc<dyn Transport> = transport.clone();
        EventSourceManager::new(ConnectionConfig::new("http://test/api/sync/events", policy()), transport)
    }

    async fn drain(rx: &mut UnboundedReceiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event);
        }
        seen
    }

    fn scheduled(events: &[ConnectionEvent]) -> Vec<(u32, Duration)> {
        events
            .iter()
            .filter_map(|event| match event {
                ConnectionEvent::ReconnectScheduled { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_errors_schedule_at_most_max_attempts() {
        let transport = Arc::new(ScriptedTransport::refusing());
        let manager = manager(&transport);
        let started = tokio::time::Instant::now();

        let mut rx = manager.connect(None);
        let seen = drain(&mut rx).await;

        let expected: Vec<(u32, Duration)> =
            (0..5).map(|n| (n + 1, policy().delay_for(n))).collect();
        assert_eq!(scheduled(&seen), expected);
        assert_eq!(seen.last(), Some(&ConnectionEvent::GaveUp { attempts: 5 }));
        // The initial attempt plus five reconnects; the sixth error schedules nothing
        assert_eq!(transport.opens(), 6);
        assert_eq!(
            seen.iter()
                .filter(|event| matches!(event, ConnectionEvent::Disconnected { .. }))
                .count(),
            6
        );

        // 1000 + 1500 + 2250 + 3375 + 5063
        assert_eq!(started.elapsed(), Duration::from_millis(13188));
        assert!(!manager.get_connection_status());
        assert_eq!(manager.reconnect_attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_resets_the_reconnect_counter() {
        let transport = Arc::new(ScriptedTransport::new([
            Script::Refuse,
            Script::Refuse,
            Script::Close(vec![]),
        ]));
        let manager = manager(&transport);

        let mut rx = manager.connect(None);
        let seen = drain(&mut rx).await;

        let attempts: Vec<u32> = scheduled(&seen).into_iter().map(|(n, _)| n).collect();
        assert_eq!(attempts, vec![1, 2, 1, 2, 3, 4, 5]);
        assert_eq!(
            seen.iter()
                .filter(|event| **event == ConnectionEvent::Connected)
                .count(),
            1
        );
        assert_eq!(transport.opens(), 8);
        let closed = seen
            .iter()
            .find_map(|event| match event {
                ConnectionEvent::Disconnected { reason } if reason.contains("Closed") => {
                    Some(reason.clone())
                }
                _ => None,
            })
            .expect("the server closing the stream is reported");
        assert!(closed.contains("stream closed by server"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_reconnect_attempts_after_give_up() {
        let transport = Arc::new(ScriptedTransport::refusing());
        let manager = manager(&transport);

        let mut rx = manager.connect(None);
        drain(&mut rx).await;
        assert_eq!(manager.reconnect_attempts(), 5);

        manager.disconnect();
        assert_eq!(manager.reconnect_attempts(), 0);

        let mut rx = manager.connect(None);
        assert!(matches!(
            rx.recv().await,
            Some(ConnectionEvent::Disconnected { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ConnectionEvent::ReconnectScheduled { attempt: 1, .. })
        ));
        assert_eq!(manager.reconnect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_unanswered_open_still_schedules_reconnect() {
        use crate::transport::HttpTransport;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/sync/events", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(Duration::from_millis(200)).unwrap());
        let manager = EventSourceManager::new(ConnectionConfig::new(url, policy()), transport);

        let mut rx = manager.connect(None);
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("a silent server must not wedge the connection task");
        let reason = match first {
            Some(ConnectionEvent::Disconnected { reason }) => reason,
            other => panic!("expected a disconnect, got {other:?}"),
        };
        assert!(reason.contains("Network"));
        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_millis(1000),
            })
        );
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_forwarded_and_malformed_ones_counted() {
        let transport = Arc::new(ScriptedTransport::new([Script::Hold(vec![
            event("message", "{not json"),
            event(
                "message",
                &json!({"type": "data-changed", "data": {"type": "products", "data": [{"id": "p1"}]}})
                    .to_string(),
            ),
            event("heartbeat", ""),
        ])]));
        let manager = manager(&transport);

        let mut rx = manager.connect(Some("token-1".to_string()));

        assert_eq!(rx.recv().await, Some(ConnectionEvent::Connected));
        assert!(manager.get_connection_status());
        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::Message(ServerEvent::DataChanged {
                data_type: DataType::Products,
                data: json!([{"id": "p1"}]),
            }))
        );
        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::Message(ServerEvent::Heartbeat))
        );
        assert_eq!(manager.parse_error_count(), 1);
        assert_eq!(transport.tokens(), vec![Some("token-1".to_string())]);

        manager.disconnect();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_triggers_reconnect() {
        let transport = Arc::new(ScriptedTransport::new([
            Script::Close(vec![Err(crate::error::Error::connection(
                crate::error::ConnectionErrorKind::Stream,
                "reset by peer",
            ))]),
            Script::Hold(vec![]),
        ]));
        let manager = manager(&transport);

        let mut rx = manager.connect(None);

        assert_eq!(rx.recv().await, Some(ConnectionEvent::Connected));
        let Some(ConnectionEvent::Disconnected { reason }) = rx.recv().await else {
            panic!("expected a disconnect");
        };
        assert!(reason.contains("reset by peer"));
        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_millis(1000),
            })
        );
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Connected));
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(manager.get_connection_status());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new([Script::Hold(vec![])]));
        let manager = manager(&transport);

        // Never connected
        manager.disconnect();
        assert!(!manager.get_connection_status());

        let mut rx = manager.connect(None);
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Connected));

        manager.disconnect();
        manager.disconnect();

        assert!(!manager.get_connection_status());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let transport = Arc::new(ScriptedTransport::refusing());
        let manager = manager(&transport);

        let mut rx = manager.connect(None);
        assert!(matches!(
            rx.recv().await,
            Some(ConnectionEvent::Disconnected { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ConnectionEvent::ReconnectScheduled { attempt: 1, .. })
        ));

        manager.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(rx.recv().await, None);
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_replaces_previous_connection() {
        let transport = Arc::new(ScriptedTransport::new([
            Script::Hold(vec![]),
            Script::Hold(vec![]),
        ]));
        let manager = manager(&transport);

        let mut first = manager.connect(None);
        assert_eq!(first.recv().await, Some(ConnectionEvent::Connected));

        let mut second = manager.connect(None);
        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await, Some(ConnectionEvent::Connected));
        assert!(manager.get_connection_status());
        assert_eq!(transport.opens(), 2);
    }
}
