use crate::backoff::ReconnectPolicy;
use crate::message::ServerEvent;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Where to connect and how to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub url: String,
    pub policy: ReconnectPolicy,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
        }
    }
}

/// What the connection task reports upward, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The stream opened; the reconnect counter has been reset.
    Connected,
    /// A decoded event from the server.
    Message(ServerEvent),
    /// The stream failed or closed.
    Disconnected { reason: String },
    /// A reconnect will be attempted after `delay`. `attempt` counts from 1
    /// since the last successful open.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// No attempts left; the task has stopped.
    GaveUp { attempts: u32 },
}

/// Observable state shared between a manager and its connection task.
///
/// Every connect or disconnect starts a new generation. A task only updates
/// state while its generation is current, so a task that is being aborted
/// cannot flip the status after `disconnect()` returned.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    generation: AtomicU64,
    connected: AtomicBool,
    reconnect_attempts: AtomicU32,
    parse_errors: AtomicU64,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Events dropped because their payload could not be decoded.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::SeqCst)
    }

    /// Invalidate the running task (if any), mark the link down and clear
    /// its reconnect count.
    pub(crate) fn next_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        generation
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn mark_connected(&self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.connected.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        true
    }

    pub(crate) fn mark_disconnected(&self, generation: u64) {
        if self.is_current(generation) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn set_reconnect_attempts(&self, generation: u64, attempts: u32) {
        if self.is_current(generation) {
            self.reconnect_attempts.store(attempts, Ordering::SeqCst);
        }
    }

    /// Returns the running total.
    pub(crate) fn record_parse_error(&self) -> u64 {
        self.parse_errors.fetch_add(1, Ordering::SeqCst) + 1
    }
}
