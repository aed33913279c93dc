//! Ordered listener registry with fault reporting.

use log::*;
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub type ListenerError = Box<dyn StdError + Send + Sync>;
pub type ListenerResult = Result<(), ListenerError>;

/// Trait for reacting to events delivered through a `ListenerRegistry`.
/// Any `Fn(&E) -> ListenerResult` closure is a listener.
pub trait Listener<E>: Send + Sync {
    fn handle(&self, event: &E) -> ListenerResult;
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) -> ListenerResult + Send + Sync,
{
    fn handle(&self, event: &E) -> ListenerResult {
        self(event)
    }
}

/// Registry-unique listener identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// A listener that returned an error or panicked during dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerFault {
    /// Name of the registry the failing listener belongs to.
    pub channel: &'static str,
    pub listener: ListenerId,
    pub message: String,
}

impl fmt::Display for ListenerFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} listener {} failed: {}",
            self.channel, self.listener, self.message
        )
    }
}

/// Handle returned when subscribing. Dropping it leaves the listener
/// registered; call `unsubscribe` to remove it.
#[must_use = "the listener stays registered until unsubscribe() is called"]
pub struct Subscription {
    id: ListenerId,
    remove: Box<dyn Fn(ListenerId) -> bool + Send + Sync>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns false if it was already gone (or the
    /// registry no longer exists).
    pub fn unsubscribe(self) -> bool {
        (self.remove)(self.id)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

type Entry<E> = (ListenerId, Arc<dyn Listener<E>>);

/// Callbacks are invoked sequentially in registration order. A listener that
/// errors or panics does not prevent delivery to the remaining listeners; its
/// failure is returned to the caller as a `ListenerFault`.
pub struct ListenerRegistry<E> {
    channel: &'static str,
    next_id: AtomicU64,
    listeners: Mutex<Vec<Entry<E>>>,
}

impl<E: 'static> ListenerRegistry<E> {
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener and return a handle that can remove it.
    pub fn subscribe<L>(self: &Arc<Self>, listener: L) -> Subscription
    where
        L: Listener<E> + 'static,
    {
        let id = self.add(Arc::new(listener));
        let registry: Weak<Self> = Arc::downgrade(self);

        Subscription {
            id,
            remove: Box::new(move |id| {
                registry
                    .upgrade()
                    .map(|registry| registry.remove(id))
                    .unwrap_or(false)
            }),
        }
    }

    pub fn add(&self, listener: Arc<dyn Listener<E>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        debug!("Registered {} {}", self.channel, id);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if removed {
            debug!("Removed {} {}", self.channel, id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// The lock is released before callbacks run, so listeners may subscribe
    /// or unsubscribe from within a callback.
    pub fn dispatch(&self, event: &E) -> Vec<ListenerFault> {
        let snapshot: Vec<Entry<E>> = self.lock().clone();
        let mut faults = Vec::new();

        for (id, listener) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.handle(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            warn!("{} {} failed: {}", self.channel, id, message);
            faults.push(ListenerFault {
                channel: self.channel,
                listener: id,
                message,
            });
        }

        faults
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry<E>>> {
        // A panicking listener never holds this lock, but recover anyway.
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
