//! Scripted in-memory transport for exercising reconnect behaviour without a
//! network. Enabled for dependents through the `mock` feature.

use crate::error::{ConnectionErrorKind, Error};
use crate::transport::{EventStream, RawEvent, Transport};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// What one call to `open` does.
#[derive(Debug)]
pub enum Script {
    /// The connection attempt fails.
    Refuse,
    /// The stream opens, yields these items, then the server closes it.
    Close(Vec<Result<RawEvent, Error>>),
    /// The stream opens, yields these items, then stays open.
    Hold(Vec<Result<RawEvent, Error>>),
}

/// Plays back `Script`s in order; once they run out every attempt is refused.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// A transport that refuses every connection.
    pub fn refusing() -> Self {
        Self::default()
    }

    /// Number of connection attempts made so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Tokens passed to each `open` call.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

/// Shorthand for a raw event in a script.
pub fn event(event_type: &str, data: &str) -> Result<RawEvent, Error> {
    Ok(RawEvent::new(event_type, data))
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _url: &str, token: Option<&str>) -> Result<EventStream, Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.push(token.map(str::to_string));
        }

        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop_front())
            .unwrap_or(Script::Refuse);

        match script {
            Script::Refuse => Err(Error::connection(
                ConnectionErrorKind::Network,
                "connection refused",
            )),
            Script::Close(items) => Ok(stream::iter(items).boxed()),
            Script::Hold(items) => Ok(stream::iter(items).chain(stream::pending()).boxed()),
        }
    }
}
