//! How the manager obtains an event stream. `HttpTransport` is the real
//! network implementation; tests substitute scripted transports.

use crate::error::{ConnectionErrorKind, Error};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use log::*;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use std::time::Duration;

/// One undecoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// The `event:` field, `message` when the server sent none.
    pub event_type: String,
    pub data: String,
    pub id: String,
}

impl RawEvent {
    pub fn new(event_type: &str, data: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            data: data.to_string(),
            id: String::new(),
        }
    }
}

/// Events from an open connection. The stream ending or yielding an error
/// both mean the connection is gone.
pub type EventStream = BoxStream<'static, Result<RawEvent, Error>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. Resolves once the server has accepted the stream.
    async fn open(&self, url: &str, token: Option<&str>) -> Result<EventStream, Error>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl HttpTransport {
    /// `connect_timeout` bounds everything up to the response headers; the
    /// stream itself is long-lived.
    pub fn new(connect_timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str, token: Option<&str>) -> Result<EventStream, Error> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|err| {
                warn!("Failed to create authorization header value: {err:?}");
                Error::connection(ConnectionErrorKind::Builder, "invalid bearer token")
            })?;
            value.set_sensitive(true);
            request = request.header(AUTHORIZATION, value);
        }

        debug!("Opening event stream {url}");
        let response = tokio::time::timeout(self.connect_timeout, request.send())
            .await
            .map_err(|_| {
                Error::connection(
                    ConnectionErrorKind::Network,
                    &format!(
                        "no response from {url} within {}ms",
                        self.connect_timeout.as_millis()
                    ),
                )
            })??;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::connection(
                ConnectionErrorKind::UnexpectedStatus(status.as_u16()),
                &format!("event stream request to {url} returned {status}"),
            ));
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|item| match item {
                Ok(event) => Ok(RawEvent {
                    event_type: event.event,
                    data: event.data,
                    id: event.id,
                }),
                Err(err) => Err(Error::connection(
                    ConnectionErrorKind::Stream,
                    &err.to_string(),
                )),
            });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use mockito::{Matcher, Server};
    use tokio::net::TcpListener;

    /// Accepts connections and never answers them.
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}/api/sync/events")
    }

    #[tokio::test]
    async fn test_open_decodes_event_stream() {
        let mut server = Server::new_async().await;
        let body = "event: heartbeat\ndata: {}\n\n\
                    data: {\"type\":\"products\",\"data\":[]}\nid: 42\n\n";
        let mock = server
            .mock("GET", "/api/sync/events")
            .match_header("accept", "text/event-stream")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let url = format!("{}/api/sync/events", server.url());
        let stream = transport.open(&url, Some("secret")).await.unwrap();
        let events: Vec<RawEvent> = stream.map(|item| item.unwrap()).collect().await;

        mock.assert_async().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "heartbeat");
        assert!(matches!(events[1].event_type.as_str(), "message" | ""));
        assert_eq!(events[1].data, "{\"type\":\"products\",\"data\":[]}");
        assert_eq!(events[1].id, "42");
    }

    #[tokio::test]
    async fn test_open_without_token_sends_no_authorization() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/events")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let stream = transport
            .open(&format!("{}/events", server.url()), None)
            .await
            .unwrap();

        assert_eq!(stream.count().await, 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_open_rejects_error_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/events")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = match transport.open(&format!("{}/events", server.url()), None).await {
            Ok(_) => panic!("expected the 503 to be rejected"),
            Err(err) => err,
        };

        assert_eq!(
            err.error_kind,
            ErrorKind::Connection(ConnectionErrorKind::UnexpectedStatus(503))
        );
    }

    #[tokio::test]
    async fn test_open_times_out_when_server_never_answers() {
        let url = silent_server().await;
        let transport = HttpTransport::new(Duration::from_millis(200)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), transport.open(&url, None))
            .await
            .expect("open must give up on its own");
        let err = match result {
            Ok(_) => panic!("a server that never answers must not yield a stream"),
            Err(err) => err,
        };

        assert_eq!(
            err.error_kind,
            ErrorKind::Connection(ConnectionErrorKind::Network)
        );
    }
}
