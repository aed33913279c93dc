use crate::error::{Error, MessageErrorKind};
use events::DataType;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Named SSE event announcing a change to one data type.
pub const DATA_CHANGED: &str = "data-changed";
/// Named SSE event asking clients to refresh everything.
pub const FORCE_SYNC: &str = "force-sync";
/// Named SSE keep-alive event.
pub const HEARTBEAT: &str = "heartbeat";
/// Event name the SSE format assigns when the server sends no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Trait for getting the SSE event type name
pub trait EventType {
    fn event_type(&self) -> &str;
}

/// A decoded event from the sync stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// New contents for one data type.
    DataChanged { data_type: DataType, data: Value },
    /// The server asked for a full refresh. `data` holds whatever payloads it
    /// pushed along; an empty map means the client should pull everything.
    ForceSync { data: BTreeMap<DataType, Value> },
    Heartbeat,
    /// Well-formed event this client has no handling for.
    Other { event_type: String, data: Value },
}

impl EventType for ServerEvent {
    fn event_type(&self) -> &str {
        match self {
            ServerEvent::DataChanged { .. } => DATA_CHANGED,
            ServerEvent::ForceSync { .. } => FORCE_SYNC,
            ServerEvent::Heartbeat => HEARTBEAT,
            ServerEvent::Other { event_type, .. } => event_type,
        }
    }
}

/// `{ "type": ..., "data": ... }`, the shape of every JSON payload on the stream.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Decode one SSE event into a `ServerEvent`.
///
/// `event_name` is the SSE `event:` field (`message` when absent) and `data`
/// the raw `data:` text.
pub fn parse(event_name: &str, data: &str) -> Result<ServerEvent, Error> {
    let data = data.trim();

    match event_name {
        HEARTBEAT => Ok(ServerEvent::Heartbeat),
        DATA_CHANGED => parse_data_changed(parse_json(data)?),
        FORCE_SYNC => {
            let payload = if data.is_empty() {
                Value::Null
            } else {
                parse_json(data)?
            };
            parse_force_sync(payload)
        }
        DEFAULT_EVENT | "" => parse_envelope(parse_json(data)?),
        other => Ok(ServerEvent::Other {
            event_type: other.to_string(),
            data: serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string())),
        }),
    }
}

fn parse_json(data: &str) -> Result<Value, Error> {
    if data.is_empty() {
        return Err(Error::message(MessageErrorKind::Empty, "event has no data"));
    }
    Ok(serde_json::from_str(data)?)
}

fn parse_envelope(payload: Value) -> Result<ServerEvent, Error> {
    let envelope = Envelope::deserialize(payload)?;
    let kind = envelope
        .kind
        .ok_or_else(|| Error::message(MessageErrorKind::MissingType, "payload has no type"))?;

    match kind.as_str() {
        DATA_CHANGED => parse_data_changed(envelope.data),
        FORCE_SYNC => parse_force_sync(envelope.data),
        HEARTBEAT => Ok(ServerEvent::Heartbeat),
        other => match DataType::from_str(other) {
            Ok(data_type) => Ok(ServerEvent::DataChanged {
                data_type,
                data: envelope.data,
            }),
            Err(_) => Ok(ServerEvent::Other {
                event_type: kind,
                data: envelope.data,
            }),
        },
    }
}

/// `data-changed` payloads must name a known data type.
fn parse_data_changed(payload: Value) -> Result<ServerEvent, Error> {
    let envelope = Envelope::deserialize(payload)?;
    let kind = envelope.kind.ok_or_else(|| {
        Error::message(MessageErrorKind::MissingType, "data-changed payload has no type")
    })?;
    let data_type = DataType::from_str(&kind)
        .map_err(|e| Error::message(MessageErrorKind::UnknownDataType(kind.clone()), &e.to_string()))?;

    Ok(ServerEvent::DataChanged {
        data_type,
        data: envelope.data,
    })
}

/// Accepts `null`, a single `{type, data}` change, or an object keyed by data
/// type names. Keys that are not data types are ignored.
fn parse_force_sync(payload: Value) -> Result<ServerEvent, Error> {
    let mut data = BTreeMap::new();

    match payload {
        Value::Null => {}
        Value::Object(mut fields) => {
            let single = fields
                .get("type")
                .and_then(Value::as_str)
                .and_then(|kind| DataType::from_str(kind).ok());

            if let Some(data_type) = single {
                data.insert(data_type, fields.remove("data").unwrap_or(Value::Null));
            } else {
                for (key, value) in fields {
                    if let Ok(data_type) = DataType::from_str(&key) {
                        data.insert(data_type, value);
                    }
                }
            }
        }
        _ => {
            return Err(Error::message(
                MessageErrorKind::InvalidJson,
                "force-sync payload must be an object",
            ))
        }
    }

    Ok(ServerEvent::ForceSync { data })
}
