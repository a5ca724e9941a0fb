//! Redis Streams client for `ml:run-events`: at-least-once field-map
//! log, read via `XREAD BLOCK` and written via `XADD`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

pub const STREAM_KEY: &str = "ml:run-events";
const REQUESTED_EVENT_TYPE: &str = "run.requested";
pub const COMPLETED_EVENT_TYPE: &str = "run.completed";
pub const FAILED_EVENT_TYPE: &str = "run.failed";

const REQUIRED_FIELDS: &[&str] = &["eventId", "eventType", "eventVersion", "occurredAt", "runId", "payload"];

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("malformed event: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunInput {
    #[serde(rename = "queryId")]
    pub query_id: Option<String>,
    #[serde(rename = "queryText")]
    pub query_text: String,
    pub domain: String,
    #[serde(rename = "searchQuery")]
    pub search_query: String,
}

#[derive(Debug, Clone)]
pub struct RunRequestedEvent {
    pub event_id: String,
    pub event_version: i64,
    pub occurred_at: DateTime<Utc>,
    pub run_id: String,
    pub run_inputs: Vec<RunInput>,
}

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

pub struct EventStreamClient {
    conn: redis::aio::MultiplexedConnection,
}

impl EventStreamClient {
    pub async fn connect(redis_url: &str) -> Result<Self, EventError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { conn })
    }

    /// Reads up to 10 messages, blocking up to 1s, starting after `last_id`.
    pub async fn read_batch(&mut self, last_id: &str) -> Result<Vec<StreamMessage>, EventError> {
        let reply: redis::streams::StreamReadReply = self
            .conn
            .xread_options(
                &[STREAM_KEY],
                &[last_id],
                &redis::streams::StreamReadOptions::default().count(10).block(1000),
            )
            .await?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let mut fields = HashMap::new();
                for (k, v) in entry.map {
                    if let redis::Value::BulkString(bytes) = v {
                        if let Ok(s) = String::from_utf8(bytes) {
                            fields.insert(k, s);
                        }
                    }
                }
                out.push(StreamMessage { id: entry.id, fields });
            }
        }
        Ok(out)
    }

    pub async fn publish(
        &mut self,
        event_type: &str,
        run_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), EventError> {
        let fields: Vec<(String, String)> = vec![
            ("eventId".to_string(), uuid::Uuid::new_v4().to_string()),
            ("eventType".to_string(), event_type.to_string()),
            ("eventVersion".to_string(), "1".to_string()),
            ("occurredAt".to_string(), crate::domain::now_rfc3339()),
            ("runId".to_string(), run_id.to_string()),
            ("payload".to_string(), payload.to_string()),
        ];
        let _: String = self.conn.xadd(STREAM_KEY, "*", &fields).await?;
        Ok(())
    }
}

/// Validates required fields and parses a `run.requested` message. A
/// malformed event is reported as `EventError::Malformed` so the caller
/// can log-and-skip without aborting the poll loop.
pub fn parse_run_requested_event(message: &StreamMessage) -> Result<RunRequestedEvent, EventError> {
    for field in REQUIRED_FIELDS {
        match message.fields.get(*field) {
            Some(v) if !v.is_empty() => {}
            _ => {
                return Err(EventError::Malformed(format!("missing field {field}")));
            }
        }
    }

    let event_type = &message.fields["eventType"];
    if event_type != REQUESTED_EVENT_TYPE {
        return Err(EventError::Malformed(format!(
            "unexpected eventType {event_type}"
        )));
    }

    let event_version: i64 = message.fields["eventVersion"]
        .parse()
        .map_err(|_| EventError::Malformed("eventVersion must be an integer".to_string()))?;

    let occurred_at_raw = message.fields["occurredAt"].replace('Z', "+00:00");
    let occurred_at = DateTime::parse_from_rfc3339(&occurred_at_raw)
        .map_err(|_| EventError::Malformed("occurredAt is not RFC3339".to_string()))?
        .with_timezone(&Utc);

    let payload: serde_json::Value = serde_json::from_str(&message.fields["payload"])
        .map_err(|_| EventError::Malformed("payload is not valid JSON".to_string()))?;
    if !payload.is_object() {
        return Err(EventError::Malformed("payload must be a JSON object".to_string()));
    }

    let run_inputs: Vec<RunInput> = match payload.get("runInputs") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|_| EventError::Malformed("runInputs is malformed".to_string()))?,
        None => Vec::new(),
    };

    for input in &run_inputs {
        if input.query_text.trim().is_empty()
            || input.domain.trim().is_empty()
            || input.search_query.trim().is_empty()
        {
            return Err(EventError::Malformed(
                "runInputs entries require non-empty queryText/domain/searchQuery".to_string(),
            ));
        }
    }

    Ok(RunRequestedEvent {
        event_id: message.fields["eventId"].clone(),
        event_version,
        occurred_at,
        run_id: message.fields["runId"].clone(),
        run_inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(fields: &[(&str, &str)]) -> StreamMessage {
        StreamMessage {
            id: "1-0".to_string(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn parses_well_formed_run_requested_event() {
        let payload = serde_json::json!({
            "runInputs": [{"queryId": null, "queryText": "engineer", "domain": "example.com", "searchQuery": "site:example.com engineer"}]
        });
        let message = message_with(&[
            ("eventId", "e1"),
            ("eventType", "run.requested"),
            ("eventVersion", "1"),
            ("occurredAt", "2026-01-01T00:00:00Z"),
            ("runId", "run-1"),
            ("payload", &payload.to_string()),
        ]);
        let event = parse_run_requested_event(&message).unwrap();
        assert_eq!(event.run_inputs.len(), 1);
    }

    #[test]
    fn rejects_missing_required_field() {
        let message = message_with(&[
            ("eventId", "e1"),
            ("eventType", "run.requested"),
            ("eventVersion", "1"),
            ("occurredAt", "2026-01-01T00:00:00Z"),
            ("runId", "run-1"),
        ]);
        let err = parse_run_requested_event(&message).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn rejects_run_input_with_empty_query_text() {
        let payload = serde_json::json!({
            "runInputs": [{"queryId": null, "queryText": "", "domain": "example.com", "searchQuery": "x"}]
        });
        let message = message_with(&[
            ("eventId", "e1"),
            ("eventType", "run.requested"),
            ("eventVersion", "1"),
            ("occurredAt", "2026-01-01T00:00:00Z"),
            ("runId", "run-1"),
            ("payload", &payload.to_string()),
        ]);
        let err = parse_run_requested_event(&message).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }
}
