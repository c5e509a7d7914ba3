//! The spool envelope.
//!
//! Listeners convert every accepted broker message into a `SpoolMessage` and
//! append it to the file queue; the loader consumes it from there. The spool
//! exclusively owns an envelope until the consumer commits it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KaijsError;

/// One broker message as persisted on the spool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolMessage {
    /// Locally unique id: `"<unix_seconds>-<broker_msg_id>"`.
    pub spool_id: String,

    /// Broker-assigned message id; stable across redeliveries.
    pub broker_msg_id: String,

    /// Normalized topic (leading `topic://` stripped).
    pub broker_topic: String,

    /// Which listener produced this envelope.
    pub provider_name: String,

    /// Unix seconds when the listener received the broker message.
    pub provider_ts: i64,

    /// Optional timestamp extracted from broker headers (unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_ts: Option<i64>,

    /// Decoded JSON payload.
    pub body: Value,

    /// Verbatim broker headers.
    pub broker_extra: Value,
}

impl SpoolMessage {
    /// Build an envelope for a message received now.
    pub fn new(
        provider_name: impl Into<String>,
        broker_msg_id: impl Into<String>,
        broker_topic: &str,
        body: Value,
        broker_extra: Value,
        header_ts: Option<i64>,
    ) -> Self {
        Self::new_at(
            Utc::now().timestamp(),
            provider_name,
            broker_msg_id,
            broker_topic,
            body,
            broker_extra,
            header_ts,
        )
    }

    /// Build an envelope with an explicit receive timestamp.
    pub fn new_at(
        provider_ts: i64,
        provider_name: impl Into<String>,
        broker_msg_id: impl Into<String>,
        broker_topic: &str,
        body: Value,
        broker_extra: Value,
        header_ts: Option<i64>,
    ) -> Self {
        let broker_msg_id = broker_msg_id.into();
        SpoolMessage {
            spool_id: format!("{provider_ts}-{broker_msg_id}"),
            broker_msg_id,
            broker_topic: normalize_topic(broker_topic),
            provider_name: provider_name.into(),
            provider_ts,
            header_ts,
            body,
            broker_extra,
        }
    }

    /// Check the envelope shape: required fields present and typed.
    ///
    /// A failing envelope is committed and dropped by the loader; it cannot
    /// be transformed into anything useful.
    pub fn check_shape(&self) -> Result<(), KaijsError> {
        if self.broker_msg_id.is_empty() {
            return Err(KaijsError::EnvelopeShape(
                "broker_msg_id is empty".to_string(),
            ));
        }
        if self.broker_topic.is_empty() {
            return Err(KaijsError::EnvelopeShape(
                "broker_topic is empty".to_string(),
            ));
        }
        if self.provider_name.is_empty() {
            return Err(KaijsError::EnvelopeShape(
                "provider_name is empty".to_string(),
            ));
        }
        if !self.body.is_object() {
            return Err(KaijsError::EnvelopeShape(format!(
                "body is not an object for {}",
                self.spool_id
            )));
        }
        Ok(())
    }

    /// The message body version string, if any.
    pub fn body_version(&self) -> Option<&str> {
        self.body.get("version").and_then(Value::as_str)
    }
}

/// Strip a leading `topic://` prefix exactly once.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .strip_prefix("topic://")
        .unwrap_or(topic)
        .to_string()
}
