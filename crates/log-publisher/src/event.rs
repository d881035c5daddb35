// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single harvested log line, or a pure state update when `bytes` is zero.
///
/// State-update events carry file offsets the registrar has to persist but no
/// content for the remote endpoint, so they travel with their batch to the
/// registrar and are left out of the wire payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub source: String,
    pub offset: u64,
    /// Size of the raw line read from the source.
    pub bytes: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

/// Ordered sequence of events harvested together.
pub type Batch = Vec<Event>;

impl Event {
    #[must_use]
    pub fn new(source: impl Into<String>, offset: u64, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            source: source.into(),
            offset,
            bytes: message.len() as u64,
            message,
            fields: Map::new(),
        }
    }

    /// Creates an event that only advances the registrar state of `source`.
    #[must_use]
    pub fn state_update(source: impl Into<String>, offset: u64) -> Self {
        Self {
            source: source.into(),
            offset,
            bytes: 0,
            message: String::new(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Whether the event carries content that has to be sent over the wire.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.bytes > 0
    }

    /// Document shape sent to endpoints: custom fields flattened next to the
    /// line metadata.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert("source".to_string(), Value::from(self.source.as_str()));
        doc.insert("offset".to_string(), Value::from(self.offset));
        doc.insert("message".to_string(), Value::from(self.message.as_str()));
        Value::Object(doc)
    }
}

/// Copies the events of `batch` that carry data, preserving order.
#[must_use]
pub fn wire_payload(batch: &[Event]) -> Batch {
    batch.iter().filter(|event| event.has_data()).cloned().collect()
}
