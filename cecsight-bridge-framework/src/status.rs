//! Bridge status reporting.
//!
//! Two signals are published:
//! - a JSON [`BridgeStatus`] on `<base>/@/status`, and
//! - an optional plain-text availability topic carrying the configured
//!   birth message while running and the will message after shutdown.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::sink::{Qos, Sink};

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "cec").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// Additional metadata (protocol-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "running".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "offline".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a status with "error" state.
    pub fn error(
        bridge: impl Into<String>,
        version: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "error".to_string(),
            metadata: serde_json::json!({ "error": error.into() }),
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Key this status is published on.
    pub fn key(base_topic: &str) -> String {
        format!("{}/@/status", base_topic)
    }

    /// Publish this status, retained.
    pub fn publish(&self, sink: &dyn Sink, base_topic: &str) {
        match serde_json::to_value(self) {
            Ok(value) => sink.publish_json(&Self::key(base_topic), Qos::AtLeastOnce, true, &value),
            Err(e) => tracing::warn!(error = %e, "Failed to encode bridge status"),
        }
    }
}

/// Plain-text availability topic with birth and will messages.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Availability {
    topic: String,
    birth_message: String,
    will_message: String,
}

/// Helper to publish bridge status on (re)connection and shutdown.
pub struct StatusPublisher {
    sink: Arc<dyn Sink>,
    base_topic: String,
    bridge_name: String,
    version: String,
    availability: Option<Availability>,
    metadata: RwLock<Option<serde_json::Value>>,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        sink: Arc<dyn Sink>,
        base_topic: impl Into<String>,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            base_topic: base_topic.into(),
            bridge_name: bridge_name.into(),
            version: version.into(),
            availability: None,
            metadata: RwLock::new(None),
        }
    }

    /// Also publish birth/will messages on a plain availability topic.
    pub fn with_availability(
        mut self,
        topic: impl Into<String>,
        birth_message: impl Into<String>,
        will_message: impl Into<String>,
    ) -> Self {
        self.availability = Some(Availability {
            topic: topic.into(),
            birth_message: birth_message.into(),
            will_message: will_message.into(),
        });
        self
    }

    /// The availability topic, if configured.
    pub fn availability_topic(&self) -> Option<&str> {
        self.availability.as_ref().map(|a| a.topic.as_str())
    }

    /// Set the metadata attached to "running" statuses.
    pub fn set_metadata(&self, metadata: serde_json::Value) {
        *self.metadata.write().unwrap() = Some(metadata);
    }

    /// Publish "running" status (and the birth message) on every connection.
    pub fn install(self: &Arc<Self>) {
        let status = Arc::clone(self);
        self.sink
            .register_connected_handler(Arc::new(move || status.publish_running()));
    }

    /// Publish "running" status and the birth message.
    pub fn publish_running(&self) {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = self.metadata.read().unwrap().clone() {
            status = status.with_metadata(meta);
        }
        status.publish(self.sink.as_ref(), &self.base_topic);

        if let Some(availability) = &self.availability {
            self.sink.publish_text(
                &availability.topic,
                Qos::AtLeastOnce,
                true,
                &availability.birth_message,
            );
        }
    }

    /// Publish "offline" status and the will message.
    pub fn publish_offline(&self) {
        BridgeStatus::offline(&self.bridge_name, &self.version)
            .publish(self.sink.as_ref(), &self.base_topic);

        if let Some(availability) = &self.availability {
            self.sink.publish_text(
                &availability.topic,
                Qos::AtLeastOnce,
                true,
                &availability.will_message,
            );
        }
    }

    /// Publish "error" status.
    pub fn publish_error(&self, error: impl Into<String>) {
        BridgeStatus::error(&self.bridge_name, &self.version, error)
            .publish(self.sink.as_ref(), &self.base_topic);
    }
}
