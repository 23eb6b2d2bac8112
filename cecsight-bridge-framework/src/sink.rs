//! The pub/sub sink bridges publish to and receive commands from.

use std::sync::Arc;

/// Handler invoked for each message received on a subscription.
///
/// Receives the concrete topic and the raw payload.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Handler invoked whenever the sink (re)establishes connectivity.
pub type ConnectedHandler = Arc<dyn Fn() + Send + Sync>;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Qos {
    /// Best effort; may be dropped under congestion.
    #[default]
    AtMostOnce,
    /// Retried until delivered to the transport.
    AtLeastOnce,
    /// Delivered once; transports without this level treat it as `AtLeastOnce`.
    ExactlyOnce,
}

/// A pub/sub endpoint.
///
/// All operations are fire-and-forget: they return immediately and never
/// block the caller on network I/O. Failures are logged by the
/// implementation and the message is dropped.
pub trait Sink: Send + Sync {
    /// Publish a payload to a topic.
    ///
    /// Retained payloads are kept by the transport and delivered to
    /// subscribers that join later.
    fn publish(&self, topic: &str, qos: Qos, retained: bool, payload: Vec<u8>);

    /// Subscribe to a topic, calling `handler` for each received message.
    fn subscribe(&self, topic: &str, qos: Qos, handler: MessageHandler);

    /// Register a handler for (re)connection events.
    fn register_connected_handler(&self, handler: ConnectedHandler);

    /// Publish a UTF-8 text payload.
    fn publish_text(&self, topic: &str, qos: Qos, retained: bool, text: &str) {
        self.publish(topic, qos, retained, text.as_bytes().to_vec());
    }

    /// Serialize a value as JSON and publish it.
    ///
    /// Encoding failures are logged and the publish is dropped.
    fn publish_json(&self, topic: &str, qos: Qos, retained: bool, value: &serde_json::Value) {
        match serde_json::to_vec(value) {
            Ok(payload) => self.publish(topic, qos, retained, payload),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Failed to encode payload"),
        }
    }
}
