//! Bridges from bus state to published topics.

pub mod active_source;
pub mod power;

pub use active_source::{ActiveSourceBridge, BirthHandler};
pub use power::{PowerBridge, PowerState};

use std::sync::Arc;

use cecsight_bridge_framework::{Qos, Sink, TopicBuilder};

use crate::cec::CecBus;
use crate::device::{Device, DeviceRegistry};

/// Property published by the active source bridge.
pub const IS_ACTIVE_SOURCE: &str = "is_active_source";

/// Property published by the power bridge.
pub const POWER: &str = "power";

/// Payload for a true / on state.
pub const ON: &str = "on";

/// Payload for a false / off state.
pub const OFF: &str = "off";

/// Collaborators shared by every bridge.
#[derive(Clone)]
pub struct BridgeContext {
    pub bus: Arc<dyn CecBus>,
    pub sink: Arc<dyn Sink>,
    pub registry: Arc<DeviceRegistry>,
    pub topics: TopicBuilder,
    /// Publish state topics as retained.
    pub retain: bool,
}

impl BridgeContext {
    /// State topic for `property` of `device`.
    pub fn state_topic(&self, device: &Device, property: &str) -> String {
        self.topics.device(&self.registry.topic(device), property)
    }

    /// Command topic for `property` of `device`.
    pub fn command_topic(&self, device: &Device, property: &str) -> String {
        self.topics.command(&self.registry.topic(device), property)
    }

    /// Publish a state value without blocking.
    pub fn publish_state(&self, device: &Device, property: &str, value: &str) {
        let topic = self.state_topic(device, property);
        tracing::debug!(device = %device.id, topic = %topic, value, "Publishing state");
        self.sink
            .publish_text(&topic, Qos::AtMostOnce, self.retain, value);
    }
}
