//! Home Assistant discovery announcements.
//!
//! Each added device gets a retained `switch` config for its power state and
//! a `binary_sensor` config for its active source flag, published under
//! `<prefix>/<component>/<device id>/<property>/config`.

use std::sync::Arc;

use cecsight_bridge_framework::Qos;
use serde_json::{Value, json};

use crate::bridge::{ActiveSourceBridge, BridgeContext, IS_ACTIVE_SOURCE, OFF, ON, POWER};
use crate::device::Device;

/// Bridge availability as advertised to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub prefix: String,
    pub availability: Option<Availability>,
    /// Reported as the device software version.
    pub sw_version: String,
}

pub struct HomeAssistantDiscovery {
    ctx: BridgeContext,
    settings: DiscoverySettings,
}

impl HomeAssistantDiscovery {
    /// Announce every device the registry adds from now on.
    pub fn attach(ctx: BridgeContext, settings: DiscoverySettings) -> Arc<Self> {
        let discovery = Arc::new(Self { ctx, settings });

        let weak = Arc::downgrade(&discovery);
        discovery.ctx.registry.register_added_handler(move |device| {
            if let Some(d) = weak.upgrade() {
                d.announce(device);
            }
        });

        discovery
    }

    /// Re-announce all devices whenever the hub restarts.
    pub fn follow_births(self: &Arc<Self>, active_source: &ActiveSourceBridge) {
        let weak = Arc::downgrade(self);
        active_source.register_birth_handler(move || {
            if let Some(d) = weak.upgrade() {
                d.announce_all();
            }
        });
    }

    pub fn announce_all(&self) {
        for device in self.ctx.registry.devices() {
            self.announce(&device);
        }
    }

    pub fn announce(&self, device: &Device) {
        let mut power = self.entity(device, POWER);
        power["command_topic"] = Value::String(self.ctx.command_topic(device, POWER));
        power["state_on"] = Value::String(ON.to_string());
        power["state_off"] = Value::String(OFF.to_string());
        self.publish("switch", device, POWER, &power);

        let active = self.entity(device, IS_ACTIVE_SOURCE);
        self.publish("binary_sensor", device, IS_ACTIVE_SOURCE, &active);
    }

    /// Discovery topic for one entity.
    pub fn config_topic(&self, component: &str, device: &Device, property: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.settings.prefix.trim_end_matches('/'),
            component,
            device.id,
            property
        )
    }

    fn publish(&self, component: &str, device: &Device, property: &str, config: &Value) {
        let topic = self.config_topic(component, device, property);
        tracing::debug!(device = %device.id, topic = %topic, "Announcing to Home Assistant");
        self.ctx
            .sink
            .publish_json(&topic, Qos::AtLeastOnce, true, config);
    }

    fn entity(&self, device: &Device, property: &str) -> Value {
        let record = self.ctx.registry.record(device);
        let mut config = json!({
            "name": format!("{} {}", record.osd_name, property.replace('_', " ")),
            "unique_id": format!(
                "{}_{}_{}",
                device.id,
                property,
                self.ctx.topics.base().replace('/', "_")
            ),
            "state_topic": self.ctx.state_topic(device, property),
            "payload_on": ON,
            "payload_off": OFF,
            "device": {
                "identifiers": [format!("cecsight_{}", device.id)],
                "name": record.osd_name,
                "manufacturer": record
                    .vendor_id
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| record.vendor_id.to_string()),
                "sw_version": self.settings.sw_version,
            },
        });

        if let Some(availability) = &self.settings.availability {
            config["availability_topic"] = Value::String(availability.topic.clone());
            config["payload_available"] = Value::String(availability.payload_available.clone());
            config["payload_not_available"] =
                Value::String(availability.payload_not_available.clone());
        }
        config
    }
}
