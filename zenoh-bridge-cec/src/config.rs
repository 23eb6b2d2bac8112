//! Configuration for the CEC bridge.

use std::path::PathBuf;
use std::time::Duration;

use cecsight_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, ZenohConfig};
use cecsight_common::is_valid_topic;
use cecsight_common::topic::DEFAULT_BASE_TOPIC;
use serde::{Deserialize, Serialize};

use crate::cec::{LogicalAddress, SimulatedDevice};
use crate::monitor::MonitorConfig;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CecBridgeConfig {
    /// Zenoh connection settings.
    pub zenoh: ZenohConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bus and device settings.
    #[serde(default)]
    pub cec: CecConfig,

    /// The bridge's own availability topic.
    #[serde(default)]
    pub status: StatusConfig,

    /// Hub birth signal that triggers a full resync.
    #[serde(default)]
    pub hub: HubConfig,

    /// Home Assistant discovery.
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,
}

/// CEC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CecConfig {
    /// Base topic (default: "cecsight/cec").
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Directory holding the device store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Publish state topics as retained (default: false).
    #[serde(default)]
    pub retain_state: bool,

    /// Which bus adapter to open.
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Cadence of the active source monitor.
    #[serde(default = "default_active_source_monitor")]
    pub active_source: MonitorSettings,

    /// Cadence of each device's power monitor.
    #[serde(default = "default_power_monitor")]
    pub power: MonitorSettings,

    /// Re-scan the bus for devices every N seconds (default: 60, 0 = only
    /// at startup). Addresses the bus stops reporting are forgotten on each
    /// scan.
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,
}

fn default_base_topic() -> String {
    DEFAULT_BASE_TOPIC.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/cecsight")
}

fn default_rescan_interval() -> u64 {
    60
}

fn default_active_source_monitor() -> MonitorSettings {
    MonitorSettings {
        idle_interval_secs: 600,
        burst_interval_secs: 10,
        burst_duration_secs: 60,
    }
}

fn default_power_monitor() -> MonitorSettings {
    MonitorSettings {
        idle_interval_secs: 300,
        burst_interval_secs: 5,
        burst_duration_secs: 60,
    }
}

impl Default for CecConfig {
    fn default() -> Self {
        Self {
            base_topic: default_base_topic(),
            data_dir: default_data_dir(),
            retain_state: false,
            adapter: AdapterConfig::default(),
            active_source: default_active_source_monitor(),
            power: default_power_monitor(),
            rescan_interval_secs: default_rescan_interval(),
        }
    }
}

impl CecConfig {
    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.rescan_interval_secs > 0).then(|| Duration::from_secs(self.rescan_interval_secs))
    }
}

/// Bus adapter selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AdapterConfig {
    /// In-memory bus with configured devices.
    Simulated {
        /// Logical address claimed by the bridge (default: 1, recording device).
        #[serde(default = "default_own_address")]
        own_address: LogicalAddress,
        #[serde(default)]
        devices: Vec<SimulatedDevice>,
        /// Logical address of the initial active source.
        #[serde(default)]
        active_source: Option<LogicalAddress>,
    },
}

fn default_own_address() -> LogicalAddress {
    LogicalAddress::RECORDING_1
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::Simulated {
            own_address: default_own_address(),
            devices: Vec::new(),
            active_source: None,
        }
    }
}

/// Monitor cadence in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub idle_interval_secs: u64,
    pub burst_interval_secs: u64,
    pub burst_duration_secs: u64,
}

impl MonitorSettings {
    pub fn to_monitor_config(self) -> MonitorConfig {
        MonitorConfig::new(
            Duration::from_secs(self.idle_interval_secs),
            Duration::from_secs(self.burst_interval_secs),
            Duration::from_secs(self.burst_duration_secs),
        )
    }

    fn validate(&self, section: &str) -> Result<(), BridgeError> {
        if self.idle_interval_secs == 0 || self.burst_interval_secs == 0 {
            return Err(BridgeError::validation(format!(
                "cec.{}: intervals must be greater than 0",
                section
            )));
        }
        if self.burst_interval_secs > self.burst_duration_secs {
            return Err(BridgeError::validation(format!(
                "cec.{}: burst_interval_secs ({}) exceeds burst_duration_secs ({})",
                section, self.burst_interval_secs, self.burst_duration_secs
            )));
        }
        Ok(())
    }
}

/// Bridge availability topic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Plain-text availability topic. Disabled when unset.
    #[serde(default)]
    pub topic: Option<String>,

    #[serde(default = "default_birth_message")]
    pub birth_message: String,

    #[serde(default = "default_will_message")]
    pub will_message: String,
}

fn default_birth_message() -> String {
    "online".to_string()
}

fn default_will_message() -> String {
    "offline".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            topic: None,
            birth_message: default_birth_message(),
            will_message: default_will_message(),
        }
    }
}

impl StatusConfig {
    /// `(topic, birth, will)` when an availability topic is configured.
    pub fn availability(&self) -> Option<(String, String, String)> {
        self.topic.as_ref().map(|topic| {
            (
                topic.clone(),
                self.birth_message.clone(),
                self.will_message.clone(),
            )
        })
    }
}

/// Hub birth signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Topic the hub announces itself on. Disabled when unset.
    #[serde(default)]
    pub birth_topic: Option<String>,

    #[serde(default = "default_birth_message")]
    pub birth_payload: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            birth_topic: None,
            birth_payload: default_birth_message(),
        }
    }
}

/// Home Assistant discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    #[serde(default)]
    pub enable: bool,

    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            enable: false,
            discovery_prefix: default_discovery_prefix(),
        }
    }
}

fn check_topic(field: &str, topic: &str) -> Result<(), BridgeError> {
    if is_valid_topic(topic) {
        Ok(())
    } else {
        Err(BridgeError::validation(format!(
            "{} '{}' is not a valid topic",
            field, topic
        )))
    }
}

impl BridgeConfig for CecBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn base_topic(&self) -> &str {
        &self.cec.base_topic
    }

    fn validate(&self) -> Result<(), BridgeError> {
        check_topic("cec.base_topic", &self.cec.base_topic)?;
        self.cec.active_source.validate("active_source")?;
        self.cec.power.validate("power")?;

        if let Some(topic) = &self.status.topic {
            check_topic("status.topic", topic)?;
        }
        if let Some(topic) = &self.hub.birth_topic {
            check_topic("hub.birth_topic", topic)?;
        }
        if self.home_assistant.enable {
            check_topic(
                "home_assistant.discovery_prefix",
                &self.home_assistant.discovery_prefix,
            )?;
        }

        match &self.cec.adapter {
            AdapterConfig::Simulated {
                own_address,
                devices,
                ..
            } => {
                if own_address.is_broadcast() {
                    return Err(BridgeError::validation(
                        "cec.adapter.own_address cannot be the broadcast address",
                    ));
                }
                for (i, device) in devices.iter().enumerate() {
                    if devices[..i]
                        .iter()
                        .any(|d| d.logical_address == device.logical_address)
                    {
                        return Err(BridgeError::validation(format!(
                            "cec.adapter.devices: logical address {} used twice",
                            device.logical_address
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cec::{PhysicalAddress, PowerStatus, VendorId};

    #[test]
    fn test_minimal_config() {
        let config = CecBridgeConfig::parse(r#"{ zenoh: { mode: "peer" } }"#).unwrap();
        assert_eq!(config.base_topic(), "cecsight/cec");
        assert_eq!(config.cec.data_dir, PathBuf::from("/var/lib/cecsight"));
        assert_eq!(config.cec.active_source.idle_interval_secs, 600);
        assert_eq!(config.cec.power.burst_interval_secs, 5);
        assert_eq!(config.cec.rescan_interval(), Some(Duration::from_secs(60)));
        assert!(config.status.availability().is_none());
        assert!(!config.home_assistant.enable);
    }

    #[test]
    fn test_full_config() {
        let config = CecBridgeConfig::parse(
            r#"{
                zenoh: { mode: "client", connect: ["tcp/127.0.0.1:7447"] },
                logging: { level: "debug", format: "json" },
                cec: {
                    base_topic: "home/cec",
                    data_dir: "/tmp/cecsight",
                    retain_state: true,
                    rescan_interval_secs: 120,
                    adapter: {
                        type: "simulated",
                        own_address: 4,
                        devices: [
                            { logical_address: 0, physical_address: "0.0.0.0", vendor_id: 240, osd_name: "TV" },
                            { logical_address: 5, physical_address: "1.0.0.0", vendor_id: 41182, osd_name: "AVR", power: "standby" },
                        ],
                        active_source: 0,
                    },
                    power: { idle_interval_secs: 120, burst_interval_secs: 2, burst_duration_secs: 30 },
                },
                status: { topic: "home/cec/bridge" },
                hub: { birth_topic: "homeassistant/status" },
                home_assistant: { enable: true },
            }"#,
        )
        .unwrap();

        assert_eq!(config.cec.rescan_interval(), Some(Duration::from_secs(120)));
        assert_eq!(
            config.status.availability(),
            Some((
                "home/cec/bridge".to_string(),
                "online".to_string(),
                "offline".to_string()
            ))
        );
        assert_eq!(config.hub.birth_payload, "online");
        assert_eq!(
            config.cec.power.to_monitor_config().burst_duration,
            Duration::from_secs(30)
        );

        let AdapterConfig::Simulated {
            own_address,
            devices,
            active_source,
        } = &config.cec.adapter;
        assert_eq!(*own_address, LogicalAddress::PLAYBACK_1);
        assert_eq!(*active_source, Some(LogicalAddress::TV));
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].physical_address, PhysicalAddress::new(0x1000));
        assert_eq!(devices[1].vendor_id, VendorId::new(0xA0DE));
        assert_eq!(devices[1].power, PowerStatus::Standby);
        assert_eq!(devices[0].power, PowerStatus::On);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/cec.json5");
        let config = CecBridgeConfig::load(path).unwrap();
        assert_eq!(config.hub.birth_topic.as_deref(), Some("homeassistant/status"));
        let AdapterConfig::Simulated { devices, .. } = &config.cec.adapter;
        assert_eq!(devices.len(), 3);
    }

    #[test]
    fn test_rejects_bad_topics() {
        assert!(CecBridgeConfig::parse(r#"{ zenoh: {}, cec: { base_topic: "" } }"#).is_err());
        assert!(CecBridgeConfig::parse(r#"{ zenoh: {}, cec: { base_topic: "cec/*" } }"#).is_err());
        assert!(
            CecBridgeConfig::parse(
                r#"{ zenoh: {}, home_assistant: { enable: true, discovery_prefix: "" } }"#
            )
            .is_err()
        );
        // prefix is only checked when discovery is on
        assert!(
            CecBridgeConfig::parse(r#"{ zenoh: {}, home_assistant: { discovery_prefix: "" } }"#)
                .is_ok()
        );
    }

    #[test]
    fn test_rejects_bad_cadence() {
        let zero = r#"{ zenoh: {}, cec: { power: { idle_interval_secs: 0, burst_interval_secs: 1, burst_duration_secs: 5 } } }"#;
        assert!(CecBridgeConfig::parse(zero).is_err());

        let inverted = r#"{ zenoh: {}, cec: { active_source: { idle_interval_secs: 60, burst_interval_secs: 10, burst_duration_secs: 5 } } }"#;
        assert!(CecBridgeConfig::parse(inverted).is_err());
    }

    #[test]
    fn test_rejects_duplicate_simulated_devices() {
        let config = r#"{ zenoh: {}, cec: { adapter: { type: "simulated", devices: [
            { logical_address: 4, physical_address: "1.0.0.0", vendor_id: 1, osd_name: "A" },
            { logical_address: 4, physical_address: "2.0.0.0", vendor_id: 1, osd_name: "B" },
        ] } } }"#;
        assert!(CecBridgeConfig::parse(config).is_err());
    }
}
