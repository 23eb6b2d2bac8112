//! Wiring of the bus, device registry and bridges.
//!
//! [`CecBridge::build`] constructs every component in a fixed order:
//! registry, discovery, active source bridge, power bridge. Dispatcher
//! handlers are registered in the same order, so by the time a bridge sees
//! a frame its initiator has already been resolved.

use std::sync::Arc;

use cecsight_bridge_framework::{Sink, TopicBuilder};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::{ActiveSourceBridge, BridgeContext, PowerBridge};
use crate::cec::{CecBus, CecMessage, EventDispatcher, LogicalAddress, SimulatedBus};
use crate::config::{AdapterConfig, CecBridgeConfig};
use crate::device::{DeviceRegistry, DeviceStore, StoreError};
use crate::discovery::{Availability, DiscoverySettings, HomeAssistantDiscovery};
use crate::error::{CecError, Result};
use crate::monitor::MonitorConfig;

/// Runtime settings derived from the configuration file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub topics: TopicBuilder,
    pub retain_state: bool,
    pub active_source: MonitorConfig,
    pub power: MonitorConfig,
    /// `(topic, payload)` of the hub birth signal.
    pub hub_birth: Option<(String, String)>,
    pub discovery: Option<DiscoverySettings>,
}

impl Settings {
    pub fn from_config(config: &CecBridgeConfig) -> Self {
        let discovery = config.home_assistant.enable.then(|| DiscoverySettings {
            prefix: config.home_assistant.discovery_prefix.clone(),
            availability: config.status.topic.as_ref().map(|topic| Availability {
                topic: topic.clone(),
                payload_available: config.status.birth_message.clone(),
                payload_not_available: config.status.will_message.clone(),
            }),
            sw_version: format!("CecSight {}", env!("CARGO_PKG_VERSION")),
        });

        Self {
            topics: TopicBuilder::new(&config.cec.base_topic),
            retain_state: config.cec.retain_state,
            active_source: config.cec.active_source.to_monitor_config(),
            power: config.cec.power.to_monitor_config(),
            hub_birth: config
                .hub
                .birth_topic
                .as_ref()
                .map(|topic| (topic.clone(), config.hub.birth_payload.clone())),
            discovery,
        }
    }
}

/// Open the configured bus adapter.
///
/// Returns the bus and the receiver its frames arrive on.
pub fn open_bus(
    adapter: &AdapterConfig,
) -> Result<(Arc<dyn CecBus>, mpsc::UnboundedReceiver<CecMessage>)> {
    match adapter {
        AdapterConfig::Simulated {
            own_address,
            devices,
            active_source,
        } => {
            let bus = SimulatedBus::with_devices(*own_address, devices.clone(), *active_source)?;
            let messages = bus
                .take_messages()
                .ok_or_else(|| CecError::Bus("frame receiver already taken".to_string()))?;
            tracing::info!(
                own_address = %own_address,
                devices = devices.len(),
                "Opened simulated CEC bus"
            );
            Ok((Arc::new(bus), messages))
        }
    }
}

/// The assembled bridge.
pub struct CecBridge {
    bus: Arc<dyn CecBus>,
    dispatcher: EventDispatcher,
    registry: Arc<DeviceRegistry>,
    active_source: Arc<ActiveSourceBridge>,
    power: Arc<PowerBridge>,
    discovery: Option<Arc<HomeAssistantDiscovery>>,
}

impl CecBridge {
    /// Build and wire every component.
    ///
    /// Monitors run on child tokens of `cancel`. Must be called within a
    /// Tokio runtime.
    pub fn build(
        bus: Arc<dyn CecBus>,
        sink: Arc<dyn Sink>,
        store: DeviceStore,
        settings: Settings,
        cancel: &CancellationToken,
    ) -> Self {
        let own_addresses = bus.own_addresses();
        let registry = Arc::new(DeviceRegistry::new(store, own_addresses.clone()));
        let dispatcher = EventDispatcher::new();

        {
            let registry = registry.clone();
            let bus = bus.clone();
            dispatcher.register_all(move |message| {
                let address = message.initiator;
                if address.is_broadcast() || own_addresses.contains(&address) {
                    return;
                }
                let bus = bus.clone();
                registry.get_or_create(address, move || bus.describe(address));
            });
        }

        let ctx = BridgeContext {
            bus: bus.clone(),
            sink,
            registry: registry.clone(),
            topics: settings.topics,
            retain: settings.retain_state,
        };

        let discovery = settings
            .discovery
            .map(|discovery| HomeAssistantDiscovery::attach(ctx.clone(), discovery));

        let active_source = ActiveSourceBridge::attach(
            ctx.clone(),
            &dispatcher,
            settings.active_source,
            cancel.child_token(),
        );
        if let Some((topic, payload)) = settings.hub_birth {
            active_source.listen_for_birth(&topic, payload);
        }
        if let Some(discovery) = &discovery {
            discovery.follow_births(&active_source);
        }

        let power = PowerBridge::attach(ctx, &dispatcher, settings.power, cancel.child_token());

        Self {
            bus,
            dispatcher,
            registry,
            active_source,
            power,
            discovery,
        }
    }

    /// Resolve every device the bus reports and forget the ones it no
    /// longer does. Returns the number of devices resolved.
    pub fn scan(&self) -> usize {
        let own = self.bus.own_addresses();
        let active: Vec<LogicalAddress> = self
            .bus
            .active_devices()
            .into_iter()
            .filter(|a| !a.is_broadcast() && !own.contains(a))
            .collect();

        // An address taken over by another device counts as vacated.
        let present: Vec<LogicalAddress> = active
            .iter()
            .copied()
            .filter(|&address| {
                self.registry
                    .cached_physical_address(address)
                    .is_none_or(|cached| cached == self.bus.physical_address(address))
            })
            .collect();
        self.registry.prune(&present);

        let resolved = active
            .iter()
            .filter(|&&address| {
                let bus = self.bus.clone();
                self.registry
                    .get_or_create(address, move || bus.describe(address))
                    .is_some()
            })
            .count();

        tracing::debug!(active = active.len(), resolved, "Scanned CEC bus");
        self.active_source.refresh();
        resolved
    }

    /// Route one frame to the registered handlers.
    pub fn dispatch(&self, message: &CecMessage) {
        tracing::debug!(message = %message, "CEC frame received");
        self.dispatcher.dispatch(message);
    }

    /// Dispatch frames until the channel closes or `cancel` fires.
    pub async fn pump(
        self: Arc<Self>,
        mut messages: mpsc::UnboundedReceiver<CecMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => self.dispatch(&message),
                    None => {
                        tracing::warn!("CEC frame channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Re-scan the bus every `interval` until `cancel` fires.
    pub async fn rescan(self: Arc<Self>, interval: std::time::Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately and startup already scanned.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.scan();
                }
            }
        }
    }

    pub fn save(&self) -> std::result::Result<(), StoreError> {
        self.registry.save()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn active_source(&self) -> &Arc<ActiveSourceBridge> {
        &self.active_source
    }

    pub fn power(&self) -> &Arc<PowerBridge> {
        &self.power
    }

    pub fn discovery(&self) -> Option<&Arc<HomeAssistantDiscovery>> {
        self.discovery.as_ref()
    }
}
