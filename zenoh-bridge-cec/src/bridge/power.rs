//! Per-device power state and remote power commands.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use cecsight_bridge_framework::Qos;
use tokio_util::sync::CancellationToken;

use super::{BridgeContext, OFF, ON, POWER};
use crate::cec::{
    CecCommand, CecMessage, EventDispatcher, LogicalAddress, Opcode, PowerStatus,
    USER_CONTROL_POWER_ON,
};
use crate::device::{Device, DeviceId};
use crate::error::Result;
use crate::monitor::{Monitor, MonitorConfig};

/// Published power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => ON,
            Self::Off => OFF,
            Self::Unknown => "unknown",
        }
    }
}

impl From<PowerStatus> for PowerState {
    /// Transitions count as the state being left, so a display that is
    /// slowly waking up keeps reading `off` until it is fully on.
    fn from(status: PowerStatus) -> Self {
        match status {
            PowerStatus::On | PowerStatus::InTransitionOnToStandby => Self::On,
            PowerStatus::Standby | PowerStatus::InTransitionStandbyToOn => Self::Off,
            PowerStatus::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Default)]
struct PowerEntry {
    status: PowerState,
    published: bool,
}

/// Publishes `<base>/<topic>/power` and accepts `<base>/<topic>/power/set`.
pub struct PowerBridge {
    ctx: BridgeContext,
    config: MonitorConfig,
    cancel: CancellationToken,
    states: Mutex<HashMap<DeviceId, PowerEntry>>,
    monitors: Mutex<HashMap<DeviceId, Monitor>>,
}

impl PowerBridge {
    /// Create the bridge and wire it to the dispatcher and registry.
    ///
    /// A monitor is started for each device the registry adds afterwards.
    pub fn attach(
        ctx: BridgeContext,
        dispatcher: &EventDispatcher,
        config: MonitorConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            ctx,
            config,
            cancel,
            states: Mutex::new(HashMap::new()),
            monitors: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&bridge);
        bridge.ctx.registry.register_added_handler(move |device| {
            if let Some(b) = weak.upgrade() {
                b.add_device(device);
            }
        });

        dispatcher.register(
            &[Opcode::ReportPowerStatus],
            bridge.on_message(|b, message| {
                let device = b.ctx.registry.find_by_address(message.initiator);
                if let (Some(device), Some(status)) = (device, message.power_status()) {
                    b.set_power_status(&device, status);
                }
            }),
        );
        dispatcher.register(
            &[Opcode::SetSystemAudioMode],
            bridge.on_message(|b, message| {
                if let Some(device) = b.ctx.registry.find_by_address(message.initiator) {
                    b.refresh(&device.id);
                }
            }),
        );
        dispatcher.register(
            &[Opcode::Standby, Opcode::ActiveSource],
            bridge.on_message(|b, _| b.refresh_all()),
        );

        bridge
    }

    fn on_message<F>(self: &Arc<Self>, f: F) -> impl Fn(&CecMessage) + Send + Sync + 'static
    where
        F: Fn(&Self, &CecMessage) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        move |message| {
            if let Some(bridge) = weak.upgrade() {
                f(&bridge, message);
            }
        }
    }

    /// Start tracking `device`: state entry, command subscription, monitor.
    ///
    /// Idempotent per device id.
    pub fn add_device(self: &Arc<Self>, device: &Device) {
        let command_topic = self.ctx.command_topic(device, POWER);

        // Held until the monitor is in place so concurrent adds see it.
        let mut monitors = self.monitors.lock().unwrap();
        let Entry::Vacant(slot) = monitors.entry(device.id.clone()) else {
            return;
        };

        self.states
            .lock()
            .unwrap()
            .insert(device.id.clone(), PowerEntry::default());

        let weak = Arc::downgrade(self);
        let id = device.id.clone();
        self.ctx.sink.subscribe(
            &command_topic,
            Qos::AtLeastOnce,
            Arc::new(move |_, payload| {
                if let Some(b) = weak.upgrade() {
                    b.handle_command(&id, payload);
                }
            }),
        );

        let requester = Arc::downgrade(self);
        let request_id = device.id.clone();
        let poller = Arc::downgrade(self);
        let poll_id = device.id.clone();
        slot.insert(Monitor::spawn(
            move || {
                if let Some(b) = requester.upgrade() {
                    b.request_status(&request_id);
                }
            },
            move || {
                if let Some(b) = poller.upgrade() {
                    b.poll(&poll_id);
                }
            },
            self.config,
            self.cancel.child_token(),
        ));

        tracing::debug!(device = %device.id, topic = %command_topic, "Tracking device power");
    }

    /// Restart the poll burst for one device.
    pub fn refresh(&self, id: &DeviceId) {
        if let Some(monitor) = self.monitors.lock().unwrap().get(id) {
            monitor.reset();
        }
    }

    /// Restart the poll burst for every device.
    pub fn refresh_all(&self) {
        for monitor in self.monitors.lock().unwrap().values() {
            monitor.reset();
        }
    }

    /// The last mapped state for `id`.
    pub fn state(&self, id: &DeviceId) -> Option<PowerState> {
        self.states.lock().unwrap().get(id).map(|e| e.status)
    }

    /// Number of devices with a running monitor.
    pub fn tracked(&self) -> usize {
        self.monitors.lock().unwrap().len()
    }

    /// Feed a bus power status through the dedup rule and publish changes.
    pub fn set_power_status(&self, device: &Device, status: PowerStatus) {
        let mapped = PowerState::from(status);

        let publish = {
            let mut states = self.states.lock().unwrap();
            let entry = states.entry(device.id.clone()).or_default();
            if mapped == PowerState::Unknown {
                entry.status = PowerState::Unknown;
                entry.published = false;
                false
            } else if entry.published && entry.status == mapped {
                false
            } else {
                entry.status = mapped;
                entry.published = true;
                true
            }
        };

        if publish {
            self.ctx.publish_state(device, POWER, mapped.as_str());
        }
    }

    fn request_status(&self, id: &DeviceId) {
        let Some(device) = self.ctx.registry.find_by_id(id) else {
            return;
        };
        let destination = if device.address.is_tv() {
            LogicalAddress::BROADCAST
        } else {
            device.address
        };
        if let Err(e) = self
            .ctx
            .bus
            .transmit(&CecCommand::give_power_status(destination))
        {
            tracing::debug!(device = %id, error = %e, "Power status request failed");
        }
    }

    fn poll(&self, id: &DeviceId) {
        let Some(device) = self.ctx.registry.find_by_id(id) else {
            return;
        };
        let status = self.ctx.bus.power_status(device.address);
        self.set_power_status(&device, status);
    }

    fn handle_command(&self, id: &DeviceId, payload: &[u8]) {
        let Some(device) = self.ctx.registry.find_by_id(id) else {
            tracing::debug!(device = %id, "Power command for absent device");
            return;
        };

        let command = String::from_utf8_lossy(payload);
        let result = match command.trim() {
            ON => self.power_on(device.address),
            OFF => self.standby(device.address),
            other => {
                tracing::debug!(device = %id, payload = %other, "Ignoring power command");
                return;
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(device = %id, command = %command.trim(), "Power command sent");
                self.refresh(id);
            }
            Err(e) => tracing::warn!(device = %id, error = %e, "Power command failed"),
        }
    }

    fn power_on(&self, address: LogicalAddress) -> Result<()> {
        if address.is_tv() {
            return self.ctx.bus.transmit(&CecCommand::image_view_on(address));
        }
        self.ctx.bus.transmit(&CecCommand::user_control_pressed(
            address,
            USER_CONTROL_POWER_ON,
        ))?;
        self.ctx
            .bus
            .transmit(&CecCommand::user_control_release(address))
    }

    fn standby(&self, address: LogicalAddress) -> Result<()> {
        self.ctx.bus.transmit(&CecCommand::standby(address))
    }
}
