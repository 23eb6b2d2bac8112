//! Tracks which device is the active source.
//!
//! Exactly one device is published as `on` under `is_active_source`; every
//! other known device is `off`. Bus events only reset the monitor, and the
//! monitor's poll asks the bus for the current source. The one exception is
//! power reports: a device known to be in standby is not accepted as the new
//! source unless there is no source at all.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use cecsight_bridge_framework::Qos;
use tokio_util::sync::CancellationToken;

use super::{BridgeContext, IS_ACTIVE_SOURCE, OFF, ON};
use crate::cec::{CecMessage, EventDispatcher, LogicalAddress, Opcode, PowerStatus};
use crate::device::{Device, DeviceId};
use crate::monitor::{Monitor, MonitorConfig};

/// Handler run when the hub announces it has (re)started.
pub type BirthHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ActiveState {
    current: Option<Device>,
    /// `false` when the device last reported standby.
    allowed: HashMap<DeviceId, bool>,
    known: BTreeMap<DeviceId, Device>,
}

pub struct ActiveSourceBridge {
    ctx: BridgeContext,
    state: Mutex<ActiveState>,
    monitor: OnceLock<Monitor>,
    birth_handlers: RwLock<Vec<BirthHandler>>,
}

impl ActiveSourceBridge {
    /// Create the bridge, wire it to the dispatcher, registry and sink, and
    /// start its monitor.
    pub fn attach(
        ctx: BridgeContext,
        dispatcher: &EventDispatcher,
        config: MonitorConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            ctx,
            state: Mutex::new(ActiveState::default()),
            monitor: OnceLock::new(),
            birth_handlers: RwLock::new(Vec::new()),
        });

        dispatcher.register(
            &[Opcode::ActiveSource, Opcode::SetStreamPath],
            bridge.on_message(|b, _| b.refresh()),
        );
        dispatcher.register(
            &[Opcode::ReportPowerStatus],
            bridge.on_message(|b, message| {
                if let Some(status) = message.power_status() {
                    b.handle_power_report(message.initiator, status);
                }
            }),
        );
        dispatcher.register(
            &[Opcode::Standby],
            bridge.on_message(|b, message| {
                if message.initiator.is_tv() {
                    tracing::debug!("Display went to standby, clearing active source");
                    b.set_active_source(None);
                }
            }),
        );

        let weak = Arc::downgrade(&bridge);
        bridge.ctx.registry.register_added_handler(move |device| {
            if let Some(b) = weak.upgrade() {
                b.state
                    .lock()
                    .unwrap()
                    .known
                    .insert(device.id.clone(), device.clone());
            }
        });

        let weak = Arc::downgrade(&bridge);
        bridge.ctx.sink.register_connected_handler(Arc::new(move || {
            if let Some(b) = weak.upgrade() {
                b.resend_all();
            }
        }));

        let poller = Arc::downgrade(&bridge);
        let monitor = Monitor::spawn(
            || {},
            move || {
                if let Some(b) = poller.upgrade() {
                    b.poll();
                }
            },
            config,
            cancel,
        );
        // Freshly created, so the cell is empty.
        let _ = bridge.monitor.set(monitor);

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

    /// Resync on every message `payload` received on `topic`.
    pub fn listen_for_birth(self: &Arc<Self>, topic: &str, payload: impl Into<String>) {
        let expected = payload.into();
        let weak = Arc::downgrade(self);
        self.ctx.sink.subscribe(
            topic,
            Qos::AtLeastOnce,
            Arc::new(move |topic, received| {
                if String::from_utf8_lossy(received).trim() != expected {
                    tracing::debug!(topic = %topic, "Ignoring hub status message");
                    return;
                }
                if let Some(b) = weak.upgrade() {
                    tracing::info!(topic = %topic, "Hub came online, resending state");
                    b.handle_birth();
                }
            }),
        );
    }

    /// Register a handler to run before the resync on hub birth.
    pub fn register_birth_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.birth_handlers.write().unwrap().push(Arc::new(handler));
    }

    /// Run birth handlers, then republish everything.
    pub fn handle_birth(&self) {
        let handlers = self.birth_handlers.read().unwrap().clone();
        for handler in handlers {
            handler();
        }
        self.resend_all();
    }

    /// Ask the monitor for a fresh poll burst.
    pub fn refresh(&self) {
        if let Some(monitor) = self.monitor.get() {
            monitor.reset();
        }
    }

    /// The current active source.
    pub fn current(&self) -> Option<Device> {
        self.state.lock().unwrap().current.clone()
    }

    /// Whether `id` may become the active source, if known.
    pub fn is_allowed(&self, id: &DeviceId) -> Option<bool> {
        self.state.lock().unwrap().allowed.get(id).copied()
    }

    fn handle_power_report(&self, address: LogicalAddress, status: PowerStatus) {
        let device = self.ctx.registry.find_by_address(address);

        let went_to_standby = match &device {
            Some(device) => {
                let mut state = self.state.lock().unwrap();
                state
                    .allowed
                    .insert(device.id.clone(), status != PowerStatus::Standby);
                status == PowerStatus::Standby
                    && state.current.as_ref().is_some_and(|c| c.id == device.id)
            }
            None => false,
        };

        self.refresh();

        if went_to_standby {
            tracing::debug!(address = %address, "Active source went to standby");
            self.set_active_source(None);
        }
    }

    fn poll(&self) {
        let candidate = self.ctx.bus.active_source().and_then(|address| {
            let bus = self.ctx.bus.clone();
            self.ctx
                .registry
                .get_or_create(address, move || bus.describe(address))
        });
        self.set_active_source(candidate);
    }

    /// Make `candidate` the active source, publishing the change.
    pub fn set_active_source(&self, candidate: Option<Device>) {
        let outgoing = {
            let mut state = self.state.lock().unwrap();

            let unchanged = match (&state.current, &candidate) {
                (Some(current), Some(next)) => current.id == next.id,
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }

            if let Some(next) = &candidate {
                let disallowed = state.allowed.get(&next.id) == Some(&false);
                if disallowed && state.current.is_some() {
                    tracing::debug!(device = %next.id, "Ignoring active source in standby");
                    return;
                }
            }

            std::mem::replace(&mut state.current, candidate.clone())
        };

        if let Some(device) = &outgoing {
            self.ctx.publish_state(device, IS_ACTIVE_SOURCE, OFF);
        }
        if let Some(device) = &candidate {
            tracing::info!(device = %device.id, address = %device.address, "Active source changed");
            self.ctx.publish_state(device, IS_ACTIVE_SOURCE, ON);
        }
    }

    /// Republish `on` for the active source and `off` for every other device.
    pub fn resend_all(&self) {
        let (current, known) = {
            let state = self.state.lock().unwrap();
            (
                state.current.clone(),
                state.known.values().cloned().collect::<Vec<_>>(),
            )
        };

        if let Some(device) = &current {
            self.ctx.publish_state(device, IS_ACTIVE_SOURCE, ON);
        }
        for device in known
            .iter()
            .filter(|d| current.as_ref().is_none_or(|c| c.id != d.id))
        {
            self.ctx.publish_state(device, IS_ACTIVE_SOURCE, OFF);
        }
    }
}
