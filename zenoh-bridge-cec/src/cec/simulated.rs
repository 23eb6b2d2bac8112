//! In-memory bus for development setups and tests.
//!
//! Devices answer queries from their configured state and react to the
//! commands the bridge sends the way real equipment does: a power status
//! request produces a `ReportPowerStatus` frame, `Standby` puts a device to
//! sleep, and so on. Frames are delivered on an unbounded channel that the
//! entry point pumps into the dispatcher.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{
    CecBus, CecCommand, CecMessage, LogicalAddress, Opcode, PhysicalAddress, PowerStatus,
    USER_CONTROL_POWER_ON, VendorId,
};
use crate::error::{CecError, Result};

/// User control code for "power", accepted as a toggle-on.
const USER_CONTROL_POWER: u8 = 0x40;

/// Transmitted commands kept for inspection; older ones are dropped.
pub const TRANSMIT_LOG_CAPACITY: usize = 256;

/// A device attached to the simulated bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub logical_address: LogicalAddress,
    pub physical_address: PhysicalAddress,
    pub vendor_id: VendorId,
    pub osd_name: String,
    #[serde(default = "default_power")]
    pub power: PowerStatus,
}

fn default_power() -> PowerStatus {
    PowerStatus::On
}

impl SimulatedDevice {
    pub fn new(
        logical_address: LogicalAddress,
        physical_address: PhysicalAddress,
        vendor_id: VendorId,
        osd_name: impl Into<String>,
    ) -> Self {
        Self {
            logical_address,
            physical_address,
            vendor_id,
            osd_name: osd_name.into(),
            power: PowerStatus::On,
        }
    }

    pub fn with_power(mut self, power: PowerStatus) -> Self {
        self.power = power;
        self
    }
}

#[derive(Default)]
struct BusState {
    devices: BTreeMap<LogicalAddress, SimulatedDevice>,
    active_source: Option<LogicalAddress>,
    transmitted: VecDeque<CecCommand>,
}

/// A [`CecBus`] backed by in-memory device state.
pub struct SimulatedBus {
    own_address: LogicalAddress,
    state: Mutex<BusState>,
    sender: mpsc::UnboundedSender<CecMessage>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<CecMessage>>>,
}

impl SimulatedBus {
    /// Create an empty bus where the bridge claims `own_address`.
    pub fn new(own_address: LogicalAddress) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            own_address,
            state: Mutex::new(BusState::default()),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Create a bus populated with `devices`.
    pub fn with_devices(
        own_address: LogicalAddress,
        devices: impl IntoIterator<Item = SimulatedDevice>,
        active_source: Option<LogicalAddress>,
    ) -> Result<Self> {
        let bus = Self::new(own_address);
        for device in devices {
            if device.logical_address == own_address || device.logical_address.is_broadcast() {
                return Err(CecError::Bus(format!(
                    "simulated device '{}' cannot use logical address {}",
                    device.osd_name, device.logical_address
                )));
            }
            bus.add_device(device);
        }
        if let Some(source) = active_source {
            if !bus.state.lock().unwrap().devices.contains_key(&source) {
                return Err(CecError::Bus(format!(
                    "active source {} is not a simulated device",
                    source
                )));
            }
            bus.state.lock().unwrap().active_source = Some(source);
        }
        Ok(bus)
    }

    /// Take the frame receiver. Only the first call gets it.
    pub fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<CecMessage>> {
        self.receiver.lock().unwrap().take()
    }

    /// Attach a device, replacing any device at the same logical address.
    pub fn add_device(&self, device: SimulatedDevice) {
        let mut state = self.state.lock().unwrap();
        state.devices.insert(device.logical_address, device);
    }

    /// Detach the device at `address`.
    pub fn remove_device(&self, address: LogicalAddress) -> Option<SimulatedDevice> {
        let mut state = self.state.lock().unwrap();
        if state.active_source == Some(address) {
            state.active_source = None;
        }
        state.devices.remove(&address)
    }

    /// Change a device's power state without announcing it.
    pub fn set_power_status(&self, address: LogicalAddress, power: PowerStatus) {
        if let Some(device) = self.state.lock().unwrap().devices.get_mut(&address) {
            device.power = power;
        }
    }

    /// Make `address` the active source and broadcast `ActiveSource` for it.
    pub fn set_active_source(&self, address: Option<LogicalAddress>) {
        let announce = {
            let mut state = self.state.lock().unwrap();
            state.active_source = address;
            address.and_then(|a| state.devices.get(&a).map(|d| (a, d.physical_address)))
        };

        if let Some((initiator, physical)) = announce {
            self.emit(CecMessage::new(
                initiator,
                LogicalAddress::BROADCAST,
                Opcode::ActiveSource,
                physical.to_bytes().to_vec(),
            ));
        }
    }

    /// Have the device at `address` report its power status unprompted.
    pub fn report_power_status(&self, address: LogicalAddress) {
        let power = self
            .state
            .lock()
            .unwrap()
            .devices
            .get(&address)
            .map(|d| d.power);
        if let Some(power) = power {
            self.emit(CecMessage::new(
                address,
                self.own_address,
                Opcode::ReportPowerStatus,
                vec![power.as_byte()],
            ));
        }
    }

    /// Deliver an arbitrary frame as if it had been seen on the wire.
    pub fn inject(&self, message: CecMessage) {
        self.emit(message);
    }

    /// The most recent transmitted commands, oldest first.
    ///
    /// At most [`TRANSMIT_LOG_CAPACITY`] commands are kept.
    pub fn transmitted(&self) -> Vec<CecCommand> {
        self.state.lock().unwrap().transmitted.iter().cloned().collect()
    }

    pub fn clear_transmitted(&self) {
        self.state.lock().unwrap().transmitted.clear();
    }

    fn emit(&self, message: CecMessage) {
        if self.sender.send(message).is_err() {
            tracing::trace!("Simulated bus frame dropped, receiver closed");
        }
    }

    fn react(&self, command: &CecCommand) {
        let mut emitted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let destination = command.destination;

            match command.opcode {
                Opcode::GiveDevicePowerStatus => {
                    let responder = if destination.is_broadcast() {
                        LogicalAddress::TV
                    } else {
                        destination
                    };
                    if let Some(device) = state.devices.get(&responder) {
                        emitted.push(CecMessage::new(
                            responder,
                            self.own_address,
                            Opcode::ReportPowerStatus,
                            vec![device.power.as_byte()],
                        ));
                    }
                }
                Opcode::Standby => {
                    for device in state.devices.values_mut() {
                        if destination.is_broadcast() || device.logical_address == destination {
                            device.power = PowerStatus::Standby;
                        }
                    }
                    let source_asleep = state
                        .active_source
                        .and_then(|a| state.devices.get(&a))
                        .is_some_and(|d| d.power == PowerStatus::Standby);
                    if source_asleep {
                        state.active_source = None;
                    }
                }
                Opcode::ImageViewOn | Opcode::TextViewOn => {
                    if let Some(device) = state.devices.get_mut(&destination) {
                        device.power = PowerStatus::On;
                    }
                }
                Opcode::UserControlPressed => {
                    let powers_on = matches!(
                        command.parameters.first(),
                        Some(&USER_CONTROL_POWER_ON) | Some(&USER_CONTROL_POWER)
                    );
                    if powers_on && let Some(device) = state.devices.get_mut(&destination) {
                        device.power = PowerStatus::On;
                    }
                }
                Opcode::RequestActiveSource => {
                    if let Some(device) = state.active_source.and_then(|a| state.devices.get(&a)) {
                        emitted.push(CecMessage::new(
                            device.logical_address,
                            LogicalAddress::BROADCAST,
                            Opcode::ActiveSource,
                            device.physical_address.to_bytes().to_vec(),
                        ));
                    }
                }
                _ => {}
            }
        }

        for message in emitted {
            self.emit(message);
        }
    }
}

impl CecBus for SimulatedBus {
    fn active_devices(&self) -> Vec<LogicalAddress> {
        self.state.lock().unwrap().devices.keys().copied().collect()
    }

    fn physical_address(&self, address: LogicalAddress) -> PhysicalAddress {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(&address)
            .map_or(PhysicalAddress::INVALID, |d| d.physical_address)
    }

    fn vendor_id(&self, address: LogicalAddress) -> VendorId {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(&address)
            .map_or(VendorId::UNKNOWN, |d| d.vendor_id)
    }

    fn osd_name(&self, address: LogicalAddress) -> String {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(&address)
            .map(|d| d.osd_name.clone())
            .unwrap_or_default()
    }

    fn power_status(&self, address: LogicalAddress) -> PowerStatus {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(&address)
            .map_or(PowerStatus::Unknown, |d| d.power)
    }

    fn active_source(&self) -> Option<LogicalAddress> {
        self.state.lock().unwrap().active_source
    }

    fn transmit(&self, command: &CecCommand) -> Result<()> {
        let acknowledged = {
            let mut state = self.state.lock().unwrap();
            if state.transmitted.len() == TRANSMIT_LOG_CAPACITY {
                state.transmitted.pop_front();
            }
            state.transmitted.push_back(command.clone());
            command.destination.is_broadcast() || state.devices.contains_key(&command.destination)
        };

        if !acknowledged {
            return Err(CecError::Transmit {
                destination: command.destination.value(),
                reason: "not acknowledged".to_string(),
            });
        }

        tracing::trace!(
            destination = %command.destination,
            opcode = ?command.opcode,
            "Simulated transmit"
        );
        self.react(command);
        Ok(())
    }

    fn own_addresses(&self) -> Vec<LogicalAddress> {
        vec![self.own_address]
    }
}
