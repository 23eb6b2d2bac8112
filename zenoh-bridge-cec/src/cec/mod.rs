//! HDMI-CEC value types and the bus abstraction.
//!
//! The bridge never talks to an adapter directly. Everything goes through
//! [`CecBus`], and incoming frames are routed by the [`EventDispatcher`].

pub mod bus;
pub mod dispatch;
pub mod simulated;

pub use bus::CecBus;
pub use dispatch::{EventDispatcher, EventHandler};
pub use simulated::{SimulatedBus, SimulatedDevice};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CecError;

/// A transient 4-bit bus address. Devices may change it at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LogicalAddress(u8);

impl LogicalAddress {
    pub const TV: Self = Self(0);
    pub const RECORDING_1: Self = Self(1);
    pub const RECORDING_2: Self = Self(2);
    pub const TUNER_1: Self = Self(3);
    pub const PLAYBACK_1: Self = Self(4);
    pub const AUDIO_SYSTEM: Self = Self(5);
    pub const TUNER_2: Self = Self(6);
    pub const TUNER_3: Self = Self(7);
    pub const PLAYBACK_2: Self = Self(8);
    pub const RECORDING_3: Self = Self(9);
    pub const TUNER_4: Self = Self(10);
    pub const PLAYBACK_3: Self = Self(11);
    pub const RESERVED_1: Self = Self(12);
    pub const RESERVED_2: Self = Self(13);
    pub const FREE_USE: Self = Self(14);
    /// Unregistered as initiator, broadcast as destination.
    pub const BROADCAST: Self = Self(15);

    /// Create an address, rejecting values outside `0..=15`.
    pub fn new(value: u8) -> Option<Self> {
        (value <= 0x0F).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    pub fn is_tv(self) -> bool {
        self == Self::TV
    }

    /// Iterate over every addressable device slot (excluding broadcast).
    pub fn all() -> impl Iterator<Item = Self> {
        (0..0x0F).map(Self)
    }
}

impl TryFrom<u8> for LogicalAddress {
    type Error = CecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(CecError::LogicalAddress(value))
    }
}

impl From<LogicalAddress> for u8 {
    fn from(address: LogicalAddress) -> Self {
        address.0
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A device's position in the HDMI topology, written `a.b.c.d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalAddress(u16);

impl PhysicalAddress {
    /// `f.f.f.f`, reported when the address is unknown.
    pub const INVALID: Self = Self(0xFFFF);
    /// `0.0.0.0`, the root display.
    pub const ROOT: Self = Self(0x0000);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Big-endian wire bytes, as carried by `ActiveSource` and `SetStreamPath`.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [hi, lo, ..] => Some(Self(u16::from_be_bytes([*hi, *lo]))),
            _ => None,
        }
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}.{:x}.{:x}.{:x}",
            (self.0 >> 12) & 0xF,
            (self.0 >> 8) & 0xF,
            (self.0 >> 4) & 0xF,
            self.0 & 0xF
        )
    }
}

impl FromStr for PhysicalAddress {
    type Err = CecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CecError::PhysicalAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 4 {
            return Err(invalid());
        }

        let mut raw = 0u16;
        for part in parts {
            let nibble = u16::from_str_radix(part, 16).map_err(|_| invalid())?;
            if nibble > 0xF {
                return Err(invalid());
            }
            raw = (raw << 4) | nibble;
        }
        Ok(Self(raw))
    }
}

impl Serialize for PhysicalAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PhysicalAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 24-bit IEEE OUI identifying the device manufacturer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(u32);

impl VendorId {
    pub const UNKNOWN: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw & 0x00FF_FFFF)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    /// Manufacturer name for well-known vendors.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0x000039 | 0x000CE7 => "Toshiba",
            0x0000F0 => "Samsung",
            0x0005CD => "Denon",
            0x000678 => "Marantz",
            0x000982 => "Loewe",
            0x0009B0 => "Onkyo",
            0x000CB8 => "Medion",
            0x001582 => "Pulse Eight",
            0x001A11 => "Google",
            0x008045 => "Panasonic",
            0x00903E => "Philips",
            0x00A0DE => "Yamaha",
            0x00E036 => "Pioneer",
            0x00E091 => "LG",
            0x08001F => "Sharp",
            0x080046 => "Sony",
            0x18C086 => "Broadcom",
            0x6B746D => "Vizio",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:06X})", name, self.0),
            None => write!(f, "{:06X}", self.0),
        }
    }
}

/// Power status as reported by `ReportPowerStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerStatus {
    On,
    Standby,
    InTransitionStandbyToOn,
    InTransitionOnToStandby,
    #[default]
    Unknown,
}

impl PowerStatus {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::On,
            0x01 => Self::Standby,
            0x02 => Self::InTransitionStandbyToOn,
            0x03 => Self::InTransitionOnToStandby,
            _ => Self::Unknown,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::On => 0x00,
            Self::Standby => 0x01,
            Self::InTransitionStandbyToOn => 0x02,
            Self::InTransitionOnToStandby => 0x03,
            Self::Unknown => 0x99,
        }
    }
}

/// CEC opcodes the bridge reacts to or sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    ImageViewOn,
    TextViewOn,
    Standby,
    SetSystemAudioMode,
    UserControlPressed,
    UserControlRelease,
    GiveOsdName,
    SetOsdName,
    RoutingChange,
    ActiveSource,
    GivePhysicalAddress,
    ReportPhysicalAddress,
    RequestActiveSource,
    SetStreamPath,
    DeviceVendorId,
    GiveDeviceVendorId,
    GiveDevicePowerStatus,
    ReportPowerStatus,
    Other(u8),
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x04 => Self::ImageViewOn,
            0x0D => Self::TextViewOn,
            0x36 => Self::Standby,
            0x72 => Self::SetSystemAudioMode,
            0x44 => Self::UserControlPressed,
            0x45 => Self::UserControlRelease,
            0x46 => Self::GiveOsdName,
            0x47 => Self::SetOsdName,
            0x80 => Self::RoutingChange,
            0x82 => Self::ActiveSource,
            0x83 => Self::GivePhysicalAddress,
            0x84 => Self::ReportPhysicalAddress,
            0x85 => Self::RequestActiveSource,
            0x86 => Self::SetStreamPath,
            0x87 => Self::DeviceVendorId,
            0x8C => Self::GiveDeviceVendorId,
            0x8F => Self::GiveDevicePowerStatus,
            0x90 => Self::ReportPowerStatus,
            other => Self::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::ImageViewOn => 0x04,
            Self::TextViewOn => 0x0D,
            Self::Standby => 0x36,
            Self::SetSystemAudioMode => 0x72,
            Self::UserControlPressed => 0x44,
            Self::UserControlRelease => 0x45,
            Self::GiveOsdName => 0x46,
            Self::SetOsdName => 0x47,
            Self::RoutingChange => 0x80,
            Self::ActiveSource => 0x82,
            Self::GivePhysicalAddress => 0x83,
            Self::ReportPhysicalAddress => 0x84,
            Self::RequestActiveSource => 0x85,
            Self::SetStreamPath => 0x86,
            Self::DeviceVendorId => 0x87,
            Self::GiveDeviceVendorId => 0x8C,
            Self::GiveDevicePowerStatus => 0x8F,
            Self::ReportPowerStatus => 0x90,
            Self::Other(byte) => byte,
        }
    }
}

/// User control code for "power on function".
pub const USER_CONTROL_POWER_ON: u8 = 0x6D;

/// A frame observed on the bus.
///
/// Polling frames carry no opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CecMessage {
    pub initiator: LogicalAddress,
    pub destination: LogicalAddress,
    pub opcode: Option<Opcode>,
    pub parameters: Vec<u8>,
}

impl CecMessage {
    pub fn new(
        initiator: LogicalAddress,
        destination: LogicalAddress,
        opcode: Opcode,
        parameters: Vec<u8>,
    ) -> Self {
        Self {
            initiator,
            destination,
            opcode: Some(opcode),
            parameters,
        }
    }

    /// Parse the colon-separated hex form used by adapters, e.g. `0f:36`.
    ///
    /// # Example
    /// ```
    /// use zenoh_bridge_cec::cec::{CecMessage, LogicalAddress, Opcode};
    ///
    /// let msg = CecMessage::parse("0f:36").unwrap();
    /// assert_eq!(msg.initiator, LogicalAddress::TV);
    /// assert_eq!(msg.destination, LogicalAddress::BROADCAST);
    /// assert_eq!(msg.opcode, Some(Opcode::Standby));
    /// ```
    pub fn parse(input: &str) -> Result<Self, CecError> {
        let error = |reason: &str| CecError::Parse {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let bytes = input
            .trim()
            .split(':')
            .map(|b| u8::from_str_radix(b.trim(), 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| error("expected colon-separated hex bytes"))?;

        let (&header, rest) = bytes.split_first().ok_or_else(|| error("empty frame"))?;
        let initiator = LogicalAddress(header >> 4);
        let destination = LogicalAddress(header & 0x0F);

        let (opcode, parameters) = match rest.split_first() {
            Some((&op, params)) => (Some(Opcode::from_byte(op)), params.to_vec()),
            None => (None, Vec::new()),
        };

        Ok(Self {
            initiator,
            destination,
            opcode,
            parameters,
        })
    }

    /// First parameter interpreted as a power status.
    pub fn power_status(&self) -> Option<PowerStatus> {
        self.parameters.first().map(|b| PowerStatus::from_byte(*b))
    }
}

impl fmt::Display for CecMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}{:x}", self.initiator.0, self.destination.0)?;
        if let Some(opcode) = self.opcode {
            write!(f, ":{:02x}", opcode.as_byte())?;
        }
        for byte in &self.parameters {
            write!(f, ":{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for CecMessage {
    type Err = CecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A command to transmit. The initiator is filled in by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CecCommand {
    pub destination: LogicalAddress,
    pub opcode: Opcode,
    pub parameters: Vec<u8>,
}

impl CecCommand {
    pub fn new(destination: LogicalAddress, opcode: Opcode) -> Self {
        Self {
            destination,
            opcode,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<u8>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn give_power_status(destination: LogicalAddress) -> Self {
        Self::new(destination, Opcode::GiveDevicePowerStatus)
    }

    pub fn standby(destination: LogicalAddress) -> Self {
        Self::new(destination, Opcode::Standby)
    }

    pub fn image_view_on(destination: LogicalAddress) -> Self {
        Self::new(destination, Opcode::ImageViewOn)
    }

    pub fn user_control_pressed(destination: LogicalAddress, code: u8) -> Self {
        Self::new(destination, Opcode::UserControlPressed).with_parameters(vec![code])
    }

    pub fn user_control_release(destination: LogicalAddress) -> Self {
        Self::new(destination, Opcode::UserControlRelease)
    }
}

/// Everything the bus reports about one logical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub logical_address: LogicalAddress,
    pub physical_address: PhysicalAddress,
    pub vendor: VendorId,
    pub osd_name: String,
}
