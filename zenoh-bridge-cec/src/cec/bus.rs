//! The bus collaborator.

use super::{
    CecCommand, DeviceDescription, LogicalAddress, PhysicalAddress, PowerStatus, VendorId,
};
use crate::error::Result;

/// Queries and commands against an HDMI-CEC bus.
///
/// Queries are answered from the adapter's cache or by a blocking round
/// trip on the wire; callers treat them as synchronous. Incoming frames are
/// not delivered through this trait: adapters hand them to the entry point,
/// which forwards them to an [`EventDispatcher`](super::EventDispatcher).
pub trait CecBus: Send + Sync {
    /// Logical addresses currently answering polls.
    fn active_devices(&self) -> Vec<LogicalAddress>;

    fn physical_address(&self, address: LogicalAddress) -> PhysicalAddress;

    fn vendor_id(&self, address: LogicalAddress) -> VendorId;

    fn osd_name(&self, address: LogicalAddress) -> String;

    fn power_status(&self, address: LogicalAddress) -> PowerStatus;

    /// The logical address of the current active source, if any.
    fn active_source(&self) -> Option<LogicalAddress>;

    fn transmit(&self, command: &CecCommand) -> Result<()>;

    /// Addresses claimed by this adapter.
    fn own_addresses(&self) -> Vec<LogicalAddress>;

    /// Gather a full description of the device at `address`.
    fn describe(&self, address: LogicalAddress) -> DeviceDescription {
        DeviceDescription {
            logical_address: address,
            physical_address: self.physical_address(address),
            vendor: self.vendor_id(address),
            osd_name: self.osd_name(address),
        }
    }
}
