//! Device identity: durable records, resolution and the runtime registry.

pub mod registry;
pub mod resolver;
pub mod store;

pub use registry::{AddedHandler, Device, DeviceRegistry};
pub use resolver::{MatchKind, Rejection, Resolution, Resolver};
pub use store::{DEVICE_STORE_FILE, DeviceId, DeviceRecord, DeviceStore, RecordHandle, StoreError};
