//! Runtime view of the devices on the bus.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::cec::{DeviceDescription, LogicalAddress, PhysicalAddress, VendorId};

use super::resolver::{Resolution, Resolver};
use super::store::{DeviceId, DeviceRecord, DeviceStore, RecordHandle, StoreError};

/// A resolved device at its current logical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub address: LogicalAddress,
    pub record: RecordHandle,
}

/// Handler invoked once per newly surfaced device.
pub type AddedHandler = Arc<dyn Fn(&Device) + Send + Sync>;

struct RegistryState {
    resolver: Resolver,
    /// Every live address. Aliases of one record share its handle.
    by_address: HashMap<LogicalAddress, Device>,
    by_identity: HashMap<(PhysicalAddress, VendorId), RecordHandle>,
    /// Most recently resolved address per record.
    latest: HashMap<RecordHandle, LogicalAddress>,
    ignored: HashSet<LogicalAddress>,
}

impl RegistryState {
    /// Whether added handlers already ran for `handle`.
    fn is_surfaced(&self, handle: RecordHandle) -> bool {
        self.by_identity.values().any(|h| *h == handle)
    }

    fn latest_device(&self, handle: RecordHandle) -> Option<&Device> {
        self.latest
            .get(&handle)
            .and_then(|address| self.by_address.get(address))
    }
}

/// Resolves logical addresses to [`Device`]s and notifies listeners of new ones.
///
/// All lookup state sits behind one mutex. Added handlers run after it is
/// released and may call back into the registry.
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    added_handlers: RwLock<Vec<AddedHandler>>,
}

impl DeviceRegistry {
    pub fn new(store: DeviceStore, own_addresses: Vec<LogicalAddress>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                resolver: Resolver::new(store, own_addresses),
                by_address: HashMap::new(),
                by_identity: HashMap::new(),
                latest: HashMap::new(),
                ignored: HashSet::new(),
            }),
            added_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for newly surfaced devices.
    ///
    /// Handlers run in registration order.
    pub fn register_added_handler<F>(&self, handler: F)
    where
        F: Fn(&Device) + Send + Sync + 'static,
    {
        self.added_handlers.write().unwrap().push(Arc::new(handler));
    }

    /// Resolve `address`, describing it only if it is not known yet.
    ///
    /// Returns `None` for ignored devices and incomplete descriptions.
    /// Incomplete descriptions are retried on the next call, ignored devices
    /// are not.
    pub fn get_or_create<F>(&self, address: LogicalAddress, describe: F) -> Option<Device>
    where
        F: FnOnce() -> DeviceDescription,
    {
        if address.is_broadcast() {
            return None;
        }

        {
            let state = self.state.lock().unwrap();
            if let Some(device) = state.by_address.get(&address) {
                return Some(device.clone());
            }
            if state.ignored.contains(&address) {
                return None;
            }
        }

        let description = describe();

        let (device, surfaced) = {
            let mut state = self.state.lock().unwrap();

            // Resolved concurrently while we were describing.
            if let Some(device) = state.by_address.get(&address) {
                return Some(device.clone());
            }

            let Resolution::Resolved { handle, kind } = state.resolver.resolve(&description)
            else {
                return None;
            };

            let record = state.resolver.store().get(handle);
            if record.ignore {
                tracing::debug!(address = %address, id = %record.id, "Device is ignored");
                state.ignored.insert(address);
                return None;
            }

            let device = Device {
                id: record.id.clone(),
                address,
                record: handle,
            };
            let aliased = state.is_surfaced(handle);

            state.by_address.insert(address, device.clone());
            state.latest.insert(handle, address);
            state.by_identity.insert(
                (description.physical_address, description.vendor),
                handle,
            );

            if aliased {
                tracing::debug!(address = %address, id = %device.id, "Device seen at another address");
            } else {
                tracing::info!(
                    address = %address,
                    id = %device.id,
                    osd_name = %description.osd_name,
                    matched = ?kind,
                    "Device added"
                );
            }
            (device, !aliased)
        };

        if surfaced {
            let handlers = self.added_handlers.read().unwrap().clone();
            for handler in handlers {
                handler(&device);
            }
        }
        Some(device)
    }

    /// The device currently at `address`, if resolved and not ignored.
    pub fn find_by_address(&self, address: LogicalAddress) -> Option<Device> {
        self.state.lock().unwrap().by_address.get(&address).cloned()
    }

    /// The device for `id` at its most recent address.
    pub fn find_by_id(&self, id: &DeviceId) -> Option<Device> {
        let state = self.state.lock().unwrap();
        let handle = state.resolver.store().find(id)?;
        state.latest_device(handle).cloned()
    }

    /// The physical address on record for the device cached at `address`.
    pub fn cached_physical_address(&self, address: LogicalAddress) -> Option<PhysicalAddress> {
        let state = self.state.lock().unwrap();
        let device = state.by_address.get(&address)?;
        Some(state.resolver.store().get(device.record).physical_address)
    }

    /// All surfaced devices at their most recent address, ordered by address.
    pub fn devices(&self) -> Vec<Device> {
        let state = self.state.lock().unwrap();
        let mut devices: Vec<Device> = state
            .latest
            .keys()
            .filter_map(|handle| state.latest_device(*handle))
            .cloned()
            .collect();
        devices.sort_by_key(|d| d.address);
        devices
    }

    /// A snapshot of the record behind `device`.
    pub fn record(&self, device: &Device) -> DeviceRecord {
        self.state
            .lock()
            .unwrap()
            .resolver
            .store()
            .get(device.record)
            .clone()
    }

    /// The topic segment `device` publishes under.
    pub fn topic(&self, device: &Device) -> String {
        self.state
            .lock()
            .unwrap()
            .resolver
            .store()
            .get(device.record)
            .topic_segment()
            .to_string()
    }

    /// Drop addresses the bus no longer reports. Returns the devices removed.
    ///
    /// A record that is still live at another address falls back to it.
    pub fn prune(&self, active: &[LogicalAddress]) -> Vec<Device> {
        let mut state = self.state.lock().unwrap();
        state.ignored.retain(|a| active.contains(a));

        let stale: Vec<LogicalAddress> = state
            .by_address
            .keys()
            .filter(|a| !active.contains(a))
            .copied()
            .collect();

        let removed: Vec<Device> = stale
            .into_iter()
            .filter_map(|a| state.by_address.remove(&a))
            .inspect(|d| tracing::debug!(address = %d.address, id = %d.id, "Device left the bus"))
            .collect();

        for device in &removed {
            if state.latest.get(&device.record) != Some(&device.address) {
                continue;
            }
            let fallback = state
                .by_address
                .values()
                .filter(|d| d.record == device.record)
                .map(|d| d.address)
                .min();
            match fallback {
                Some(address) => state.latest.insert(device.record, address),
                None => state.latest.remove(&device.record),
            };
        }
        removed
    }

    /// Number of live addresses, aliases included.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of persisted records, surfaced or not.
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().resolver.store().len()
    }

    /// Persist the device store.
    pub fn save(&self) -> Result<(), StoreError> {
        self.state.lock().unwrap().resolver.store().save()
    }
}
