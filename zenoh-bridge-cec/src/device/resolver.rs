//! Maps bus descriptions onto durable device records.

use crate::cec::{DeviceDescription, LogicalAddress};

use super::store::{DeviceRecord, DeviceStore, RecordHandle};

/// How a description was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Physical address, vendor and name all matched a record.
    Exact,
    /// A single record matched on two of three attributes and was updated.
    Partial,
    /// No unique match; a new record was created.
    Created,
}

/// Why a description could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidPhysicalAddress,
    UnknownVendor,
    OwnAddress,
    Unregistered,
}

/// Outcome of [`Resolver::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved { handle: RecordHandle, kind: MatchKind },
    Rejected(Rejection),
}

impl Resolution {
    pub fn handle(self) -> Option<RecordHandle> {
        match self {
            Self::Resolved { handle, .. } => Some(handle),
            Self::Rejected(_) => None,
        }
    }
}

/// Owns the [`DeviceStore`] and decides which record a description belongs to.
pub struct Resolver {
    store: DeviceStore,
    own_addresses: Vec<LogicalAddress>,
}

impl Resolver {
    pub fn new(store: DeviceStore, own_addresses: Vec<LogicalAddress>) -> Self {
        Self {
            store,
            own_addresses,
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    /// Resolve a description to a record, creating or updating as needed.
    ///
    /// An exact match on (physical address, vendor, name) wins. Otherwise a
    /// record matching on (physical address, vendor) or (vendor, name) is
    /// taken if it is the only candidate, and brought up to date. With no
    /// candidate, or with several, a fresh record is created.
    pub fn resolve(&mut self, description: &DeviceDescription) -> Resolution {
        if let Some(rejection) = self.reject(description) {
            tracing::debug!(
                address = %description.logical_address,
                reason = ?rejection,
                "Ignoring incomplete device description"
            );
            return Resolution::Rejected(rejection);
        }

        if let Some(handle) = self
            .store
            .iter()
            .find(|(_, r)| is_exact(r, description))
            .map(|(h, _)| h)
        {
            return Resolution::Resolved {
                handle,
                kind: MatchKind::Exact,
            };
        }

        let candidates: Vec<RecordHandle> = self
            .store
            .iter()
            .filter(|(_, r)| is_partial(r, description))
            .map(|(h, _)| h)
            .collect();

        match candidates.as_slice() {
            [handle] => {
                let record = self.store.get_mut(*handle);
                tracing::info!(
                    id = %record.id,
                    physical_address = %description.physical_address,
                    osd_name = %description.osd_name,
                    "Updating device record from partial match"
                );
                record.physical_address = description.physical_address;
                record.vendor_id = description.vendor;
                record.osd_name = description.osd_name.clone();
                Resolution::Resolved {
                    handle: *handle,
                    kind: MatchKind::Partial,
                }
            }
            [] => self.create(description),
            many => {
                tracing::info!(
                    address = %description.logical_address,
                    osd_name = %description.osd_name,
                    candidates = many.len(),
                    "Ambiguous device description, creating a new record"
                );
                self.create(description)
            }
        }
    }

    fn reject(&self, description: &DeviceDescription) -> Option<Rejection> {
        if !description.physical_address.is_valid() {
            Some(Rejection::InvalidPhysicalAddress)
        } else if !description.vendor.is_known() {
            Some(Rejection::UnknownVendor)
        } else if description.logical_address.is_broadcast() {
            Some(Rejection::Unregistered)
        } else if self.own_addresses.contains(&description.logical_address) {
            Some(Rejection::OwnAddress)
        } else {
            None
        }
    }

    fn create(&mut self, description: &DeviceDescription) -> Resolution {
        let record = DeviceRecord {
            id: self.store.allocate_id(),
            physical_address: description.physical_address,
            vendor_id: description.vendor,
            osd_name: description.osd_name.clone(),
            topic: description.osd_name.clone(),
            ignore: false,
        };
        tracing::info!(
            id = %record.id,
            physical_address = %record.physical_address,
            vendor = %record.vendor_id,
            osd_name = %record.osd_name,
            "Created device record"
        );
        Resolution::Resolved {
            handle: self.store.insert(record),
            kind: MatchKind::Created,
        }
    }
}

fn is_exact(record: &DeviceRecord, description: &DeviceDescription) -> bool {
    record.physical_address == description.physical_address
        && record.vendor_id == description.vendor
        && record.osd_name == description.osd_name
}

fn is_partial(record: &DeviceRecord, description: &DeviceDescription) -> bool {
    let same_vendor = record.vendor_id == description.vendor;
    same_vendor
        && (record.physical_address == description.physical_address
            || record.osd_name == description.osd_name)
}
