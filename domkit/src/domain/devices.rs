//! Per-domain device table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::hypervisor::DeviceHandle;

/// A device attached to a domain.
#[derive(Clone, Debug)]
pub struct Device {
    kind: String,
    index: usize,
    handle: Arc<dyn DeviceHandle>,
}

impl Device {
    /// Device type tag (`vif`, `vbd`, ...).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Position within its type.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Backend-managed resource.
    pub fn handle(&self) -> &Arc<dyn DeviceHandle> {
        &self.handle
    }
}

/// Devices of one domain, keyed by type, each type in creation order.
///
/// Removing a device compacts its type: later devices shift down one index.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: HashMap<String, Vec<Device>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device; returns its index.
    pub fn add(&mut self, kind: &str, handle: Arc<dyn DeviceHandle>) -> usize {
        let list = self.devices.entry(kind.to_string()).or_default();
        let index = list.len();
        list.push(Device {
            kind: kind.to_string(),
            index,
            handle,
        });
        index
    }

    /// Place a device at its declared index, keeping the type ordered by index.
    ///
    /// Concurrent construction attaches devices in completion order; this
    /// keeps the table in declaration order regardless.
    pub fn insert(&mut self, kind: &str, index: usize, handle: Arc<dyn DeviceHandle>) {
        let list = self.devices.entry(kind.to_string()).or_default();
        let pos = list
            .iter()
            .position(|device| device.index > index)
            .unwrap_or(list.len());
        list.insert(
            pos,
            Device {
                kind: kind.to_string(),
                index,
                handle,
            },
        );
    }

    /// Devices of a type, empty if none.
    pub fn get(&self, kind: &str) -> &[Device] {
        self.devices.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_by_index(&self, kind: &str, index: usize) -> Option<&Device> {
        self.get(kind).get(index)
    }

    pub fn get_by_id(&self, kind: &str, id: &str) -> Option<&Device> {
        self.get(kind)
            .iter()
            .find(|device| device.handle.id().as_deref() == Some(id))
    }

    /// Number of devices of a type.
    pub fn count(&self, kind: &str) -> usize {
        self.get(kind).len()
    }

    /// Remove a device by index, renumbering the ones after it.
    pub fn remove(&mut self, kind: &str, index: usize) -> Option<Device> {
        let list = self.devices.get_mut(kind)?;
        if index >= list.len() {
            return None;
        }
        let removed = list.remove(index);
        for (i, device) in list.iter_mut().enumerate().skip(index) {
            device.index = i;
        }
        Some(removed)
    }

    /// Drop every device record.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.devices.values().all(Vec::is_empty)
    }

    /// Device types present, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(kind, _)| kind.clone())
            .collect();
        kinds.sort();
        kinds
    }
}
