//! Recording backend controller and device handles.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domkit::hypervisor::{BackendController, DeviceHandle, DeviceRequest, DomHandle};
use domkit_shared::Node;
use domkit_shared::errors::{DomainError, DomainResult};
use parking_lot::Mutex;

// ============================================================================
// DEVICE
// ============================================================================

/// Device resource created by [`FakeBackend`].
#[derive(Debug)]
pub struct FakeDevice {
    kind: &'static str,
    index: usize,
    id: String,
    mac: Option<String>,
    up: AtomicBool,
    destroyed: AtomicBool,
}

impl FakeDevice {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceHandle for FakeDevice {
    fn id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn sxpr(&self) -> Node {
        let mut node = Node::list(self.kind, [Node::field("id", &self.id)]);
        if let Some(mac) = &self.mac {
            node.push(Node::field("mac", mac));
        }
        node
    }

    async fn up(&self, _vm_name: &str) -> DomainResult<()> {
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> DomainResult<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// BACKEND
// ============================================================================

#[derive(Default)]
struct State {
    controllers: HashSet<DomHandle>,
    control_domains: Vec<DomHandle>,
    devices: BTreeMap<(DomHandle, usize), Arc<FakeDevice>>,
    requests: Vec<(DomHandle, usize, DeviceRequest)>,
    destroy_all_calls: Vec<DomHandle>,

    fail_at: HashSet<usize>,
    delays: HashMap<usize, Duration>,
}

/// In-memory backend controller.
///
/// Devices are named `<kind><dom>.<index>` (`vif1.0`) and carry a mac for
/// network requests.
pub struct FakeBackend {
    name: &'static str,
    kind: &'static str,
    state: Mutex<State>,
}

impl FakeBackend {
    /// Network backend producing `vif` devices.
    pub fn netif() -> Self {
        Self::new("netif", "vif")
    }

    /// Block backend producing `vbd` devices.
    pub fn blkif() -> Self {
        Self::new("blkif", "vbd")
    }

    fn new(name: &'static str, kind: &'static str) -> Self {
        Self {
            name,
            kind,
            state: Mutex::new(State::default()),
        }
    }

    /// Fail `create_device` for this index.
    pub fn fail_create_at(&self, index: usize) {
        self.state.lock().fail_at.insert(index);
    }

    /// Delay `create_device` for this index.
    pub fn delay_create(&self, index: usize, delay: Duration) {
        self.state.lock().delays.insert(index, delay);
    }

    pub fn has_controller(&self, dom: DomHandle) -> bool {
        self.state.lock().controllers.contains(&dom)
    }

    pub fn control_domains(&self) -> Vec<DomHandle> {
        self.state.lock().control_domains.clone()
    }

    pub fn requests(&self) -> Vec<(DomHandle, usize, DeviceRequest)> {
        self.state.lock().requests.clone()
    }

    pub fn destroy_all_calls(&self) -> Vec<DomHandle> {
        self.state.lock().destroy_all_calls.clone()
    }

    /// Devices currently held by the backend, in `(dom, index)` order.
    pub fn devices(&self) -> Vec<Arc<FakeDevice>> {
        self.state.lock().devices.values().cloned().collect()
    }

    pub fn device(&self, dom: DomHandle, index: usize) -> Option<Arc<FakeDevice>> {
        self.state.lock().devices.get(&(dom, index)).cloned()
    }
}

#[async_trait]
impl BackendController for FakeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn ensure_controller(&self, dom: DomHandle, _recreate: bool) -> DomainResult<()> {
        self.state.lock().controllers.insert(dom);
        Ok(())
    }

    async fn set_control_domain(&self, dom: DomHandle, _recreate: bool) -> DomainResult<()> {
        self.state.lock().control_domains.push(dom);
        Ok(())
    }

    async fn create_device(
        &self,
        dom: DomHandle,
        index: usize,
        request: DeviceRequest,
        _recreate: bool,
    ) -> DomainResult<()> {
        let delay = self.state.lock().delays.get(&index).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let mac = match &request {
            DeviceRequest::Net { config } => Some(
                config
                    .child_str("mac")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("aa:00:00:00:{:02x}:{:02x}", dom.0 & 0xff, index & 0xff)),
            ),
            DeviceRequest::Block { .. } => None,
        };
        state.requests.push((dom, index, request));
        if state.fail_at.contains(&index) {
            return Err(DomainError::Resource(format!(
                "{}: device {} refused for dom {}",
                self.name, index, dom
            )));
        }

        let device = Arc::new(FakeDevice {
            kind: self.kind,
            index,
            id: format!("{}{}.{}", self.kind, dom, index),
            mac,
            up: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        state.devices.insert((dom, index), device);
        Ok(())
    }

    fn lookup_device(&self, dom: DomHandle, index: usize) -> Option<Arc<dyn DeviceHandle>> {
        self.state
            .lock()
            .devices
            .get(&(dom, index))
            .map(|device| Arc::clone(device) as Arc<dyn DeviceHandle>)
    }

    async fn destroy_all(&self, dom: DomHandle) -> DomainResult<bool> {
        let mut state = self.state.lock();
        state.destroy_all_calls.push(dom);
        let existed = state.controllers.remove(&dom);
        state.devices.retain(|(owner, _), device| {
            if *owner == dom {
                device.destroyed.store(true, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
        Ok(existed)
    }
}
