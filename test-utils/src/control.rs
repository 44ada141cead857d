//! Recording hypervisor control plane.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use domkit::hypervisor::{BuildRequest, ControlPlane, DomHandle, DomainInfo, RestoredImage};
use domkit_shared::Node;
use domkit_shared::errors::{DomainError, DomainResult};
use parking_lot::Mutex;

/// A recorded `domain_create` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateCall {
    pub memory_kib: u64,
    pub name: String,
    pub cpu: i32,
}

/// A recorded `physdev_pci_access_modify` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PciCall {
    pub dom: DomHandle,
    pub bus: u32,
    pub dev: u32,
    pub func: u32,
    pub enable: bool,
}

#[derive(Default)]
struct State {
    next_dom: u32,
    fail_create: bool,
    build_rc: i32,
    destroy_rc: i32,
    pci_rc: i32,
    restore: Option<(i64, Node)>,
    infos: HashMap<u32, DomainInfo>,

    creates: Vec<CreateCall>,
    builds: Vec<BuildRequest>,
    destroys: Vec<DomHandle>,
    pci: Vec<PciCall>,
    restores: Vec<PathBuf>,
}

/// In-memory control plane. Domains get handles 1, 2, 3, ... and a live
/// record is kept for each so `domain_get_info` finds them.
pub struct FakeControlPlane {
    state: Mutex<State>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_dom: 1,
                ..Default::default()
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Behaviour
    // ------------------------------------------------------------------------

    /// Make `domain_create` report failure.
    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    pub fn set_build_rc(&self, rc: i32) {
        self.state.lock().build_rc = rc;
    }

    pub fn set_destroy_rc(&self, rc: i32) {
        self.state.lock().destroy_rc = rc;
    }

    pub fn set_pci_rc(&self, rc: i32) {
        self.state.lock().pci_rc = rc;
    }

    /// Result of the next restore: raw handle and `(vmconfig ...)` tree.
    pub fn set_restore(&self, dom: i64, vmconfig: Node) {
        self.state.lock().restore = Some((dom, vmconfig));
    }

    /// Register a live domain record.
    pub fn insert_info(&self, info: DomainInfo) {
        self.state.lock().infos.insert(info.dom, info);
    }

    // ------------------------------------------------------------------------
    // Recorded calls
    // ------------------------------------------------------------------------

    pub fn creates(&self) -> Vec<CreateCall> {
        self.state.lock().creates.clone()
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.state.lock().builds.clone()
    }

    pub fn destroys(&self) -> Vec<DomHandle> {
        self.state.lock().destroys.clone()
    }

    pub fn pci_calls(&self) -> Vec<PciCall> {
        self.state.lock().pci.clone()
    }

    pub fn restores(&self) -> Vec<PathBuf> {
        self.state.lock().restores.clone()
    }
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlane for FakeControlPlane {
    fn domain_create(&self, memory_kib: u64, name: &str, cpu: i32) -> DomainResult<i64> {
        let mut state = self.state.lock();
        state.creates.push(CreateCall {
            memory_kib,
            name: name.to_string(),
            cpu,
        });
        if state.fail_create {
            return Ok(-1);
        }

        let dom = state.next_dom;
        state.next_dom += 1;
        state.infos.insert(
            dom,
            DomainInfo {
                dom,
                name: name.to_string(),
                mem_kb: memory_kib,
                cpu: cpu.max(0),
                ..Default::default()
            },
        );
        Ok(i64::from(dom))
    }

    fn domain_build(&self, request: &BuildRequest) -> DomainResult<i32> {
        let mut state = self.state.lock();
        state.builds.push(request.clone());
        Ok(state.build_rc)
    }

    fn domain_destroy(&self, dom: DomHandle) -> DomainResult<i32> {
        let mut state = self.state.lock();
        state.destroys.push(dom);
        state.infos.remove(&dom.as_u32());
        Ok(state.destroy_rc)
    }

    fn domain_get_info(&self, dom: DomHandle) -> DomainResult<Option<DomainInfo>> {
        Ok(self.state.lock().infos.get(&dom.as_u32()).cloned())
    }

    fn physdev_pci_access_modify(
        &self,
        dom: DomHandle,
        bus: u32,
        dev: u32,
        func: u32,
        enable: bool,
    ) -> DomainResult<i32> {
        let mut state = self.state.lock();
        state.pci.push(PciCall {
            dom,
            bus,
            dev,
            func,
            enable,
        });
        Ok(state.pci_rc)
    }

    fn restore(&self, _os_type: &str, source: &Path, _progress: bool) -> DomainResult<RestoredImage> {
        let mut state = self.state.lock();
        state.restores.push(source.to_path_buf());
        let (dom, vmconfig) = state
            .restore
            .clone()
            .ok_or_else(|| DomainError::Resource(format!("no saved image at {}", source.display())))?;
        Ok(RestoredImage { dom, vmconfig })
    }
}
