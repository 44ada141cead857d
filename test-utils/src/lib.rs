//! Shared test fixtures for domkit.
//!
//! Recording fakes for every platform collaborator, a [`TestPlatform`]
//! bundling them, and configuration builders used across integration tests.

pub mod backend;
pub mod control;
pub mod host;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use domkit::hypervisor::{Platform, Segment};
use domkit::{DomainRuntime, Registries, RuntimeOptions};
use domkit_shared::Node;
use tempfile::TempDir;

pub use backend::{FakeBackend, FakeDevice};
pub use control::{CreateCall, FakeControlPlane, PciCall};
pub use host::{CONSOLE_PORT_BASE, FakeArp, FakeConsoles, FakeDisks};

// ============================================================================
// PLATFORM
// ============================================================================

/// Fakes for every collaborator, kept around for inspection.
pub struct TestPlatform {
    pub control: Arc<FakeControlPlane>,
    pub netif: Arc<FakeBackend>,
    pub blkif: Arc<FakeBackend>,
    pub consoles: Arc<FakeConsoles>,
    pub disks: Arc<FakeDisks>,
    pub arp: Arc<FakeArp>,
}

impl TestPlatform {
    /// Platform with the default disk table (see [`default_disks`]).
    pub fn new() -> Self {
        Self::with_disks(default_disks())
    }

    pub fn with_disks(disks: FakeDisks) -> Self {
        Self {
            control: Arc::new(FakeControlPlane::new()),
            netif: Arc::new(FakeBackend::netif()),
            blkif: Arc::new(FakeBackend::blkif()),
            consoles: Arc::new(FakeConsoles::new()),
            disks: Arc::new(disks),
            arp: Arc::new(FakeArp::new()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            control: self.control.clone(),
            netif: self.netif.clone(),
            blkif: self.blkif.clone(),
            consoles: self.consoles.clone(),
            disks: self.disks.clone(),
            arp: self.arp.clone(),
        }
    }

    /// Runtime with the built-in handlers and boot file checks disabled.
    pub fn runtime(&self) -> DomainRuntime {
        self.runtime_with(test_options())
    }

    pub fn runtime_with(&self, options: RuntimeOptions) -> DomainRuntime {
        DomainRuntime::new(self.platform(), Registries::with_builtins(), options)
    }
}

impl Default for TestPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for tests: no boot file checks, home under the system temp dir.
pub fn test_options() -> RuntimeOptions {
    RuntimeOptions {
        home_dir: std::env::temp_dir().join("domkit-tests"),
        check_boot_files: false,
        ..Default::default()
    }
}

/// `sda1` is a single extent, `sdc` spans two; `hda1`/`hdb` are guest names.
pub fn default_disks() -> FakeDisks {
    FakeDisks::new()
        .with_partition("sda1", vec![Segment::whole_disk(0x801)])
        .with_partition(
            "sdc",
            vec![Segment::whole_disk(0x821), Segment::whole_disk(0x822)],
        )
        .with_device("hda1", 0x301)
        .with_device("hdb", 0x340)
}

// ============================================================================
// CONFIGURATIONS
// ============================================================================

/// `(vm (name <name>) (memory <memory>) (image (linux (kernel /boot/k))))`
pub fn minimal_config(name: &str, memory: u64) -> Node {
    Node::list(
        "vm",
        [
            Node::field("name", name),
            Node::field("memory", memory),
            linux_image("/boot/k"),
        ],
    )
}

/// `vm1` with 64 MiB, a linux kernel, one vif and one vbd.
pub fn e2e_config() -> Node {
    minimal_config("vm1", 64)
        .with(device(Node::tag("vif")))
        .with(device(vbd("phy:sda1", "hda1")))
}

/// `(image (linux (kernel <kernel>)))`
pub fn linux_image(kernel: &str) -> Node {
    Node::list(
        "image",
        [Node::list("linux", [Node::field("kernel", kernel)])],
    )
}

/// `(device <dev>)`
pub fn device(dev: Node) -> Node {
    Node::list("device", [dev])
}

/// `(vbd (uname <uname>) (dev <dev>))`
pub fn vbd(uname: &str, dev: &str) -> Node {
    Node::list(
        "vbd",
        [Node::field("uname", uname), Node::field("dev", dev)],
    )
}

/// `(pci (bus <bus>) (dev <dev>) (func <func>))`
pub fn pci(bus: &str, dev: &str, func: &str) -> Node {
    Node::list(
        "pci",
        [
            Node::field("bus", bus),
            Node::field("dev", dev),
            Node::field("func", func),
        ],
    )
}

// ============================================================================
// BOOT FILES
// ============================================================================

/// Kernel and ramdisk files in a temporary directory.
pub struct KernelFiles {
    _dir: TempDir,
    pub kernel: PathBuf,
    pub ramdisk: PathBuf,
}

impl KernelFiles {
    pub fn new() -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        let kernel = dir.path().join("vmlinuz");
        let ramdisk = dir.path().join("initrd.img");
        std::fs::write(&kernel, b"kernel")?;
        std::fs::write(&ramdisk, b"ramdisk")?;
        Ok(Self {
            _dir: dir,
            kernel,
            ramdisk,
        })
    }

    /// Image node pointing at these files.
    pub fn image(&self) -> Node {
        Node::list(
            "image",
            [Node::list(
                "linux",
                [
                    Node::field("kernel", display(&self.kernel)),
                    Node::field("ramdisk", display(&self.ramdisk)),
                ],
            )],
        )
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
