//! Shared constants for domain orchestration.
//!
//! Tags and flag values that both the orchestrator and hypervisor bindings
//! must agree on.

/// Start-info flags passed to the hypervisor domain builder.
pub mod build_flags {
    /// Domain hosts the block device backend.
    pub const SIF_BLK_BE_DOMAIN: u32 = 1 << 4;

    /// Domain hosts the network device backend.
    pub const SIF_NET_BE_DOMAIN: u32 = 1 << 5;
}

/// Hypervisor shutdown codes.
pub mod shutdown {
    pub const POWEROFF: u32 = 0;
    pub const REBOOT: u32 = 1;
    pub const SUSPEND: u32 = 2;
}

/// Top-level configuration tags.
pub mod tags {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const MEMORY: &str = "memory";
    pub const CPU: &str = "cpu";
    pub const CONSOLE: &str = "console";
    pub const IMAGE: &str = "image";
    pub const DEVICE: &str = "device";
    pub const BACKEND: &str = "backend";
    pub const RESTART: &str = "restart";
    pub const CONFIG: &str = "config";
    pub const START_TIME: &str = "start_time";

    /// Tags consumed during construction; the field stage skips them.
    pub const CONSUMED: &[&str] = &[NAME, MEMORY, CPU, CONSOLE, IMAGE, DEVICE, BACKEND, RESTART];
}

/// Backend kinds accepted in `(backend (<kind>))` nodes.
pub mod backends {
    pub const BLKIF: &str = "blkif";
    pub const NETIF: &str = "netif";
}

/// Built-in device type tags.
pub mod devices {
    pub const VIF: &str = "vif";
    pub const VBD: &str = "vbd";
    pub const PCI: &str = "pci";
}
