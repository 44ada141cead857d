//! Kernel image handlers (`linux`, `netbsd`).

use std::path::Path;
use std::sync::Arc;

use domkit_shared::Node;
use domkit_shared::constants::devices::VIF;
use domkit_shared::errors::{ConfigError, DomainResult};

use super::{ImageHandler, ImageHandlerRegistration};
use crate::domain::Domain;
use crate::runtime::constants::defaults;

/// Boots a kernel image of one OS type.
///
/// ```text
/// (linux (kernel /boot/vmlinuz) (ramdisk /boot/initrd) (ip dhcp) (root /dev/sda1) (args "ro quiet"))
/// ```
#[derive(Debug, Clone)]
pub struct KernelImageHandler {
    os_type: &'static str,
}

impl KernelImageHandler {
    pub const fn new(os_type: &'static str) -> Self {
        Self { os_type }
    }

    pub fn os_type(&self) -> &'static str {
        self.os_type
    }
}

impl ImageHandler for KernelImageHandler {
    fn create(&self, domain: &Domain, image: &Node) -> DomainResult<()> {
        let kernel = image
            .child_str("kernel")
            .filter(|kernel| !kernel.is_empty())
            .ok_or_else(|| ConfigError::image(self.os_type, "Missing kernel"))?;
        let ramdisk = image
            .child_str("ramdisk")
            .filter(|ramdisk| !ramdisk.is_empty())
            .map(Path::new);
        let cmdline = kernel_cmdline(image);

        tracing::debug!(
            domain_id = %domain.id(),
            os_type = self.os_type,
            kernel,
            cmdline = %cmdline,
            vifs = domain.config_devices(VIF).len(),
            "Creating kernel image domain"
        );
        domain.create_domain(self.os_type, Path::new(kernel), ramdisk, &cmdline)
    }
}

/// Kernel command line: `ip=<ip> root=<root> <args>`, skipping absent parts.
///
/// `ip` defaults to `dhcp`.
pub fn kernel_cmdline(image: &Node) -> String {
    let mut parts = Vec::new();

    let ip = image.child_str_or("ip", defaults::KERNEL_IP);
    if !ip.is_empty() {
        parts.push(format!("ip={}", ip));
    }
    if let Some(root) = image.child_str("root").filter(|root| !root.is_empty()) {
        parts.push(format!("root={}", root));
    }
    if let Some(args) = image.child_str("args").filter(|args| !args.is_empty()) {
        parts.push(args.to_string());
    }

    parts.join(" ")
}

fn linux_handler() -> Arc<dyn ImageHandler> {
    Arc::new(KernelImageHandler::new("linux"))
}

fn netbsd_handler() -> Arc<dyn ImageHandler> {
    Arc::new(KernelImageHandler::new("netbsd"))
}

inventory::submit! {
    ImageHandlerRegistration {
        name: "linux",
        factory: linux_handler,
    }
}

inventory::submit! {
    ImageHandlerRegistration {
        name: "netbsd",
        factory: netbsd_handler,
    }
}
