//! PCI passthrough handler.

use std::sync::Arc;

use async_trait::async_trait;
use domkit_shared::Node;
use domkit_shared::constants::devices::PCI;
use domkit_shared::errors::{ConfigError, DomainResult};

use super::{DeviceHandler, DeviceHandlerRegistration, DeviceOutcome};
use crate::domain::Domain;

/// Parse a PCI address component: decimal, or hex with a `0x`/`0X` prefix.
pub fn parse_pci(value: &str) -> Option<u32> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Grants a domain access to `(pci (bus ..) (dev ..) (func ..))`.
///
/// No device handle is produced; nothing enters the device table.
#[derive(Debug, Default)]
pub struct PciHandler;

impl PciHandler {
    fn component(config: &Node, tag: &str) -> DomainResult<u32> {
        let raw = config
            .child_str(tag)
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| ConfigError::device(PCI, format!("Missing {}", tag)))?;
        parse_pci(raw).ok_or_else(|| ConfigError::device(PCI, "invalid parameter").into())
    }
}

#[async_trait]
impl DeviceHandler for PciHandler {
    async fn create(
        &self,
        domain: Arc<Domain>,
        config: Node,
        _index: usize,
    ) -> DomainResult<DeviceOutcome> {
        let bus = Self::component(&config, "bus")?;
        let dev = Self::component(&config, "dev")?;
        let func = Self::component(&config, "func")?;

        let dom = domain.require_dom()?;
        tracing::debug!(dom = %dom, "Creating pci device bus={:x} dev={:x} func={:x}", bus, dev, func);

        let rc = domain
            .platform()
            .control
            .physdev_pci_access_modify(dom, bus, dev, func, true)?;
        if rc < 0 {
            return Err(ConfigError::device(
                PCI,
                format!(
                    "Failed to configure device: bus={:#x} dev={:#x} func={:#x}",
                    bus, dev, func
                ),
            )
            .into());
        }
        Ok(None)
    }
}

fn pci_handler() -> Arc<dyn DeviceHandler> {
    Arc::new(PciHandler)
}

inventory::submit! {
    DeviceHandlerRegistration {
        name: PCI,
        factory: pci_handler,
    }
}
