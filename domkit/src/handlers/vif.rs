//! Virtual network interface handler.

use std::sync::Arc;

use async_trait::async_trait;
use domkit_shared::Node;
use domkit_shared::constants::devices::VIF;
use domkit_shared::errors::{ConfigError, DomainError, DomainResult};

use super::{DeviceHandler, DeviceHandlerRegistration, DeviceOutcome};
use crate::domain::Domain;
use crate::hypervisor::DeviceRequest;

/// Creates `(vif (mac ..) (bridge ..) ...)` devices through the network backend.
#[derive(Debug, Default)]
pub struct VifHandler;

#[async_trait]
impl DeviceHandler for VifHandler {
    async fn create(
        &self,
        domain: Arc<Domain>,
        config: Node,
        index: usize,
    ) -> DomainResult<DeviceOutcome> {
        if domain.is_netif_backend() {
            return Err(ConfigError::device(VIF, "vif in netif backend domain").into());
        }
        let dom = domain.require_dom()?;
        let recreate = domain.is_recreate();
        let netif = Arc::clone(&domain.platform().netif);

        netif.ensure_controller(dom, recreate).await?;

        tracing::debug!(dom = %dom, vif = index, mac = ?config.child_str("mac"), "Creating vif");
        netif
            .create_device(dom, index, DeviceRequest::Net { config }, recreate)
            .await?;

        let device = netif.lookup_device(dom, index).ok_or_else(|| {
            DomainError::Resource(format!("vif not found after creation: dom={} vif={}", dom, index))
        })?;
        device.up(&domain.name().unwrap_or_default()).await?;

        Ok(Some(device))
    }
}

fn vif_handler() -> Arc<dyn DeviceHandler> {
    Arc::new(VifHandler)
}

inventory::submit! {
    DeviceHandlerRegistration {
        name: VIF,
        factory: vif_handler,
    }
}
