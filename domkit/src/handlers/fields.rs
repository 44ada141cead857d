//! Field handlers: `vfr` and `vnet`.

use std::sync::Arc;

use async_trait::async_trait;
use domkit_shared::Node;
use domkit_shared::constants::devices::VIF;
use domkit_shared::errors::{ConfigError, DomainResult};

use super::{FieldHandler, FieldHandlerRegistration};
use crate::domain::Domain;

/// Collects the addresses of the domain's interfaces.
///
/// ```text
/// (vfr (vif (id 0) (ip 10.0.0.2)) (vif (id 1) (ip 10.0.1.2)))
/// ```
///
/// Every entry must reference an existing vif index and carry an address.
/// The addresses are announced on the network after restore.
#[derive(Debug, Default)]
pub struct VfrHandler;

#[async_trait]
impl FieldHandler for VfrHandler {
    async fn configure(
        &self,
        domain: Arc<Domain>,
        _config: Arc<Node>,
        field: Node,
        _index: usize,
    ) -> DomainResult<()> {
        let mut ipaddrs = Vec::new();
        for vif in field.children_named(VIF) {
            let id = match vif.child_parse::<usize>("id") {
                None => return Err(ConfigError::field("vfr", "missing vif id").into()),
                Some(Err(raw)) => {
                    return Err(ConfigError::field("vfr", format!("invalid vif id {}", raw)).into());
                }
                Some(Ok(id)) => id,
            };
            if domain.get_device_by_index(VIF, id).is_none() {
                return Err(ConfigError::field("vfr", format!("invalid vif id {}", id)).into());
            }
            let ip = vif
                .child_str("ip")
                .filter(|ip| !ip.is_empty())
                .ok_or_else(|| ConfigError::field("vfr", "missing ip address"))?;
            ipaddrs.push(ip.to_string());
        }

        tracing::debug!(domain_id = %domain.id(), ipaddrs = ?ipaddrs, "Configured vfr");
        domain.set_ipaddrs(ipaddrs);
        Ok(())
    }
}

/// Records which virtual network each interface belongs to.
///
/// ```text
/// (vnet (vif (id vif5.0) (vnet 2)))
/// ```
///
/// Entries are matched against the id of existing vifs; each match adds a
/// `(vif.vnet (id ..) (vnet ..) (mac ..))` record to the domain's configs.
#[derive(Debug, Default)]
pub struct VnetHandler;

#[async_trait]
impl FieldHandler for VnetHandler {
    async fn configure(
        &self,
        domain: Arc<Domain>,
        _config: Arc<Node>,
        field: Node,
        _index: usize,
    ) -> DomainResult<()> {
        for vif in field.children_named(VIF) {
            let id = vif
                .child_str("id")
                .ok_or_else(|| ConfigError::field("vnet", "missing vif id"))?;
            let vnet = vif.child_str_or("vnet", "1");

            let Some(device) = domain.get_device_by_id(VIF, id) else {
                tracing::warn!(domain_id = %domain.id(), vif = id, "vnet: unknown vif id");
                continue;
            };
            let mac = device
                .handle()
                .sxpr()
                .child_str("mac")
                .or(vif.child_str("mac"))
                .unwrap_or_default()
                .to_string();

            domain.add_config(Node::list(
                "vif.vnet",
                [
                    Node::field("id", id),
                    Node::field("vnet", vnet),
                    Node::field("mac", mac),
                ],
            ));
        }
        Ok(())
    }
}

fn vfr_handler() -> Arc<dyn FieldHandler> {
    Arc::new(VfrHandler)
}

fn vnet_handler() -> Arc<dyn FieldHandler> {
    Arc::new(VnetHandler)
}

inventory::submit! {
    FieldHandlerRegistration {
        name: "vfr",
        factory: vfr_handler,
    }
}

inventory::submit! {
    FieldHandlerRegistration {
        name: "vnet",
        factory: vnet_handler,
    }
}
