//! Virtual block device handler.

use std::sync::Arc;

use async_trait::async_trait;
use domkit_shared::Node;
use domkit_shared::constants::devices::VBD;
use domkit_shared::errors::{ConfigError, DomainError, DomainResult, SegmentError};

use super::{DeviceHandler, DeviceHandlerRegistration, DeviceOutcome};
use crate::domain::Domain;
use crate::hypervisor::{DeviceRequest, DiskResolver, Segment};
use crate::runtime::constants::defaults;

/// Look up the extents behind a storage locator such as `phy:sda1`.
///
/// Only `phy:` locators resolve; other kinds yield `None`.
pub async fn lookup_disk_uname(
    disks: &dyn DiskResolver,
    uname: &str,
) -> DomainResult<Option<Vec<Segment>>> {
    let (kind, name) = uname
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidDevice(format!("vbd uname {}", uname)))?;

    match kind {
        "phy" => disks.lookup_raw_partition(name).await,
        _ => Ok(None),
    }
}

/// Resolve a locator that must map to exactly one extent.
pub async fn resolve_segment(disks: &dyn DiskResolver, uname: &str) -> DomainResult<Segment> {
    let mut segments = lookup_disk_uname(disks, uname).await?.unwrap_or_default();
    match segments.len() {
        0 => Err(SegmentError::NotFound {
            uname: uname.to_string(),
        }
        .into()),
        1 => Ok(segments.remove(0)),
        count => Err(SegmentError::MultiSegment {
            uname: uname.to_string(),
            count,
        }
        .into()),
    }
}

/// Creates `(vbd (uname phy:sda1) (dev hda1) (mode w))` devices through the block backend.
#[derive(Debug, Default)]
pub struct VbdHandler;

#[async_trait]
impl DeviceHandler for VbdHandler {
    async fn create(
        &self,
        domain: Arc<Domain>,
        config: Node,
        index: usize,
    ) -> DomainResult<DeviceOutcome> {
        if domain.is_blkif_backend() {
            return Err(ConfigError::device(VBD, "vbd in blkif backend domain").into());
        }
        let uname = config
            .child_str("uname")
            .filter(|uname| !uname.is_empty())
            .ok_or_else(|| ConfigError::device(VBD, "Missing uname"))?;
        let dev = config
            .child_str("dev")
            .filter(|dev| !dev.is_empty())
            .ok_or_else(|| ConfigError::device(VBD, "Missing dev"))?;
        let mode = config.child_str_or("mode", defaults::VBD_MODE).to_string();

        let dom = domain.require_dom()?;
        let recreate = domain.is_recreate();
        tracing::debug!(dom = %dom, uname, dev, mode = %mode, "Creating vbd");

        let platform = domain.platform();
        let segment = resolve_segment(platform.disks.as_ref(), uname).await?;
        let vdev = platform.disks.device_number(dev).await?;

        let blkif = Arc::clone(&platform.blkif);
        blkif.ensure_controller(dom, recreate).await?;
        blkif
            .create_device(
                dom,
                index,
                DeviceRequest::Block {
                    vdev,
                    mode,
                    segment,
                },
                recreate,
            )
            .await?;

        let device = blkif.lookup_device(dom, index).ok_or_else(|| {
            DomainError::Resource(format!("vbd not found after creation: dom={} vbd={}", dom, index))
        })?;
        Ok(Some(device))
    }
}

fn vbd_handler() -> Arc<dyn DeviceHandler> {
    Arc::new(VbdHandler)
}

inventory::submit! {
    DeviceHandlerRegistration {
        name: VBD,
        factory: vbd_handler,
    }
}
