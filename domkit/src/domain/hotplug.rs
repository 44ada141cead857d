//! Runtime device add/remove on a constructed domain.

use std::sync::Arc;

use domkit_shared::Node;
use domkit_shared::constants::tags;
use domkit_shared::errors::{ConfigError, DomainResult};

use super::{Domain, device_subtrees};
use crate::handlers::{DeviceHandler, DeviceOutcome};

impl Domain {
    /// Attach a new device described by `dev_config`, e.g. `(vif (mac ..))`.
    ///
    /// The device gets the next index of its type and `(device <dev_config>)`
    /// is appended to the retained configuration. If the handler fails the
    /// configuration entry is removed again.
    pub async fn create_device(self: &Arc<Self>, dev_config: Node) -> DomainResult<DeviceOutcome> {
        let _op = self.op_lock.lock().await;
        self.ensure_active()?;

        let kind = dev_config
            .name()
            .ok_or_else(|| ConfigError::InvalidDevice(dev_config.to_string()))?
            .to_string();
        let handler = self
            .context()
            .registries
            .devices
            .lookup(&kind)
            .ok_or_else(|| ConfigError::UnknownDeviceType(kind.clone()))?;

        let index = self.device_count(&kind);
        let entry = Node::list(tags::DEVICE, [dev_config.clone()]);
        {
            let mut inner = self.inner.write();
            inner
                .config
                .get_or_insert_with(|| Node::tag("vm"))
                .push(entry.clone());
        }

        tracing::info!(domain_id = %self.id(), kind = %kind, index, "Creating device");
        match self.run_device_handler(handler, &kind, dev_config, index).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Some(config) = self.inner.write().config.as_mut() {
                    config.remove(&entry);
                }
                Err(e)
            }
        }
    }

    /// Detach and destroy the `index`-th device of `kind`.
    ///
    /// Later devices of the same type shift down one index.
    pub async fn destroy_device(&self, kind: &str, index: usize) -> DomainResult<()> {
        let _op = self.op_lock.lock().await;
        self.ensure_active()?;

        let device = {
            let mut inner = self.inner.write();
            let device = inner
                .devices
                .remove(kind, index)
                .ok_or_else(|| ConfigError::InvalidDevice(format!("{} {}", kind, index)))?;

            let dev_config = inner
                .config
                .as_ref()
                .and_then(|config| device_subtrees(config, kind).nth(index).cloned());
            if let (Some(dev_config), Some(config)) = (dev_config, inner.config.as_mut()) {
                config.remove(&Node::list(tags::DEVICE, [dev_config]));
            }
            device
        };

        tracing::info!(domain_id = %self.id(), kind, index, "Destroying device");
        device.handle().destroy().await
    }

    /// Run a device handler and record what it attached.
    pub(crate) async fn run_device_handler(
        self: &Arc<Self>,
        handler: Arc<dyn DeviceHandler>,
        kind: &str,
        config: Node,
        index: usize,
    ) -> DomainResult<DeviceOutcome> {
        let outcome = handler.create(Arc::clone(self), config, index).await?;
        if let Some(ref handle) = outcome {
            self.insert_device(kind, index, Arc::clone(handle)).await?;
        }
        Ok(outcome)
    }
}
