//! Stage 2 of configure: device creation.

use std::collections::HashMap;
use std::sync::Arc;

use domkit_shared::Node;
use domkit_shared::constants::tags;
use domkit_shared::errors::{ConfigError, DomainResult};

use crate::domain::Domain;
use crate::domain::init::join::join_first_error;

/// Create every `(device ...)` of `config`.
///
/// All handlers are resolved first, so an unknown type fails the stage
/// before any device is started. Indices count per type from zero in
/// declaration order.
pub async fn run(domain: &Arc<Domain>, config: &Node) -> DomainResult<()> {
    let registries = &domain.context().registries;

    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut planned = Vec::new();
    for entry in config.children_named(tags::DEVICE) {
        let dev = entry
            .child0()
            .ok_or_else(|| ConfigError::InvalidDevice(String::new()))?;
        let kind = dev
            .name()
            .ok_or_else(|| ConfigError::InvalidDevice(dev.to_string()))?;
        let handler = registries
            .devices
            .lookup(kind)
            .ok_or_else(|| ConfigError::UnknownDeviceType(kind.to_string()))?;

        let counter = counters.entry(kind.to_string()).or_insert(0);
        planned.push((handler, kind.to_string(), dev.clone(), *counter));
        *counter += 1;
    }

    if planned.is_empty() {
        return Ok(());
    }

    tracing::debug!(domain_id = %domain.id(), devices = planned.len(), "Creating devices");
    let tasks = planned
        .into_iter()
        .map(|(handler, kind, dev, index)| {
            let domain = Arc::clone(domain);
            tokio::spawn(async move {
                domain
                    .run_device_handler(handler, &kind, dev, index)
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    join_first_error(tasks).await?;
    Ok(())
}
