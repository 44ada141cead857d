//! Domain construction.
//!
//! ## Entry Points
//!
//! ```text
//! create(config)          settings → image → configure
//! recreate(saved, info)   adopt live domain → [settings → image → configure]
//! restore(source)         hypervisor restore → adopt → settings → configure → ARP
//! ```
//!
//! Any failure destroys the partially constructed domain before the error
//! is returned (see [`pipeline::with_rollback`]).

mod join;
mod pipeline;
pub(crate) mod stages;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use domkit_shared::Node;
use domkit_shared::constants::tags;
use domkit_shared::errors::{ConfigError, DomainError, DomainResult};

use super::{Domain, DomainId};
use crate::hypervisor::{DomHandle, DomainInfo};
use crate::runtime::SharedContext;
use crate::runtime::constants::defaults;
use pipeline::{configure, construct, with_rollback};
use stages::settings::Settings;

/// Build a new domain from `config`.
pub(crate) async fn create(ctx: SharedContext, config: Node) -> DomainResult<Arc<Domain>> {
    let domain = Arc::new(Domain::new(ctx, false));
    tracing::info!(domain_id = %domain.id(), "Creating domain");

    construct(&domain, config).await?;
    Ok(domain)
}

/// Attach to a domain that already exists in the hypervisor.
///
/// `saved` is a `(domain ...)` record as produced by [`Domain::to_sxpr`];
/// `info` the live record from the control plane. Without a saved
/// `config` the entity is returned as-is.
pub(crate) async fn recreate(
    ctx: SharedContext,
    saved: &Node,
    info: &DomainInfo,
) -> DomainResult<Arc<Domain>> {
    let id = saved
        .child_str(tags::ID)
        .and_then(DomainId::parse)
        .unwrap_or_default();
    let domain = Arc::new(Domain::with_id(id, ctx, true));
    let dom = DomHandle(info.dom);
    domain.set_dom(dom)?;
    {
        let mut inner = domain.inner.write();
        inner.name = Some(info.name.clone());
        inner.memory_mib = info.mem_kb / 1024;
        inner.info = Some(info.clone());
        inner.start_time = saved_start_time(saved);
    }
    tracing::info!(domain_id = %domain.id(), dom = %dom, name = %info.name, "Recreating domain");

    if let Some(config) = saved.child_value(tags::CONFIG) {
        construct(&domain, config.clone()).await?;
    }
    Ok(domain)
}

/// Restore a domain from a saved image and configure it.
pub(crate) async fn restore(
    ctx: SharedContext,
    source: &Path,
    progress: bool,
) -> DomainResult<Arc<Domain>> {
    let restored =
        ctx.platform
            .control
            .restore(defaults::RESTORE_OS_TYPE, source, progress)?;
    let dom = DomHandle::from_raw(restored.dom).ok_or_else(|| {
        DomainError::Resource(format!("restore failed: {} (rc={})", source.display(), restored.dom))
    })?;

    let domain = Arc::new(Domain::new(ctx, false));
    tracing::info!(domain_id = %domain.id(), dom = %dom, source = %source.display(), "Restoring domain");

    with_rollback(&domain, async {
        domain.set_dom(dom)?;
        let info = domain
            .platform()
            .control
            .domain_get_info(dom)?
            .filter(|info| info.dom == dom.as_u32())
            .ok_or_else(|| DomainError::Resource(format!("Domain not found: {}", dom)))?;

        {
            let mut inner = domain.inner.write();
            inner.name = Some(info.name.clone());
            inner.memory_mib = info.mem_kb / 1024;
            inner.info = Some(info);
        }

        let config = restored
            .vmconfig
            .child_value(tags::CONFIG)
            .cloned()
            .ok_or(ConfigError::MissingConfig)?;
        Settings::parse(&config)?.apply(&domain);
        domain.inner.write().config = Some(config);

        configure(&domain).await
    })
    .await?;

    let ipaddrs = domain.ipaddrs();
    if !ipaddrs.is_empty()
        && let Err(e) = domain.platform().arp.announce(&ipaddrs).await
    {
        tracing::warn!(domain_id = %domain.id(), "Failed to announce domain addresses: {}", e);
    }

    Ok(domain)
}

/// `start_time` of a saved record, in epoch seconds.
fn saved_start_time(saved: &Node) -> Option<DateTime<Utc>> {
    match saved.child_parse::<f64>(tags::START_TIME)? {
        Ok(secs) => DateTime::from_timestamp_millis((secs * 1000.0) as i64),
        Err(raw) => {
            tracing::warn!(start_time = %raw, "Ignoring invalid saved start time");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_start_time() {
        let saved = Node::list("domain", [Node::field("start_time", 1_700_000_000.5)]);
        let start = saved_start_time(&saved).unwrap();
        assert_eq!(start.timestamp_millis(), 1_700_000_000_500);

        assert!(saved_start_time(&Node::tag("domain")).is_none());
        assert!(saved_start_time(&Node::list("domain", [Node::field("start_time", "x")])).is_none());
    }
}
