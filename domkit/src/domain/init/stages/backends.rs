//! Stage 1 of configure: backend attachment.
//!
//! A domain hosting a backend is declared as that backend's control domain.
//! Every domain that does not host the block backend gets its block
//! controller created up front, so vbd creation never races it.

use std::sync::Arc;

use domkit_shared::errors::DomainResult;

use crate::domain::Domain;
use crate::domain::init::join::join_first_error;

pub async fn run(domain: &Arc<Domain>) -> DomainResult<()> {
    let dom = domain.require_dom()?;
    let recreate = domain.is_recreate();
    let platform = domain.platform();

    let blkif = Arc::clone(&platform.blkif);
    let mut tasks = Vec::new();
    if domain.is_blkif_backend() {
        tasks.push(tokio::spawn(async move {
            blkif.set_control_domain(dom, recreate).await
        }));
    } else {
        tasks.push(tokio::spawn(async move {
            blkif.ensure_controller(dom, recreate).await
        }));
    }

    if domain.is_netif_backend() {
        let netif = Arc::clone(&platform.netif);
        tasks.push(tokio::spawn(async move {
            netif.set_control_domain(dom, recreate).await
        }));
    }

    tracing::debug!(domain_id = %domain.id(), dom = %dom, tasks = tasks.len(), "Attaching backends");
    join_first_error(tasks).await?;
    Ok(())
}
