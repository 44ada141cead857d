//! Teardown.

use std::sync::atomic::Ordering;

use domkit_shared::errors::{DomainError, DomainResult};

use super::{Domain, DomainStatus};
use crate::hypervisor::DomHandle;

impl Domain {
    /// Destroy the domain: release its devices, then the hypervisor domain.
    ///
    /// Idempotent. The first call marks the entity Terminated; later calls
    /// return `Ok(())` without touching the hypervisor. Every teardown step
    /// runs even if an earlier one fails; the first failure is returned.
    pub async fn destroy(&self) -> DomainResult<()> {
        let _op = self.op_lock.lock().await;

        let dom = {
            let mut inner = self.inner.write();
            if !inner.status.can_transition_to(DomainStatus::Terminated) {
                return Ok(());
            }
            inner.status = DomainStatus::Terminated;
            inner.dom
        };

        tracing::info!(domain_id = %self.id(), dom = ?dom, "Destroying domain");

        let mut first_err = None;
        if let Err(e) = self.release_devices(dom).await {
            first_err = Some(e);
        }

        if let Some(dom) = dom
            && let Err(e) = self.destroy_domain(dom)
        {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release network devices, then block devices, then forget the table.
    async fn release_devices(&self, dom: Option<DomHandle>) -> DomainResult<()> {
        let mut first_err = None;

        if let Some(dom) = dom {
            let platform = self.platform();
            for backend in [&platform.netif, &platform.blkif] {
                match backend.destroy_all(dom).await {
                    Ok(true) => {
                        tracing::debug!(dom = %dom, backend = backend.name(), "Released devices")
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(dom = %dom, backend = backend.name(), "Failed to release devices: {}", e);
                        first_err.get_or_insert(e);
                    }
                }
            }
        }

        self.inner.write().devices.clear();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close the console channel and destroy the hypervisor domain.
    ///
    /// The destroy call is issued at most once per entity.
    fn destroy_domain(&self, dom: DomHandle) -> DomainResult<()> {
        let platform = self.platform();
        if platform.consoles.close_channel(dom) {
            tracing::debug!(dom = %dom, "Closed channel to domain");
        }

        if self.domain_destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let rc = platform.control.domain_destroy(dom)?;
        if rc < 0 {
            return Err(DomainError::Resource(format!(
                "Destroying domain failed: dom={} err={}",
                dom, rc
            )));
        }
        Ok(())
    }
}
