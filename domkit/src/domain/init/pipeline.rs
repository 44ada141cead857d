//! Construct path and configure phase.

use std::future::Future;
use std::sync::Arc;

use domkit_shared::Node;
use domkit_shared::errors::{ConfigError, DomainResult};

use super::stages;
use crate::domain::Domain;

/// Run `stage`; if it fails, destroy the domain and return the stage's error.
///
/// Teardown failures are logged and never replace the original error.
pub(crate) async fn with_rollback<T, F>(domain: &Domain, stage: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match stage.await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!(domain_id = %domain.id(), dom = ?domain.dom(), error = %e, "Domain construction failed, cleaning up");
            if let Err(teardown) = domain.destroy().await {
                tracing::warn!(domain_id = %domain.id(), "Failed to destroy domain during cleanup: {}", teardown);
            }
            Err(e)
        }
    }
}

/// Create or re-attach a domain from `config`.
///
/// ```text
/// settings → image ──→ backends → devices → fields
///            (sync)    └──────── configure ───────┘
/// ```
pub(crate) async fn construct(domain: &Arc<Domain>, config: Node) -> DomainResult<()> {
    domain.inner.write().config = Some(config.clone());

    with_rollback(domain, async {
        stages::settings::run(domain, &config)?;
        stages::image::run(domain, &config)?;
        configure(domain).await
    })
    .await
}

/// Configure phase. Stages run strictly in order; sub-operations of one
/// stage run concurrently.
pub(crate) async fn configure(domain: &Arc<Domain>) -> DomainResult<()> {
    let config = Arc::new(domain.config().ok_or(ConfigError::MissingConfig)?);

    stages::backends::run(domain).await?;
    stages::devices::run(domain, &config).await?;
    stages::fields::run(domain, &config).await?;

    tracing::info!(
        domain_id = %domain.id(),
        dom = ?domain.dom(),
        name = ?domain.name(),
        "Domain configured"
    );
    Ok(())
}
