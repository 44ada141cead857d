//! Stage 3 of configure: field configuration.

use std::collections::HashMap;
use std::sync::Arc;

use domkit_shared::Node;
use domkit_shared::constants::tags;
use domkit_shared::errors::DomainResult;

use crate::domain::Domain;
use crate::domain::init::join::join_first_error;

/// Run the field handler of every top-level node not consumed elsewhere.
///
/// Unknown fields are logged and skipped. Indices count per tag.
pub async fn run(domain: &Arc<Domain>, config: &Arc<Node>) -> DomainResult<()> {
    let registries = &domain.context().registries;

    let mut counters: HashMap<&str, usize> = HashMap::new();
    let mut tasks = Vec::new();
    for field in config.children() {
        let Some(name) = field.name() else {
            tracing::warn!(domain_id = %domain.id(), field = %field, "Ignoring untagged config field");
            continue;
        };
        let counter = counters.entry(name).or_insert(0);
        let index = *counter;
        *counter += 1;

        if tags::CONSUMED.contains(&name) {
            continue;
        }
        let Some(handler) = registries.fields.lookup(name) else {
            tracing::warn!(domain_id = %domain.id(), field = name, "Unknown config field");
            continue;
        };

        let domain = Arc::clone(domain);
        let config = Arc::clone(config);
        let field = field.clone();
        tasks.push(tokio::spawn(async move {
            handler.configure(domain, config, field, index).await
        }));
    }

    join_first_error(tasks).await?;
    Ok(())
}
