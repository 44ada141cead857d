//! Stage: dispatch the `image` node to its image handler.

use domkit_shared::Node;
use domkit_shared::constants::tags;
use domkit_shared::errors::{ConfigError, DomainResult};

use crate::domain::Domain;

/// Resolve the image type and run its handler synchronously.
pub fn run(domain: &Domain, config: &Node) -> DomainResult<()> {
    let image = config
        .child_value(tags::IMAGE)
        .ok_or(ConfigError::MissingImage)?;
    let image_name = image.name().ok_or(ConfigError::MissingImageName)?;
    let handler = domain
        .context()
        .registries
        .images
        .lookup(image_name)
        .ok_or_else(|| ConfigError::UnknownImageType(image_name.to_string()))?;

    tracing::debug!(domain_id = %domain.id(), image = image_name, "Creating domain image");
    handler.create(domain, image)
}
