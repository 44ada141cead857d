//! Extension points of the construction pipeline.
//!
//! Three kinds of handlers, each looked up by the tag that appears in the
//! configuration tree:
//!
//! - [`ImageHandler`]: `(image (<type> ...))` - allocates domain memory and
//!   builds the boot image
//! - [`DeviceHandler`]: `(device (<type> ...))` - attaches one device
//! - [`FieldHandler`]: any other top-level `(<tag> ...)` - post-creation
//!   configuration
//!
//! Built-in handlers register themselves at compile time with
//! `inventory::submit!`; [`Registries::with_builtins`] collects them into an
//! explicit registry object that the runtime passes around.

use std::sync::Arc;

use async_trait::async_trait;
use domkit_shared::Node;
use domkit_shared::errors::DomainResult;

use crate::domain::Domain;
use crate::hypervisor::DeviceHandle;

pub mod fields;
pub mod image;
pub mod pci;
pub mod registry;
pub mod vbd;
pub mod vif;

pub use registry::{HandlerRegistry, Registries};

/// What a device handler hands back: the attached device, if it has one.
pub type DeviceOutcome = Option<Arc<dyn DeviceHandle>>;

/// Builds the boot image for one image type.
///
/// Runs synchronously during create-new, before any device exists. Must
/// allocate the hypervisor domain (see [`Domain::create_domain`]).
pub trait ImageHandler: Send + Sync {
    fn create(&self, domain: &Domain, image: &Node) -> DomainResult<()>;
}

/// Attaches one device type.
#[async_trait]
pub trait DeviceHandler: Send + Sync {
    /// Create the device described by `config` as the `index`-th device of its type.
    async fn create(
        &self,
        domain: Arc<Domain>,
        config: Node,
        index: usize,
    ) -> DomainResult<DeviceOutcome>;
}

/// Applies one top-level configuration field.
#[async_trait]
pub trait FieldHandler: Send + Sync {
    /// Apply `field`, the `index`-th field with its tag in `config`.
    async fn configure(
        &self,
        domain: Arc<Domain>,
        config: Arc<Node>,
        field: Node,
        index: usize,
    ) -> DomainResult<()>;
}

// ============================================================================
// COMPILE-TIME REGISTRATION
// ============================================================================

/// Factory for a built-in image handler.
pub type ImageHandlerFactory = fn() -> Arc<dyn ImageHandler>;

/// Factory for a built-in device handler.
pub type DeviceHandlerFactory = fn() -> Arc<dyn DeviceHandler>;

/// Factory for a built-in field handler.
pub type FieldHandlerFactory = fn() -> Arc<dyn FieldHandler>;

/// Registration entry submitted by built-in image handlers via inventory.
pub struct ImageHandlerRegistration {
    pub name: &'static str,
    pub factory: ImageHandlerFactory,
}

/// Registration entry submitted by built-in device handlers via inventory.
pub struct DeviceHandlerRegistration {
    pub name: &'static str,
    pub factory: DeviceHandlerFactory,
}

/// Registration entry submitted by built-in field handlers via inventory.
pub struct FieldHandlerRegistration {
    pub name: &'static str,
    pub factory: FieldHandlerFactory,
}

inventory::collect!(ImageHandlerRegistration);
inventory::collect!(DeviceHandlerRegistration);
inventory::collect!(FieldHandlerRegistration);
