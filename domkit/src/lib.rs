//! domkit - domain lifecycle orchestration for virtual machine control planes.
//!
//! Turns a declarative configuration tree into a running domain: allocate
//! memory and build the boot image, attach devices, apply configuration
//! fields, and tear everything down again on failure or on request.
//!
//! ```ignore
//! use domkit::{DomainRuntime, Node, Platform};
//!
//! let runtime = DomainRuntime::with_defaults(platform);
//! let domain = runtime.create(config).await?;
//! println!("{}", domain.to_sxpr());
//! ```

pub mod domain;
pub mod handlers;
pub mod hypervisor;
pub mod management;
pub mod runtime;
pub mod util;

pub use domain::{
    Device, DeviceTable, Domain, DomainId, DomainSnapshot, DomainStatus, RestartMode,
    ShutdownReason,
};
pub use handlers::{
    DeviceHandler, DeviceOutcome, FieldHandler, HandlerRegistry, ImageHandler, Registries,
};
pub use hypervisor::{
    ArpAnnouncer, BackendController, ConsoleInfo, ConsoleManager, ControlPlane, DeviceHandle,
    DeviceRequest, DiskResolver, DomHandle, DomainInfo, Platform, Segment,
};
pub use management::DomainManager;
pub use runtime::options::{LoggingOptions, RuntimeOptions};
pub use runtime::{DomainRuntime, RuntimeContext, SharedContext};

pub use domkit_shared::errors::{ConfigError, DomainError, DomainResult, SegmentError};
pub use domkit_shared::{Node, constants};
