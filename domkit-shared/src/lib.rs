//! domkit shared - types common to the orchestrator and its collaborators
//!
//! This crate holds the pieces that external collaborators (configuration
//! parsers, hypervisor bindings, backend controllers) need without pulling
//! in the orchestrator itself.

pub mod constants;
pub mod errors;
pub mod sxp;

pub use errors::{ConfigError, DomainError, DomainResult, SegmentError};
pub use sxp::Node;
