//! Construction stages.
//!
//! Each stage is a function that does one thing to the domain.
//!
//! ## Stage Order
//!
//! ```text
//! Settings ──→ Image ──→ Backends ──→ Devices ──→ Fields
//!
//! Sequential: every stage
//! Concurrent: sub-operations within Backends, Devices and Fields
//! ```

pub mod backends;
pub mod devices;
pub mod fields;
pub mod image;
pub mod settings;
