//! Domain management - tracking of live domains.

mod manager;

pub use manager::DomainManager;
