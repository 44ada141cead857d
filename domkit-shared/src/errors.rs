//! Hierarchical error types for domain orchestration.
//!
//! Errors are categorized by recovery path:
//! - [`ConfigError`]: malformed or missing configuration (user-fixable, never retried)
//! - [`DomainError::Resource`]: hypervisor or backend failure (fatal to the operation)
//! - [`DomainError::InvalidState`]: operation on a terminated or unready domain

use std::io;
use thiserror::Error;

/// Result type for orchestration operations.
pub type DomainResult<T> = Result<T, DomainError>;

// ============================================================================
// Top-Level Error
// ============================================================================

/// Errors that can occur while constructing, configuring or tearing down a domain.
///
/// ```ignore
/// match runtime.create(config).await {
///     Err(DomainError::Config(_)) => { /* user should fix config */ }
///     Err(DomainError::Resource(_)) => { /* hypervisor refused, domain was rolled back */ }
///     _ => {}
/// }
/// ```
#[derive(Debug, Error)]
pub enum DomainError {
    /// Configuration or validation error (user-fixable).
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Hypervisor control plane or backend controller failure.
    #[error("resource: {0}")]
    Resource(String),

    /// Operation not permitted in the current domain state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Internal invariant violation (task panic, poisoned state).
    #[error("internal: {0}")]
    Internal(String),

    /// Generic IO error (catch-all).
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl DomainError {
    /// Whether this error was caused by the configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, DomainError::Config(_))
    }

    /// Whether this error is a storage segment resolution failure.
    pub fn is_segment(&self) -> bool {
        matches!(self, DomainError::Config(ConfigError::Segment(_)))
    }
}

impl From<SegmentError> for DomainError {
    fn from(err: SegmentError) -> Self {
        DomainError::Config(ConfigError::Segment(err))
    }
}

// ============================================================================
// Config Errors
// ============================================================================

/// Errors related to the domain configuration tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing domain name")]
    MissingName,

    #[error("missing memory size")]
    MissingMemory,

    #[error("invalid memory size: {0}")]
    InvalidMemory(String),

    #[error("missing image")]
    MissingImage,

    #[error("missing image name")]
    MissingImageName,

    #[error("unknown image type: {0}")]
    UnknownImageType(String),

    /// A saved or restored domain carries no configuration.
    #[error("missing config")]
    MissingConfig,

    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),

    /// Empty device node, or a reference to a device that does not exist.
    #[error("invalid device{}", fmt_detail(.0))]
    InvalidDevice(String),

    #[error("invalid console: {0}")]
    InvalidConsole(String),

    #[error("invalid restart mode: {0}")]
    InvalidRestartMode(String),

    #[error("invalid backend type: {0}")]
    InvalidBackend(String),

    /// Image handler rejected its image node.
    #[error("{image}: {reason}")]
    Image { image: String, reason: String },

    /// Device handler rejected its device node.
    #[error("{device}: {reason}")]
    Device { device: String, reason: String },

    /// Field handler rejected its field node.
    #[error("{field}: {reason}")]
    Field { field: String, reason: String },

    /// Storage locator did not resolve to exactly one extent.
    #[error("vbd: {0}")]
    Segment(#[from] SegmentError),
}

fn fmt_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

// ============================================================================
// Segment Resolution Errors
// ============================================================================

/// Errors resolving a backend storage locator (`uname`) into physical extents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Segments not found: uname={uname}")]
    NotFound { uname: String },

    #[error("Multi-segment vdisk: uname={uname} segments={count}")]
    MultiSegment { uname: String, count: usize },
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl ConfigError {
    /// Create an image handler error.
    pub fn image(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Create a device handler error.
    pub fn device(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create a field handler error.
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_hierarchy() {
        let err: DomainError = ConfigError::MissingName.into();
        assert!(err.is_config());
        assert!(!err.is_segment());

        let err: DomainError = SegmentError::NotFound {
            uname: "phy:sda1".into(),
        }
        .into();
        assert!(err.is_config());
        assert!(err.is_segment());

        let err = DomainError::Resource("domain create failed".into());
        assert!(!err.is_config());
    }

    #[test]
    fn test_error_display() {
        let err = DomainError::Config(ConfigError::MissingName);
        assert_eq!(err.to_string(), "config: missing domain name");

        let err = DomainError::Config(ConfigError::UnknownImageType("plan9".into()));
        assert_eq!(err.to_string(), "config: unknown image type: plan9");

        let err = DomainError::Config(ConfigError::device("vbd", "Missing uname"));
        assert_eq!(err.to_string(), "config: vbd: Missing uname");

        let err: DomainError = SegmentError::MultiSegment {
            uname: "phy:sda1".into(),
            count: 2,
        }
        .into();
        assert!(err.to_string().contains("Multi-segment vdisk: uname=phy:sda1"));
    }

    #[test]
    fn test_invalid_device_detail() {
        assert_eq!(
            ConfigError::InvalidDevice(String::new()).to_string(),
            "invalid device"
        );
        assert_eq!(
            ConfigError::InvalidDevice("vif 3".into()).to_string(),
            "invalid device: vif 3"
        );
    }
}
