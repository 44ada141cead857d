//! Host-backed raw partition lookup.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use domkit_shared::errors::{DomainError, DomainResult};
use tokio::process::Command;

use super::{DiskResolver, Segment};

const DEFAULT_SFDISK: &str = "/sbin/sfdisk";

/// Resolves partition names against the host's `/dev`.
///
/// A name is a whole disk if `sfdisk -s` reports a size for it. Otherwise a
/// bare hex device number (`0x301`, `801`) is accepted as a whole disk.
#[derive(Debug, Clone)]
pub struct HostDiskResolver {
    sfdisk: PathBuf,
}

impl HostDiskResolver {
    pub fn new() -> Self {
        Self {
            sfdisk: PathBuf::from(DEFAULT_SFDISK),
        }
    }

    /// Use a different `sfdisk` binary.
    pub fn with_sfdisk(mut self, sfdisk: impl Into<PathBuf>) -> Self {
        self.sfdisk = sfdisk.into();
        self
    }

    async fn has_size(&self, path: &Path) -> bool {
        let output = Command::new(&self.sfdisk)
            .arg("-s")
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .is_some_and(|line| !line.trim().is_empty()),
            Err(e) => {
                tracing::debug!(sfdisk = %self.sfdisk.display(), error = %e, "Failed to run sfdisk");
                false
            }
        }
    }
}

impl Default for HostDiskResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix `/dev/` unless the name is already a device path.
pub fn dev_path(name: &str) -> PathBuf {
    if name.starts_with("/dev/") {
        PathBuf::from(name)
    } else {
        PathBuf::from("/dev").join(name)
    }
}

/// Parse a bare hex device number (`0x301`, `801`).
pub fn parse_hex_device(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix("0x")
        .or_else(|| name.strip_prefix("0X"))
        .unwrap_or(name);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[async_trait]
impl DiskResolver for HostDiskResolver {
    async fn lookup_raw_partition(&self, name: &str) -> DomainResult<Option<Vec<Segment>>> {
        let path = dev_path(name);

        if self.has_size(&path).await {
            let device = self.device_number(name).await?;
            return Ok(Some(vec![Segment::whole_disk(device)]));
        }

        Ok(parse_hex_device(name).map(|device| vec![Segment::whole_disk(device)]))
    }

    #[cfg(unix)]
    async fn device_number(&self, name: &str) -> DomainResult<u64> {
        use std::os::unix::fs::MetadataExt;

        let path = dev_path(name);
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            DomainError::Resource(format!("cannot stat {}: {}", path.display(), e))
        })?;
        Ok(metadata.rdev())
    }

    #[cfg(not(unix))]
    async fn device_number(&self, name: &str) -> DomainResult<u64> {
        Err(DomainError::Resource(format!(
            "block device numbers are not available on this platform: {}",
            name
        )))
    }
}
