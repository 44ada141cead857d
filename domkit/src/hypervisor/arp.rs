//! Unsolicited ARP announcements via `arping`.
//!
//! After a domain is restored its addresses move to a new host, so we send a
//! gratuitous ARP reply for each one. Sending from an address the host does
//! not own requires `ip_nonlocal_bind`, which is enabled for the duration of
//! the announcement and restored afterwards.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use async_trait::async_trait;
use domkit_shared::errors::DomainResult;
use serde::{Deserialize, Serialize};

use super::ArpAnnouncer;

/// Broadcast target used when no default gateway is known.
const BROADCAST: &str = "255.255.255.255";

/// Settings for [`ArpingAnnouncer`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArpOptions {
    /// Interface to announce on.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Path to the `arping` binary.
    #[serde(default = "default_arping")]
    pub arping: PathBuf,

    /// Sysctl controlling binding to non-local addresses.
    #[serde(default = "default_nonlocal_bind")]
    pub nonlocal_bind: PathBuf,

    /// Kernel routing table, used to find the default gateway.
    #[serde(default = "default_route_table")]
    pub route_table: PathBuf,
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_arping() -> PathBuf {
    PathBuf::from("/usr/sbin/arping")
}

fn default_nonlocal_bind() -> PathBuf {
    PathBuf::from("/proc/sys/net/ipv4/ip_nonlocal_bind")
}

fn default_route_table() -> PathBuf {
    PathBuf::from("/proc/net/route")
}

impl Default for ArpOptions {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            arping: default_arping(),
            nonlocal_bind: default_nonlocal_bind(),
            route_table: default_route_table(),
        }
    }
}

/// Announces addresses by shelling out to `arping -A -b`.
#[derive(Clone, Debug)]
pub struct ArpingAnnouncer {
    options: ArpOptions,
}

impl ArpingAnnouncer {
    pub fn new(options: ArpOptions) -> Self {
        Self { options }
    }

    async fn read_nonlocal_bind(&self) -> DomainResult<bool> {
        let value = tokio::fs::read_to_string(&self.options.nonlocal_bind).await?;
        Ok(value.trim_start().starts_with(|c: char| c != '0'))
    }

    async fn write_nonlocal_bind(&self, enabled: bool) -> DomainResult<()> {
        let value = if enabled { "1\n" } else { "0\n" };
        tokio::fs::write(&self.options.nonlocal_bind, value).await?;
        Ok(())
    }

    async fn default_gateway(&self) -> String {
        match tokio::fs::read_to_string(&self.options.route_table).await {
            Ok(table) => parse_default_gateway(&table)
                .map(|gw| gw.to_string())
                .unwrap_or_else(|| BROADCAST.to_string()),
            Err(e) => {
                tracing::debug!(error = %e, "Cannot read routing table, using broadcast");
                BROADCAST.to_string()
            }
        }
    }

    async fn arping(&self, ip: &str, gateway: &str) {
        tracing::info!(ip, gateway, interface = %self.options.interface, "Sending unsolicited ARP");
        let status = tokio::process::Command::new(&self.options.arping)
            .args([
                "-A",
                "-b",
                "-I",
                self.options.interface.as_str(),
                "-c",
                "1",
                "-s",
                ip,
                gateway,
            ])
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::warn!(ip, %status, "arping exited with failure"),
            Err(e) => tracing::warn!(ip, error = %e, "Failed to run arping"),
        }
    }
}

impl Default for ArpingAnnouncer {
    fn default() -> Self {
        Self::new(ArpOptions::default())
    }
}

#[async_trait]
impl ArpAnnouncer for ArpingAnnouncer {
    async fn announce(&self, addresses: &[String]) -> DomainResult<()> {
        let targets = announceable(addresses);
        if targets.is_empty() {
            return Ok(());
        }

        let gateway = self.default_gateway().await;
        let was_enabled = self.read_nonlocal_bind().await?;
        if !was_enabled {
            self.write_nonlocal_bind(true).await?;
        }

        for ip in &targets {
            self.arping(ip, &gateway).await;
        }

        if !was_enabled {
            self.write_nonlocal_bind(false).await?;
        }
        Ok(())
    }
}

/// Addresses worth announcing: parseable and not link-local (169.254/16).
pub fn announceable(addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .filter(|ip| match ip.parse::<Ipv4Addr>() {
            Ok(addr) => !addr.is_link_local(),
            Err(_) => {
                tracing::warn!(ip = %ip, "Skipping unparseable address");
                false
            }
        })
        .cloned()
        .collect()
}

/// Find the default gateway in `/proc/net/route` content.
///
/// Destination and gateway are little-endian hex; the default route has
/// destination `00000000`.
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(fields[2], 16).ok()?;
        if raw == 0 {
            return None;
        }
        Some(Ipv4Addr::from(raw.to_le_bytes()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t0001A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
eth0\t00000000\t0101A8C0\t0003\t0\t0\t0\t00000000\t0\t0\t0
";

    #[test]
    fn test_parse_default_gateway() {
        assert_eq!(
            parse_default_gateway(ROUTE_TABLE),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
        assert_eq!(parse_default_gateway("Iface\tDestination\tGateway\n"), None);
    }

    #[test]
    fn test_announceable_skips_link_local() {
        let addresses = vec![
            "10.0.0.5".to_string(),
            "169.254.3.4".to_string(),
            "not-an-ip".to_string(),
        ];
        assert_eq!(announceable(&addresses), vec!["10.0.0.5".to_string()]);
    }

    #[tokio::test]
    async fn test_announce_restores_nonlocal_bind() {
        let dir = TempDir::new().unwrap();
        let sysctl = dir.path().join("ip_nonlocal_bind");
        std::fs::write(&sysctl, "0\n").unwrap();

        let announcer = ArpingAnnouncer::new(ArpOptions {
            arping: dir.path().join("missing-arping"),
            nonlocal_bind: sysctl.clone(),
            route_table: dir.path().join("missing-route"),
            ..Default::default()
        });

        announcer.announce(&["10.0.0.5".to_string()]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&sysctl).unwrap(), "0\n");
    }

    #[tokio::test]
    async fn test_announce_nothing_leaves_sysctl_alone() {
        let dir = TempDir::new().unwrap();
        let announcer = ArpingAnnouncer::new(ArpOptions {
            nonlocal_bind: dir.path().join("does-not-exist"),
            ..Default::default()
        });
        announcer
            .announce(&["169.254.0.1".to_string()])
            .await
            .unwrap();
    }
}
