//! Introspection snapshot of a domain.

use chrono::{DateTime, Utc};
use domkit_shared::Node;
use domkit_shared::constants::tags;
use serde::{Deserialize, Serialize};

use super::{Domain, DomainId, DomainStatus, shutdown_reason};
use crate::hypervisor::{ConsoleInfo, DomHandle, DomainInfo};

/// Point-in-time view of a domain, serializable with serde.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub id: DomainId,
    pub dom: Option<DomHandle>,
    pub name: Option<String>,
    pub memory_mib: u64,
    pub status: DomainStatus,
    /// Run-state flags `rbpsc` (running, blocked, paused, shutdown, crashed), `-` when unset.
    pub state: Option<String>,
    pub shutdown_reason: Option<String>,
    pub cpu: Option<i32>,
    pub cpu_time_secs: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub up_time_secs: Option<f64>,
    pub console: Option<ConsoleInfo>,
    pub config: Option<Node>,
}

/// Render the `rbpsc` run-state string of a hypervisor record.
pub(crate) fn run_state(info: &DomainInfo) -> String {
    [
        (info.running, 'r'),
        (info.blocked, 'b'),
        (info.paused, 'p'),
        (info.shutdown, 's'),
        (info.crashed, 'c'),
    ]
    .iter()
    .map(|&(set, flag)| if set { flag } else { '-' })
    .collect()
}

fn epoch_secs(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

impl Domain {
    /// Capture the current state of the domain.
    pub fn snapshot(&self) -> DomainSnapshot {
        let inner = self.inner.read();
        let info = inner.info.as_ref();
        let now = Utc::now();

        DomainSnapshot {
            id: self.id().clone(),
            dom: inner.dom,
            name: inner.name.clone(),
            memory_mib: inner.memory_mib,
            status: inner.status,
            state: info.map(run_state),
            shutdown_reason: info
                .filter(|info| info.shutdown)
                .map(|info| shutdown_reason(info.shutdown_reason).to_string()),
            cpu: info.map(|info| info.cpu),
            cpu_time_secs: info.map(|info| info.cpu_time as f64 / 1e9),
            start_time: inner.start_time,
            up_time_secs: inner
                .start_time
                .map(|start| (now - start).num_milliseconds() as f64 / 1000.0),
            console: inner.console.clone(),
            config: inner.config.clone(),
        }
    }

    /// Snapshot rendered as a `(domain ...)` record.
    pub fn to_sxpr(&self) -> Node {
        self.snapshot().to_sxpr()
    }
}

impl DomainSnapshot {
    pub fn to_sxpr(&self) -> Node {
        let mut sxpr = Node::list("domain", [Node::field(tags::ID, &self.id)]);
        if let Some(dom) = self.dom {
            sxpr.push(Node::field("dom", dom));
        }
        sxpr.push(Node::field("name", self.name.as_deref().unwrap_or("")));
        sxpr.push(Node::field("memory", self.memory_mib));

        if let Some(ref state) = self.state {
            sxpr.push(Node::field("state", state));
            if let Some(ref reason) = self.shutdown_reason {
                sxpr.push(Node::field("shutdown_reason", reason));
            }
        }
        if let Some(cpu) = self.cpu {
            sxpr.push(Node::field("cpu", cpu));
        }
        if let Some(cpu_time) = self.cpu_time_secs {
            sxpr.push(Node::field("cpu_time", cpu_time));
        }

        if let (Some(start), Some(up_time)) = (self.start_time, self.up_time_secs) {
            sxpr.push(Node::field("up_time", up_time));
            sxpr.push(Node::field(tags::START_TIME, epoch_secs(start)));
        }

        if let Some(ref console) = self.console {
            sxpr.push(console.to_sxpr());
        }
        if let Some(ref config) = self.config {
            sxpr.push(Node::list(tags::CONFIG, [config.clone()]));
        }
        sxpr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> DomainSnapshot {
        DomainSnapshot {
            id: DomainId::new(),
            dom: Some(DomHandle(5)),
            name: Some("vm1".into()),
            memory_mib: 64,
            status: DomainStatus::Active,
            state: None,
            shutdown_reason: None,
            cpu: None,
            cpu_time_secs: None,
            start_time: None,
            up_time_secs: None,
            console: None,
            config: None,
        }
    }

    #[test]
    fn test_run_state() {
        let info = DomainInfo {
            running: true,
            paused: true,
            ..Default::default()
        };
        assert_eq!(run_state(&info), "r-p--");
        assert_eq!(run_state(&DomainInfo::default()), "-----");
    }

    #[test]
    fn test_sxpr_minimal() {
        let snap = snapshot();
        let sxpr = snap.to_sxpr();
        assert_eq!(sxpr.name(), Some("domain"));
        assert_eq!(sxpr.child_str("dom"), Some("5"));
        assert_eq!(sxpr.child_str("name"), Some("vm1"));
        assert_eq!(sxpr.child_str("memory"), Some("64"));
        assert!(sxpr.child("state").is_none());
        assert!(sxpr.child("config").is_none());
    }

    #[test]
    fn test_sxpr_with_info() {
        let mut snap = snapshot();
        snap.state = Some("---s-".into());
        snap.shutdown_reason = Some("reboot".into());
        snap.cpu = Some(1);
        snap.cpu_time_secs = Some(2.5);
        snap.config = Some(Node::list("vm", [Node::field("name", "vm1")]));

        let sxpr = snap.to_sxpr();
        assert_eq!(sxpr.child_str("state"), Some("---s-"));
        assert_eq!(sxpr.child_str("shutdown_reason"), Some("reboot"));
        assert_eq!(sxpr.child_str("cpu_time"), Some("2.5"));
        let config = sxpr.child_value("config").unwrap();
        assert_eq!(config.child_str("name"), Some("vm1"));
    }

    #[test]
    fn test_snapshot_json() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["name"], "vm1");
        assert_eq!(json["dom"], 5);
        assert_eq!(json["status"], "active");
    }
}
