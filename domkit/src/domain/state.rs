//! Domain lifecycle status, restart policy and shutdown reasons.

use domkit_shared::constants::shutdown;
use domkit_shared::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a domain entity.
///
/// ```text
/// new entity → Active ──destroy()──→ Terminated
/// ```
///
/// A domain is Active from the moment the entity exists, even before the
/// hypervisor has assigned a handle. Terminated is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Active,
    Terminated,
}

impl DomainStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, DomainStatus::Active)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, DomainStatus::Terminated)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: DomainStatus) -> bool {
        matches!(
            (self, target),
            (DomainStatus::Active, DomainStatus::Terminated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Active => "ok",
            DomainStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a domain shut down, as reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownReason {
    Poweroff,
    Reboot,
    Suspend,
}

impl ShutdownReason {
    /// Map a hypervisor shutdown code. Unknown codes map to `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            shutdown::POWEROFF => Some(ShutdownReason::Poweroff),
            shutdown::REBOOT => Some(ShutdownReason::Reboot),
            shutdown::SUSPEND => Some(ShutdownReason::Suspend),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::Poweroff => "poweroff",
            ShutdownReason::Reboot => "reboot",
            ShutdownReason::Suspend => "suspend",
        }
    }
}

/// Human-readable shutdown reason for a raw code; `?` when unknown.
pub fn shutdown_reason(code: u32) -> &'static str {
    ShutdownReason::from_code(code)
        .map(|r| r.as_str())
        .unwrap_or("?")
}

/// Whether a domain should be restarted after it shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    Always,
    #[default]
    OnReboot,
    Never,
}

impl RestartMode {
    /// Decide whether a shutdown for `reason` warrants a restart.
    pub fn restart_needed(&self, reason: ShutdownReason) -> bool {
        match self {
            RestartMode::Never => false,
            RestartMode::Always => true,
            RestartMode::OnReboot => reason == ShutdownReason::Reboot,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestartMode::Always => "always",
            RestartMode::OnReboot => "onreboot",
            RestartMode::Never => "never",
        }
    }
}

impl FromStr for RestartMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(RestartMode::Always),
            "onreboot" => Ok(RestartMode::OnReboot),
            "never" => Ok(RestartMode::Never),
            other => Err(ConfigError::InvalidRestartMode(other.to_string())),
        }
    }
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(DomainStatus::Active.can_transition_to(DomainStatus::Terminated));
        assert!(!DomainStatus::Terminated.can_transition_to(DomainStatus::Active));
        assert!(!DomainStatus::Terminated.can_transition_to(DomainStatus::Terminated));
        assert!(!DomainStatus::Active.can_transition_to(DomainStatus::Active));
    }

    #[test]
    fn test_restart_needed() {
        use ShutdownReason::*;

        assert!(!RestartMode::Never.restart_needed(Reboot));
        assert!(RestartMode::Always.restart_needed(Poweroff));
        assert!(RestartMode::Always.restart_needed(Suspend));
        assert!(RestartMode::OnReboot.restart_needed(Reboot));
        assert!(!RestartMode::OnReboot.restart_needed(Poweroff));
    }

    #[test]
    fn test_restart_mode_parse() {
        assert_eq!("always".parse::<RestartMode>().unwrap(), RestartMode::Always);
        assert_eq!(
            "onreboot".parse::<RestartMode>().unwrap(),
            RestartMode::OnReboot
        );
        assert_eq!("never".parse::<RestartMode>().unwrap(), RestartMode::Never);
        assert!(matches!(
            "sometimes".parse::<RestartMode>(),
            Err(ConfigError::InvalidRestartMode(_))
        ));
        assert_eq!(RestartMode::default(), RestartMode::OnReboot);
    }

    #[test]
    fn test_shutdown_reason() {
        assert_eq!(shutdown_reason(0), "poweroff");
        assert_eq!(shutdown_reason(1), "reboot");
        assert_eq!(shutdown_reason(2), "suspend");
        assert_eq!(shutdown_reason(9), "?");
    }
}
