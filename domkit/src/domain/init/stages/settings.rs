//! Stage: read domain settings from the configuration.
//!
//! Name, memory, CPU affinity, console port, restart policy and backend
//! flags. Nothing here talks to the hypervisor.

use domkit_shared::Node;
use domkit_shared::constants::{backends, tags};
use domkit_shared::errors::{ConfigError, DomainResult};

use crate::domain::{Domain, RestartMode};
use crate::runtime::constants::defaults;

/// Settings parsed from a configuration tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub cpu: i32,
    pub console_port: Option<u16>,
    pub restart_mode: RestartMode,
    pub blkif_backend: bool,
    pub netif_backend: bool,
}

impl Settings {
    /// Parse everything except name and memory.
    pub fn parse(config: &Node) -> DomainResult<Self> {
        let cpu = match config.child_parse::<i32>(tags::CPU) {
            None => defaults::ANY_CPU,
            Some(Ok(cpu)) => cpu,
            Some(Err(raw)) => {
                return Err(ConfigError::field(tags::CPU, format!("invalid cpu: {}", raw)).into());
            }
        };

        let console_port = match config.child_parse::<u16>(tags::CONSOLE) {
            None => None,
            Some(Ok(port)) => Some(port),
            Some(Err(raw)) => return Err(ConfigError::InvalidConsole(raw).into()),
        };

        let restart_mode = match config.child_str(tags::RESTART) {
            Some(mode) => mode.parse::<RestartMode>()?,
            None => RestartMode::default(),
        };

        let mut blkif_backend = false;
        let mut netif_backend = false;
        for backend in config.children_named(tags::BACKEND) {
            match backend.child0().and_then(Node::name) {
                Some(backends::BLKIF) => blkif_backend = true,
                Some(backends::NETIF) => netif_backend = true,
                other => {
                    return Err(
                        ConfigError::InvalidBackend(other.unwrap_or_default().to_string()).into(),
                    );
                }
            }
        }

        Ok(Self {
            cpu,
            console_port,
            restart_mode,
            blkif_backend,
            netif_backend,
        })
    }

    /// Store the settings on the domain.
    pub fn apply(self, domain: &Domain) {
        let mut inner = domain.inner.write();
        inner.cpu = self.cpu;
        inner.console_port = self.console_port;
        inner.restart_mode = self.restart_mode;
        inner.blkif_backend = self.blkif_backend;
        inner.netif_backend = self.netif_backend;
    }
}

/// Memory size in MiB. Must be present and non-zero.
fn memory_mib(config: &Node) -> Result<u64, ConfigError> {
    match config.child_parse::<u64>(tags::MEMORY) {
        None => Err(ConfigError::MissingMemory),
        Some(Ok(0)) => Err(ConfigError::InvalidMemory("0".to_string())),
        Some(Ok(memory)) => Ok(memory),
        Some(Err(raw)) => Err(ConfigError::InvalidMemory(raw)),
    }
}

/// Validate name and memory, then read and apply the remaining settings.
pub fn run(domain: &Domain, config: &Node) -> DomainResult<()> {
    let name = config
        .child_str(tags::NAME)
        .ok_or(ConfigError::MissingName)?
        .to_string();

    let memory_mib = memory_mib(config)?;
    let settings = Settings::parse(config)?;

    tracing::debug!(
        domain_id = %domain.id(),
        name = %name,
        memory_mib,
        cpu = settings.cpu,
        restart = %settings.restart_mode,
        "Read domain settings"
    );

    {
        let mut inner = domain.inner.write();
        inner.name = Some(name);
        inner.memory_mib = memory_mib;
    }
    settings.apply(domain);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(children: Vec<Node>) -> Node {
        Node::list("vm", children)
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::parse(&vm(vec![])).unwrap();
        assert_eq!(settings.cpu, -1);
        assert_eq!(settings.console_port, None);
        assert_eq!(settings.restart_mode, RestartMode::OnReboot);
        assert!(!settings.blkif_backend);
        assert!(!settings.netif_backend);
    }

    #[test]
    fn test_parse_all() {
        let config = vm(vec![
            Node::field("cpu", 2),
            Node::field("console", 9605),
            Node::field("restart", "never"),
            Node::list("backend", [Node::tag("blkif")]),
            Node::list("backend", [Node::tag("netif")]),
        ]);
        let settings = Settings::parse(&config).unwrap();
        assert_eq!(settings.cpu, 2);
        assert_eq!(settings.console_port, Some(9605));
        assert_eq!(settings.restart_mode, RestartMode::Never);
        assert!(settings.blkif_backend);
        assert!(settings.netif_backend);
    }

    #[test]
    fn test_memory() {
        assert_eq!(memory_mib(&vm(vec![Node::field("memory", 64)])), Ok(64));
        assert_eq!(memory_mib(&vm(vec![])), Err(ConfigError::MissingMemory));
        assert_eq!(
            memory_mib(&vm(vec![Node::field("memory", 0)])),
            Err(ConfigError::InvalidMemory("0".into()))
        );
        assert_eq!(
            memory_mib(&vm(vec![Node::field("memory", "-1")])),
            Err(ConfigError::InvalidMemory("-1".into()))
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = Settings::parse(&vm(vec![Node::field("console", "tty")])).unwrap_err();
        assert_eq!(err.to_string(), "config: invalid console: tty");

        let err = Settings::parse(&vm(vec![Node::field("restart", "sometimes")])).unwrap_err();
        assert_eq!(err.to_string(), "config: invalid restart mode: sometimes");

        let err =
            Settings::parse(&vm(vec![Node::list("backend", [Node::tag("usbif")])])).unwrap_err();
        assert_eq!(err.to_string(), "config: invalid backend type: usbif");

        let err = Settings::parse(&vm(vec![Node::field("cpu", "fast")])).unwrap_err();
        assert!(err.is_config());
    }
}
