//! Domain memory allocation and boot image build.

use std::path::{Path, PathBuf};

use chrono::Utc;
use domkit_shared::constants::build_flags;
use domkit_shared::errors::{ConfigError, DomainError, DomainResult};
use serde::{Deserialize, Serialize};

use super::Domain;
use crate::hypervisor::{BuildRequest, DomHandle};

/// Boot image a domain was built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootImage {
    pub os_type: String,
    pub kernel: PathBuf,
    pub ramdisk: Option<PathBuf>,
    pub cmdline: String,
}

impl Domain {
    /// Allocate the hypervisor domain, allocate its console and build the boot image.
    ///
    /// Called by image handlers. In recreate mode the domain already exists:
    /// file checks, allocation and build are skipped, only the console is
    /// (re)allocated and the image recorded.
    pub fn create_domain(
        &self,
        os_type: &str,
        kernel: &Path,
        ramdisk: Option<&Path>,
        cmdline: &str,
    ) -> DomainResult<()> {
        self.ensure_active()?;

        if !self.is_recreate() && self.options().check_boot_files {
            if !kernel.is_file() {
                return Err(ConfigError::image(
                    os_type,
                    format!("Kernel image does not exist: {}", kernel.display()),
                )
                .into());
            }
            if let Some(ramdisk) = ramdisk
                && !ramdisk.is_file()
            {
                return Err(ConfigError::image(
                    os_type,
                    format!("Kernel ramdisk does not exist: {}", ramdisk.display()),
                )
                .into());
            }
        }

        self.init_domain()?;
        let dom = self.require_dom()?;

        let console = self
            .platform()
            .consoles
            .allocate(dom, self.console_port())?;
        tracing::debug!(domain_id = %self.id(), dom = %dom, console = %console.id, port = console.port, "Allocated console");
        let control_channel = console.control_channel;
        self.inner.write().console = Some(console);

        self.build_domain(os_type, dom, kernel, ramdisk, cmdline, control_channel)?;

        self.inner.write().image = Some(BootImage {
            os_type: os_type.to_string(),
            kernel: kernel.to_path_buf(),
            ramdisk: ramdisk.map(Path::to_path_buf),
            cmdline: cmdline.to_string(),
        });
        Ok(())
    }

    /// Allocate domain memory.
    fn init_domain(&self) -> DomainResult<()> {
        if self.is_recreate() {
            return Ok(());
        }

        let (name, memory_mib, cpu) = {
            let inner = self.inner.read();
            (
                inner.name.clone().unwrap_or_default(),
                inner.memory_mib,
                inner.cpu,
            )
        };

        let raw = self
            .platform()
            .control
            .domain_create(memory_mib * 1024, &name, cpu)?;
        let dom = DomHandle::from_raw(raw).ok_or_else(|| {
            DomainError::Resource(format!(
                "Creating domain failed: name={} memory={}",
                name, memory_mib
            ))
        })?;

        tracing::debug!(domain_id = %self.id(), dom = %dom, name = %name, memory_mib, "Created domain");
        self.set_dom(dom)?;

        let mut inner = self.inner.write();
        if inner.start_time.is_none() {
            inner.start_time = Some(Utc::now());
        }
        Ok(())
    }

    /// Build the boot image into the allocated domain.
    fn build_domain(
        &self,
        os_type: &str,
        dom: DomHandle,
        kernel: &Path,
        ramdisk: Option<&Path>,
        cmdline: &str,
        control_channel: u32,
    ) -> DomainResult<()> {
        if self.is_recreate() {
            return Ok(());
        }

        if cmdline.len() >= self.options().max_cmdline_len {
            tracing::warn!(dom = %dom, len = cmdline.len(), "Kernel cmdline too long");
        }

        let request = BuildRequest {
            os_type: os_type.to_string(),
            dom,
            kernel: kernel.to_path_buf(),
            control_channel,
            cmdline: cmdline.to_string(),
            ramdisk: ramdisk.map(Path::to_path_buf),
            flags: self.build_flags(),
        };

        let rc = self.platform().control.domain_build(&request)?;
        if rc != 0 {
            return Err(DomainError::Resource(format!(
                "Building domain failed: type={} dom={} err={}",
                os_type, dom, rc
            )));
        }

        tracing::info!(domain_id = %self.id(), dom = %dom, os_type, "Built domain");
        Ok(())
    }

    /// Start-info flags announcing the backends this domain hosts.
    pub fn build_flags(&self) -> u32 {
        let inner = self.inner.read();
        let mut flags = 0;
        if inner.netif_backend {
            flags |= build_flags::SIF_NET_BE_DOMAIN;
        }
        if inner.blkif_backend {
            flags |= build_flags::SIF_BLK_BE_DOMAIN;
        }
        flags
    }
}
