//! Constants for the domkit runtime.

// Re-export shared constants from domkit-shared
pub use domkit_shared::constants::{backends, build_flags, devices, shutdown, tags};

pub mod envs {
    pub const DOMKIT_HOME: &str = "DOMKIT_HOME";
}

/// Runtime defaults
pub mod defaults {
    /// Home directory name under the user's home.
    pub const HOME_DIR_NAME: &str = ".domkit";

    /// Log directory name under the runtime home.
    pub const LOGS_DIR_NAME: &str = "logs";

    /// Log file prefix for the rolling appender.
    pub const LOG_FILE_PREFIX: &str = "domkit.log";

    /// Kernel command lines at or above this length get a warning.
    pub const MAX_CMDLINE_LEN: usize = 256;

    /// CPU affinity meaning "any CPU".
    pub const ANY_CPU: i32 = -1;

    /// Default IP setting for kernel command lines.
    pub const KERNEL_IP: &str = "dhcp";

    /// Default vbd access mode.
    pub const VBD_MODE: &str = "r";

    /// OS type assumed when restoring a saved image.
    pub const RESTORE_OS_TYPE: &str = "linux";
}
