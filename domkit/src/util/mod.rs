use domkit_shared::errors::{DomainError, DomainResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::runtime::constants::defaults;
use crate::runtime::options::RuntimeOptions;

/// Initialize tracing for the runtime.
///
/// Logs go to stderr, or to `{home_dir}/logs/domkit.log` with daily rotation
/// when `logging.to_file` is set. `RUST_LOG` overrides the configured level.
/// Returns the WorkerGuard that keeps the background writer alive.
/// A subscriber installed earlier is left in place.
pub fn init_logging(options: &RuntimeOptions) -> DomainResult<WorkerGuard> {
    let (non_blocking, guard) = if options.logging.to_file {
        let logs_dir = options.logs_dir();
        std::fs::create_dir_all(&logs_dir)?;
        let file_appender = tracing_appender::rolling::daily(logs_dir, defaults::LOG_FILE_PREFIX);
        tracing_appender::non_blocking(file_appender)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.logging.level))
        .map_err(|e| {
            DomainError::Internal(format!(
                "invalid log level {:?}: {}",
                options.logging.level, e
            ))
        })?;

    register_to_tracing(non_blocking, env_filter, !options.logging.to_file);
    Ok(guard)
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter, ansi: bool) -> bool {
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(ansi),
        )
        .try_init();

    match installed {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Tracing subscriber already installed: {}", e);
            false
        }
    }
}
