use std::path::PathBuf;

use sysinfo::System;

/// Log target for startup diagnostics
pub const LOG_TARGET_STARTUP: &str = "soundbox::startup";

/// Where the rolling log files go
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("soundbox").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Daily rolling file log plus console output.
///
/// `RUST_LOG` overrides the default `info` level.
pub fn initialize_tracing(file_name: &str) {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory: {}", e);
    }

    let file_appender = rolling::daily(&log_dir, file_name);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);

    // The init script captures stdout into the system journal
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("Warning: Logging already initialized: {}", e);
        return;
    }

    tracing::info!("Log directory: {}", log_dir.display());
}

pub fn log_runtime_environment(program: &str) {
    let mut system = System::new();
    system.refresh_memory();

    let version = env!("CARGO_PKG_VERSION");
    let os_name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| "Unknown OS".to_string());
    let kernel = System::kernel_version().unwrap_or_else(|| "Unknown Kernel".to_string());
    let host = System::host_name().unwrap_or_else(|| "unknown host".to_string());

    tracing::info!(
        target: LOG_TARGET_STARTUP,
        "Starting {} v{} on {} ({})",
        program,
        version,
        host,
        std::env::consts::ARCH
    );
    tracing::info!(target: LOG_TARGET_STARTUP, "Operating System: {} (kernel {})", os_name, kernel);
    if crate::hardware::SIMULATED_BACKEND {
        tracing::error!(target: LOG_TARGET_STARTUP, "GPIO backend: simulated (built without `rpi`)");
    } else {
        tracing::info!(target: LOG_TARGET_STARTUP, "GPIO backend: Raspberry Pi (rppal)");
    }
    tracing::debug!(
        target: LOG_TARGET_STARTUP,
        "Memory: {} MiB total, {} MiB available",
        system.total_memory() / (1024 * 1024),
        system.available_memory() / (1024 * 1024)
    );
}
