use thiserror::Error;

use crate::hardware::Pin;

/// Library errors using thiserror for structured error handling.
///
/// Startup failures (configuration, pin claims) are fatal. Everything raised
/// while the box is running is logged at the point of use and swallowed.

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file is missing: {path}")]
    Missing { path: String },

    #[error("Configuration file {path} is malformed: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Failed to access configuration file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Process exit code the controller terminates with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Missing { .. } => 2,
            ConfigError::Malformed { .. } | ConfigError::Io { .. } => 3,
        }
    }
}

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("GPIO pin {0} is already claimed")]
    PinClaimed(Pin),

    #[error("Pull mode not supported on pin {0}")]
    UnsupportedPull(Pin),

    #[error("GPIO pin {0} has not been configured")]
    UnknownPin(Pin),

    #[error("Unknown PWM channel {0}")]
    UnknownPwm(u32),

    #[error("GPIO backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Failed to start player for {location}")]
    Spawn {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Player control pipe is broken")]
    ControlPipe(#[source] std::io::Error),

    #[error("Failed to poll player process")]
    Wait(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MixerError {
    #[error("Failed to run mixer command")]
    Command(#[source] std::io::Error),

    #[error("Mixer command failed: {0}")]
    Failed(String),

    #[error("Could not read volume from mixer output")]
    Unparsable,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Button capture cancelled by shutdown")]
    Cancelled,

    #[error("Button capture hardware failure")]
    Hardware(#[from] HardwareError),
}

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Failed to run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}")]
    Status { command: String, status: i32 },
}
