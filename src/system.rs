//! Operating system actions: service restarts, power and network mode
use std::process::Command;

use crate::error::SystemError;

/// Restart the service in configuration mode
pub const CONFIG_RESTART: &[&str] = &["sudo", "/etc/init.d/soundbox", "restart"];
/// Restart the service normally
pub const PLAIN_RESTART: &[&str] = &["sudo", "/etc/init.d/soundbox", "restart2"];
pub const POWER_DOWN: &[&str] = &["sudo", "shutdown", "now"];
pub const REBOOT: &[&str] = &["sudo", "reboot"];
pub const START_ACCESS_POINT: &[&str] = &["sudo", "./start_ap.sh"];
pub const STOP_ACCESS_POINT: &[&str] = &["sudo", "./stop_ap.sh"];

/// What the admin menus can ask the OS to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    ConfigRestart,
    PlainRestart,
    PowerDown,
    Reboot,
    StartAccessPoint,
    StopAccessPoint,
}

impl SystemAction {
    pub fn command(self) -> &'static [&'static str] {
        match self {
            SystemAction::ConfigRestart => CONFIG_RESTART,
            SystemAction::PlainRestart => PLAIN_RESTART,
            SystemAction::PowerDown => POWER_DOWN,
            SystemAction::Reboot => REBOOT,
            SystemAction::StartAccessPoint => START_ACCESS_POINT,
            SystemAction::StopAccessPoint => STOP_ACCESS_POINT,
        }
    }
}

pub trait SystemControl: Send + Sync {
    fn execute(&self, action: SystemAction) -> Result<(), SystemError>;
}

/// Runs the actions as shell commands
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellSystem;

impl SystemControl for ShellSystem {
    fn execute(&self, action: SystemAction) -> Result<(), SystemError> {
        let argv = action.command();
        let command = argv.join(" ");
        tracing::info!("Running `{}`", command);

        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| SystemError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SystemError::Status {
                command,
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

/// Records actions instead of running them
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSystem {
    pub actions: parking_lot::Mutex<Vec<SystemAction>>,
}

#[cfg(test)]
impl SystemControl for RecordingSystem {
    fn execute(&self, action: SystemAction) -> Result<(), SystemError> {
        self.actions.lock().push(action);
        Ok(())
    }
}
