//! Passcode-protected configuration menu, run at boot in configuration mode
//!
//! The user has a short countdown to enter the passcode pattern. After
//! that one press picks the sound collection and one press picks the
//! network mode (access point or existing Wi-Fi).
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::board::Button;
use crate::capture::PressSource;
use crate::config::{SoundboxConfig, Timing};
use crate::error::{CaptureError, ConfigError};
use crate::hardware::Gpio;
use crate::led::{DimCycle, DimTiming};
use crate::player::Prompts;
use crate::signal::ShutdownToken;
use crate::system::{SystemAction, SystemControl};

/// Pattern that unlocks the menu
pub const PASSCODE: [Button; 3] = [Button::Red, Button::White, Button::Blue];

/// Breathing cycles the user gets to enter the passcode
pub const CONFIG_DIM_CYCLES: u32 = 5;

pub const PROMPT_ENTER_PASSCODE: &str = "enter-passcode-pattern.wav";
pub const PROMPT_INVALID_PASSCODE: &str = "invalid-passcode.wav";
pub const PROMPT_CHOOSE_SOUNDS: &str = "choose-sound-group.wav";
pub const PROMPT_NETWORK_MODE: &str = "wifi-or-access-pt.wav";
pub const PROMPT_ACCESS_POINT: &str = "access-point-enabled.wav";
pub const PROMPT_WIFI: &str = "wifi-enabled.wav";
pub const PROMPT_UNCHANGED: &str = "connection-mode-unchanged.wav";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkChoice {
    AccessPoint,
    Wifi,
    Unchanged,
}

impl NetworkChoice {
    pub fn from_button(button: Button) -> Self {
        match button {
            Button::Green => NetworkChoice::AccessPoint,
            Button::Red => NetworkChoice::Wifi,
            _ => NetworkChoice::Unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    InvalidPasscode,
    Configured {
        collection: Button,
        network: NetworkChoice,
    },
    /// Countdown expired or the program was interrupted
    Cancelled,
}

pub struct ConfigMenu {
    pub gpio: Arc<dyn Gpio>,
    pub capture: Arc<dyn PressSource>,
    pub prompts: Prompts,
    pub system: Arc<dyn SystemControl>,
    pub ini_path: PathBuf,
    pub timing: Timing,
    pub shutdown: ShutdownToken,
}

impl ConfigMenu {
    pub fn run(&self) -> Result<ConfigOutcome, ConfigError> {
        self.prompts.play(PROMPT_ENTER_PASSCODE, true);

        let pattern = match self.capture_passcode() {
            Some(pattern) => pattern,
            None => return Ok(ConfigOutcome::Cancelled),
        };
        if pattern != PASSCODE {
            tracing::info!("Wrong passcode entered");
            self.prompts.play(PROMPT_INVALID_PASSCODE, true);
            return Ok(ConfigOutcome::InvalidPasscode);
        }
        tracing::info!("Passcode accepted");

        self.prompts.play(PROMPT_CHOOSE_SOUNDS, true);
        let Some(collection) = self.choose_one() else {
            return Ok(ConfigOutcome::Cancelled);
        };
        tracing::info!("Sound collection chosen: {}", collection);
        SoundboxConfig::save_selected_dir(&self.ini_path, collection.color_name())?;

        self.prompts.play(PROMPT_NETWORK_MODE, true);
        let Some(button) = self.choose_one() else {
            return Ok(ConfigOutcome::Cancelled);
        };
        let network = NetworkChoice::from_button(button);
        self.apply_network(network);

        Ok(ConfigOutcome::Configured {
            collection,
            network,
        })
    }

    /// Three presses against the dimming countdown. None if time ran out.
    fn capture_passcode(&self) -> Option<Vec<Button>> {
        let countdown = match DimCycle::new(
            Arc::clone(&self.gpio),
            &Button::ALL,
            CONFIG_DIM_CYCLES,
            DimTiming::from(&self.timing),
        ) {
            Ok(cycle) => Some(Arc::new(cycle)),
            Err(e) => {
                tracing::warn!("Passcode countdown unavailable: {}", e);
                None
            }
        };

        let runner = countdown.as_ref().and_then(|cycle| {
            let cycle = Arc::clone(cycle);
            let shutdown = self.shutdown.clone();
            thread::Builder::new()
                .name("passcode-countdown".to_string())
                .spawn(move || cycle.run(&shutdown))
                .map_err(|e| tracing::warn!("Failed to start passcode countdown: {}", e))
                .ok()
        });

        // The first press stops the countdown
        let hook_cycle = countdown.clone();
        let pattern = self.capture.capture_with(
            PASSCODE.len(),
            Box::new(move || {
                if let Some(cycle) = hook_cycle {
                    cycle.go_dark();
                }
            }),
        );

        if let Some(cycle) = &countdown {
            cycle.close();
        }
        if let Some(handle) = runner {
            let _ = handle.join();
        }

        match pattern {
            Ok(pattern) => Some(pattern),
            Err(CaptureError::Cancelled) => None,
            Err(e) => {
                tracing::error!("Passcode entry failed: {}", e);
                None
            }
        }
    }

    fn choose_one(&self) -> Option<Button> {
        match self.capture.capture(1) {
            Ok(pressed) => pressed.first().copied(),
            Err(CaptureError::Cancelled) => None,
            Err(e) => {
                tracing::error!("Button choice failed: {}", e);
                None
            }
        }
    }

    fn apply_network(&self, network: NetworkChoice) {
        let (prompt, actions): (&str, &[SystemAction]) = match network {
            NetworkChoice::AccessPoint => (
                PROMPT_ACCESS_POINT,
                &[SystemAction::StartAccessPoint, SystemAction::Reboot],
            ),
            NetworkChoice::Wifi => (
                PROMPT_WIFI,
                &[SystemAction::StopAccessPoint, SystemAction::Reboot],
            ),
            NetworkChoice::Unchanged => (PROMPT_UNCHANGED, &[]),
        };

        tracing::info!("Network mode: {:?}", network);
        self.prompts.play(prompt, true);
        for action in actions {
            if let Err(e) = self.system.execute(*action) {
                tracing::error!("{:?} failed: {}", action, e);
            }
        }
    }
}
