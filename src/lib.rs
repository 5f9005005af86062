//! Five-button sound box controller.
//!
//! Buttons play one sound each, LEDs scan while idle, a rotary encoder sets
//! the volume and its push switch pauses, stops, or opens the admin menu.

pub mod admin;
pub mod board;
pub mod capture;
pub mod command_gate;
pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod led;
pub mod logging;
pub mod player;
pub mod scanner;
pub mod signal;
pub mod sounds;
pub mod system;
pub mod volume;

pub use board::{Button, ButtonMap};
pub use config::{CliArgs, PlayerSettings, SoundboxConfig, Timing};
pub use controller::{Collaborators, Soundbox};
pub use error::{CaptureError, ConfigError, HardwareError, MixerError, PlayerError, SystemError};
pub use signal::{ReadyFlag, ShutdownToken};
