//! Hardware abstraction for digital pins, edge detection and PWM.
//!
//! Every component talks to the board through the object-safe [`Gpio`]
//! trait so the same code runs against Raspberry Pi pins or the in-memory
//! simulator used by tests and desktop runs.
//!
//! ```text
//!             Arc<dyn Gpio>
//!    ┌─────────────┼──────────────┐
//!    ▼             ▼              ▼
//! RpiGpio     SimulatedGpio    (tests)
//! (rppal)     (in memory)
//! ```
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HardwareError;

pub mod sim;

#[cfg(feature = "rpi")]
pub mod rpi;

/// BCM pin number
pub type Pin = u8;

/// Callback fired from the backend's interrupt thread on a debounced falling edge
pub type EdgeCallback = Box<dyn FnMut() + Send + 'static>;

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_low(self) -> bool {
        self == Level::Low
    }

    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(on: bool) -> Self {
        if on {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "LOW"),
            Level::High => write!(f, "HIGH"),
        }
    }
}

/// Internal pull resistor configuration for inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Up,
    Down,
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input(Pull),
    Output,
}

/// Opaque handle to a PWM channel started with [`Gpio::pwm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PwmHandle(pub(crate) u32);

impl PwmHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Digital I/O contract shared by all backends.
///
/// Methods take `&self`; backends serialize access internally so one
/// `Arc<dyn Gpio>` can be handed to every activity.
pub trait Gpio: Send + Sync {
    /// Claim a pin as input (with pull) or output
    fn configure(&self, pin: Pin, mode: PinMode) -> Result<(), HardwareError>;

    fn read(&self, pin: Pin) -> Result<Level, HardwareError>;

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError>;

    /// Register `callback` for debounced falling edges on an input pin.
    /// Replaces any previous watch on the same pin.
    fn on_falling_edge(
        &self,
        pin: Pin,
        debounce: Duration,
        callback: EdgeCallback,
    ) -> Result<(), HardwareError>;

    fn remove_edge_watch(&self, pin: Pin) -> Result<(), HardwareError>;

    /// Start a PWM channel on an output pin at 0% duty
    fn pwm(&self, pin: Pin, frequency_hz: f64) -> Result<PwmHandle, HardwareError>;

    /// Change duty cycle, `percent` is clamped to 0..=100
    fn set_duty(&self, handle: PwmHandle, percent: u8) -> Result<(), HardwareError>;

    fn stop_pwm(&self, handle: PwmHandle) -> Result<(), HardwareError>;

    /// Drive every claimed output low, stop PWM and drop edge watches
    fn reset(&self);
}

/// Write a level, logging instead of failing.
///
/// LED writes race with shutdown; a failed write there is expected.
pub fn write_quiet(gpio: &dyn Gpio, pin: Pin, level: Level) {
    if let Err(e) = gpio.write(pin, level) {
        tracing::warn!("Ignoring write failure on pin {}: {}", pin, e);
    }
}

/// True when the crate was built without the `rpi` feature
pub const SIMULATED_BACKEND: bool = !cfg!(feature = "rpi");

/// Open the board's GPIO backend
#[cfg(feature = "rpi")]
pub fn open() -> Result<Arc<dyn Gpio>, HardwareError> {
    Ok(Arc::new(rpi::RpiGpio::new()?))
}

/// Open the board's GPIO backend
#[cfg(not(feature = "rpi"))]
pub fn open() -> Result<Arc<dyn Gpio>, HardwareError> {
    tracing::error!(
        "Built without the `rpi` feature: no physical pin will be driven, \
         buttons and LEDs are simulated. Rebuild with `--features rpi` for the board"
    );
    Ok(Arc::new(sim::SimulatedGpio::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_bool() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert!(Level::Low.is_low());
        assert!(Level::High.is_high());
    }

    #[cfg(not(feature = "rpi"))]
    #[test]
    fn test_default_build_opens_simulated_pins() {
        assert!(SIMULATED_BACKEND);
        let gpio = open().unwrap();
        gpio.configure(16, PinMode::Output).unwrap();
        gpio.write(16, Level::High).unwrap();
        assert_eq!(gpio.read(16).unwrap(), Level::High);
    }

    #[test]
    fn test_write_quiet_swallows_errors() {
        let gpio = sim::SimulatedGpio::new();
        // Pin 99 was never configured, the write fails and is only logged
        write_quiet(&gpio, 99, Level::High);
        assert_eq!(gpio.output(99), None);
    }
}
