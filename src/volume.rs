//! Rotary encoder volume control
//!
//! Pin A (CLK) is polled rather than edge-driven: cheap encoders bounce
//! too much for interrupts. While A is held low, pin B is sampled; its
//! transition from before the pulse to during it gives the direction.
//! The polling loop sleeps a fraction of a millisecond per iteration,
//! trading a little CPU for sub-millisecond response.
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::{HardwareError, MixerError};
use crate::hardware::{Gpio, Level, Pin};
use crate::signal::ShutdownToken;

/// Volume change per encoder tick
pub const VOLUME_DELTA: u8 = 5;

/// ALSA simple control the box's sound card exposes
pub const ALSA_MIXER_NAME: &str = "PCM";

/// System volume, 0-100
pub trait Mixer: Send {
    fn volume(&mut self) -> Result<u8, MixerError>;
    fn set_volume(&mut self, percent: u8) -> Result<(), MixerError>;
}

/// Mixer backed by the `amixer` command line tool
pub struct AmixerMixer {
    control: String,
    percent: Regex,
}

impl AmixerMixer {
    pub fn new(control: &str) -> Result<Self, MixerError> {
        let percent = Regex::new(r"\[(\d{1,3})%\]").map_err(|e| MixerError::Failed(e.to_string()))?;
        Ok(Self {
            control: control.to_string(),
            percent,
        })
    }

    fn amixer(&self, args: &[&str]) -> Result<String, MixerError> {
        let output = Command::new("amixer")
            .args(args)
            .output()
            .map_err(MixerError::Command)?;
        if !output.status.success() {
            return Err(MixerError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// First `[NN%]` field of `amixer sget` output
    pub fn parse_percent(&self, output: &str) -> Result<u8, MixerError> {
        self.percent
            .captures(output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u8>().ok())
            .map(|v| v.min(100))
            .ok_or(MixerError::Unparsable)
    }
}

impl Mixer for AmixerMixer {
    fn volume(&mut self) -> Result<u8, MixerError> {
        let output = self.amixer(&["-M", "sget", &self.control])?;
        self.parse_percent(&output)
    }

    fn set_volume(&mut self, percent: u8) -> Result<(), MixerError> {
        let level = format!("{}%", percent.min(100));
        self.amixer(&["-q", "-M", "sset", &self.control, &level])?;
        Ok(())
    }
}

/// In-memory mixer, clones share the level
#[derive(Clone, Debug)]
pub struct MemoryMixer {
    level: Arc<Mutex<u8>>,
}

impl MemoryMixer {
    pub fn new(level: u8) -> Self {
        Self {
            level: Arc::new(Mutex::new(level.min(100))),
        }
    }

    pub fn level(&self) -> u8 {
        *self.level.lock()
    }
}

impl Mixer for MemoryMixer {
    fn volume(&mut self) -> Result<u8, MixerError> {
        Ok(*self.level.lock())
    }

    fn set_volume(&mut self, percent: u8) -> Result<(), MixerError> {
        *self.level.lock() = percent.min(100);
        Ok(())
    }
}

/// Direction of one detent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

/// New volume after `ticks` detents (positive = clockwise), clamped to 0..=100
pub fn adjusted_volume(current: u8, ticks: i64) -> u8 {
    let target = i64::from(current) + ticks * i64::from(VOLUME_DELTA);
    target.clamp(0, 100) as u8
}

pub struct EncoderVolumeLoop {
    gpio: Arc<dyn Gpio>,
    mixer: Box<dyn Mixer>,
    pin_a: Pin,
    pin_b: Pin,
    /// Net detents since start
    counter: i64,
    /// Counter value the mixer was last adjusted for
    applied: i64,
    busy_poll: Duration,
    shutdown: ShutdownToken,
}

impl EncoderVolumeLoop {
    pub fn new(
        gpio: Arc<dyn Gpio>,
        mixer: Box<dyn Mixer>,
        pin_a: Pin,
        pin_b: Pin,
        busy_poll: Duration,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            gpio,
            mixer,
            pin_a,
            pin_b,
            counter: 0,
            applied: 0,
            busy_poll,
            shutdown,
        }
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// Sample one pulse on pin A and decode its direction from pin B
    pub fn rotate(&mut self) -> Result<Option<Rotation>, HardwareError> {
        let last = self.gpio.read(self.pin_b)?;
        let mut current = None;

        while self.gpio.read(self.pin_a)?.is_low() {
            current = Some(self.gpio.read(self.pin_b)?);
            if self.shutdown.is_triggered() {
                break;
            }
            thread::sleep(self.busy_poll);
        }

        let rotation = match (last, current) {
            (Level::Low, Some(Level::High)) => Some(Rotation::Clockwise),
            (Level::High, Some(Level::Low)) => Some(Rotation::CounterClockwise),
            _ => None,
        };
        match rotation {
            Some(Rotation::Clockwise) => self.counter += 1,
            Some(Rotation::CounterClockwise) => self.counter -= 1,
            None => {}
        }
        Ok(rotation)
    }

    /// Push pending detents to the mixer. Returns the new volume if it changed.
    pub fn apply(&mut self) -> Result<Option<u8>, MixerError> {
        let ticks = self.counter - self.applied;
        if ticks == 0 {
            return Ok(None);
        }

        let current = self.mixer.volume()?;
        let target = adjusted_volume(current, ticks);
        tracing::debug!("Volume {} -> {} ({:+} ticks)", current, target, ticks);
        self.mixer.set_volume(target)?;
        self.applied = self.counter;
        Ok(Some(target))
    }

    /// One loop pass
    pub fn step(&mut self) -> Result<Option<u8>, HardwareError> {
        self.rotate()?;
        match self.apply() {
            Ok(changed) => Ok(changed),
            Err(e) => {
                tracing::warn!("Volume change failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Encoder activity body, runs until shutdown
    pub fn run(mut self) {
        tracing::info!("Volume control started");
        while !self.shutdown.is_triggered() {
            match self.step() {
                Ok(Some(volume)) => tracing::info!("Volume set to {}", volume),
                Ok(None) => {}
                Err(e) => {
                    if !self.shutdown.is_triggered() {
                        tracing::warn!("Encoder read failed, volume control stopping: {}", e);
                    }
                    break;
                }
            }
            thread::sleep(self.busy_poll);
        }
        tracing::info!("Volume control stopped");
    }
}
