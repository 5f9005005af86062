//! PWM breathing effect used as the admin menu countdown
//!
//! The selected LEDs ramp up and down together for a number of cycles, end
//! fully lit, and then go dark one per interval. If nobody cancels the
//! cycle before the last LED goes out, time is up and the program ends.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::board::Button;
use crate::config::Timing;
use crate::error::HardwareError;
use crate::hardware::{Gpio, PwmHandle};
use crate::led::DIM_PWM_HZ;
use crate::signal::ShutdownToken;

/// How a dimming run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimOutcome {
    /// Stopped by `stop_cycling`, `go_dark` or shutdown
    Cancelled,
    /// Every LED counted down uninterrupted
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub struct DimTiming {
    pub step: Duration,
    pub countdown: Duration,
    pub blink: Duration,
}

impl From<&Timing> for DimTiming {
    fn from(timing: &Timing) -> Self {
        Self {
            step: timing.dim_step,
            countdown: timing.countdown_interval,
            blink: timing.blink_interval,
        }
    }
}

pub struct DimCycle {
    gpio: Arc<dyn Gpio>,
    channels: Vec<(Button, PwmHandle)>,
    cycles: u32,
    timing: DimTiming,
    /// Cycling flag. Every ramp write happens under this lock, so once it
    /// reads false no further ramp write can land.
    running: Mutex<bool>,
}

impl DimCycle {
    /// Start a PWM channel (0% duty) on each LED
    pub fn new(
        gpio: Arc<dyn Gpio>,
        leds: &[Button],
        cycles: u32,
        timing: DimTiming,
    ) -> Result<Self, HardwareError> {
        let mut channels = Vec::with_capacity(leds.len());
        for &button in leds {
            match gpio.pwm(button.led_pin(), DIM_PWM_HZ) {
                Ok(handle) => channels.push((button, handle)),
                Err(e) => {
                    for (_, handle) in channels {
                        let _ = gpio.stop_pwm(handle);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            gpio,
            channels,
            cycles,
            timing,
            running: Mutex::new(true),
        })
    }

    pub fn is_cycling(&self) -> bool {
        *self.running.lock()
    }

    pub fn stop_cycling(&self) {
        *self.running.lock() = false;
    }

    /// Write `percent` to every channel if still cycling; false once cancelled
    fn ramp_all(&self, percent: u8) -> bool {
        let running = self.running.lock();
        if !*running {
            return false;
        }
        for (_, handle) in &self.channels {
            self.duty(*handle, percent);
        }
        true
    }

    fn ramp_one(&self, handle: PwmHandle, percent: u8) -> bool {
        let running = self.running.lock();
        if !*running {
            return false;
        }
        self.duty(handle, percent);
        true
    }

    fn duty(&self, handle: PwmHandle, percent: u8) {
        if let Err(e) = self.gpio.set_duty(handle, percent) {
            tracing::debug!("Ignoring duty write failure: {}", e);
        }
    }

    fn pause(&self, duration: Duration, shutdown: &ShutdownToken) -> bool {
        thread::sleep(duration);
        !shutdown.is_triggered()
    }

    /// Ramp through `percents`, false if cancelled part way
    fn ramp<I>(&self, percents: I, shutdown: &ShutdownToken) -> bool
    where
        I: IntoIterator<Item = u8>,
    {
        for percent in percents {
            if !self.ramp_all(percent) || !self.pause(self.timing.step, shutdown) {
                return false;
            }
        }
        true
    }

    /// Run the breathing cycles and the countdown.
    ///
    /// Triggers `shutdown` when the countdown expires.
    pub fn run(&self, shutdown: &ShutdownToken) -> DimOutcome {
        let completed = (0..self.cycles).all(|_| {
            self.ramp(0..=100, shutdown) && self.ramp((1..=100).rev(), shutdown)
        }) && self.ramp(0..=100, shutdown);

        if !completed {
            return DimOutcome::Cancelled;
        }

        for (button, handle) in &self.channels {
            if !shutdown.sleep(self.timing.countdown) || !self.ramp_one(*handle, 0) {
                return DimOutcome::Cancelled;
            }
            tracing::debug!("Countdown: {} LED out", button);
        }

        if !self.is_cycling() {
            return DimOutcome::Cancelled;
        }
        tracing::info!("Admin menu timed out");
        shutdown.trigger();
        DimOutcome::Expired
    }

    /// Stop cycling and turn every LED fully off
    pub fn go_dark(&self) {
        self.stop_cycling();
        for (_, handle) in &self.channels {
            self.duty(*handle, 0);
        }
    }

    fn handle(&self, button: Button) -> Option<PwmHandle> {
        self.channels
            .iter()
            .find(|(b, _)| *b == button)
            .map(|(_, handle)| *handle)
    }

    /// Full brightness on one LED
    pub fn light_up(&self, button: Button) {
        match self.handle(button) {
            Some(handle) => self.duty(handle, 100),
            None => tracing::debug!("{} LED is not part of this dim cycle", button),
        }
    }

    /// Blink one LED fully on and off `count` times
    pub fn flash(&self, button: Button, count: u32) {
        let Some(handle) = self.handle(button) else {
            tracing::debug!("{} LED is not part of this dim cycle", button);
            return;
        };
        for _ in 0..count {
            self.duty(handle, 100);
            thread::sleep(self.timing.blink);
            self.duty(handle, 0);
            thread::sleep(self.timing.blink);
        }
    }

    /// Stop every PWM channel
    pub fn close(&self) {
        self.stop_cycling();
        for (button, handle) in &self.channels {
            if let Err(e) = self.gpio.stop_pwm(*handle) {
                tracing::debug!("stop_pwm on {} LED: {}", button, e);
            }
        }
    }
}
