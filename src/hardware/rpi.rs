//! Raspberry Pi GPIO backend built on rppal
//!
//! Edge callbacks run on rppal's interrupt thread. PWM is rppal's software
//! PWM, which is accurate enough for LED dimming at 50-100 Hz.
//!
//! Clearing an interrupt joins that thread, and callbacks write LEDs through
//! the backend state. Input pins therefore sit behind their own lock and the
//! state lock is never held while an interrupt is set or cleared.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rppal::gpio::{self as rp, Trigger};

use super::{EdgeCallback, Gpio, Level, Pin, PinMode, Pull, PwmHandle};
use crate::error::HardwareError;

#[derive(Default)]
struct RpiState {
    inputs: HashMap<Pin, Arc<Mutex<rp::InputPin>>>,
    outputs: HashMap<Pin, rp::OutputPin>,
    /// channel id -> (pin, frequency)
    pwm: HashMap<u32, (Pin, f64)>,
}

pub struct RpiGpio {
    gpio: rp::Gpio,
    state: Mutex<RpiState>,
    next_pwm: AtomicU32,
}

fn backend(err: rp::Error) -> HardwareError {
    match err {
        rp::Error::PinUsed(pin) => HardwareError::PinClaimed(pin),
        other => HardwareError::Backend(other.to_string()),
    }
}

fn to_rp(level: Level) -> rp::Level {
    match level {
        Level::Low => rp::Level::Low,
        Level::High => rp::Level::High,
    }
}

impl RpiGpio {
    pub fn new() -> Result<Self, HardwareError> {
        let gpio = rp::Gpio::new().map_err(backend)?;
        Ok(Self {
            gpio,
            state: Mutex::new(RpiState::default()),
            next_pwm: AtomicU32::new(1),
        })
    }

    /// The input pin, looked up under the state lock and returned without it
    fn input(&self, pin: Pin) -> Option<Arc<Mutex<rp::InputPin>>> {
        self.state.lock().inputs.get(&pin).map(Arc::clone)
    }
}

fn wrap(input: rp::InputPin) -> Arc<Mutex<rp::InputPin>> {
    Arc::new(Mutex::new(input))
}

impl Gpio for RpiGpio {
    fn configure(&self, pin: Pin, mode: PinMode) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if state.inputs.contains_key(&pin) || state.outputs.contains_key(&pin) {
            return Err(HardwareError::PinClaimed(pin));
        }

        let raw = self.gpio.get(pin).map_err(backend)?;
        match mode {
            PinMode::Input(Pull::Up) => {
                state.inputs.insert(pin, wrap(raw.into_input_pullup()));
            }
            PinMode::Input(Pull::Down) => {
                state.inputs.insert(pin, wrap(raw.into_input_pulldown()));
            }
            PinMode::Input(Pull::Off) => {
                state.inputs.insert(pin, wrap(raw.into_input()));
            }
            PinMode::Output => {
                state.outputs.insert(pin, raw.into_output_low());
            }
        }
        Ok(())
    }

    fn read(&self, pin: Pin) -> Result<Level, HardwareError> {
        if let Some(input) = self.input(pin) {
            return Ok(Level::from(input.lock().is_high()));
        }
        self.state
            .lock()
            .outputs
            .get(&pin)
            .map(|output| Level::from(output.is_set_high()))
            .ok_or(HardwareError::UnknownPin(pin))
    }

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let had_pwm = state.pwm.values().any(|(p, _)| *p == pin);
        if had_pwm {
            state.pwm.retain(|_, (p, _)| *p != pin);
        }
        let output = state
            .outputs
            .get_mut(&pin)
            .ok_or(HardwareError::UnknownPin(pin))?;
        if had_pwm {
            output.clear_pwm().map_err(backend)?;
        }
        output.write(to_rp(level));
        Ok(())
    }

    fn on_falling_edge(
        &self,
        pin: Pin,
        debounce: Duration,
        mut callback: EdgeCallback,
    ) -> Result<(), HardwareError> {
        let input = self.input(pin).ok_or(HardwareError::UnknownPin(pin))?;
        let debounce = if debounce.is_zero() { None } else { Some(debounce) };
        let mut input = input.lock();
        input
            .set_async_interrupt(Trigger::FallingEdge, debounce, move |_event| callback())
            .map_err(backend)
    }

    fn remove_edge_watch(&self, pin: Pin) -> Result<(), HardwareError> {
        let input = self.input(pin).ok_or(HardwareError::UnknownPin(pin))?;
        let mut input = input.lock();
        input.clear_async_interrupt().map_err(backend)
    }

    fn pwm(&self, pin: Pin, frequency_hz: f64) -> Result<PwmHandle, HardwareError> {
        let mut state = self.state.lock();
        let output = state
            .outputs
            .get_mut(&pin)
            .ok_or(HardwareError::UnknownPin(pin))?;
        output.set_pwm_frequency(frequency_hz, 0.0).map_err(backend)?;

        let id = self.next_pwm.fetch_add(1, Ordering::Relaxed);
        state.pwm.insert(id, (pin, frequency_hz));
        Ok(PwmHandle(id))
    }

    fn set_duty(&self, handle: PwmHandle, percent: u8) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let (pin, frequency) = *state
            .pwm
            .get(&handle.0)
            .ok_or(HardwareError::UnknownPwm(handle.0))?;
        let output = state
            .outputs
            .get_mut(&pin)
            .ok_or(HardwareError::UnknownPin(pin))?;
        let duty = f64::from(percent.min(100)) / 100.0;
        output.set_pwm_frequency(frequency, duty).map_err(backend)
    }

    fn stop_pwm(&self, handle: PwmHandle) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let (pin, _) = state
            .pwm
            .remove(&handle.0)
            .ok_or(HardwareError::UnknownPwm(handle.0))?;
        match state.outputs.get_mut(&pin) {
            Some(output) => output.clear_pwm().map_err(backend),
            None => Ok(()),
        }
    }

    fn reset(&self) {
        let inputs: Vec<(Pin, Arc<Mutex<rp::InputPin>>)> =
            self.state.lock().inputs.drain().collect();
        for (pin, input) in &inputs {
            if let Err(e) = input.lock().clear_async_interrupt() {
                tracing::debug!("clear_async_interrupt on pin {} during reset: {}", pin, e);
            }
        }

        let mut state = self.state.lock();
        state.pwm.clear();
        for (pin, output) in state.outputs.iter_mut() {
            if let Err(e) = output.clear_pwm() {
                tracing::debug!("clear_pwm on pin {} during reset: {}", pin, e);
            }
            output.set_low();
        }
        // Dropping the pins restores their original mode
        state.outputs.clear();
    }
}
