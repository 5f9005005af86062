//! In-memory GPIO backend
//!
//! Behaves like the board from the components' point of view: inputs rest
//! at the level their pull resistor gives them, falling edges fire the
//! registered callbacks (with debounce), and every output write is recorded
//! so tests can assert on LED history.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{EdgeCallback, Gpio, Level, Pin, PinMode, Pull, PwmHandle};
use crate::error::HardwareError;

struct Watch {
    debounce: Duration,
    last_fired: Option<Instant>,
    callback: Arc<Mutex<EdgeCallback>>,
}

#[derive(Debug, Clone, Copy)]
struct PwmChannel {
    pin: Pin,
    duty: u8,
}

#[derive(Default)]
struct SimState {
    modes: HashMap<Pin, PinMode>,
    levels: HashMap<Pin, Level>,
    scripted: HashMap<Pin, VecDeque<Level>>,
    watches: HashMap<Pin, Watch>,
    pwm: HashMap<u32, PwmChannel>,
    writes: Vec<(Pin, Level)>,
    reset_count: usize,
}

/// Simulated pin bank
pub struct SimulatedGpio {
    state: Mutex<SimState>,
    next_pwm: AtomicU32,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            next_pwm: AtomicU32::new(1),
        }
    }

    /// Drive an input pin, firing the edge watch on a HIGH to LOW transition
    pub fn set_input(&self, pin: Pin, level: Level) {
        let callback = {
            let mut state = self.state.lock();
            let previous = state.levels.insert(pin, level);
            let falling = previous == Some(Level::High) && level == Level::Low;

            match state.watches.get_mut(&pin) {
                Some(watch) if falling => {
                    let now = Instant::now();
                    let bounced = watch
                        .last_fired
                        .map(|last| now.duration_since(last) < watch.debounce)
                        .unwrap_or(false);
                    if bounced {
                        None
                    } else {
                        watch.last_fired = Some(now);
                        Some(Arc::clone(&watch.callback))
                    }
                }
                _ => None,
            }
        };

        // Run outside the state lock, callbacks write LEDs
        if let Some(callback) = callback {
            let mut callback = callback.lock();
            (*callback)();
        }
    }

    /// Push a button wired to ground (pin goes LOW)
    pub fn press(&self, pin: Pin) {
        self.set_input(pin, Level::Low);
    }

    pub fn release(&self, pin: Pin) {
        self.set_input(pin, Level::High);
    }

    /// Press and release
    pub fn tap(&self, pin: Pin) {
        self.press(pin);
        self.release(pin);
    }

    /// Queue levels returned by the next reads of `pin`, ahead of its resting level
    pub fn script_reads(&self, pin: Pin, levels: impl IntoIterator<Item = Level>) {
        self.state
            .lock()
            .scripted
            .entry(pin)
            .or_default()
            .extend(levels);
    }

    /// Current level of an output pin, `None` if the pin was never configured as output
    pub fn output(&self, pin: Pin) -> Option<Level> {
        let state = self.state.lock();
        match state.modes.get(&pin) {
            Some(PinMode::Output) => state.levels.get(&pin).copied(),
            _ => None,
        }
    }

    /// Every output write in order
    pub fn writes(&self) -> Vec<(Pin, Level)> {
        self.state.lock().writes.clone()
    }

    pub fn writes_to(&self, pin: Pin) -> Vec<Level> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Duty cycle of the active PWM channel on `pin`
    pub fn duty(&self, pin: Pin) -> Option<u8> {
        self.state
            .lock()
            .pwm
            .values()
            .find(|channel| channel.pin == pin)
            .map(|channel| channel.duty)
    }

    pub fn has_edge_watch(&self, pin: Pin) -> bool {
        self.state.lock().watches.contains_key(&pin)
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().reset_count
    }
}

impl Default for SimulatedGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpio for SimulatedGpio {
    fn configure(&self, pin: Pin, mode: PinMode) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if state.modes.contains_key(&pin) {
            return Err(HardwareError::PinClaimed(pin));
        }

        let resting = match mode {
            PinMode::Input(Pull::Down) => Level::Low,
            PinMode::Input(_) => Level::High,
            PinMode::Output => Level::Low,
        };
        state.modes.insert(pin, mode);
        state.levels.insert(pin, resting);
        Ok(())
    }

    fn read(&self, pin: Pin) -> Result<Level, HardwareError> {
        let mut state = self.state.lock();
        if !state.modes.contains_key(&pin) {
            return Err(HardwareError::UnknownPin(pin));
        }
        if let Some(level) = state.scripted.get_mut(&pin).and_then(VecDeque::pop_front) {
            return Ok(level);
        }
        Ok(state.levels.get(&pin).copied().unwrap_or(Level::High))
    }

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        match state.modes.get(&pin) {
            Some(PinMode::Output) => {
                // A plain write takes the pin out of PWM mode
                state.pwm.retain(|_, channel| channel.pin != pin);
                state.levels.insert(pin, level);
                state.writes.push((pin, level));
                Ok(())
            }
            Some(PinMode::Input(_)) => Err(HardwareError::Backend(format!(
                "pin {} is an input",
                pin
            ))),
            None => Err(HardwareError::UnknownPin(pin)),
        }
    }

    fn on_falling_edge(
        &self,
        pin: Pin,
        debounce: Duration,
        callback: EdgeCallback,
    ) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        match state.modes.get(&pin) {
            Some(PinMode::Input(_)) => {
                state.watches.insert(
                    pin,
                    Watch {
                        debounce,
                        last_fired: None,
                        callback: Arc::new(Mutex::new(callback)),
                    },
                );
                Ok(())
            }
            Some(PinMode::Output) => Err(HardwareError::Backend(format!(
                "pin {} is an output",
                pin
            ))),
            None => Err(HardwareError::UnknownPin(pin)),
        }
    }

    fn remove_edge_watch(&self, pin: Pin) -> Result<(), HardwareError> {
        let watch = self.state.lock().watches.remove(&pin);
        // Wait out a callback that is still running, outside the state lock
        if let Some(watch) = watch {
            drop(watch.callback.lock());
        }
        Ok(())
    }

    fn pwm(&self, pin: Pin, _frequency_hz: f64) -> Result<PwmHandle, HardwareError> {
        let mut state = self.state.lock();
        match state.modes.get(&pin) {
            Some(PinMode::Output) => {
                let id = self.next_pwm.fetch_add(1, Ordering::Relaxed);
                state.pwm.insert(id, PwmChannel { pin, duty: 0 });
                Ok(PwmHandle(id))
            }
            _ => Err(HardwareError::UnknownPin(pin)),
        }
    }

    fn set_duty(&self, handle: PwmHandle, percent: u8) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let channel = state
            .pwm
            .get_mut(&handle.0)
            .ok_or(HardwareError::UnknownPwm(handle.0))?;
        channel.duty = percent.min(100);
        Ok(())
    }

    fn stop_pwm(&self, handle: PwmHandle) -> Result<(), HardwareError> {
        self.state
            .lock()
            .pwm
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(HardwareError::UnknownPwm(handle.0))
    }

    fn reset(&self) {
        let watches: Vec<Watch> = {
            let mut state = self.state.lock();
            state.watches.drain().map(|(_, watch)| watch).collect()
        };
        for watch in watches {
            drop(watch.callback.lock());
        }

        let mut state = self.state.lock();
        let outputs: Vec<Pin> = state
            .modes
            .iter()
            .filter(|(_, mode)| **mode == PinMode::Output)
            .map(|(pin, _)| *pin)
            .collect();
        for pin in outputs {
            state.levels.insert(pin, Level::Low);
            state.writes.push((pin, Level::Low));
        }
        state.pwm.clear();
        state.reset_count += 1;
    }
}
