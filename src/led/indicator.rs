//! Single LED driver with a blink-until-stopped mode
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::hardware::{write_quiet, Gpio, Level, Pin, PwmHandle};

/// PWM frequency used when an LED is dimmed
pub const DIM_PWM_HZ: f64 = 50.0;

/// What the indicator last drove the LED to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Off,
    On,
    Dimmed(u8),
    Flashing,
}

struct Flasher {
    run: Arc<AtomicBool>,
    flashing: Arc<AtomicBool>,
    before: LedState,
    /// Yields true if the loop ran and left the LED off
    handle: JoinHandle<bool>,
}

/// One LED: on/off, PWM dimming, and a flashing activity.
///
/// `stop_flash` joins the flashing thread, so once it returns no write from
/// the flasher can land after the caller's own write.
pub struct LedIndicator {
    gpio: Arc<dyn Gpio>,
    pin: Pin,
    name: &'static str,
    state: Mutex<LedState>,
    pwm: Mutex<Option<PwmHandle>>,
    flasher: Mutex<Option<Flasher>>,
}

impl LedIndicator {
    pub fn new(gpio: Arc<dyn Gpio>, pin: Pin, name: &'static str) -> Self {
        Self {
            gpio,
            pin,
            name,
            state: Mutex::new(LedState::Off),
            pwm: Mutex::new(None),
            flasher: Mutex::new(None),
        }
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> LedState {
        *self.state.lock()
    }

    /// Solid on or off. Leaves PWM mode if the LED was dimmed.
    pub fn set(&self, on: bool) {
        self.release_pwm();
        write_quiet(self.gpio.as_ref(), self.pin, Level::from(on));
        *self.state.lock() = if on { LedState::On } else { LedState::Off };
    }

    /// Dim to `percent` (0-100) through a PWM channel
    pub fn dim(&self, percent: u8) {
        let percent = percent.min(100);
        let mut pwm = self.pwm.lock();
        let handle = match *pwm {
            Some(handle) => handle,
            None => match self.gpio.pwm(self.pin, DIM_PWM_HZ) {
                Ok(handle) => {
                    *pwm = Some(handle);
                    handle
                }
                Err(e) => {
                    tracing::warn!("Cannot dim {} LED: {}", self.name, e);
                    return;
                }
            },
        };
        if let Err(e) = self.gpio.set_duty(handle, percent) {
            tracing::warn!("Ignoring duty change failure on {} LED: {}", self.name, e);
        }
        *self.state.lock() = LedState::Dimmed(percent);
    }

    fn release_pwm(&self) {
        if let Some(handle) = self.pwm.lock().take() {
            if let Err(e) = self.gpio.stop_pwm(handle) {
                tracing::debug!("stop_pwm on {} LED: {}", self.name, e);
            }
        }
    }

    /// Start toggling the LED every `period` on its own thread.
    ///
    /// Returns false if a flasher is already running (no second thread is
    /// started) or the thread could not be spawned.
    pub fn start_flash(&self, period: Duration) -> bool {
        let mut flasher = self.flasher.lock();
        if flasher.is_some() {
            return false;
        }

        let run = Arc::new(AtomicBool::new(true));
        let flashing = Arc::new(AtomicBool::new(false));
        let gpio = Arc::clone(&self.gpio);
        let pin = self.pin;

        let spawned = thread::Builder::new()
            .name(format!("flash-{}", self.name))
            .spawn({
                let run = Arc::clone(&run);
                let flashing = Arc::clone(&flashing);
                move || flash_until_stopped(gpio.as_ref(), pin, period, &run, &flashing)
            });

        match spawned {
            Ok(handle) => {
                let before = {
                    let mut state = self.state.lock();
                    std::mem::replace(&mut *state, LedState::Flashing)
                };
                *flasher = Some(Flasher {
                    run,
                    flashing,
                    before,
                    handle,
                });
                tracing::debug!("{} LED flashing every {:?}", self.name, period);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to start {} LED flasher: {}", self.name, e);
                false
            }
        }
    }

    /// Stop the flasher and wait until its thread has exited
    pub fn stop_flash(&self) {
        let mut flasher = self.flasher.lock();
        let Some(active) = flasher.take() else {
            return;
        };

        active.run.store(false, Ordering::SeqCst);
        let left_off = match active.handle.join() {
            Ok(left_off) => left_off,
            Err(_) => {
                tracing::warn!("{} LED flasher panicked", self.name);
                true
            }
        };
        debug_assert!(!active.flashing.load(Ordering::SeqCst));

        *self.state.lock() = if left_off { LedState::Off } else { active.before };
    }

    pub fn is_flashing(&self) -> bool {
        self.flasher
            .lock()
            .as_ref()
            .map(|f| f.flashing.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl Drop for LedIndicator {
    fn drop(&mut self) {
        if let Some(flasher) = self.flasher.get_mut().as_ref() {
            flasher.run.store(false, Ordering::SeqCst);
        }
    }
}

fn flash_until_stopped(
    gpio: &dyn Gpio,
    pin: Pin,
    period: Duration,
    run: &AtomicBool,
    flashing: &AtomicBool,
) -> bool {
    let mut ran = false;
    while run.load(Ordering::SeqCst) {
        flashing.store(true, Ordering::SeqCst);
        ran = true;
        write_quiet(gpio, pin, Level::Low);
        thread::sleep(period);
        write_quiet(gpio, pin, Level::High);
        thread::sleep(period);
        if !run.load(Ordering::SeqCst) {
            write_quiet(gpio, pin, Level::Low);
        }
    }
    flashing.store(false, Ordering::SeqCst);
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimulatedGpio;
    use crate::hardware::PinMode;
    use std::time::Instant;

    fn indicator() -> (Arc<SimulatedGpio>, LedIndicator) {
        let sim = Arc::new(SimulatedGpio::new());
        sim.configure(25, PinMode::Output).unwrap();
        let gpio: Arc<dyn Gpio> = sim.clone();
        (sim, LedIndicator::new(gpio, 25, "blue"))
    }

    #[test]
    fn test_set_on_off() {
        let (sim, led) = indicator();

        led.set(true);
        assert_eq!(sim.output(25), Some(Level::High));
        assert_eq!(led.state(), LedState::On);

        led.set(false);
        assert_eq!(sim.output(25), Some(Level::Low));
        assert_eq!(led.state(), LedState::Off);
    }

    #[test]
    fn test_dim_uses_pwm_and_set_leaves_it() {
        let (sim, led) = indicator();

        led.dim(40);
        assert_eq!(sim.duty(25), Some(40));
        assert_eq!(led.state(), LedState::Dimmed(40));

        led.dim(140);
        assert_eq!(sim.duty(25), Some(100));

        led.set(true);
        assert_eq!(sim.duty(25), None);
        assert_eq!(led.state(), LedState::On);
    }

    #[test]
    fn test_stop_flash_quiesces_after_toggles() {
        let (sim, led) = indicator();
        assert!(led.start_flash(Duration::from_millis(2)));

        // Let the flasher run a few full toggle iterations
        let deadline = Instant::now() + Duration::from_secs(5);
        while sim.writes_to(25).len() < 6 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(sim.writes_to(25).len() >= 6);

        led.stop_flash();
        assert!(!led.is_flashing());
        assert_eq!(led.state(), LedState::Off);

        let settled = sim.writes_to(25).len();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sim.writes_to(25).len(), settled);
        assert_eq!(sim.output(25), Some(Level::Low));
    }

    #[test]
    fn test_second_start_flash_is_ignored() {
        let (_sim, led) = indicator();
        assert!(led.start_flash(Duration::from_millis(5)));
        assert!(!led.start_flash(Duration::from_millis(5)));
        led.stop_flash();
        assert!(!led.is_flashing());
    }

    #[test]
    fn test_stop_flash_before_thread_runs() {
        let (sim, led) = indicator();
        led.set(true);
        led.start_flash(Duration::from_millis(50));
        led.stop_flash();

        assert!(!led.is_flashing());
        // Caller turns it solid afterwards and nothing overwrites it
        led.set(true);
        thread::sleep(Duration::from_millis(120));
        assert_eq!(sim.output(25), Some(Level::High));
    }

    #[test]
    fn test_stop_flash_without_flasher_is_noop() {
        let (_sim, led) = indicator();
        led.stop_flash();
        assert_eq!(led.state(), LedState::Off);
    }
}
