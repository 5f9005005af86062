//! Collects a fixed number of button presses
//!
//! Used for single choices (n = 1) and passcodes (n = 3). Each press lights
//! its LED as it is registered. There is no timeout: on an unattended box a
//! capture waits until someone presses a button or the program shuts down.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::board::{Button, ButtonMap};
use crate::config::Timing;
use crate::error::CaptureError;
use crate::hardware::Gpio;
use crate::signal::ShutdownToken;

/// Runs once, on the first registered press
pub type FirstPressHook = Box<dyn FnOnce() + Send + 'static>;

/// Something that yields button presses
pub trait PressSource: Send + Sync {
    /// Block until `count` presses have been made, returned in press order
    fn capture_with(
        &self,
        count: usize,
        on_first_press: FirstPressHook,
    ) -> Result<Vec<Button>, CaptureError>;

    fn capture(&self, count: usize) -> Result<Vec<Button>, CaptureError> {
        self.capture_with(count, Box::new(|| {}))
    }
}

pub struct ButtonCapture {
    gpio: Arc<dyn Gpio>,
    buttons: Arc<ButtonMap>,
    debounce: Duration,
    settle: Duration,
    busy_poll: Duration,
    shutdown: ShutdownToken,
}

impl ButtonCapture {
    pub fn new(
        gpio: Arc<dyn Gpio>,
        buttons: Arc<ButtonMap>,
        timing: &Timing,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            gpio,
            buttons,
            debounce: timing.capture_debounce,
            settle: timing.capture_settle,
            busy_poll: timing.busy_poll,
            shutdown,
        }
    }

    fn unwatch_all(&self) {
        for slot in self.buttons.iter() {
            if let Err(e) = self.gpio.remove_edge_watch(slot.input_pin) {
                tracing::debug!("Removing {} button watch: {}", slot.button, e);
            }
        }
    }
}

impl PressSource for ButtonCapture {
    fn capture_with(
        &self,
        count: usize,
        on_first_press: FirstPressHook,
    ) -> Result<Vec<Button>, CaptureError> {
        let log: Arc<Mutex<Vec<Button>>> = Arc::new(Mutex::new(Vec::with_capacity(count)));
        let presses = Arc::new(AtomicUsize::new(0));
        let first = Arc::new(Mutex::new(Some(on_first_press)));

        for slot in self.buttons.iter() {
            let button = slot.button;
            let led = Arc::clone(&slot.led);
            let log = Arc::clone(&log);
            let presses = Arc::clone(&presses);
            let first = Arc::clone(&first);

            let registered = self.gpio.on_falling_edge(
                slot.input_pin,
                self.debounce,
                Box::new(move || {
                    if let Some(hook) = first.lock().take() {
                        hook();
                    }
                    led.set(true);
                    log.lock().push(button);
                    presses.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!("Captured {} button", button);
                }),
            );
            if let Err(e) = registered {
                self.unwatch_all();
                return Err(e.into());
            }
        }

        tracing::info!("Waiting for {} button press(es)", count);
        while presses.load(Ordering::SeqCst) < count {
            if self.shutdown.is_triggered() {
                self.unwatch_all();
                return Err(CaptureError::Cancelled);
            }
            thread::sleep(self.busy_poll);
        }

        // Let the last LED be seen before it goes dark
        self.shutdown.sleep(self.settle);
        self.unwatch_all();
        self.buttons.turn_off_all_leds();

        let mut pressed = log.lock().clone();
        pressed.truncate(count);
        Ok(pressed)
    }
}
