//! LED scanner
//!
//! Sweeps the five LEDs back and forth so the box looks alive while idle.
//! Scanning freezes while any button's action is in flight, and after an
//! interruption it stays dark until it reaches the LED of the button that
//! was pressed, so the sweep picks up visually where the selection left off.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::board::{Button, ButtonMap};
use crate::signal::ShutdownToken;

/// Palindromic sweep order
pub const SWEEP: [Button; 8] = [
    Button::White,
    Button::Blue,
    Button::Green,
    Button::Yellow,
    Button::Red,
    Button::Yellow,
    Button::Green,
    Button::Blue,
];

/// Position in the sweep plus the LED to resume from after an interruption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanCursor {
    position: usize,
    resume: Option<Button>,
}

impl ScanCursor {
    /// LED the sweep is about to flash
    pub fn current(&self) -> Button {
        SWEEP[self.position]
    }

    pub fn advance(&mut self) {
        self.position = (self.position + 1) % SWEEP.len();
    }

    pub fn resume_led(&self) -> Option<Button> {
        self.resume
    }
}

/// Outcome of one flash step, mostly for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashResult {
    /// The LED was lit for the dwell time
    Lit,
    /// Skipped while waiting for the resume LED
    Skipped,
    /// Scanning has been stopped
    Stopped,
}

pub struct ScannerSequencer {
    buttons: Arc<ButtonMap>,
    cursor: Mutex<ScanCursor>,
    scanning: AtomicBool,
    dwell: Duration,
    shutdown: ShutdownToken,
}

impl ScannerSequencer {
    pub fn new(buttons: Arc<ButtonMap>, dwell: Duration, shutdown: ShutdownToken) -> Self {
        Self {
            buttons,
            cursor: Mutex::new(ScanCursor::default()),
            scanning: AtomicBool::new(true),
            dwell,
            shutdown,
        }
    }

    /// Remember which LED to resume from once scanning continues
    pub fn set_resume_led(&self, button: Button) {
        self.cursor.lock().resume = Some(button);
    }

    pub fn cursor(&self) -> ScanCursor {
        *self.cursor.lock()
    }

    /// End the loop after the current flash
    pub fn stop_scanning(&self) {
        self.scanning.store(false, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst) && !self.shutdown.is_triggered()
    }

    /// Block until every button is idle. Returns false on shutdown.
    pub fn wait_for_buttons(&self) -> bool {
        self.buttons
            .iter()
            .all(|slot| slot.ready.wait(&self.shutdown))
    }

    /// Flash one LED.
    ///
    /// The LED is left lit when its button's action is still underway.
    pub fn flash(&self, button: Button) -> FlashResult {
        if !self.is_scanning() {
            return FlashResult::Stopped;
        }

        let slot = self.buttons.slot(button);
        let light = {
            let mut cursor = self.cursor.lock();
            match cursor.resume {
                None => true,
                Some(resume) if resume == button => {
                    cursor.resume = None;
                    true
                }
                Some(_) => false,
            }
        };

        if light {
            slot.led.set(true);
            thread::sleep(self.dwell);
        }
        if slot.ready.is_set() {
            slot.led.set(false);
        }

        if light {
            FlashResult::Lit
        } else {
            FlashResult::Skipped
        }
    }

    /// One step of the sweep: wait for idle buttons, flash, advance
    pub fn step(&self) -> FlashResult {
        if !self.wait_for_buttons() {
            return FlashResult::Stopped;
        }
        let button = self.cursor.lock().current();
        let result = self.flash(button);
        if result != FlashResult::Stopped {
            self.cursor.lock().advance();
        }
        result
    }

    /// Scanner activity body
    pub fn run(&self) {
        tracing::info!("LED scanner started");
        while self.is_scanning() {
            if self.step() == FlashResult::Stopped {
                break;
            }
        }
        tracing::info!("LED scanner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimulatedGpio;
    use crate::hardware::{Gpio, Level};

    fn scanner() -> (Arc<SimulatedGpio>, Arc<ButtonMap>, ScannerSequencer) {
        let sim = Arc::new(SimulatedGpio::new());
        let gpio: Arc<dyn Gpio> = sim.clone();
        let buttons = Arc::new(ButtonMap::new(gpio).unwrap());
        let scanner = ScannerSequencer::new(
            Arc::clone(&buttons),
            Duration::from_millis(1),
            ShutdownToken::new(),
        );
        (sim, buttons, scanner)
    }

    /// LEDs that went HIGH, in order
    fn lit_order(sim: &SimulatedGpio) -> Vec<u8> {
        sim.writes()
            .into_iter()
            .filter(|(_, level)| *level == Level::High)
            .map(|(pin, _)| pin)
            .collect()
    }

    #[test]
    fn test_sweep_is_palindromic() {
        let (sim, _buttons, scanner) = scanner();
        for _ in 0..SWEEP.len() {
            assert_eq!(scanner.step(), FlashResult::Lit);
        }

        let expected: Vec<u8> = SWEEP.iter().map(|b| b.led_pin()).collect();
        assert_eq!(lit_order(&sim), expected);
        // Wrapped around to the start
        assert_eq!(scanner.cursor().current(), Button::White);
    }

    #[test]
    fn test_flash_leaves_led_on_while_action_underway() {
        let (sim, buttons, scanner) = scanner();
        buttons.ready(Button::Green).clear();

        scanner.flash(Button::Green);
        assert_eq!(sim.output(Button::Green.led_pin()), Some(Level::High));

        buttons.ready(Button::Green).set();
        scanner.flash(Button::Green);
        assert_eq!(sim.output(Button::Green.led_pin()), Some(Level::Low));
    }

    #[test]
    fn test_resume_led_lights_once_then_canonical_order() {
        let (sim, _buttons, scanner) = scanner();
        // Interrupted by a yellow press while at the start of the sweep
        scanner.set_resume_led(Button::Yellow);

        let results: Vec<FlashResult> = (0..SWEEP.len() + 1).map(|_| scanner.step()).collect();

        assert_eq!(
            &results[..4],
            &[
                FlashResult::Skipped,
                FlashResult::Skipped,
                FlashResult::Skipped,
                FlashResult::Lit
            ]
        );
        assert!(results[4..].iter().all(|r| *r == FlashResult::Lit));
        assert_eq!(scanner.cursor().resume_led(), None);

        let lit = lit_order(&sim);
        assert_eq!(lit[0], Button::Yellow.led_pin());
        let rest: Vec<u8> = SWEEP[4..]
            .iter()
            .chain(SWEEP[..1].iter())
            .map(|b| b.led_pin())
            .collect();
        assert_eq!(&lit[1..], rest.as_slice());
    }

    #[test]
    fn test_scan_blocks_while_any_button_busy() {
        let (sim, buttons, scanner) = scanner();
        let scanner = Arc::new(scanner);
        buttons.ready(Button::Red).clear();

        let runner = Arc::clone(&scanner);
        let handle = thread::spawn(move || runner.run());

        thread::sleep(Duration::from_millis(50));
        assert!(lit_order(&sim).is_empty(), "scanner flashed while a button was busy");

        buttons.ready(Button::Red).set();
        thread::sleep(Duration::from_millis(50));
        scanner.stop_scanning();
        handle.join().unwrap();

        assert!(!lit_order(&sim).is_empty());
    }

    #[test]
    fn test_stop_scanning_ends_run() {
        let (_sim, _buttons, scanner) = scanner();
        scanner.stop_scanning();
        assert_eq!(scanner.flash(Button::White), FlashResult::Stopped);
        scanner.run();
        assert!(!scanner.is_scanning());
    }
}
