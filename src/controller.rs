//! The sound box: wires the board to the activities and runs the main loop
//!
//! ```text
//!  main loop ──► PlaybackSession ◄── CommandGate ◄── switch edges
//!      │               │                  │
//!      ▼               ▼                  ▼
//!  ButtonMap ◄──── LEDs/ready flags ──► ScannerSequencer
//!
//!  EncoderVolumeLoop ──► Mixer        (independent)
//! ```
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::board::{configure_encoder, Button, ButtonMap, ROTARY_PIN_A, ROTARY_PIN_B};
use crate::capture::{ButtonCapture, PressSource};
use crate::command_gate::{CommandGate, GateContext};
use crate::config::Timing;
use crate::error::HardwareError;
use crate::hardware::Gpio;
use crate::player::{PlaybackHandle, PlaybackSession, PlayerLauncher, Prompts};
use crate::scanner::ScannerSequencer;
use crate::signal::{ReadyFlag, ShutdownToken};
use crate::sounds::SoundList;
use crate::system::SystemControl;
use crate::volume::{EncoderVolumeLoop, Mixer};

/// Outside world the activities talk to
pub struct Collaborators {
    pub prompts: Prompts,
    pub mixer: Box<dyn Mixer>,
    pub system: Arc<dyn SystemControl>,
    /// Admin menu input; the buttons themselves when None
    pub capture: Option<Arc<dyn PressSource>>,
}

pub struct Soundbox {
    gpio: Arc<dyn Gpio>,
    buttons: Arc<ButtonMap>,
    session: Arc<PlaybackSession>,
    scanner: Arc<ScannerSequencer>,
    sounds: SoundList,
    /// Termination gate: cleared while the admin menu is open
    gate: ReadyFlag,
    timing: Timing,
    shutdown: ShutdownToken,
    shut_down: AtomicBool,
}

impl Soundbox {
    /// Claim the board's pins and build the shared state
    pub fn new(
        gpio: Arc<dyn Gpio>,
        sounds: SoundList,
        launcher: Arc<dyn PlayerLauncher>,
        timing: Timing,
        shutdown: ShutdownToken,
    ) -> Result<Self, HardwareError> {
        let buttons = Arc::new(ButtonMap::new(Arc::clone(&gpio))?);
        configure_encoder(gpio.as_ref())?;

        let session = Arc::new(PlaybackSession::new(
            Arc::clone(&buttons),
            launcher,
            timing.pause_flash_period,
        ));
        let scanner = Arc::new(ScannerSequencer::new(
            Arc::clone(&buttons),
            timing.scan_dwell,
            shutdown.clone(),
        ));

        Ok(Self {
            gpio,
            buttons,
            session,
            scanner,
            sounds,
            gate: ReadyFlag::new_set(),
            timing,
            shutdown,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn buttons(&self) -> &Arc<ButtonMap> {
        &self.buttons
    }

    pub fn session(&self) -> &Arc<PlaybackSession> {
        &self.session
    }

    pub fn scanner(&self) -> &Arc<ScannerSequencer> {
        &self.scanner
    }

    pub fn gate(&self) -> &ReadyFlag {
        &self.gate
    }

    pub fn sounds(&self) -> &SoundList {
        &self.sounds
    }

    /// First button currently held down (inputs read low when pressed)
    pub fn pressed_button(&self) -> Option<Button> {
        Button::ALL.into_iter().find(|button| {
            self.gpio
                .read(button.input_pin())
                .map(|level| level.is_low())
                .unwrap_or(false)
        })
    }

    /// Start the button's sound.
    ///
    /// Buttons without a sound and presses while the admin menu is open do
    /// nothing.
    pub fn process_button_press(&self, button: Button) -> Option<PlaybackHandle> {
        if !self.gate.is_set() {
            tracing::debug!("Ignoring {} button, admin menu open", button);
            return None;
        }
        let Some(location) = self.sounds.location(button) else {
            tracing::info!("No sound for the {} button", button);
            return None;
        };

        self.scanner.set_resume_led(button);
        match self.session.play(&location, button) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Cannot play {}: {}", location, e);
                None
            }
        }
    }

    /// One main loop pass. Returns the button handled, if any.
    pub fn step(&self) -> Option<Button> {
        let pressed = self.pressed_button();
        if let Some(button) = pressed {
            self.process_button_press(button);
            // A held button must not retrigger
            self.shutdown.sleep(self.timing.press_holdoff);
        }
        self.session.poll_finished();
        pressed
    }

    pub fn run_main_loop(&self) {
        tracing::info!("Watching buttons");
        while !self.shutdown.is_triggered() {
            self.step();
            self.shutdown.sleep(self.timing.main_poll);
        }
    }

    /// Run every activity until shutdown, then shut down
    pub fn run(&self, collaborators: Collaborators) -> Result<(), HardwareError> {
        let Collaborators {
            prompts,
            mixer,
            system,
            capture,
        } = collaborators;

        let capture = capture.unwrap_or_else(|| {
            Arc::new(ButtonCapture::new(
                Arc::clone(&self.gpio),
                Arc::clone(&self.buttons),
                &self.timing,
                self.shutdown.clone(),
            ))
        });
        let gate = CommandGate::new(GateContext {
            gpio: Arc::clone(&self.gpio),
            buttons: Arc::clone(&self.buttons),
            session: Arc::clone(&self.session),
            scanner: Arc::clone(&self.scanner),
            capture,
            system,
            prompts,
            gate: self.gate.clone(),
            timing: self.timing,
            shutdown: self.shutdown.clone(),
        })?;
        let encoder = EncoderVolumeLoop::new(
            Arc::clone(&self.gpio),
            mixer,
            ROTARY_PIN_A,
            ROTARY_PIN_B,
            self.timing.busy_poll,
            self.shutdown.clone(),
        );

        let mut activities = Vec::new();
        let scanner = Arc::clone(&self.scanner);
        activities.push(self.spawn("scanner", move || scanner.run()));
        activities.push(self.spawn("volume", move || encoder.run()));
        activities.push(self.spawn("command-switch", move || gate.run()));

        self.run_main_loop();

        self.release_waiters();
        for handle in activities.into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("activity").to_string();
            if handle.join().is_err() {
                tracing::error!("{} activity panicked", name);
            }
        }
        self.shutdown();
        Ok(())
    }

    fn spawn<F>(&self, name: &str, body: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(body) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to start {} activity: {}", name, e);
                self.shutdown.trigger();
                None
            }
        }
    }

    /// Stop playback and set every flag so no activity stays blocked
    fn release_waiters(&self) {
        self.shutdown.trigger();
        self.session.stop();
        self.buttons.release_all();
        self.gate.set();
    }

    /// Release everything and de-energize the pins. Runs once.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_waiters();
        self.buttons.turn_off_all_leds();
        self.gpio.reset();
        tracing::info!("Soundbox shut down");
    }
}
