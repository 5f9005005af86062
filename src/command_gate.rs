//! Push-switch handling on the rotary encoder
//!
//! A press while a sound plays pauses it, a press while paused resumes it,
//! and holding the switch through the hold window while paused drops the
//! sound. Holding it for the long-press window while idle enters the admin
//! menu: one button press chooses between configuration restart (green),
//! power down (red) and a plain restart (anything else).
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

use crate::board::{Button, ButtonMap, ROTARY_SWITCH_PIN};
use crate::capture::PressSource;
use crate::config::Timing;
use crate::error::{CaptureError, HardwareError};
use crate::hardware::Gpio;
use crate::led::{DimCycle, DimTiming};
use crate::player::{PlaybackSession, PlaybackState, Prompts};
use crate::scanner::ScannerSequencer;
use crate::signal::{ReadyFlag, ShutdownToken};
use crate::system::{SystemAction, SystemControl};

/// Spoken menu played when the admin menu opens
pub const ADMIN_PROMPT: &str = "shutdown-admin-resume.wav";

/// Breathing cycles before the admin menu times out
pub const ADMIN_DIM_CYCLES: u32 = 1000;

/// How often the edge wait re-checks for shutdown
const EDGE_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Admin menu choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    ConfigRestart,
    PowerDown,
    Restart,
}

impl AdminAction {
    pub fn from_button(button: Button) -> Self {
        match button {
            Button::Green => AdminAction::ConfigRestart,
            Button::Red => AdminAction::PowerDown,
            _ => AdminAction::Restart,
        }
    }

    pub fn system_action(self) -> SystemAction {
        match self {
            AdminAction::ConfigRestart => SystemAction::ConfigRestart,
            AdminAction::PowerDown => SystemAction::PowerDown,
            AdminAction::Restart => SystemAction::PlainRestart,
        }
    }

    /// The choice's LED is shown before acting on it
    fn confirm_led(self) -> Option<Button> {
        match self {
            AdminAction::ConfigRestart => Some(Button::Green),
            AdminAction::PowerDown => Some(Button::Red),
            AdminAction::Restart => None,
        }
    }
}

/// What one switch press did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    Toggled,
    Stopped,
    /// Released before the long-press window closed
    Ignored,
    Admin(AdminAction),
    Cancelled,
}

/// Everything the gate acts on
pub struct GateContext {
    pub gpio: Arc<dyn Gpio>,
    pub buttons: Arc<ButtonMap>,
    pub session: Arc<PlaybackSession>,
    pub scanner: Arc<ScannerSequencer>,
    pub capture: Arc<dyn PressSource>,
    pub system: Arc<dyn SystemControl>,
    pub prompts: Prompts,
    /// Cleared while the admin menu is open, which stops new playback
    pub gate: ReadyFlag,
    pub timing: Timing,
    pub shutdown: ShutdownToken,
}

pub struct CommandGate {
    ctx: GateContext,
    edges: Receiver<()>,
}

impl CommandGate {
    /// Watch the switch for falling edges
    pub fn new(ctx: GateContext) -> Result<Self, HardwareError> {
        let (tx, edges) = unbounded();
        ctx.gpio.on_falling_edge(
            ROTARY_SWITCH_PIN,
            Duration::ZERO,
            Box::new(move || {
                // Receiver gone means the gate has stopped
                let _ = tx.send(());
            }),
        )?;
        Ok(Self { ctx, edges })
    }

    fn switch_held(&self) -> bool {
        match self.ctx.gpio.read(ROTARY_SWITCH_PIN) {
            Ok(level) => level.is_low(),
            Err(e) => {
                tracing::warn!("Cannot read push switch: {}", e);
                false
            }
        }
    }

    /// Block until the next press. Edges that arrived while the previous
    /// press was handled are bounce and are dropped. False on shutdown.
    pub fn wait_for_edge(&self) -> bool {
        while self.edges.try_recv().is_ok() {}
        loop {
            if self.ctx.shutdown.is_triggered() {
                return false;
            }
            match self.edges.recv_timeout(EDGE_WAIT_SLICE) {
                Ok(()) => return true,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// React to one press according to the playback state
    pub fn handle_press(&self) -> PressOutcome {
        let session = &self.ctx.session;
        match session.state() {
            PlaybackState::Playing => {
                session.toggle_playback();
                PressOutcome::Toggled
            }
            PlaybackState::Paused => {
                if !self.ctx.shutdown.sleep(self.ctx.timing.hold_to_stop) {
                    return PressOutcome::Cancelled;
                }
                if self.switch_held() {
                    session.stop();
                    PressOutcome::Stopped
                } else {
                    session.toggle_playback();
                    PressOutcome::Toggled
                }
            }
            PlaybackState::Idle => {
                if !self.ctx.shutdown.sleep(self.ctx.timing.long_press) {
                    return PressOutcome::Cancelled;
                }
                if self.switch_held() {
                    self.admin_menu()
                } else {
                    PressOutcome::Ignored
                }
            }
        }
    }

    /// Long press while idle. The program ends one way or another.
    fn admin_menu(&self) -> PressOutcome {
        let ctx = &self.ctx;
        tracing::info!("Admin menu opened");

        ctx.gate.clear();
        ctx.buttons.turn_off_all_leds();
        ctx.scanner.stop_scanning();
        ctx.buttons.turn_off_all_leds();

        ctx.prompts.play(ADMIN_PROMPT, false);

        let countdown = match DimCycle::new(
            Arc::clone(&ctx.gpio),
            &[Button::Green, Button::Red],
            ADMIN_DIM_CYCLES,
            DimTiming::from(&ctx.timing),
        ) {
            Ok(cycle) => Some(Arc::new(cycle)),
            Err(e) => {
                tracing::warn!("Admin countdown unavailable: {}", e);
                None
            }
        };
        let runner = countdown.as_ref().and_then(|cycle| {
            let cycle = Arc::clone(cycle);
            let shutdown = ctx.shutdown.clone();
            thread::Builder::new()
                .name("admin-countdown".to_string())
                .spawn(move || cycle.run(&shutdown))
                .map_err(|e| tracing::warn!("Failed to start admin countdown: {}", e))
                .ok()
        });

        let choice = ctx.capture.capture(1);

        // The countdown owns the PWM channels until here; the confirm LED is
        // driven as a plain output once they are gone
        if let Some(cycle) = &countdown {
            cycle.go_dark();
            cycle.close();
        }
        if let Some(handle) = runner {
            let _ = handle.join();
        }
        ctx.buttons.turn_off_all_leds();

        let outcome = match choice {
            Ok(pressed) => match pressed.first() {
                Some(&button) => {
                    let action = AdminAction::from_button(button);
                    tracing::info!("Admin choice: {} button, {:?}", button, action);
                    if let Some(led) = action.confirm_led() {
                        ctx.buttons.led(led).set(true);
                        ctx.shutdown.sleep(ctx.timing.confirm_hold);
                    }
                    PressOutcome::Admin(action)
                }
                None => PressOutcome::Cancelled,
            },
            Err(CaptureError::Cancelled) => PressOutcome::Cancelled,
            Err(e) => {
                tracing::error!("Admin choice failed: {}", e);
                PressOutcome::Cancelled
            }
        };

        if let PressOutcome::Admin(action) = outcome {
            ctx.session.stop();
            if let Err(e) = ctx.system.execute(action.system_action()) {
                tracing::error!("Admin action {:?} failed: {}", action, e);
            }
        }
        ctx.shutdown.trigger();
        outcome
    }

    /// Switch activity body
    pub fn run(&self) {
        tracing::info!("Command switch ready");
        while self.wait_for_edge() {
            tracing::debug!("Command switch pressed");
            let outcome = self.handle_press();
            tracing::debug!("Command switch press: {:?}", outcome);
            self.ctx.shutdown.sleep(self.ctx.timing.switch_settle);
        }
        if let Err(e) = self.ctx.gpio.remove_edge_watch(ROTARY_SWITCH_PIN) {
            tracing::debug!("Removing switch watch: {}", e);
        }
        tracing::info!("Command switch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::configure_encoder;
    use crate::capture::{ButtonCapture, FirstPressHook};
    use crate::hardware::sim::SimulatedGpio;
    use crate::hardware::Level;
    use crate::player::fake::FakeLauncher;
    use crate::system::RecordingSystem;

    /// Capture stub that answers with a fixed button
    struct Answer(Button);

    impl PressSource for Answer {
        fn capture_with(
            &self,
            count: usize,
            on_first_press: FirstPressHook,
        ) -> Result<Vec<Button>, CaptureError> {
            on_first_press();
            Ok(vec![self.0; count])
        }
    }

    struct Rig {
        sim: Arc<SimulatedGpio>,
        session: Arc<PlaybackSession>,
        system: Arc<RecordingSystem>,
        prompts: Arc<FakeLauncher>,
        gate_flag: ReadyFlag,
        shutdown: ShutdownToken,
        gate: CommandGate,
    }

    fn rig(answer: Button) -> Rig {
        rig_with(move |_, _, _, _| Arc::new(Answer(answer)) as Arc<dyn PressSource>)
    }

    /// Rig whose admin capture is built by `make_capture`
    fn rig_with<F>(make_capture: F) -> Rig
    where
        F: FnOnce(Arc<SimulatedGpio>, Arc<ButtonMap>, &Timing, ShutdownToken) -> Arc<dyn PressSource>,
    {
        let sim = Arc::new(SimulatedGpio::new());
        configure_encoder(sim.as_ref()).unwrap();
        let buttons = Arc::new(ButtonMap::new(sim.clone()).unwrap());
        let shutdown = ShutdownToken::new();
        let timing = Timing {
            long_press: Duration::from_millis(5),
            hold_to_stop: Duration::from_millis(5),
            switch_settle: Duration::from_millis(1),
            confirm_hold: Duration::from_millis(1),
            dim_step: Duration::from_millis(1),
            capture_debounce: Duration::ZERO,
            capture_settle: Duration::from_millis(1),
            busy_poll: Duration::from_micros(200),
            ..Timing::default()
        };
        let capture = make_capture(sim.clone(), Arc::clone(&buttons), &timing, shutdown.clone());
        let session = Arc::new(PlaybackSession::new(
            Arc::clone(&buttons),
            Arc::new(FakeLauncher::default()),
            Duration::from_millis(2),
        ));
        let scanner = Arc::new(ScannerSequencer::new(
            Arc::clone(&buttons),
            Duration::from_millis(1),
            shutdown.clone(),
        ));
        let system = Arc::new(RecordingSystem::default());
        let prompts = Arc::new(FakeLauncher::default());
        let gate_flag = ReadyFlag::new_set();

        let gate = CommandGate::new(GateContext {
            gpio: sim.clone(),
            buttons,
            session: Arc::clone(&session),
            scanner,
            capture,
            system: system.clone(),
            prompts: Prompts::new(prompts.clone(), "/prompts"),
            gate: gate_flag.clone(),
            timing,
            shutdown: shutdown.clone(),
        })
        .unwrap();

        Rig {
            sim,
            session,
            system,
            prompts,
            gate_flag,
            shutdown,
            gate,
        }
    }

    #[test]
    fn test_admin_action_mapping() {
        assert_eq!(AdminAction::from_button(Button::Green), AdminAction::ConfigRestart);
        assert_eq!(AdminAction::from_button(Button::Red), AdminAction::PowerDown);
        assert_eq!(AdminAction::from_button(Button::Yellow), AdminAction::Restart);
        assert_eq!(
            AdminAction::Restart.system_action(),
            SystemAction::PlainRestart
        );
    }

    #[test]
    fn test_long_press_green_selects_config_restart() {
        let rig = rig(Button::Green);
        rig.sim.press(ROTARY_SWITCH_PIN);
        assert!(rig.gate.wait_for_edge());

        let outcome = rig.gate.handle_press();

        assert_eq!(outcome, PressOutcome::Admin(AdminAction::ConfigRestart));
        assert_eq!(*rig.system.actions.lock(), vec![SystemAction::ConfigRestart]);
        assert!(!rig.gate_flag.is_set());
        assert!(rig.shutdown.is_triggered());
        assert_eq!(
            rig.prompts.launched.lock().as_slice(),
            ["/prompts/shutdown-admin-resume.wav"]
        );
    }

    #[test]
    fn test_long_press_red_powers_down_and_other_button_restarts() {
        for (answer, action, expected) in [
            (Button::Red, AdminAction::PowerDown, SystemAction::PowerDown),
            (Button::Yellow, AdminAction::Restart, SystemAction::PlainRestart),
            (Button::White, AdminAction::Restart, SystemAction::PlainRestart),
        ] {
            let rig = rig(answer);
            rig.sim.press(ROTARY_SWITCH_PIN);
            assert!(rig.gate.wait_for_edge());

            assert_eq!(rig.gate.handle_press(), PressOutcome::Admin(action));
            assert_eq!(*rig.system.actions.lock(), vec![expected]);
            assert!(rig.shutdown.is_triggered());
        }
    }

    #[test]
    fn test_admin_choice_lights_confirm_led_after_button_capture() {
        let rig = Arc::new(rig_with(|sim, buttons, timing, shutdown| {
            Arc::new(ButtonCapture::new(sim, buttons, timing, shutdown)) as Arc<dyn PressSource>
        }));
        rig.sim.press(ROTARY_SWITCH_PIN);
        assert!(rig.gate.wait_for_edge());

        let worker = Arc::clone(&rig);
        let handle = thread::spawn(move || worker.gate.handle_press());

        let green = Button::Green.input_pin();
        while !rig.sim.has_edge_watch(green) {
            thread::sleep(Duration::from_millis(1));
        }
        rig.sim.tap(green);

        assert_eq!(
            handle.join().unwrap(),
            PressOutcome::Admin(AdminAction::ConfigRestart)
        );
        // The capture's own LED write dropped the countdown's PWM channel on
        // this pin; the confirm LED still ends up lit
        let led = Button::Green.led_pin();
        assert_eq!(rig.sim.output(led), Some(Level::High));
        assert_eq!(rig.sim.writes_to(led).last(), Some(&Level::High));
        assert_eq!(rig.sim.duty(led), None);
        assert_eq!(rig.sim.output(Button::Red.led_pin()), Some(Level::Low));
    }

    #[test]
    fn test_short_tap_while_idle_is_ignored() {
        let rig = rig(Button::Red);
        rig.sim.tap(ROTARY_SWITCH_PIN);
        assert!(rig.gate.wait_for_edge());

        assert_eq!(rig.gate.handle_press(), PressOutcome::Ignored);
        assert!(rig.system.actions.lock().is_empty());
        assert!(rig.gate_flag.is_set());
        assert!(!rig.shutdown.is_triggered());
    }

    #[test]
    fn test_press_while_playing_toggles() {
        let rig = rig(Button::Red);
        rig.session.play("a.mp3", Button::Blue).unwrap();

        assert_eq!(rig.gate.handle_press(), PressOutcome::Toggled);
        assert_eq!(rig.session.state(), PlaybackState::Paused);

        // Released before the hold window: resume
        assert_eq!(rig.gate.handle_press(), PressOutcome::Toggled);
        assert_eq!(rig.session.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_hold_while_paused_stops() {
        let rig = rig(Button::Red);
        rig.session.play("a.mp3", Button::Yellow).unwrap();
        rig.session.pause();

        rig.sim.press(ROTARY_SWITCH_PIN);
        assert_eq!(rig.gate.handle_press(), PressOutcome::Stopped);
        assert_eq!(rig.session.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_bounce_edges_are_drained() {
        let rig = rig(Button::Red);
        for _ in 0..3 {
            rig.sim.tap(ROTARY_SWITCH_PIN);
        }
        // Queued bounces are dropped, nothing new arrives
        rig.shutdown.trigger();
        assert!(!rig.gate.wait_for_edge());
    }

    #[test]
    fn test_run_exits_on_shutdown() {
        let rig = Arc::new(rig(Button::Red));
        let runner = Arc::clone(&rig);
        let handle = thread::spawn(move || runner.gate.run());

        thread::sleep(Duration::from_millis(20));
        rig.shutdown.trigger();
        handle.join().unwrap();
        assert!(!rig.sim.has_edge_watch(ROTARY_SWITCH_PIN));
    }
}
