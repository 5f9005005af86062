// Integration tests for the sound box
// These drive the public API against simulated pins, a fake player and stub OS actions

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use soundbox::board::{Button, ROTARY_PIN_A, ROTARY_PIN_B, ROTARY_SWITCH_PIN};
use soundbox::capture::{FirstPressHook, PressSource};
use soundbox::config::{SoundboxConfig, Timing};
use soundbox::controller::{Collaborators, Soundbox};
use soundbox::error::{CaptureError, PlayerError, SystemError};
use soundbox::hardware::sim::SimulatedGpio;
use soundbox::hardware::Level;
use soundbox::player::{
    PlaybackState, PlayerCommand, PlayerLauncher, PlayerProcess, Prompts,
};
use soundbox::signal::ShutdownToken;
use soundbox::sounds::{get_sound_file_list, SoundList};
use soundbox::system::{SystemAction, SystemControl};
use soundbox::volume::{EncoderVolumeLoop, MemoryMixer};

/// Player double counting live processes
#[derive(Default)]
struct CountingLauncher {
    live: Arc<AtomicUsize>,
    launched: Mutex<Vec<String>>,
}

struct CountingProcess {
    live: Arc<AtomicUsize>,
    alive: bool,
}

impl PlayerProcess for CountingProcess {
    fn send(&mut self, _command: PlayerCommand) -> Result<(), PlayerError> {
        Ok(())
    }

    fn try_wait(&mut self) -> Result<bool, PlayerError> {
        Ok(!self.alive)
    }

    fn wait(&mut self) -> Result<(), PlayerError> {
        self.terminate();
        Ok(())
    }

    fn terminate(&mut self) {
        if self.alive {
            self.alive = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl PlayerLauncher for CountingLauncher {
    fn launch(&self, location: &str) -> Result<Box<dyn PlayerProcess>, PlayerError> {
        self.launched.lock().push(location.to_string());
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingProcess {
            live: Arc::clone(&self.live),
            alive: true,
        }))
    }
}

/// Admin capture answering with one fixed button
struct AlwaysPress(Button);

impl PressSource for AlwaysPress {
    fn capture_with(
        &self,
        count: usize,
        on_first_press: FirstPressHook,
    ) -> Result<Vec<Button>, CaptureError> {
        on_first_press();
        Ok(vec![self.0; count])
    }
}

#[derive(Default)]
struct RecordedActions(Mutex<Vec<SystemAction>>);

impl SystemControl for RecordedActions {
    fn execute(&self, action: SystemAction) -> Result<(), SystemError> {
        self.0.lock().push(action);
        Ok(())
    }
}

fn fast_timing() -> Timing {
    Timing {
        scan_dwell: Duration::from_millis(2),
        pause_flash_period: Duration::from_millis(2),
        long_press: Duration::from_millis(20),
        hold_to_stop: Duration::from_millis(10),
        switch_settle: Duration::from_millis(1),
        capture_settle: Duration::from_millis(1),
        press_holdoff: Duration::from_millis(1),
        main_poll: Duration::from_millis(1),
        dim_step: Duration::from_millis(1),
        confirm_hold: Duration::from_millis(1),
        ..Timing::default()
    }
}

/// Base dir with a `red` collection of two files, and an ini selecting it
fn red_collection() -> (TempDir, SoundboxConfig) {
    let base = TempDir::new().unwrap();
    let red = base.path().join("red");
    fs::create_dir(&red).unwrap();
    fs::write(red.join("01-bells.mp3"), b"x").unwrap();
    fs::write(red.join("02-horn.mp3"), b"x").unwrap();

    let ini = base.path().join("soundbox.ini");
    fs::write(
        &ini,
        format!(
            "[file_locations]\nsound_file_base_dir = {}/\nselected_sound_dir = red\n\n\
             [omxplayer_configuration]\nvol_setting = -600\namp_setting = 2500\n",
            base.path().display()
        ),
    )
    .unwrap();

    let config = SoundboxConfig::load(&ini).unwrap();
    (base, config)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn test_short_collection_pads_and_extra_buttons_are_silent() {
    let (_base, config) = red_collection();

    let list = get_sound_file_list(&config.sound_dir()).unwrap();
    assert_eq!(list.len(), 5);
    assert_eq!(&list[..2], ["01-bells.mp3", "02-horn.mp3"]);
    assert!(list[2..].iter().all(String::is_empty));

    let sim = Arc::new(SimulatedGpio::new());
    let launcher = Arc::new(CountingLauncher::default());
    let soundbox = Soundbox::new(
        sim.clone(),
        SoundList::load(&config.sound_dir()).unwrap(),
        launcher.clone(),
        fast_timing(),
        ShutdownToken::new(),
    )
    .unwrap();

    for button in [Button::Green, Button::Yellow, Button::Red] {
        sim.press(button.input_pin());
        assert_eq!(soundbox.step(), Some(button));
        sim.release(button.input_pin());
        assert_eq!(sim.output(button.led_pin()), Some(Level::Low));
    }
    assert!(launcher.launched.lock().is_empty());
    assert_eq!(soundbox.session().state(), PlaybackState::Idle);

    // The first two buttons still play
    sim.press(Button::Blue.input_pin());
    soundbox.step();
    sim.release(Button::Blue.input_pin());
    assert_eq!(launcher.live.load(Ordering::SeqCst), 1);
    assert!(launcher.launched.lock()[0].ends_with("02-horn.mp3"));
}

/// Hold the command switch while idle, answer the admin menu with `choice`
/// and return the OS actions taken plus how often the pins were reset
fn long_press_then(choice: Button) -> (Vec<SystemAction>, usize) {
    let (_base, config) = red_collection();
    let sim = Arc::new(SimulatedGpio::new());
    let shutdown = ShutdownToken::new();
    let soundbox = Soundbox::new(
        sim.clone(),
        SoundList::load(&config.sound_dir()).unwrap(),
        Arc::new(CountingLauncher::default()),
        fast_timing(),
        shutdown.clone(),
    )
    .unwrap();

    let actions = Arc::new(RecordedActions::default());
    let collaborators = Collaborators {
        prompts: Prompts::new(Arc::new(CountingLauncher::default()), config.prompts_dir()),
        mixer: Box::new(MemoryMixer::new(50)),
        system: actions.clone(),
        capture: Some(Arc::new(AlwaysPress(choice))),
    };

    let runner = thread::spawn(move || soundbox.run(collaborators));

    // Let the command switch register its watch, then hold it down
    assert!(wait_until(Duration::from_secs(5), || sim.has_edge_watch(ROTARY_SWITCH_PIN)));
    sim.press(ROTARY_SWITCH_PIN);

    assert!(wait_until(Duration::from_secs(5), || shutdown.is_triggered()));
    runner.join().unwrap().unwrap();

    let taken = actions.0.lock().clone();
    (taken, sim.reset_count())
}

#[test]
fn test_long_press_then_green_restarts_in_config_mode() {
    assert_eq!(
        long_press_then(Button::Green),
        (vec![SystemAction::ConfigRestart], 1)
    );
}

#[test]
fn test_long_press_then_red_powers_down() {
    assert_eq!(
        long_press_then(Button::Red),
        (vec![SystemAction::PowerDown], 1)
    );
}

#[test]
fn test_long_press_then_other_button_restarts_plainly() {
    assert_eq!(
        long_press_then(Button::Blue),
        (vec![SystemAction::PlainRestart], 1)
    );
}

#[test]
fn test_toggle_twice_before_flasher_starts_ends_playing() {
    let (_base, config) = red_collection();
    let sim = Arc::new(SimulatedGpio::new());
    let soundbox = Soundbox::new(
        sim.clone(),
        SoundList::load(&config.sound_dir()).unwrap(),
        Arc::new(CountingLauncher::default()),
        fast_timing(),
        ShutdownToken::new(),
    )
    .unwrap();

    soundbox.process_button_press(Button::White).unwrap();
    let session = soundbox.session();
    session.toggle_playback();
    session.toggle_playback();

    assert_eq!(session.state(), PlaybackState::Playing);
    let led = soundbox.buttons().led(Button::White);
    assert!(!led.is_flashing());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(sim.output(Button::White.led_pin()), Some(Level::High));
}

#[test]
fn test_encoder_ticks_move_volume_in_steps_of_five() {
    let sim = Arc::new(SimulatedGpio::new());
    soundbox::board::configure_encoder(sim.as_ref()).unwrap();
    let mixer = MemoryMixer::new(70);
    let mut encoder = EncoderVolumeLoop::new(
        sim.clone(),
        Box::new(mixer.clone()),
        ROTARY_PIN_A,
        ROTARY_PIN_B,
        Duration::ZERO,
        ShutdownToken::new(),
    );

    for _ in 0..3 {
        sim.script_reads(ROTARY_PIN_B, [Level::Low, Level::High]);
        sim.script_reads(ROTARY_PIN_A, [Level::Low]);
        encoder.step().unwrap();
    }
    assert_eq!(mixer.level(), 85);

    for _ in 0..30 {
        sim.script_reads(ROTARY_PIN_B, [Level::High, Level::Low]);
        sim.script_reads(ROTARY_PIN_A, [Level::Low]);
        encoder.step().unwrap();
    }
    assert_eq!(mixer.level(), 0);
}
