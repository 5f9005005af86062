//! Sound playback through an external player process
//!
//! One sound plays at a time. The player is a long-lived subprocess driven
//! through single-byte commands on its stdin; the session owns it and
//! serializes every start, pause, resume and stop behind one lock.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::board::{Button, ButtonMap};
use crate::config::PlayerSettings;
use crate::error::PlayerError;

/// Output device handed to omxplayer
pub const AUDIO_OUTPUT: &str = "alsa:default";

/// How long the player gets to exit after `q` before it is killed
const QUIT_GRACE: Duration = Duration::from_millis(500);

/// Single-byte player control protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Pause,
    Resume,
    Quit,
}

impl PlayerCommand {
    pub fn as_byte(self) -> u8 {
        match self {
            PlayerCommand::Pause => b'p',
            PlayerCommand::Resume => b' ',
            PlayerCommand::Quit => b'q',
        }
    }
}

/// A running player
pub trait PlayerProcess: Send {
    fn send(&mut self, command: PlayerCommand) -> Result<(), PlayerError>;

    /// Non-blocking: true once the process has exited
    fn try_wait(&mut self) -> Result<bool, PlayerError>;

    /// Block until the process exits
    fn wait(&mut self) -> Result<(), PlayerError>;

    /// Make sure the process is gone
    fn terminate(&mut self);
}

/// Starts players
pub trait PlayerLauncher: Send + Sync {
    fn launch(&self, location: &str) -> Result<Box<dyn PlayerProcess>, PlayerError>;
}

/// Launches `omxplayer`
#[derive(Debug, Clone)]
pub struct OmxLauncher {
    settings: Option<PlayerSettings>,
}

impl OmxLauncher {
    /// Player for sounds, with the configured volume and amplification
    pub fn new(settings: PlayerSettings) -> Self {
        Self {
            settings: Some(settings),
        }
    }

    /// Player for spoken prompts, at the player's default level
    pub fn for_prompts() -> Self {
        Self { settings: None }
    }

    pub fn args(&self, location: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(settings) = &self.settings {
            args.extend([
                "--vol".to_string(),
                settings.vol.clone(),
                "--amp".to_string(),
                settings.amp.clone(),
            ]);
        }
        args.extend(["-o".to_string(), AUDIO_OUTPUT.to_string(), location.to_string()]);
        args
    }
}

impl PlayerLauncher for OmxLauncher {
    fn launch(&self, location: &str) -> Result<Box<dyn PlayerProcess>, PlayerError> {
        let mut child = Command::new("omxplayer")
            .args(self.args(location))
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| PlayerError::Spawn {
                location: location.to_string(),
                source,
            })?;
        let stdin = child.stdin.take();

        tracing::debug!("omxplayer started (pid {}) for {}", child.id(), location);
        Ok(Box::new(OmxProcess { child, stdin }))
    }
}

struct OmxProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl PlayerProcess for OmxProcess {
    fn send(&mut self, command: PlayerCommand) -> Result<(), PlayerError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            PlayerError::ControlPipe(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "player stdin closed",
            ))
        })?;
        stdin
            .write_all(&[command.as_byte()])
            .and_then(|_| stdin.flush())
            .map_err(PlayerError::ControlPipe)
    }

    fn try_wait(&mut self) -> Result<bool, PlayerError> {
        self.child
            .try_wait()
            .map(|status| status.is_some())
            .map_err(PlayerError::Wait)
    }

    fn wait(&mut self) -> Result<(), PlayerError> {
        self.child.wait().map(|_| ()).map_err(PlayerError::Wait)
    }

    fn terminate(&mut self) {
        self.stdin = None;
        let deadline = Instant::now() + QUIT_GRACE;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(_) => break,
            }
        }
        if let Err(e) = self.child.kill() {
            tracing::debug!("Player already gone: {}", e);
        }
        let _ = self.child.wait();
    }
}

/// Spoken prompts from one directory
#[derive(Clone)]
pub struct Prompts {
    launcher: Arc<dyn PlayerLauncher>,
    dir: PathBuf,
}

impl Prompts {
    pub fn new(launcher: Arc<dyn PlayerLauncher>, dir: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start a prompt, optionally waiting for it to finish. Failures are logged.
    pub fn play(&self, name: &str, wait: bool) {
        let location = self.dir.join(name);
        let location = location.to_string_lossy();
        match self.launcher.launch(&location) {
            Ok(mut process) => {
                if wait {
                    if let Err(e) = process.wait() {
                        tracing::warn!("Prompt {} did not finish cleanly: {}", name, e);
                    }
                }
            }
            Err(e) => tracing::warn!("Cannot play prompt {}: {}", name, e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Identifies one `play()` call for liveness polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackHandle {
    pub button: Button,
    generation: u64,
}

struct Current {
    button: Button,
    generation: u64,
    paused: bool,
    process: Box<dyn PlayerProcess>,
}

#[derive(Default)]
struct SessionState {
    current: Option<Current>,
    generation: u64,
}

pub struct PlaybackSession {
    buttons: Arc<ButtonMap>,
    launcher: Arc<dyn PlayerLauncher>,
    flash_period: Duration,
    state: Mutex<SessionState>,
}

impl PlaybackSession {
    pub fn new(
        buttons: Arc<ButtonMap>,
        launcher: Arc<dyn PlayerLauncher>,
        flash_period: Duration,
    ) -> Self {
        Self {
            buttons,
            launcher,
            flash_period,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.state.lock().current {
            None => PlaybackState::Idle,
            Some(current) if current.paused => PlaybackState::Paused,
            Some(_) => PlaybackState::Playing,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// True while `handle`'s sound is still the current one
    pub fn is_live(&self, handle: &PlaybackHandle) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|c| c.generation == handle.generation)
            .unwrap_or(false)
    }

    /// Play `location` for `button`, stopping whatever was playing.
    ///
    /// An empty location (padding in the sound list) does nothing.
    pub fn play(
        &self,
        location: &str,
        button: Button,
    ) -> Result<Option<PlaybackHandle>, PlayerError> {
        if location.is_empty() {
            tracing::debug!("No sound assigned to the {} button", button);
            return Ok(None);
        }

        let mut state = self.state.lock();
        if let Some(previous) = state.current.take() {
            tracing::info!("Stopping {} sound for new request", previous.button);
            self.finish(previous);
        }

        let slot = self.buttons.slot(button);
        slot.ready.clear();
        slot.led.set(true);

        let process = match self.launcher.launch(location) {
            Ok(process) => process,
            Err(e) => {
                slot.led.set(false);
                slot.ready.set();
                return Err(e);
            }
        };

        state.generation += 1;
        let generation = state.generation;
        state.current = Some(Current {
            button,
            generation,
            paused: false,
            process,
        });

        tracing::info!("Playing {} for the {} button", location, button);
        Ok(Some(PlaybackHandle { button, generation }))
    }

    /// Pause if playing, resume if paused, nothing if idle
    pub fn toggle_playback(&self) {
        let mut state = self.state.lock();
        match state.current.as_mut() {
            Some(current) if current.paused => self.resume_current(current),
            Some(current) => self.pause_current(current),
            None => {}
        }
    }

    /// Pause and start blinking the LED. No-op unless playing.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if let Some(current) = state.current.as_mut() {
            if !current.paused {
                self.pause_current(current);
            }
        }
    }

    /// Resume and leave the LED solid. No-op unless paused.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(current) = state.current.as_mut() {
            if current.paused {
                self.resume_current(current);
            }
        }
    }

    fn pause_current(&self, current: &mut Current) {
        if let Err(e) = current.process.send(PlayerCommand::Pause) {
            tracing::warn!("Pause request lost: {}", e);
        }
        current.paused = true;
        self.buttons
            .led(current.button)
            .start_flash(self.flash_period);
        tracing::info!("Paused {} sound", current.button);
    }

    fn resume_current(&self, current: &mut Current) {
        if let Err(e) = current.process.send(PlayerCommand::Resume) {
            tracing::warn!("Resume request lost: {}", e);
        }
        current.paused = false;
        let led = self.buttons.led(current.button);
        led.stop_flash();
        led.set(true);
        tracing::info!("Resumed {} sound", current.button);
    }

    /// Stop the current sound and release its button
    pub fn stop(&self) {
        let previous = self.state.lock().current.take();
        if let Some(previous) = previous {
            tracing::info!("Stopping {} sound", previous.button);
            self.finish(previous);
        }
    }

    fn finish(&self, mut current: Current) {
        let slot = self.buttons.slot(current.button);
        if current.paused {
            slot.led.stop_flash();
        }
        if let Err(e) = current.process.send(PlayerCommand::Quit) {
            tracing::warn!("Quit request lost, terminating player: {}", e);
        }
        current.process.terminate();
        slot.led.set(false);
        slot.ready.set();
    }

    /// Non-blocking check for a sound that ended by itself.
    ///
    /// On completion the LED goes off and every button is released.
    pub fn poll_finished(&self) -> bool {
        let mut state = self.state.lock();
        let finished = match state.current.as_mut() {
            Some(current) => match current.process.try_wait() {
                Ok(exited) => exited,
                Err(e) => {
                    tracing::warn!("Cannot poll player: {}", e);
                    false
                }
            },
            None => return false,
        };
        if !finished {
            return false;
        }

        if let Some(current) = state.current.take() {
            let led = self.buttons.led(current.button);
            led.stop_flash();
            led.set(false);
            tracing::info!("{} sound finished", current.button);
        }
        self.buttons.release_all();
        true
    }
}
