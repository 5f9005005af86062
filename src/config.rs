use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Where the init script expects the ini file
pub const DEFAULT_INI_PATH: &str = "/home/pi/soundbox/soundbox.ini";

/// Environment variable overriding [`DEFAULT_INI_PATH`]
pub const INI_PATH_ENV: &str = "SOUNDBOX_INI";

/// `[file_locations]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocations {
    /// Parent of the five sound collection directories
    pub sound_file_base_dir: String,

    /// Collection in use, named after the button chosen in soundbox-config
    pub selected_sound_dir: String,
}

/// `[omxplayer_configuration]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfiguration {
    /// Initial player volume (millibels), too high distorts
    pub vol_setting: String,

    /// Player amplification (millibels)
    pub amp_setting: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundboxConfig {
    pub file_locations: FileLocations,
    pub omxplayer_configuration: PlayerConfiguration,
}

/// Section name -> key -> raw value
pub type IniSections = BTreeMap<String, BTreeMap<String, String>>;

/// Parse flat ini text. Keys are lower-cased, `#`/`;` lines are comments,
/// `=` or `:` separates key and value.
pub fn parse_ini(text: &str) -> Result<IniSections, String> {
    let mut sections = IniSections::new();
    let mut current: Option<String> = None;

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let split = line.find(|c: char| c == '=' || c == ':');
        let Some(split) = split else {
            return Err(format!("line {}: expected `key = value`", number + 1));
        };
        let Some(section) = current.as_ref() else {
            return Err(format!("line {}: key outside of any section", number + 1));
        };

        let key = line[..split].trim().to_ascii_lowercase();
        let value = line[split + 1..].trim().to_string();
        sections.entry(section.clone()).or_default().insert(key, value);
    }

    Ok(sections)
}

/// Replace `key` in `section`, keeping every other line untouched.
/// The key is appended to the section (or a new section) if absent.
pub fn set_ini_value(text: &str, section: &str, key: &str, value: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_section = false;
    let mut seen_section = false;
    let mut written = false;

    for raw in text.lines() {
        let line = raw.trim();
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            if in_section && !written {
                out.push(format!("{} = {}", key, value));
                written = true;
            }
            in_section = name.trim() == section;
            seen_section |= in_section;
        } else if in_section && !written {
            let existing = line
                .find(|c: char| c == '=' || c == ':')
                .map(|split| line[..split].trim().eq_ignore_ascii_case(key))
                .unwrap_or(false);
            if existing {
                out.push(format!("{} = {}", key, value));
                written = true;
                continue;
            }
        }
        out.push(raw.to_string());
    }

    if !written {
        if !seen_section {
            out.push(format!("[{}]", section));
        }
        out.push(format!("{} = {}", key, value));
    }

    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

impl SoundboxConfig {
    /// Ini path from the environment or the default location
    pub fn ini_path() -> PathBuf {
        env::var_os(INI_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INI_PATH))
    }

    /// Load the ini file. A missing file and a malformed one are distinct errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Missing {
                path: path.display().to_string(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_ini_str(&text, path)?;

        tracing::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn from_ini_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let malformed = |reason: String| ConfigError::Malformed {
            path: path.display().to_string(),
            reason,
        };

        let sections = parse_ini(text).map_err(malformed)?;
        let value = serde_json::to_value(&sections).map_err(|e| malformed(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
    }

    /// Directory holding the sounds of the selected collection
    pub fn sound_dir(&self) -> PathBuf {
        Path::new(&self.file_locations.sound_file_base_dir)
            .join(&self.file_locations.selected_sound_dir)
    }

    /// Directory holding the spoken prompts
    pub fn prompts_dir(&self) -> PathBuf {
        Path::new(&self.file_locations.sound_file_base_dir).join("prompts")
    }

    /// Store a new `selected_sound_dir` in the ini file at `path`
    pub fn save_selected_dir(path: &Path, selected: &str) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        let text = fs::read_to_string(path).map_err(io_err)?;
        let updated = set_ini_value(&text, "file_locations", "selected_sound_dir", selected);
        fs::write(path, updated).map_err(io_err)?;

        tracing::info!("Selected sound collection '{}' saved to {}", selected, path.display());
        Ok(())
    }
}

/// Volume and amplification passed to the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSettings {
    pub vol: String,
    pub amp: String,
}

impl PlayerSettings {
    /// Command line wins over the ini file
    pub fn resolve(cli: &CliArgs, config: &SoundboxConfig) -> Self {
        match &cli.overrides {
            Some(overrides) => {
                tracing::info!("Sound player settings from command line");
                overrides.clone()
            }
            None => {
                tracing::info!("Sound player settings from ini file");
                Self {
                    vol: config.omxplayer_configuration.vol_setting.clone(),
                    amp: config.omxplayer_configuration.amp_setting.clone(),
                }
            }
        }
    }
}

/// Parsed command-line arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub overrides: Option<PlayerSettings>,
}

impl CliArgs {
    /// Parse positional arguments (program name excluded): either none or
    /// `<volume> <amplification>`.
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        match args.as_slice() {
            [vol, amp] => Self {
                overrides: Some(PlayerSettings {
                    vol: vol.clone(),
                    amp: amp.clone(),
                }),
            },
            [] => Self::default(),
            other => {
                tracing::warn!(
                    "Ignoring {} command line arguments, expected <volume> <amplification>",
                    other.len()
                );
                Self::default()
            }
        }
    }
}

/// Every delay the controller uses. Tests shrink these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// How long each LED stays lit during scanning
    pub scan_dwell: Duration,
    /// Half period of the pause flasher
    pub pause_flash_period: Duration,
    /// Switch held this long while idle enters the admin menu
    pub long_press: Duration,
    /// Switch still held this long while paused stops the sound
    pub hold_to_stop: Duration,
    /// Quiet time after each switch press
    pub switch_settle: Duration,
    /// Debounce applied to capture edge watches
    pub capture_debounce: Duration,
    /// Pause after a capture completes, before watches are removed
    pub capture_settle: Duration,
    /// Sleep after a playback button press so a held button does not retrigger
    pub press_holdoff: Duration,
    /// Main loop pass interval
    pub main_poll: Duration,
    /// Yield inside busy-poll loops
    pub busy_poll: Duration,
    /// Duty step interval of the dimming ramp
    pub dim_step: Duration,
    /// Interval between LEDs going dark in the countdown
    pub countdown_interval: Duration,
    /// How long the chosen admin LED is shown before acting
    pub confirm_hold: Duration,
    /// Half period of a counted LED blink
    pub blink_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            scan_dwell: Duration::from_millis(500),
            pause_flash_period: Duration::from_millis(250),
            long_press: Duration::from_secs(2),
            hold_to_stop: Duration::from_secs(1),
            switch_settle: Duration::from_millis(200),
            capture_debounce: Duration::from_millis(300),
            capture_settle: Duration::from_secs(1),
            press_holdoff: Duration::from_millis(1500),
            main_poll: Duration::from_millis(100),
            busy_poll: Duration::from_micros(200),
            dim_step: Duration::from_millis(10),
            countdown_interval: Duration::from_secs(1),
            confirm_hold: Duration::from_secs(1),
            blink_interval: Duration::from_millis(500),
        }
    }
}
