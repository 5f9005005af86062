use std::sync::Arc;

use anyhow::Context;

use soundbox::config::{CliArgs, PlayerSettings, SoundboxConfig, Timing};
use soundbox::controller::{Collaborators, Soundbox};
use soundbox::hardware;
use soundbox::logging::{initialize_tracing, log_runtime_environment};
use soundbox::player::{OmxLauncher, Prompts};
use soundbox::signal::ShutdownToken;
use soundbox::sounds::SoundList;
use soundbox::system::ShellSystem;
use soundbox::volume::{AmixerMixer, ALSA_MIXER_NAME};

fn main() {
    initialize_tracing("soundbox.log");
    log_runtime_environment("soundbox");

    let ini_path = SoundboxConfig::ini_path();
    let config = match SoundboxConfig::load(&ini_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}, exiting now", e);
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = run(config) {
        tracing::error!("Soundbox failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run(config: SoundboxConfig) -> anyhow::Result<()> {
    let cli = CliArgs::parse(std::env::args().skip(1));
    let settings = PlayerSettings::resolve(&cli, &config);
    tracing::info!("--vol {} --amp {}", settings.vol, settings.amp);

    let sound_dir = config.sound_dir();
    let sounds = SoundList::load(&sound_dir)
        .with_context(|| format!("Failed to list sounds in {}", sound_dir.display()))?;
    tracing::info!("Sounds: {:?}", sounds.names());

    let shutdown = ShutdownToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.trigger())
        .context("Failed to install interrupt handler")?;

    let gpio = hardware::open().context("Failed to open GPIO")?;
    let soundbox = Soundbox::new(
        gpio,
        sounds,
        Arc::new(OmxLauncher::new(settings)),
        Timing::default(),
        shutdown,
    )
    .context("Failed to set up the board")?;

    let mixer = AmixerMixer::new(ALSA_MIXER_NAME).context("Failed to set up the mixer")?;
    soundbox.run(Collaborators {
        prompts: Prompts::new(Arc::new(OmxLauncher::for_prompts()), config.prompts_dir()),
        mixer: Box::new(mixer),
        system: Arc::new(ShellSystem),
        capture: None,
    })?;

    tracing::info!("Program terminated");
    Ok(())
}
