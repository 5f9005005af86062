use std::sync::Arc;

use anyhow::Context;

use soundbox::admin::{ConfigMenu, ConfigOutcome};
use soundbox::board::ButtonMap;
use soundbox::capture::ButtonCapture;
use soundbox::config::{SoundboxConfig, Timing};
use soundbox::hardware;
use soundbox::logging::{initialize_tracing, log_runtime_environment};
use soundbox::player::{OmxLauncher, Prompts};
use soundbox::signal::ShutdownToken;
use soundbox::system::ShellSystem;

fn main() {
    initialize_tracing("soundbox-config.log");
    log_runtime_environment("soundbox-config");

    let ini_path = SoundboxConfig::ini_path();
    let config = match SoundboxConfig::load(&ini_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}, exiting now", e);
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = run(config) {
        tracing::error!("Configuration failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run(config: SoundboxConfig) -> anyhow::Result<()> {
    let shutdown = ShutdownToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.trigger())
        .context("Failed to install interrupt handler")?;

    let timing = Timing::default();
    let gpio = hardware::open().context("Failed to open GPIO")?;
    let buttons = Arc::new(ButtonMap::new(Arc::clone(&gpio)).context("Failed to set up the buttons")?);
    let capture = ButtonCapture::new(
        Arc::clone(&gpio),
        Arc::clone(&buttons),
        &timing,
        shutdown.clone(),
    );

    let menu = ConfigMenu {
        gpio: Arc::clone(&gpio),
        capture: Arc::new(capture),
        prompts: Prompts::new(Arc::new(OmxLauncher::for_prompts()), config.prompts_dir()),
        system: Arc::new(ShellSystem),
        ini_path: SoundboxConfig::ini_path(),
        timing,
        shutdown,
    };

    let outcome = menu.run();
    buttons.turn_off_all_leds();
    gpio.reset();

    match outcome.context("Failed to save the configuration")? {
        ConfigOutcome::Configured {
            collection,
            network,
        } => tracing::info!("Configured: {} sounds, network {:?}", collection, network),
        ConfigOutcome::InvalidPasscode => tracing::info!("Invalid passcode, nothing changed"),
        ConfigOutcome::Cancelled => tracing::info!("No passcode entered, nothing changed"),
    }
    Ok(())
}
