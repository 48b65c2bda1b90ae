//! # Weather Station Application Entry Point
//!
//! Runs the acquisition pipeline once and hands the resulting record to a
//! display. It supports both production mode (PBM framebuffer for the panel)
//! and development mode (ASCII output).
//!
//! ```text
//! weather-station [--stdout] [--config <path>] [--write-config]
//! ```
//!
//! `--write-config` writes the effective configuration (defaults merged with
//! the file, if any) back to the config path and exits.

use anyhow::Context;
use chrono::Local;
use log::{error, info};
use std::env;
use std::fs;
use std::sync::Arc;
use tokio::sync::Notify;
use weather_station_lib::{
    config::Config,
    credentials::TomlCredentialStore,
    fetch::ReqwestTransport,
    pipeline::{self, StartupError},
    renderer::{draw_ascii, draw_display, Framebuffer},
    time_sync::SntpClock,
    wifi_nmcli::NmcliStation,
    WeatherRecord,
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

/// Value following `--config`, if any.
fn config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|arg| arg == "--config")
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

/// Write `config` back to `path`, or to the default config file.
fn write_config(config: &Config, path: Option<&str>) -> anyhow::Result<()> {
    match path {
        Some(path) => config.save_to_path(path),
        None => config.save(),
    }
}

/// Render the record into a framebuffer and write it out as PBM.
fn write_panel_image(record: &WeatherRecord, config: &Config) -> anyhow::Result<()> {
    let mut framebuffer = Framebuffer::new(config.display.width, config.display.height);
    if let Err(never) = draw_display(record, &mut framebuffer) {
        match never {}
    }

    let path = &config.display.output_path;
    fs::write(path, framebuffer.to_pbm())
        .with_context(|| format!("writing display image to {}", path))?;
    info!(
        target: "Display",
        "Display image written to {} ({} lit pixels)",
        path,
        framebuffer.lit_pixels()
    );
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    // Development mode: render to stdout instead of the panel image
    let development_mode = args.iter().any(|arg| arg == "--stdout");

    init_logging();

    let config = match config_path(&args) {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    if args.iter().any(|arg| arg == "--write-config") {
        return write_config(&config, config_path(&args));
    }

    let store = TomlCredentialStore::open(&config.credentials_path)
        .map_err(StartupError::from)
        .with_context(|| format!("opening credential store {}", config.credentials_path))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let report = rt.block_on(async {
        let cancel = Arc::new(Notify::new());
        let interrupt = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(target: "Main", "Interrupted, abandoning station bring-up");
                interrupt.notify_one();
            }
        });

        let driver = NmcliStation::new(&config.station);
        let mut clock = SntpClock::new(config.time.poll_interval());
        let transport = ReqwestTransport::new()?;

        let report = pipeline::run(&config, &store, driver, &mut clock, &transport, &cancel).await?;
        Ok::<_, anyhow::Error>(report)
    })?;

    if !report.is_connected() {
        error!(target: "Main", "No network connection, nothing to display");
        if development_mode {
            return Ok(());
        }
        // Leave the panel showing whatever it showed before
        rt.block_on(std::future::pending::<()>());
    }

    if development_mode {
        draw_ascii(&report.record);
        return Ok(());
    }

    write_panel_image(&report.record, &config)
}
