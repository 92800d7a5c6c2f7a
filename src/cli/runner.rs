use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use super::{Cli, Commands, SensorAction};
use crate::adb::AdbProxy;
use crate::cli_cmds::*;
use crate::config::Config;
use crate::init;
use crate::utils::parse_size;

pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("questcast=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    let proxy = Arc::new(AdbProxy::new(config.adb_path()).with_timeout(config.adb_timeout()));

    match cli.command {
        Commands::Devices => {
            cmd_devices(&proxy).await?;
        }
        Commands::Start {
            bitrate,
            size,
            eye,
            mode,
            port,
            rotation,
            k1,
            k2,
            display,
            title,
        } => {
            let serial = resolve_serial(&proxy, cli.serial).await?;

            // Config supplies the defaults; flags override per field.
            let mut mirror = config.mirror.clone();
            if let Some(bitrate) = bitrate {
                mirror.bitrate_mbps = bitrate;
            }
            if let Some(size) = size {
                let (width, height) = parse_size(&size)
                    .ok_or_else(|| anyhow::anyhow!("invalid size '{}', expected WIDTHxHEIGHT", size))?;
                mirror.width = width;
                mirror.height = height;
            }
            if let Some(eye) = eye {
                mirror.eye = crate::mirror::Eye::parse(&eye)
                    .ok_or_else(|| anyhow::anyhow!("invalid eye '{}', expected both, left or right", eye))?;
            }
            if let Some(mode) = mode {
                mirror.mode = mode;
            }
            if let Some(port) = port {
                mirror.udp_port = port;
            }
            if let Some(rotation) = rotation {
                mirror.rotation = rotation;
            }
            if let Some(k1) = k1 {
                mirror.k1 = k1;
            }
            if let Some(k2) = k2 {
                mirror.k2 = k2;
            }

            let mut effective = config.clone();
            effective.mirror = mirror;
            let mut options = effective.session_options(&serial);
            options.display = display;
            if let Some(title) = title {
                options.window_title = title;
            }

            cmd_start(proxy, &serial, options).await?;
        }
        Commands::Diagnose => {
            let serial = resolve_serial(&proxy, cli.serial).await?;
            cmd_diagnose(&proxy, &serial, &config).await?;
        }
        Commands::Dump { output } => {
            let serial = resolve_serial(&proxy, cli.serial).await?;
            cmd_dump(&proxy, &serial, &config, &output).await?;
        }
        Commands::Sensor { action } => {
            let serial = resolve_serial(&proxy, cli.serial).await?;
            let enable = matches!(action, SensorAction::Enable);
            cmd_sensor(&proxy, &serial, enable).await?;
        }
        Commands::ResetAdb => {
            cmd_reset_adb(&proxy).await?;
        }
        Commands::Init => {
            init::run_init().await?;
        }
    }

    Ok(())
}
