use crate::adb::AdbProxy;
use crate::config::Config;
use crate::mirror::Eye;
use crate::utils::parse_size;
use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};

/// Interactive setup wizard for new users
pub async fn run_init() -> Result<()> {
    let theme = ColorfulTheme::default();

    println!("\n🥽  QuestCast Setup Wizard 🥽\n");
    println!("Let's configure your headset mirror.\n");

    // Check if config already exists
    let config_path = Config::config_path();
    if config_path.exists() {
        let overwrite = Confirm::with_theme(&theme)
            .with_prompt("Config file already exists. Overwrite?")
            .default(false)
            .interact()?;

        if !overwrite {
            println!("Setup cancelled.");
            return Ok(());
        }
    }

    // Step 1: Detect connected headsets
    println!("Looking for connected devices...");
    let defaults = Config::default();
    let proxy = AdbProxy::new(defaults.adb_path()).with_timeout(defaults.adb_timeout());
    match proxy.devices().await {
        Ok(devices) if !devices.is_empty() => {
            println!("Found {} device(s):", devices.len());
            for d in &devices {
                println!("  • {} ({})", d.serial, d.model);
            }
        }
        Ok(_) => {
            println!("⚠ No devices found.");
            println!("  Connect the headset over USB and allow the debugging prompt.");
        }
        Err(e) => {
            println!("⚠ Could not talk to adb: {}", e);
            println!("  Make sure adb is installed and on PATH.");
        }
    }

    // Step 2: Bitrate
    let bitrate_mbps: u32 = Input::with_theme(&theme)
        .with_prompt("\nVideo bitrate (Mbps)")
        .default(5)
        .validate_with(|v: &u32| {
            if (1..=100).contains(v) {
                Ok(())
            } else {
                Err("bitrate must be between 1 and 100 Mbps")
            }
        })
        .interact_text()?;

    // Step 3: Capture resolution
    let size: String = Input::with_theme(&theme)
        .with_prompt("Capture resolution (WIDTHxHEIGHT)")
        .default("1280x720".to_string())
        .validate_with(|s: &String| {
            parse_size(s)
                .map(|_| ())
                .ok_or("expected WIDTHxHEIGHT, e.g. 1280x720")
        })
        .interact_text()?;
    let (width, height) = match parse_size(&size) {
        Some(dims) => dims,
        None => (1280, 720),
    };

    // Step 4: Eye selection
    let eyes = vec![
        "Both - full side-by-side frame (recommended)",
        "Left - left eye only",
        "Right - right eye only",
    ];

    let eye_idx = Select::with_theme(&theme)
        .with_prompt("Which eye to show")
        .items(&eyes)
        .default(0)
        .interact()?;

    let eye = match eye_idx {
        1 => Eye::Left,
        2 => Eye::Right,
        _ => Eye::Both,
    };

    // Step 5: Output mode
    let modes = vec![
        "window - local ffplay window (recommended)",
        "relay - MPEG-TS over UDP, for OBS or another consumer",
    ];

    let mode_idx = Select::with_theme(&theme)
        .with_prompt("Output mode")
        .items(&modes)
        .default(0)
        .interact()?;

    let mode = match mode_idx {
        1 => "relay",
        _ => "window",
    };

    // Step 6: Relay port, only when it matters
    let mut udp_port = 27183;
    if mode == "relay" {
        udp_port = Input::with_theme(&theme)
            .with_prompt("UDP relay port")
            .default(27183u16)
            .interact_text()?;
    }

    // Build config
    let mut config = Config::default();
    config.mirror.bitrate_mbps = bitrate_mbps;
    config.mirror.width = width;
    config.mirror.height = height;
    config.mirror.eye = eye;
    config.mirror.mode = mode.to_string();
    config.mirror.udp_port = udp_port;

    // Save config
    config.save()?;
    println!("\n✓ Config saved to {}", config_path.display());

    println!("\n🥽  Setup complete! Run 'questcast start' to begin mirroring.\n");

    Ok(())
}
