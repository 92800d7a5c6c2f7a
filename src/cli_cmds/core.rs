use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::adb::{AdbProxy, DeviceProxy};
use crate::mirror::{Eye, MirrorSession, SessionEvent, SessionOptions};

/// Pick the device to talk to: an explicit serial wins, otherwise the
/// single connected device. Anything else needs the user to choose.
pub async fn resolve_serial(proxy: &AdbProxy, explicit: Option<String>) -> Result<String> {
    if let Some(serial) = explicit {
        return Ok(serial);
    }

    let devices = proxy.devices().await.context("could not list devices")?;
    match devices.len() {
        0 => bail!(
            "No devices found.\n\
             Connect the headset over USB and allow the debugging prompt."
        ),
        1 => Ok(devices[0].serial.clone()),
        _ => {
            let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
            bail!(
                "Multiple devices connected: {}\n\
                 Pick one with --serial.",
                serials.join(", ")
            )
        }
    }
}

pub async fn cmd_devices(proxy: &AdbProxy) -> Result<()> {
    let devices = proxy.devices().await.context("could not list devices")?;

    if devices.is_empty() {
        eprintln!("No devices found.");
        eprintln!("Connect the headset over USB and allow the debugging prompt.");
        return Ok(());
    }

    for device in &devices {
        println!("{}  {}", device.serial, device.model);
    }

    Ok(())
}

pub async fn cmd_start(proxy: Arc<AdbProxy>, serial: &str, options: SessionOptions) -> Result<()> {
    let proxy: Arc<dyn DeviceProxy> = proxy;
    let session = MirrorSession::new(serial, proxy);
    let mut events = session.events().await;
    let eye = options.eye;

    session
        .start(options)
        .await
        .with_context(|| format!("could not start mirroring {}", serial))?;

    if eye == Eye::Both {
        println!("🥽 Mirroring {} (Ctrl+C to stop)", serial);
    } else {
        println!("🥽 Mirroring {} ({} eye, Ctrl+C to stop)", serial, eye.as_str());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::Ended { expected: false }) => {
                        eprintln!("Mirror window closed, shutting down.");
                        break;
                    }
                    Some(SessionEvent::Ended { expected: true }) | None => break,
                }
            }
        }
    }

    session.stop().await;
    println!("✓ Mirror stopped.");

    Ok(())
}

pub async fn cmd_sensor(proxy: &AdbProxy, serial: &str, enable: bool) -> Result<()> {
    let action = if enable {
        "com.oculus.vrpowermanager.automation_disable"
    } else {
        "com.oculus.vrpowermanager.prox_close"
    };

    let output = proxy
        .run_shell(serial, &["am", "broadcast", "-a", action])
        .await
        .context("sensor broadcast failed")?;

    if output.success() {
        if enable {
            println!("✓ Proximity sensor restored on {}", serial);
        } else {
            println!("✓ Proximity sensor overridden on {} (screen stays on)", serial);
        }
    } else {
        bail!("device rejected the broadcast: {}", output.stderr.trim());
    }

    Ok(())
}

pub async fn cmd_reset_adb(proxy: &AdbProxy) -> Result<()> {
    println!("Restarting adb server...");
    proxy
        .restart_server()
        .await
        .context("could not restart the adb server")?;

    let devices = proxy.devices().await.context("could not list devices")?;
    println!("✓ adb server restarted, {} device(s) connected", devices.len());

    Ok(())
}
