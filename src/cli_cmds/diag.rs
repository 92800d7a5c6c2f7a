use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Child;

use crate::adb::{AdbProxy, DeviceProxy};
use crate::config::Config;
use crate::mirror::pipeline::{capture_args, CAPTURE_PROCESS};
use crate::mirror::DisplayChoice;
use crate::utils::hex_preview;

const PROBE_WINDOW: Duration = Duration::from_secs(1);
const DUMP_WINDOW: Duration = Duration::from_secs(5);
const DUMP_BYTES: usize = 2048;

/// Step through the mirror prerequisites and report each one, so a user
/// can see where a broken setup falls over without starting a session.
pub async fn cmd_diagnose(proxy: &AdbProxy, serial: &str, config: &Config) -> Result<()> {
    println!("Diagnosing {}...\n", serial);

    if !proxy.is_online(serial).await.unwrap_or(false) {
        println!("✗ Device is not online.");
        println!("  Try 'questcast reset-adb' or reconnect the USB cable.");
        return Ok(());
    }
    println!("✓ Device is online");

    match proxy.run_shell(serial, &["dumpsys", "power"]).await {
        Ok(out) => {
            let wakefulness = out
                .stdout
                .lines()
                .find_map(|l| l.trim().strip_prefix("mWakefulness="))
                .unwrap_or("unknown");
            if wakefulness == "Awake" {
                println!("✓ Device is awake");
            } else {
                println!("⚠ Power state: {} (sending wake key)", wakefulness);
                let _ = proxy
                    .run_shell(serial, &["input", "keyevent", "WAKEUP"])
                    .await;
            }
        }
        Err(e) => println!("⚠ Could not read power state: {}", e),
    }

    match proxy.run_shell(serial, &["pidof", CAPTURE_PROCESS]).await {
        Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
            println!(
                "⚠ Stale capture process(es) on device: {}",
                out.stdout.trim()
            );
            println!("  Starting a session will clean these up.");
        }
        _ => println!("✓ No stale capture processes"),
    }

    print!("• Probing the encoder... ");
    let options = config.session_options(serial);
    let args = capture_args(&options, DisplayChoice::Omit);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    let mut probe = proxy
        .exec_out(serial, &arg_refs)
        .await
        .context("could not launch the capture probe")?;
    let bytes = read_stream_prefix(&mut probe, 64 * 1024, PROBE_WINDOW).await;
    let detail = finish_probe(probe).await;
    let _ = proxy.run_shell(serial, &["killall", CAPTURE_PROCESS]).await;

    if bytes.is_empty() {
        println!("✗ no data");
        println!("  The encoder produced nothing in {:?}.", PROBE_WINDOW);
        if !detail.is_empty() {
            println!("  Device said: {}", detail);
        }
    } else {
        println!("✓ {} bytes in {:?}", bytes.len(), PROBE_WINDOW);
        println!("\nEverything looks good. Run 'questcast start' to mirror.");
    }

    Ok(())
}

/// Capture the first bytes of the raw stream to a file for offline
/// inspection.
pub async fn cmd_dump(proxy: &AdbProxy, serial: &str, config: &Config, output: &Path) -> Result<()> {
    let options = config.session_options(serial);
    let args = capture_args(&options, DisplayChoice::Omit);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    println!("Capturing first {} bytes from {}...", DUMP_BYTES, serial);

    let mut probe = proxy
        .exec_out(serial, &arg_refs)
        .await
        .context("could not launch the capture")?;
    let bytes = read_stream_prefix(&mut probe, DUMP_BYTES, DUMP_WINDOW).await;
    let detail = finish_probe(probe).await;
    let _ = proxy.run_shell(serial, &["killall", CAPTURE_PROCESS]).await;

    if bytes.is_empty() {
        anyhow::bail!(
            "no stream data within {:?}{}",
            DUMP_WINDOW,
            if detail.is_empty() {
                String::new()
            } else {
                format!(": {}", detail)
            }
        );
    }

    std::fs::write(output, &bytes)
        .with_context(|| format!("could not write {}", output.display()))?;

    println!("✓ Wrote {} bytes to {}", bytes.len(), output.display());
    println!("  First bytes: {}", hex_preview(&bytes, 16));

    Ok(())
}

/// Read up to `max` bytes from the child's stdout within the window.
async fn read_stream_prefix(child: &mut Child, max: usize, window: Duration) -> Vec<u8> {
    let Some(mut stdout) = child.stdout.take() else {
        return Vec::new();
    };

    let mut buf = vec![0u8; max];
    let mut filled = 0;
    let deadline = tokio::time::Instant::now() + window;

    while filled < max {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stdout.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(_)) | Err(_) => break,
        }
    }

    buf.truncate(filled);
    buf
}

/// Stop the probe child and collect anything it left on stderr.
async fn finish_probe(mut child: Child) -> String {
    let _ = child.start_kill();
    match child.wait_with_output().await {
        Ok(output) => String::from_utf8_lossy(&output.stderr).trim().to_string(),
        Err(_) => String::new(),
    }
}
