use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "questcast")]
#[command(author = "MrMattias")]
#[command(version)]
#[command(about = "Low-latency Quest headset mirroring over adb")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,

    /// Device serial (defaults to the only connected device)
    #[arg(short, long, global = true)]
    pub(crate) serial: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List connected devices
    Devices,
    /// Start mirroring (Ctrl+C to stop)
    Start {
        /// Video bitrate in Mbps
        #[arg(short, long)]
        bitrate: Option<u32>,

        /// Capture resolution, e.g. "1280x720"
        #[arg(long)]
        size: Option<String>,

        /// Which eye to show: both, left or right
        #[arg(short, long)]
        eye: Option<String>,

        /// Output mode: window or relay
        #[arg(short, long)]
        mode: Option<String>,

        /// UDP port for relay mode
        #[arg(short, long)]
        port: Option<u16>,

        /// Display rotation in degrees
        #[arg(short, long)]
        rotation: Option<i32>,

        /// Lens correction coefficient k1
        #[arg(long)]
        k1: Option<f64>,

        /// Lens correction coefficient k2
        #[arg(long)]
        k2: Option<f64>,

        /// Compositor display id to capture
        #[arg(short, long)]
        display: Option<u64>,

        /// Sink window title
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Probe device health and report whether capture can run
    Diagnose,
    /// Dump the first bytes of the raw stream to a file
    Dump {
        /// Output file for the captured bytes
        #[arg(short, long, default_value = "stream_dump.h264")]
        output: PathBuf,
    },
    /// Control the proximity sensor override
    Sensor {
        #[command(subcommand)]
        action: SensorAction,
    },
    /// Restart the adb server
    ResetAdb,
    /// Interactive setup wizard for new users
    Init,
}

#[derive(Subcommand)]
pub(crate) enum SensorAction {
    /// Force the proximity sensor closed so the screen stays on
    Disable,
    /// Restore normal proximity sensor behavior
    Enable,
}
