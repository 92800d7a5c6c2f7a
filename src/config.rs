use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mirror::{Eye, SessionOptions, SinkKind};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub adb: AdbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Video bitrate in megabits per second.
    pub bitrate_mbps: u32,
    /// Capture resolution requested from the device.
    pub width: u32,
    pub height: u32,
    /// Which eye buffer to show: "both", "left" or "right".
    #[serde(default)]
    pub eye: Eye,
    /// Output mode: "window" or "relay".
    pub mode: String,
    /// Local UDP port for relay mode.
    pub udp_port: u16,
    /// Display rotation applied by the sink, in degrees.
    #[serde(default)]
    pub rotation: i32,
    /// Lens correction coefficients. Zero disables correction.
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbConfig {
    /// Explicit adb binary path. Falls back to PATH lookup when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Timeout for one-shot adb commands (ms).
    #[serde(default = "default_adb_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_adb_timeout_ms() -> u64 {
    5000
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            bitrate_mbps: 5,
            width: 1280,
            height: 720,
            eye: Eye::Both,
            mode: "window".to_string(),
            udp_port: 27183,
            rotation: 0,
            k1: 0.0,
            k2: 0.0,
        }
    }
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: default_adb_timeout_ms(),
        }
    }
}

impl Config {
    /// Return the path to the configuration file.
    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("com", "mremehr", "questcast")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Load config from file, creating default if missing or corrupt.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let data = fs::read_to_string(path)?;
            match toml::from_str::<Config>(&data) {
                Ok(config) => Ok(config),
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to parse config at {}: {}",
                        path.display(),
                        e
                    );
                    eprintln!("Using default configuration.");
                    let config = Config::default();
                    config.save_to(path)?;
                    Ok(config)
                }
            }
        } else {
            // Create default config.
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = toml::to_string_pretty(self)?;
        fs::write(path, data)?;

        Ok(())
    }

    /// Timeout for one-shot adb commands.
    pub fn adb_timeout(&self) -> Duration {
        Duration::from_millis(self.adb.timeout_ms)
    }

    /// Resolve the adb binary: explicit config path, or PATH lookup.
    pub fn adb_path(&self) -> PathBuf {
        self.adb
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("adb"))
    }

    /// Build session options for a device from the mirror section.
    pub fn session_options(&self, serial: &str) -> SessionOptions {
        let sink = match self.mirror.mode.as_str() {
            "relay" => SinkKind::Relay {
                port: self.mirror.udp_port,
            },
            _ => SinkKind::Window,
        };

        SessionOptions {
            bitrate_bps: u64::from(self.mirror.bitrate_mbps) * 1_000_000,
            width: self.mirror.width,
            height: self.mirror.height,
            eye: self.mirror.eye,
            rotation_deg: self.mirror.rotation,
            k1: self.mirror.k1,
            k2: self.mirror.k2,
            sink,
            display: None,
            window_title: format!("Quest Stream ({})", serial),
        }
    }
}
