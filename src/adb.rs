use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

/// Default bound on any single adb round-trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("adb did not respond within {0:?}")]
    Timeout(Duration),
    #[error("failed to launch adb: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("adb io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a device-side shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Narrow command-execution gateway to a physical device. The mirror core
/// depends on this surface only, so tests can script device behavior.
#[async_trait]
pub trait DeviceProxy: Send + Sync {
    /// Whether the device currently reports itself online.
    async fn is_online(&self, serial: &str) -> Result<bool, ProxyError>;

    /// Run a shell command on the device and capture its output.
    async fn run_shell(&self, serial: &str, args: &[&str]) -> Result<ShellOutput, ProxyError>;

    /// Launch a device-side command whose raw stdout is streamed back
    /// over the transport (`adb exec-out`). The returned child owns the
    /// local end of that stream.
    async fn exec_out(&self, serial: &str, args: &[&str]) -> Result<Child, ProxyError>;
}

/// A device known to the adb server.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub serial: String,
    pub model: String,
}

/// `DeviceProxy` over the adb binary.
pub struct AdbProxy {
    adb_path: PathBuf,
    timeout: Duration,
}

impl AdbProxy {
    pub fn new(adb_path: impl Into<PathBuf>) -> Self {
        Self {
            adb_path: adb_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ProxyError> {
        let mut cmd = Command::new(&self.adb_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timeout drops the output future; the hung child must
            // die with it instead of lingering.
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(ProxyError::Spawn),
            Err(_) => Err(ProxyError::Timeout(self.timeout)),
        }
    }

    /// List devices known to the adb server, with their model names.
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>, ProxyError> {
        let output = self.run(&["devices", "-l"]).await?;
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Restart the adb server (kill-server + start-server).
    pub async fn restart_server(&self) -> Result<(), ProxyError> {
        self.run(&["kill-server"]).await?;
        self.run(&["start-server"]).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceProxy for AdbProxy {
    async fn is_online(&self, serial: &str) -> Result<bool, ProxyError> {
        let output = self.run(&["-s", serial, "get-state"]).await?;
        let state = String::from_utf8_lossy(&output.stdout);
        Ok(output.status.success() && state.trim() == "device")
    }

    async fn run_shell(&self, serial: &str, args: &[&str]) -> Result<ShellOutput, ProxyError> {
        let mut full = vec!["-s", serial, "shell"];
        full.extend_from_slice(args);
        let output = self.run(&full).await?;
        Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn exec_out(&self, serial: &str, args: &[&str]) -> Result<Child, ProxyError> {
        let mut cmd = Command::new(&self.adb_path);
        cmd.args(["-s", serial, "exec-out"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn().map_err(ProxyError::Spawn)
    }
}

/// Parse `adb devices -l` output into serial + model pairs.
fn parse_devices(output: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        // "SERIAL device usb:... product:... model:Quest_2 device:..."
        if tokens.len() < 2 || tokens[1] != "device" {
            continue;
        }

        let model = tokens
            .iter()
            .find_map(|t| t.strip_prefix("model:"))
            .unwrap_or("unknown")
            .to_string();

        devices.push(DeviceInfo {
            serial: tokens[0].to_string(),
            model,
        });
    }

    devices
}
