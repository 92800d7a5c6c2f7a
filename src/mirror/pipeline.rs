//! The two-process pipeline: a device-side capture process streaming an
//! H.264 bitstream over exec-out, wired into a local sink process that
//! displays or relays it. Spawn order, liveness verification and
//! teardown order all live here.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};

use crate::adb::DeviceProxy;
use crate::clock::Clock;
use crate::mirror::filters::{self, FilterStage};
use crate::mirror::options::{DisplayChoice, SessionOptions, SinkKind};
use crate::mirror::proc::{self, LocalProc, ProcHandle};
use crate::mirror::MirrorError;

/// Name of the capture binary on the device.
pub const CAPTURE_PROCESS: &str = "screenrecord";

/// How long to let the capture process settle before trusting it.
const CAPTURE_SETTLE: Duration = Duration::from_millis(500);
/// Pause between stopping capture and stopping the sink, so the sink
/// can drain the stream to a clean end instead of a broken pipe.
const SINK_DRAIN_PAUSE: Duration = Duration::from_millis(300);
/// Grace period before a polite stop escalates to a kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Known firmware failure mode: an explicit display id is sometimes
/// rejected even when the id was just listed. Matching this signature
/// triggers exactly one re-spawn with the display flag omitted.
const INVALID_LAYER_SIGNATURES: &[&str] = &["INVALID_LAYER_STACK", "invalid layer stack"];

pub(crate) fn is_invalid_layer(detail: &str) -> bool {
    INVALID_LAYER_SIGNATURES.iter().any(|s| detail.contains(s))
}

/// Capture invocation argument vector.
pub fn capture_args(options: &SessionOptions, display: DisplayChoice) -> Vec<String> {
    let mut args = vec![
        CAPTURE_PROCESS.to_string(),
        format!("--bit-rate={}", options.bitrate_bps),
        "--output-format=h264".to_string(),
    ];
    if let DisplayChoice::Explicit(id) = display {
        args.push(format!("--display-id={}", id));
    }
    args.push("--size".to_string());
    args.push(format!("{}x{}", options.width, options.height));
    args.push("-".to_string());
    args
}

/// Sink invocation: program plus argument vector. The window sink is
/// ffplay with low-latency decode flags; the relay sink is ffmpeg
/// emitting MPEG-TS over UDP.
pub fn sink_command(options: &SessionOptions, stages: &[FilterStage]) -> (String, Vec<String>) {
    let vf = filters::chain_expr(stages);
    match options.sink {
        SinkKind::Window => {
            let mut args: Vec<String> = [
                "-f", "h264", "-fflags", "nobuffer", "-flags", "low_delay", "-framedrop",
                "-probesize", "256000", "-analyzeduration", "200000", "-sync", "ext", "-i", "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            if !vf.is_empty() {
                args.push("-vf".to_string());
                args.push(vf);
            }
            args.push("-window_title".to_string());
            args.push(options.window_title.clone());
            ("ffplay".to_string(), args)
        }
        SinkKind::Relay { port } => {
            let mut args: Vec<String> =
                ["-f", "h264", "-fflags", "nobuffer", "-flags", "low_delay", "-i", "-"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
            if !vf.is_empty() {
                args.push("-vf".to_string());
                args.push(vf);
            }
            args.push("-f".to_string());
            args.push("mpegts".to_string());
            args.push(format!("udp://127.0.0.1:{}?pkt_size=1316", port));
            ("ffmpeg".to_string(), args)
        }
    }
}

/// Owns the two live processes of a running mirror. Capture's stdout is
/// consumed exclusively by the sink's stdin; nothing else may read it.
pub struct PipelineHandle {
    pub(crate) capture: Box<dyn ProcHandle>,
    pub(crate) sink: Box<dyn ProcHandle>,
    sink_image: String,
    window_title: String,
}

impl PipelineHandle {
    pub(crate) fn from_parts(
        capture: Box<dyn ProcHandle>,
        sink: Box<dyn ProcHandle>,
        sink_image: String,
        window_title: String,
    ) -> Self {
        Self {
            capture,
            sink,
            sink_image,
            window_title,
        }
    }

    /// Pipeline liveness is sink liveness: a live capture feeding a dead
    /// sink is a fault, not a running mirror.
    pub fn sink_alive(&mut self) -> bool {
        !self.sink.has_exited()
    }

    /// Ordered teardown. Capture goes first so the sink sees a clean
    /// end-of-stream; then the sink, with platform fallbacks for the
    /// GUI process its handle may not fully cover; then best-effort
    /// device cleanup. Every step is isolated from the others' failures.
    pub async fn teardown(&mut self, proxy: &dyn DeviceProxy, clock: &dyn Clock, serial: &str) {
        self.capture.terminate(TERMINATE_GRACE).await;

        clock.sleep(SINK_DRAIN_PAUSE).await;

        self.sink.terminate(TERMINATE_GRACE).await;
        if !self.sink.has_exited() {
            proc::kill_by_window_title(&self.window_title);
            if !self.sink.has_exited() {
                proc::sweep_by_image_name(&self.sink_image);
            }
        }

        self.remote_cleanup(proxy, serial).await;
    }

    /// Kill any surviving device-side capture and restore the sensor
    /// override so the screen behaves normally again off-mirror.
    async fn remote_cleanup(&self, proxy: &dyn DeviceProxy, serial: &str) {
        match proxy.is_online(serial).await {
            Ok(true) => {
                if let Err(e) = proxy.run_shell(serial, &["killall", CAPTURE_PROCESS]).await {
                    debug!(serial, error = %e, "device-side capture cleanup failed");
                }
                if let Err(e) = proxy
                    .run_shell(
                        serial,
                        &[
                            "am",
                            "broadcast",
                            "-a",
                            "com.oculus.vrpowermanager.automation_disable",
                        ],
                    )
                    .await
                {
                    debug!(serial, error = %e, "sensor restore failed");
                }
            }
            Ok(false) => debug!(serial, "device offline, skipping remote cleanup"),
            Err(e) => debug!(serial, error = %e, "online probe failed during cleanup"),
        }
    }
}

/// Spawns and verifies the capture → sink chain.
pub struct Pipeline {
    proxy: Arc<dyn DeviceProxy>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(proxy: Arc<dyn DeviceProxy>, clock: Arc<dyn Clock>) -> Self {
        Self { proxy, clock }
    }

    /// Spawn capture, verify it is really recording, then spawn the sink
    /// bound to its output. A failure after capture is up tears capture
    /// down before returning, so a failed attempt never leaks a process.
    pub async fn spawn_and_verify(
        &self,
        serial: &str,
        options: &SessionOptions,
        display: DisplayChoice,
        stages: &[FilterStage],
    ) -> Result<PipelineHandle, MirrorError> {
        let mut capture = self.spawn_capture_verified(serial, options, display).await?;

        let capture_out = match capture.stdout.take() {
            Some(out) => out,
            None => {
                abort_child(&mut capture).await;
                return Err(MirrorError::CaptureFailedToStart {
                    detail: "capture stdout was not piped".to_string(),
                });
            }
        };
        let sink_stdin: Stdio = match capture_out.try_into() {
            Ok(stdio) => stdio,
            Err(e) => {
                abort_child(&mut capture).await;
                return Err(MirrorError::CaptureFailedToStart {
                    detail: format!("could not wire capture output: {}", e),
                });
            }
        };

        let (program, args) = sink_command(options, stages);
        debug!(serial, program, ?args, "spawning sink");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(sink_stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut sink = match cmd.spawn() {
            Ok(sink) => sink,
            Err(e) => {
                abort_child(&mut capture).await;
                return Err(MirrorError::SinkFailedToStart {
                    detail: format!("failed to launch {}: {}", program, e),
                });
            }
        };

        // No settle probe for the sink: a bad invocation manifests as a
        // quick exit, which the session's watcher also catches.
        if let Ok(Some(status)) = sink.try_wait() {
            abort_child(&mut capture).await;
            let detail = collect_failure_output(sink).await;
            return Err(MirrorError::SinkFailedToStart {
                detail: format!("{} exited at startup ({}): {}", program, status, detail),
            });
        }

        spawn_stderr_drain("capture", capture.stderr.take());
        spawn_stderr_drain("sink", sink.stderr.take());

        info!(serial, sink = program, "mirror pipeline is up");
        Ok(PipelineHandle::from_parts(
            Box::new(LocalProc::new(capture)),
            Box::new(LocalProc::new_group(sink)),
            program,
            options.window_title.clone(),
        ))
    }

    /// Spawn-and-verify for capture, with the one targeted recovery:
    /// if the failure looks like the invalid-layer-stack firmware bug
    /// and a display flag was passed, retry once without the flag.
    async fn spawn_capture_verified(
        &self,
        serial: &str,
        options: &SessionOptions,
        display: DisplayChoice,
    ) -> Result<Child, MirrorError> {
        let args = capture_args(options, display);
        match self.spawn_capture_once(serial, &args).await {
            Err(MirrorError::CaptureFailedToStart { detail })
                if display.is_explicit() && is_invalid_layer(&detail) =>
            {
                warn!(
                    serial,
                    "capture rejected the display id, retrying without the flag"
                );
                let args = capture_args(options, DisplayChoice::Omit);
                self.spawn_capture_once(serial, &args).await
            }
            other => other,
        }
    }

    async fn spawn_capture_once(
        &self,
        serial: &str,
        args: &[String],
    ) -> Result<Child, MirrorError> {
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!(serial, ?args, "spawning capture");

        let mut capture = self
            .proxy
            .exec_out(serial, &arg_refs)
            .await
            .map_err(|e| MirrorError::CaptureFailedToStart {
                detail: e.to_string(),
            })?;

        self.clock.sleep(CAPTURE_SETTLE).await;

        // Local check: did the transport die before producing anything
        // (device unplugged, adb gone)?
        if capture.try_wait().map(|s| s.is_some()).unwrap_or(true) {
            let detail = collect_failure_output(capture).await;
            return Err(MirrorError::CaptureFailedToStart {
                detail: format!("capture transport exited early: {}", detail),
            });
        }

        // Remote check: a live local process is not proof. Ask the
        // device whether a capture process actually exists.
        if !self.capture_running_on_device(serial).await {
            abort_child(&mut capture).await;
            let detail = collect_failure_output(capture).await;
            return Err(MirrorError::CaptureFailedToStart {
                detail: format!("no {} process on device: {}", CAPTURE_PROCESS, detail),
            });
        }

        Ok(capture)
    }

    async fn capture_running_on_device(&self, serial: &str) -> bool {
        match self.proxy.run_shell(serial, &["pidof", CAPTURE_PROCESS]).await {
            Ok(out) => out.success() && !out.stdout.trim().is_empty(),
            Err(e) => {
                debug!(serial, error = %e, "remote liveness probe failed");
                false
            }
        }
    }
}

/// Stop a child we are abandoning mid-spawn. Does not consume it so the
/// caller can still collect its output for diagnostics.
async fn abort_child(child: &mut Child) {
    let _ = child.start_kill();
}

/// Collect whatever a dead or dying child left on its error stream (and
/// a little of stdout as a fallback) for the failure detail.
async fn collect_failure_output(child: Child) -> String {
    match child.wait_with_output().await {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                return stderr.to_string();
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stdout = stdout.trim();
            if stdout.is_empty() {
                "(no output)".to_string()
            } else {
                stdout.chars().take(200).collect()
            }
        }
        Err(e) => format!("(output unavailable: {})", e),
    }
}

/// Drain one child's stderr to the diagnostics log, tagged with its
/// origin, for the life of the pipeline. Runs independently of the
/// control path and ends at stream EOF.
fn spawn_stderr_drain(origin: &'static str, stderr: Option<ChildStderr>) {
    let Some(stderr) = stderr else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(origin, "{}", line);
        }
    });
}
