//! The mirror session state machine: bounded-retry start, never-failing
//! stop, and the watcher that notices the sink dying on its own.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::adb::DeviceProxy;
use crate::clock::{Clock, TokioClock};
use crate::mirror::options::SessionOptions;
use crate::mirror::pipeline::{Pipeline, PipelineHandle};
use crate::mirror::{filters, negotiate, MirrorError};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// The one asynchronous, caller-visible event the core produces: the
/// session ended without the caller asking for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Ended { expected: bool },
}

/// One full start attempt: negotiation, filter construction, pipeline
/// spawn-and-verify. Seam so session-level retry behavior is testable
/// without processes.
#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    async fn launch(
        &self,
        serial: &str,
        options: &SessionOptions,
    ) -> Result<PipelineHandle, MirrorError>;
}

/// Production launcher against a real device.
pub struct AdbPipelineLauncher {
    proxy: Arc<dyn DeviceProxy>,
    clock: Arc<dyn Clock>,
}

impl AdbPipelineLauncher {
    pub fn new(proxy: Arc<dyn DeviceProxy>, clock: Arc<dyn Clock>) -> Self {
        Self { proxy, clock }
    }
}

#[async_trait]
impl PipelineLauncher for AdbPipelineLauncher {
    async fn launch(
        &self,
        serial: &str,
        options: &SessionOptions,
    ) -> Result<PipelineHandle, MirrorError> {
        let display =
            negotiate::prepare(self.proxy.as_ref(), self.clock.as_ref(), serial, options.display)
                .await?;
        let stages = filters::build(options);
        Pipeline::new(self.proxy.clone(), self.clock.clone())
            .spawn_and_verify(serial, options, display, &stages)
            .await
    }
}

struct Shared {
    state: SessionState,
    pipeline: Option<PipelineHandle>,
    /// Options of the most recent successful start. Survives stop and
    /// failed restarts.
    last_good: Option<SessionOptions>,
    /// Bumped whenever the pipeline changes hands, so a stale watcher
    /// task can tell it no longer owns the liveness check.
    epoch: u64,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

/// Long-lived mirroring state for one device serial. The caller must
/// serialize start/stop per serial; sessions for different serials are
/// fully independent.
pub struct MirrorSession {
    serial: String,
    proxy: Arc<dyn DeviceProxy>,
    clock: Arc<dyn Clock>,
    launcher: Arc<dyn PipelineLauncher>,
    shared: Arc<Mutex<Shared>>,
}

impl MirrorSession {
    pub fn new(serial: impl Into<String>, proxy: Arc<dyn DeviceProxy>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let launcher = Arc::new(AdbPipelineLauncher::new(proxy.clone(), clock.clone()));
        Self::with_parts(serial, proxy, clock, launcher)
    }

    pub(crate) fn with_parts(
        serial: impl Into<String>,
        proxy: Arc<dyn DeviceProxy>,
        clock: Arc<dyn Clock>,
        launcher: Arc<dyn PipelineLauncher>,
    ) -> Self {
        Self {
            serial: serial.into(),
            proxy,
            clock,
            launcher,
            shared: Arc::new(Mutex::new(Shared {
                state: SessionState::Idle,
                pipeline: None,
                last_good: None,
                epoch: 0,
                events: None,
            })),
        }
    }

    /// Receiver for unsolicited session events. Replaces any previous
    /// subscription.
    pub async fn events(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().await.events = Some(tx);
        rx
    }

    #[allow(dead_code)]
    pub async fn state(&self) -> SessionState {
        self.shared.lock().await.state
    }

    /// Options of the last successful start, if any.
    #[allow(dead_code)]
    pub async fn last_options(&self) -> Option<SessionOptions> {
        self.shared.lock().await.last_good.clone()
    }

    /// True only while the sink process is alive. A live capture with a
    /// dead sink never reads as running.
    pub async fn is_running(&self) -> bool {
        let mut shared = self.shared.lock().await;
        shared.state == SessionState::Running
            && shared
                .pipeline
                .as_mut()
                .map(|p| p.sink_alive())
                .unwrap_or(false)
    }

    /// Start mirroring. Restarts if already running. Retries the whole
    /// attempt (negotiation included) up to the attempt budget, then
    /// surfaces the last failure.
    pub async fn start(&self, options: SessionOptions) -> Result<(), MirrorError> {
        if self.is_running().await {
            self.stop().await;
        }

        self.shared.lock().await.state = SessionState::Starting;

        let mut last: Option<MirrorError> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.launcher.launch(&self.serial, &options).await {
                Ok(pipeline) => {
                    let epoch = {
                        let mut shared = self.shared.lock().await;
                        shared.pipeline = Some(pipeline);
                        shared.state = SessionState::Running;
                        shared.last_good = Some(options.clone());
                        shared.epoch += 1;
                        shared.epoch
                    };
                    self.spawn_watcher(epoch);
                    info!(serial = %self.serial, attempt, "mirror session running");
                    return Ok(());
                }
                Err(MirrorError::DeviceUnreachable(serial)) => {
                    // Hard gate: retrying an unreachable device has no
                    // benefit, surface it immediately.
                    self.shared.lock().await.state = SessionState::Failed;
                    return Err(MirrorError::DeviceUnreachable(serial));
                }
                Err(e) => {
                    warn!(serial = %self.serial, attempt, error = %e, "mirror start attempt failed");
                    last = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        self.clock.sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        self.shared.lock().await.state = SessionState::Failed;
        let last = last.unwrap_or(MirrorError::CaptureFailedToStart {
            detail: "no attempt was made".to_string(),
        });
        Err(MirrorError::StartFailed {
            attempts: MAX_ATTEMPTS,
            last: Box::new(last),
        })
    }

    /// Stop mirroring. Never fails and always lands in Idle; this is
    /// the cleanup path and must work from any state, repeatedly.
    pub async fn stop(&self) {
        let pipeline = {
            let mut shared = self.shared.lock().await;
            shared.state = SessionState::Stopping;
            // Detach any watcher before teardown races it.
            shared.epoch += 1;
            shared.pipeline.take()
        };

        if let Some(mut pipeline) = pipeline {
            pipeline
                .teardown(self.proxy.as_ref(), self.clock.as_ref(), &self.serial)
                .await;
        }

        let mut shared = self.shared.lock().await;
        shared.state = SessionState::Idle;
        if let Some(events) = &shared.events {
            let _ = events.send(SessionEvent::Ended { expected: true });
        }
    }

    /// Watch the sink and, when it exits on its own, tear the rest of
    /// the pipeline down, restore the device and notify the caller.
    fn spawn_watcher(&self, epoch: u64) {
        let shared = self.shared.clone();
        let proxy = self.proxy.clone();
        let clock = self.clock.clone();
        let serial = self.serial.clone();

        tokio::spawn(async move {
            loop {
                clock.sleep(WATCH_INTERVAL).await;

                let mut guard = shared.lock().await;
                if guard.epoch != epoch {
                    // stop() or a restart took the pipeline over.
                    return;
                }
                let Some(pipeline) = guard.pipeline.as_mut() else {
                    return;
                };
                if pipeline.sink_alive() {
                    continue;
                }

                warn!(serial = %serial, "sink exited unexpectedly, cleaning up");
                let Some(mut dead) = guard.pipeline.take() else {
                    return;
                };
                guard.state = SessionState::Idle;
                guard.epoch += 1;
                let events = guard.events.clone();
                drop(guard);

                dead.teardown(proxy.as_ref(), clock.as_ref(), &serial).await;
                if let Some(events) = events {
                    let _ = events.send(SessionEvent::Ended { expected: false });
                }
                return;
            }
        });
    }
}
