//! Child-process handles and platform-specific termination. The
//! `ProcHandle` seam lets teardown logic run against scripted doubles
//! in tests while production code wraps real tokio children.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// Exclusive handle on one child process of the pipeline. Handles cross
/// into spawned tasks (the sink watcher tears down from one), so they
/// must be usable behind shared references there.
#[async_trait]
pub trait ProcHandle: Send + Sync {
    /// Whether the process has exited. Treats an unpollable child as
    /// exited, since it can no longer be managed either way.
    fn has_exited(&mut self) -> bool;

    /// Graceful stop: polite signal, then force-kill once the grace
    /// period elapses. Must not fail; termination is the cleanup path.
    async fn terminate(&mut self, grace: Duration);
}

/// `ProcHandle` over a locally spawned tokio child.
pub struct LocalProc {
    child: Child,
    /// Signal the whole process group instead of the single pid. Used
    /// for the sink, which may fork helpers the handle does not track.
    group: bool,
}

impl LocalProc {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            group: false,
        }
    }

    pub fn new_group(child: Child) -> Self {
        Self { child, group: true }
    }
}

#[async_trait]
impl ProcHandle for LocalProc {
    fn has_exited(&mut self) -> bool {
        self.child.try_wait().map(|s| s.is_some()).unwrap_or(true)
    }

    async fn terminate(&mut self, grace: Duration) {
        if self.has_exited() {
            return;
        }

        if let Some(pid) = self.child.id() {
            signal_term(pid, self.group);
        }

        // The grace period bounds a real child wait, so this uses the
        // wall clock rather than the injected one.
        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            warn!(pid = self.child.id(), "process ignored polite stop, killing");
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

/// Polite stop signal. On unix SIGTERM to the pid or its process group;
/// on windows a taskkill tree request without /F.
#[cfg(unix)]
fn signal_term(pid: u32, group: bool) {
    let pid = pid as i32;
    unsafe {
        if group {
            libc::killpg(pid, libc::SIGTERM);
        } else {
            libc::kill(pid, libc::SIGTERM);
        }
    }
}

#[cfg(windows)]
fn signal_term(pid: u32, _group: bool) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
}

/// Kill a stray sink window by its title. Windows-only lookup; on other
/// platforms the process-group signal already covers forked children.
#[cfg(windows)]
pub(crate) fn kill_by_window_title(title: &str) {
    let _ = std::process::Command::new("taskkill")
        .args(["/FI", &format!("WINDOWTITLE eq {}", title), "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
}

#[cfg(not(windows))]
pub(crate) fn kill_by_window_title(_title: &str) {}

/// Last-resort sweep by image name. Known trade-off: this can take down
/// unrelated instances of the same program, so it only runs when the
/// handle-based and platform-specific termination paths both failed.
pub(crate) fn sweep_by_image_name(image: &str) {
    debug!(image, "sweeping stray sink processes by image name");
    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/IM", &format!("{}.exe", image), "/F"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
    #[cfg(not(windows))]
    {
        let _ = std::process::Command::new("killall")
            .arg(image)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
}
