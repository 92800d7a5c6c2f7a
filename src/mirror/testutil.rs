//! Scripted doubles for the mirror core's seams: device proxy, clock
//! and process handles. Test-only.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::adb::{DeviceProxy, ProxyError, ShellOutput};
use crate::clock::Clock;
use crate::mirror::proc::ProcHandle;

/// Clock that records requested sleeps and yields instead of waiting.
pub(crate) struct FakeClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sleeps_of(&self, duration: Duration) -> usize {
        self.sleeps
            .lock()
            .expect("sleep log lock")
            .iter()
            .filter(|d| **d == duration)
            .count()
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleep log lock").push(duration);
        // Yield so concurrent tasks (watchers, drains) make progress.
        tokio::task::yield_now().await;
    }
}

/// What one `exec_out` call should produce.
pub(crate) enum ExecPlan {
    /// A child that prints the given text to stderr and exits nonzero.
    /// The child is reaped before it is handed out, so liveness checks
    /// observe the exit deterministically.
    FailWithStderr(String),
    /// A child that stays alive until killed.
    RunForever,
}

/// Scripted `DeviceProxy`. Shell responses are matched by command
/// prefix; unmatched commands succeed with empty output.
pub(crate) struct FakeProxy {
    online_default: bool,
    online_sequence: Mutex<VecDeque<bool>>,
    shell_responses: Mutex<Vec<(String, ShellOutput)>>,
    shell_log: Mutex<Vec<String>>,
    exec_plans: Mutex<VecDeque<ExecPlan>>,
    exec_log: Mutex<Vec<String>>,
}

impl FakeProxy {
    pub(crate) fn new() -> Self {
        Self {
            online_default: true,
            online_sequence: Mutex::new(VecDeque::new()),
            shell_responses: Mutex::new(Vec::new()),
            shell_log: Mutex::new(Vec::new()),
            exec_plans: Mutex::new(VecDeque::new()),
            exec_log: Mutex::new(Vec::new()),
        }
    }

    /// Fixed online state for every probe.
    pub(crate) fn online(mut self, online: bool) -> Self {
        self.online_default = online;
        self
    }

    /// Online states for successive probes; the default applies after
    /// the sequence is exhausted.
    pub(crate) fn online_sequence(self, states: &[bool]) -> Self {
        self.online_sequence
            .lock()
            .expect("online lock")
            .extend(states.iter().copied());
        self
    }

    /// Successful response for shell commands starting with `prefix`.
    pub(crate) fn shell_ok(self, prefix: &str, stdout: &str) -> Self {
        self.shell_responses.lock().expect("responses lock").push((
            prefix.to_string(),
            ShellOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            },
        ));
        self
    }

    /// Failing response for shell commands starting with `prefix`.
    pub(crate) fn shell_fail(self, prefix: &str, stderr: &str) -> Self {
        self.shell_responses.lock().expect("responses lock").push((
            prefix.to_string(),
            ShellOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: 1,
            },
        ));
        self
    }

    /// Queue the outcome of the next `exec_out` call.
    pub(crate) fn exec_plan(self, plan: ExecPlan) -> Self {
        self.exec_plans.lock().expect("plans lock").push_back(plan);
        self
    }

    /// Every shell command issued, joined with spaces.
    pub(crate) fn shell_log(&self) -> Vec<String> {
        self.shell_log.lock().expect("shell log lock").clone()
    }

    /// Every exec-out invocation issued, joined with spaces.
    pub(crate) fn exec_log(&self) -> Vec<String> {
        self.exec_log.lock().expect("exec log lock").clone()
    }
}

#[async_trait]
impl DeviceProxy for FakeProxy {
    async fn is_online(&self, _serial: &str) -> Result<bool, ProxyError> {
        let mut seq = self.online_sequence.lock().expect("online lock");
        Ok(seq.pop_front().unwrap_or(self.online_default))
    }

    async fn run_shell(&self, _serial: &str, args: &[&str]) -> Result<ShellOutput, ProxyError> {
        let command = args.join(" ");
        self.shell_log
            .lock()
            .expect("shell log lock")
            .push(command.clone());

        let responses = self.shell_responses.lock().expect("responses lock");
        for (prefix, response) in responses.iter() {
            if command.starts_with(prefix.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(ShellOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn exec_out(&self, _serial: &str, args: &[&str]) -> Result<Child, ProxyError> {
        self.exec_log
            .lock()
            .expect("exec log lock")
            .push(args.join(" "));

        let plan = self
            .exec_plans
            .lock()
            .expect("plans lock")
            .pop_front()
            .unwrap_or(ExecPlan::RunForever);

        match plan {
            ExecPlan::FailWithStderr(message) => {
                let mut child = Command::new("sh")
                    .args(["-c", &format!("echo '{}' >&2; exit 1", message)])
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;
                // Reap before handing out so try_wait sees the exit.
                let _ = child.wait().await;
                Ok(child)
            }
            ExecPlan::RunForever => {
                let child = Command::new("sh")
                    .args(["-c", "sleep 30"])
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()?;
                Ok(child)
            }
        }
    }
}

/// Process double that records terminations into a shared log.
pub(crate) struct FakeProc {
    name: &'static str,
    alive: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeProc {
    pub(crate) fn new(
        name: &'static str,
        alive: Arc<AtomicBool>,
        log: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self { name, alive, log }
    }
}

#[async_trait]
impl ProcHandle for FakeProc {
    fn has_exited(&mut self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    async fn terminate(&mut self, _grace: Duration) {
        self.log
            .lock()
            .expect("proc log lock")
            .push(format!("terminate {}", self.name));
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// A capture/sink pair of fake processes sharing one event log.
pub(crate) fn recording_pair() -> (
    Box<dyn ProcHandle>,
    Box<dyn ProcHandle>,
    Arc<Mutex<Vec<String>>>,
) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let capture = Box::new(FakeProc::new(
        "capture",
        Arc::new(AtomicBool::new(true)),
        log.clone(),
    ));
    let sink = Box::new(FakeProc::new(
        "sink",
        Arc::new(AtomicBool::new(true)),
        log.clone(),
    ));
    (capture, sink, log)
}

/// A capture/sink pair wired to a caller-supplied log and sink liveness
/// flag, for tests that build the pair inside a launcher double.
pub(crate) fn scripted_pair(
    log: Arc<Mutex<Vec<String>>>,
    sink_alive: Arc<AtomicBool>,
) -> (Box<dyn ProcHandle>, Box<dyn ProcHandle>) {
    let capture = Box::new(FakeProc::new(
        "capture",
        Arc::new(AtomicBool::new(true)),
        log.clone(),
    ));
    let sink = Box::new(FakeProc::new("sink", sink_alive, log));
    (capture, sink)
}
