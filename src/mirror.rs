use thiserror::Error;

pub mod filters;
pub mod negotiate;
pub mod options;
pub mod pipeline;
pub mod proc;
pub mod session;
#[cfg(test)]
pub(crate) mod testutil;

pub use options::{DisplayChoice, Eye, SessionOptions, SinkKind};
pub use session::{MirrorSession, SessionEvent, SessionState};

/// Failures the mirror core surfaces to its caller. Best-effort steps
/// (wake, sensor override, teardown) never produce these; they are
/// logged and swallowed.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The device never reported itself online. Hard gate, not retried.
    #[error("device {0} is not reachable over adb")]
    DeviceUnreachable(String),

    /// The capture process died locally or never showed up on the device.
    #[error("capture process failed to start: {detail}")]
    CaptureFailedToStart { detail: String },

    /// The sink process could not be spawned or exited immediately.
    #[error("sink process failed to start: {detail}")]
    SinkFailedToStart { detail: String },

    /// The whole attempt series was exhausted.
    #[error("failed to start mirror after {attempts} attempts: {last}")]
    StartFailed { attempts: u32, last: Box<MirrorError> },
}
