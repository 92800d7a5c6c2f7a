use serde::{Deserialize, Serialize};

/// Which half of the side-by-side stereo frame to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    /// Full frame, both eyes side by side (device default)
    #[default]
    Both,
    /// Left half only
    Left,
    /// Right half only
    Right,
}

impl Eye {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "both" => Some(Eye::Both),
            "left" => Some(Eye::Left),
            "right" => Some(Eye::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Eye::Both => "both",
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

/// Where the decoded stream goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Local ffplay window
    Window,
    /// MPEG-TS over UDP to localhost, for OBS or another consumer
    Relay { port: u16 },
}

/// Everything one mirror attempt needs. Immutable per attempt.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Video bit rate in raw bits per second
    pub bitrate_bps: u64,
    pub width: u32,
    pub height: u32,
    pub eye: Eye,
    /// Rotation in degrees, 0 = no-op
    pub rotation_deg: i32,
    /// Lens correction coefficients, 0.0 = no-op
    pub k1: f64,
    pub k2: f64,
    pub sink: SinkKind,
    /// Requested compositor output id; None lets negotiation decide
    pub display: Option<u64>,
    /// Window title for the sink window
    pub window_title: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            bitrate_bps: 5_000_000,
            width: 1280,
            height: 720,
            eye: Eye::Both,
            rotation_deg: 0,
            k1: 0.0,
            k2: 0.0,
            sink: SinkKind::Window,
            display: None,
            window_title: "Quest Stream".to_string(),
        }
    }
}

/// Outcome of display-id negotiation. Omitting the flag lets the capture
/// tool pick its own default, which is safer on single-display firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayChoice {
    Omit,
    Explicit(u64),
}

impl DisplayChoice {
    pub fn is_explicit(&self) -> bool {
        matches!(self, DisplayChoice::Explicit(_))
    }
}
