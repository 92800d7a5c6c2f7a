//! Video-filter chain construction. Pure: calibration + eye selection +
//! geometry in, ordered ffmpeg `-vf` stages out. Stage order is fixed
//! (crop, rotate, lens correction, timestamp reset) and the timestamp
//! reset is always last so the sink never buffers stale frames.

use super::options::{Eye, SessionOptions};

/// One transform applied to the decoded stream before display.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStage {
    Crop { x: u32, y: u32, width: u32, height: u32 },
    Rotate(i32),
    LensCorrect { k1: f64, k2: f64 },
    ResetTimestamps,
}

impl FilterStage {
    /// ffmpeg filter expression for this stage.
    pub fn to_expr(&self) -> String {
        match self {
            FilterStage::Crop { x, y, width, height } => {
                format!("crop={}:{}:{}:{}", width, height, x, y)
            }
            FilterStage::Rotate(degrees) => format!("rotate={}*PI/180", degrees),
            FilterStage::LensCorrect { k1, k2 } => {
                format!("lenscorrection=cx=0.5:cy=0.5:k1={}:k2={}", k1, k2)
            }
            FilterStage::ResetTimestamps => "setpts=0".to_string(),
        }
    }
}

/// Build the stage sequence for one attempt. Zero-valued rotation and
/// lens coefficients are omitted entirely rather than passed as no-op
/// expressions the sink might reject.
pub fn build(options: &SessionOptions) -> Vec<FilterStage> {
    let mut stages = Vec::new();

    // The headset composites both eyes side by side; an eye selection
    // crops at the horizontal midpoint. Odd widths drop the extra
    // column from the right half.
    let half = options.width / 2;
    match options.eye {
        Eye::Both => {}
        Eye::Left => stages.push(FilterStage::Crop {
            x: 0,
            y: 0,
            width: half,
            height: options.height,
        }),
        Eye::Right => stages.push(FilterStage::Crop {
            x: half,
            y: 0,
            width: half,
            height: options.height,
        }),
    }

    if options.rotation_deg != 0 {
        stages.push(FilterStage::Rotate(options.rotation_deg));
    }

    if options.k1 != 0.0 || options.k2 != 0.0 {
        stages.push(FilterStage::LensCorrect {
            k1: options.k1,
            k2: options.k2,
        });
    }

    stages.push(FilterStage::ResetTimestamps);
    stages
}

/// Combined `-vf` expression, stages joined in order.
pub fn chain_expr(stages: &[FilterStage]) -> String {
    stages
        .iter()
        .map(FilterStage::to_expr)
        .collect::<Vec<_>>()
        .join(",")
}
