mod core;
mod diag;

pub use core::{cmd_devices, cmd_reset_adb, cmd_sensor, cmd_start, resolve_serial};
pub use diag::{cmd_diagnose, cmd_dump};
