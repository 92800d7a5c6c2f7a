mod args;
mod runner;

pub(crate) use args::{Cli, Commands, SensorAction};
pub(crate) use runner::run;
