//! Scheduler scenarios, grouped by concern

pub mod fakes;

mod apply_cycle;
mod attempts;
mod deletion;
mod dependencies;
