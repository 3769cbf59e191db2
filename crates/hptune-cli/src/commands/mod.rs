//! CLI Command Implementations
//!
//! - [`train`]: one tuning trial
//! - [`report`]: manual metric records
//! - [`inspect`]: metrics file viewer

mod inspect;
mod report;
mod train;

pub use inspect::InspectCommand;
pub use report::ReportCommand;
pub use train::{run_trial, TrainCommand};
