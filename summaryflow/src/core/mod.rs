//! Core result types shared by stages and pipelines.

mod output;
mod status;

pub use output::StageOutput;
pub use status::StageStatus;
