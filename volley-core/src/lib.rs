mod config;
mod constants;
mod error;
mod plan_file;
mod sample;
mod schedule;
mod stats;
mod threshold;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use plan_file::*;
pub use sample::*;
pub use schedule::*;
pub use stats::*;
pub use threshold::*;
