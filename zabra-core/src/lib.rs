pub mod config;
pub mod error;
pub mod models;

pub use config::{load_config, ConfigOverrides, RunnerConfig, ZabraConfig};
pub use error::{Result, ZabraError};
pub use models::{CommandInvocation, CommandReport, MAX_APPLY_TIMEOUT};
