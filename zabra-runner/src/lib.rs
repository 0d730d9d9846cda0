mod executor;
pub mod process;

pub use executor::{run_command, CommandRunner};
