pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, Commands, ConfigOverrides};
pub use output::{OutputFormat, OutputFormatter};
