pub mod commands;
pub mod config;

pub use config::{CliArgs, Command, Config};
