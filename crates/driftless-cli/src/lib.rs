mod cli;
mod error;
mod init;

pub use cli::{exec, Cli, Command};
pub use error::{DriftCliError, DriftCliResult};
