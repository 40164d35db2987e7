//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use fieldsim_config::ConfigError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("No devices configured")]
    #[diagnostic(
        code(fieldsim::no_devices),
        help(
            "Create a starter config with: fieldsim config init\n\
             Expected at: {path}"
        )
    )]
    NoDevices { path: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(fieldsim::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error("None of the {enabled} enabled devices came online")]
    #[diagnostic(
        code(fieldsim::nothing_running),
        help("Check that the configured addresses and ports are free; rerun with -v for details.")
    )]
    NothingRunning { enabled: usize },

    #[error("{source}")]
    #[diagnostic(code(fieldsim::config), help("Check the config file: {path}"))]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        Self::Config {
            path: path.display().to_string(),
            source,
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NothingRunning { .. } => exit_code::CONNECTION,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::NoDevices { .. }
            | Self::Config {
                source: ConfigError::Validation { .. } | ConfigError::Figment(_),
                ..
            } => exit_code::USAGE,
            Self::Config { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}
