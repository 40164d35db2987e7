//! Config subcommand handlers.

use std::path::Path;

use fieldsim_config::{Config, ConfigError, load_config, save_config};

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::error::CliError;

pub fn handle(args: ConfigArgs, path: &Path) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(path, &Config::starter()).map_err(|e| CliError::config(path, e))?;
            eprintln!("Wrote starter config to {}", path.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = load_config(path).map_err(|e| CliError::config(path, e))?;
            let rendered = toml::to_string_pretty(&cfg)
                .map_err(|e| CliError::config(path, ConfigError::from(e)))?;
            print!("{rendered}");
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}
