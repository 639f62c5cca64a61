//! `config` command: show, set, reset, path.
//!
//! Named `config_cmd` to avoid conflict with the `config` module.

use clap::{Arg, ArgMatches, Command};

use crate::cli::{CommandBuilder, CommandCategory, CommandMeta};
use crate::config::manager::DynamicConfigManager;
use crate::errors::{CloudKeepError, Result};
use crate::output;

pub fn config_command() -> Command {
    Command::new("config")
        .visible_alias("conf")
        .about("View and modify configuration")
        .subcommand_required(true)
        .subcommand(Command::new("show").about("Print the current configuration"))
        .subcommand(
            Command::new("set")
                .about("Set a configuration key (camelCase name)")
                .arg(Arg::new("key").required(true))
                .arg(Arg::new("value").required(true)),
        )
        .subcommand(Command::new("reset").about("Restore default configuration"))
        .subcommand(Command::new("path").about("Print the configuration file path"))
}

pub fn config_meta() -> CommandMeta {
    CommandBuilder::from_clap(config_command())
        .category(CommandCategory::Utility)
        .build()
}

pub async fn handle_config(matches: &ArgMatches, config_mgr: &DynamicConfigManager) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => {
            let config = config_mgr.get_config().await;
            output::print_json(&config)?;
        }
        Some(("set", sub)) => {
            let key = required(sub, "key")?;
            let value = required(sub, "value")?;
            config_mgr.set_value(key, value).await?;
            output::success(&format!("Set {key}. Restart running commands to apply provider changes."));
        }
        Some(("reset", _)) => {
            config_mgr.reset_to_defaults().await?;
            output::success("Configuration reset to defaults");
        }
        Some(("path", _)) => println!("{}", config_mgr.config_path().display()),
        _ => {
            return Err(CloudKeepError::Command(
                "Usage: cloudkeep config <show|set|reset|path>".into(),
            ))
        }
    }
    Ok(())
}

pub(crate) fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| CloudKeepError::Command(format!("Missing argument: {name}")))
}
