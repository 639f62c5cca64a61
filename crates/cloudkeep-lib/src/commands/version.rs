//! `version` command. Honors the global `--json` flag.

use clap::{ArgMatches, Command};
use serde::Serialize;

use crate::cli::{CommandBuilder, CommandCategory, CommandMeta, APP_NAME};
use crate::errors::Result;

#[derive(Debug, Serialize, PartialEq)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
    }
}

pub fn version_command() -> Command {
    Command::new("version").about("Show version information")
}

pub fn version_meta() -> CommandMeta {
    CommandBuilder::from_clap(version_command())
        .category(CommandCategory::Utility)
        .build()
}

pub fn handle_version(matches: &ArgMatches) -> Result<()> {
    let info = version_info();
    if crate::cli::is_json(matches) {
        crate::output::print_json(&info)?;
    } else {
        println!("{} version {}", info.name, info.version);
    }
    Ok(())
}
