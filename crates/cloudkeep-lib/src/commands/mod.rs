pub mod account;
pub mod config_cmd;
pub mod provider;
pub mod registry_cmd;
pub mod version;

use clap::ArgMatches;

use crate::cli::CommandRegistry;
use crate::commands::registry_cmd::ServiceRegistry;
use crate::errors::{CloudKeepError, Result};

/// Register every `cloudkeep` command.
pub fn register_commands(registry: &mut CommandRegistry) -> Result<()> {
    registry.register(account::account_meta())?;
    registry.register(provider::provider_meta())?;
    registry.register(config_cmd::config_meta())?;
    registry.register(registry_cmd::commands_meta())?;
    registry.register(version::version_meta())?;
    Ok(())
}

/// Dispatch a parsed subcommand to its handler.
///
/// Handlers pull what they need from `services`, so commands that never
/// touch accounts do not open the accounts database.
pub async fn dispatch_command(
    name: &str,
    matches: &ArgMatches,
    services: &ServiceRegistry,
) -> Result<()> {
    match name {
        "account" => account::handle_account(matches, services).await,
        "provider" => provider::handle_provider(matches, services.catalog().await?),
        "config" => config_cmd::handle_config(matches, &services.config_manager).await,
        "commands" => registry_cmd::handle_commands(matches),
        "version" => version::handle_version(matches),
        _ => Err(CloudKeepError::Command(format!("Unknown command: {name}"))),
    }
}
