use std::sync::Arc;

use cloudkeep_lib::cli::{create_root_command, is_verbose, CommandRegistry};
use cloudkeep_lib::commands::register_commands;
use cloudkeep_lib::commands::registry_cmd::ServiceRegistry;
use cloudkeep_lib::config::manager::DynamicConfigManager;
use cloudkeep_lib::config::simplified::SimplifiedConfig;
use cloudkeep_lib::errors::{handle_fatal, CloudKeepError};
use cloudkeep_lib::http_client::HttpClient;
use cloudkeep_lib::signal::SignalHandler;

#[tokio::main]
async fn main() {
    // Step 1: resolve paths from the environment
    let paths = SimplifiedConfig::get();

    // Step 2: build the command tree and parse arguments
    let mut registry = CommandRegistry::new(create_root_command());
    if let Err(e) = register_commands(&mut registry) {
        handle_fatal(e);
    }
    let matches = registry.build_root().get_matches();

    // Step 3: logging, with --verbose raising the level
    let verbose = is_verbose(&matches);
    cloudkeep_lib::logger::set_verbose(verbose);
    cloudkeep_lib::logger::init(verbose);
    tracing::debug!(data_dir = %paths.data_dir.display(), "Starting");

    // Step 4: Ctrl-C / SIGTERM cancel pending sign-ins
    let (shutdown, _signal_task) = SignalHandler::new().spawn();

    // Step 5: config, HTTP client and lazily-built services
    let config_manager = match DynamicConfigManager::initialize(None).await {
        Ok(manager) => Arc::new(manager),
        Err(e) => handle_fatal(e),
    };
    let config = config_manager.get_config().await;
    let http_client = match HttpClient::new(&config) {
        Ok(client) => client,
        Err(e) => handle_fatal(e),
    };
    let services = ServiceRegistry::new(config_manager, http_client, shutdown);
    services.register_config_listeners().await;

    // Step 6: dispatch
    match matches.subcommand() {
        Some((name, sub_matches)) => {
            tracing::debug!(command = name, "Executing command");
            if let Err(e) =
                cloudkeep_lib::commands::dispatch_command(name, sub_matches, &services).await
            {
                cloudkeep_lib::errors::handle_command_error(&e);
                std::process::exit(1);
            }
        }
        None => {
            let mut registry = CommandRegistry::new(create_root_command());
            if let Err(e) = register_commands(&mut registry) {
                handle_fatal(e);
            }
            if let Err(e) = registry.build_root().print_help() {
                handle_fatal(CloudKeepError::Application(format!("Failed to print help: {e}")));
            }
        }
    }
}
