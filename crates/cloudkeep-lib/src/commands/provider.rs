//! `provider` command: list the configured providers and what they support.

use clap::{ArgMatches, Command};
use serde::Serialize;

use crate::cli::{CommandBuilder, CommandCategory, CommandMeta};
use crate::errors::{CloudKeepError, Result};
use crate::output;
use crate::provider::{CapabilitySet, ProviderCatalog};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary<'a> {
    pub provider_type: &'static str,
    pub display_name: &'a str,
    pub scopes: &'a [String],
    pub capabilities: &'a CapabilitySet,
}

pub fn provider_command() -> Command {
    Command::new("provider")
        .about("Inspect configured storage providers")
        .subcommand_required(true)
        .subcommand(Command::new("list").about("List providers and their capabilities"))
}

pub fn provider_meta() -> CommandMeta {
    CommandBuilder::from_clap(provider_command())
        .category(CommandCategory::Providers)
        .build()
}

pub fn summaries(catalog: &ProviderCatalog) -> Vec<ProviderSummary<'_>> {
    catalog
        .iter()
        .map(|p| ProviderSummary {
            provider_type: p.provider_type().as_str(),
            display_name: p.display_name(),
            scopes: p.required_scopes(),
            capabilities: p.capabilities(),
        })
        .collect()
}

pub fn render_providers(catalog: &ProviderCatalog) -> String {
    let rows: Vec<Vec<String>> = catalog
        .iter()
        .map(|p| {
            let caps = p.capabilities();
            let enabled: Vec<String> = caps.enabled().iter().map(|c| c.to_string()).collect();
            vec![
                p.provider_type().to_string(),
                p.display_name().to_string(),
                caps.max_page_size.to_string(),
                enabled.join(", "),
            ]
        })
        .collect();
    output::render_table(&["TYPE", "NAME", "PAGE", "CAPABILITIES"], &rows)
}

pub fn handle_provider(matches: &ArgMatches, catalog: &ProviderCatalog) -> Result<()> {
    match matches.subcommand() {
        Some(("list", _)) => {
            if crate::cli::is_json(matches) {
                output::print_json(&summaries(catalog))?;
            } else {
                println!("{}", render_providers(catalog));
            }
            Ok(())
        }
        _ => Err(CloudKeepError::Command("Usage: cloudkeep provider list".into())),
    }
}
