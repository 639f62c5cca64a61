pub mod registry;

pub use registry::{CommandBuilder, CommandCategory, CommandMeta, CommandRegistry};

pub const APP_NAME: &str = "cloudkeep";

/// Root command with the global `--verbose` and `--json` flags.
pub fn create_root_command() -> clap::Command {
    clap::Command::new(APP_NAME)
        .about("Connect and keep cloud drive accounts authenticated")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            clap::Arg::new("json")
                .long("json")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .help("Output in JSON format"),
        )
}

/// Verbose is suppressed by `--json` to keep JSON output clean.
pub fn is_verbose(matches: &clap::ArgMatches) -> bool {
    matches.get_flag("verbose") && !is_json(matches)
}

/// `--json` is global, so subcommand matches carry it too.
pub fn is_json(matches: &clap::ArgMatches) -> bool {
    matches.try_get_one::<bool>("json").ok().flatten().copied().unwrap_or(false)
}
