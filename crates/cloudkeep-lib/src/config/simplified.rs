use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Immutable paths resolved once at startup from environment variables.
///
/// Access via `SimplifiedConfig::get()` which returns a `&'static SimplifiedConfig`.
/// `CLOUDKEEP_HOME` overrides the data directory; otherwise `~/.cloudkeep`.
pub struct SimplifiedConfig {
    pub home_dir: PathBuf,
    pub data_dir: PathBuf,
    pub accounts_db_file: PathBuf,
}

static CONFIG: OnceLock<SimplifiedConfig> = OnceLock::new();

impl SimplifiedConfig {
    /// Returns a reference to the global `SimplifiedConfig` singleton.
    pub fn get() -> &'static SimplifiedConfig {
        CONFIG.get_or_init(SimplifiedConfig::from_env)
    }

    fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let data_dir = std::env::var("CLOUDKEEP_HOME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self::with_dirs(Path::new(&home), data_dir)
    }

    fn with_dirs(home_dir: &Path, data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir.unwrap_or_else(|| home_dir.join(".cloudkeep"));
        Self {
            home_dir: home_dir.to_path_buf(),
            accounts_db_file: data_dir.join("accounts.db"),
            data_dir,
        }
    }
}
