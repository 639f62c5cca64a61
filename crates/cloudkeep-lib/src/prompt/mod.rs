//! Interactive prompts via `dialoguer`.
//!
//! Both prompts return `None` when the user backs out (Esc / Ctrl-C), so
//! callers can treat that the same as answering "no".

use dialoguer::{theme::ColorfulTheme, Confirm, Select};

use crate::errors::{CloudKeepError, Result};

/// Display a single-select menu and return the chosen index.
pub fn select_menu(prompt: &str, items: &[&str]) -> Result<Option<usize>> {
    Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact_opt()
        .map_err(|e| CloudKeepError::Application(format!("Select menu error: {e}")))
}

/// Display a yes/no confirmation prompt with `default` pre-selected.
pub fn confirm(prompt: &str, default: bool) -> Result<Option<bool>> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default)
        .interact_opt()
        .map_err(|e| CloudKeepError::Application(format!("Confirm prompt error: {e}")))
}
