use thiserror::Error;

use crate::provider::Capability;

/// Failure taxonomy shared by the authentication core.
///
/// Only the intermediary broker, the refresh manager and the status
/// classifier translate raw transport detail into these variants; every
/// other caller matches on them and never sees HTTP status codes.
///
/// The enum is `Clone` so that a single coalesced refresh outcome can be
/// handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Authentication cancelled by the user")]
    UserCancelled,

    #[error("Callback state does not match the pending authentication attempt")]
    StateMismatch,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Account has no refresh token")]
    NoRefreshToken,

    #[error("Grant rejected by the provider: {0}")]
    AuthRejected(String),

    #[error("Granted scopes are insufficient for this operation")]
    InsufficientScope,

    #[error("Capability violation: provider does not support {capability}")]
    CapabilityViolation { capability: Capability },

    #[error("Provider error: {0}")]
    ProviderError(String),
}

#[derive(Error, Debug)]
pub enum CloudKeepError {
    #[error(transparent)]
    Auth(#[from] AuthFailure),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("{0}")]
    Application(String),
}

pub type Result<T> = std::result::Result<T, CloudKeepError>;

/// What the user should be offered after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Neutral, non-blocking notice (user cancelled).
    Notice,
    /// Prompt the user to reauthenticate the account.
    Reauthenticate,
    /// Offer a retry.
    Retry,
    /// Caller defect; never shown to an end user as-is.
    Internal,
    /// Plain failure message.
    Fail,
}

impl CloudKeepError {
    /// Returns the taxonomy entry when this error originates in the auth core.
    pub fn auth_failure(&self) -> Option<&AuthFailure> {
        match self {
            CloudKeepError::Auth(f) => Some(f),
            _ => None,
        }
    }

    pub fn user_action(&self) -> UserAction {
        match self {
            CloudKeepError::Auth(f) => match f {
                AuthFailure::UserCancelled => UserAction::Notice,
                AuthFailure::AuthRejected(_)
                | AuthFailure::InsufficientScope
                | AuthFailure::NoRefreshToken => UserAction::Reauthenticate,
                AuthFailure::NetworkError(_) => UserAction::Retry,
                AuthFailure::CapabilityViolation { .. } => UserAction::Internal,
                AuthFailure::StateMismatch | AuthFailure::ProviderError(_) => UserAction::Fail,
            },
            _ => UserAction::Fail,
        }
    }
}

/// Logs a fatal error and exits the process with code 1.
///
/// This function never returns (`-> !`). It is intended for unrecoverable
/// errors during initialization or command execution.
pub fn handle_fatal(err: CloudKeepError) -> ! {
    tracing::error!("Fatal error: {}", err);
    std::process::exit(1)
}

/// Maps a `CloudKeepError` to user-facing CLI output.
///
/// Uses `crate::output::error()` for the main message and
/// `crate::output::info()` for the follow-up hint.
pub fn handle_command_error(err: &CloudKeepError) {
    use crate::output;

    match err.user_action() {
        UserAction::Notice => {
            output::info("Sign-in was cancelled. Nothing was changed.");
        }
        UserAction::Reauthenticate => {
            output::error(&format!("{}", err));
            output::info("Run `cloudkeep account login <provider>` to reauthenticate this account.");
        }
        UserAction::Retry => {
            output::error(&format!("{}", err));
            output::info("Check your network connection and try again.");
        }
        UserAction::Internal => {
            tracing::error!("caller defect: {}", err);
            output::error("Internal error: this operation is not available for the account's provider.");
        }
        UserAction::Fail => match err {
            CloudKeepError::Config(msg) => {
                output::error(&format!("Configuration error: {}", msg));
                output::info("Run `cloudkeep config path` to locate the configuration file.");
            }
            CloudKeepError::AccountNotFound(id) => {
                output::error(&format!("Account '{}' not found", id));
                output::info("Run `cloudkeep account list` to see configured accounts.");
            }
            _ => output::error(&format!("{}", err)),
        },
    }
}
