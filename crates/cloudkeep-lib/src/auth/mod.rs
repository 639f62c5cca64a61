//! Authentication and account-lifecycle core.
//!
//! Components, leaves first:
//! - [`state`]: single-use correlation tokens
//! - [`broker`]: token retrieval and refresh through the intermediary
//! - [`callback`]: redirect capture
//! - [`coordinator`]: the OAuth handshake
//! - [`refresh`]: coalesced token refresh
//! - [`classifier`]: status transitions driven by operation failures

pub mod broker;
pub mod callback;
pub mod classifier;
pub mod coordinator;
pub mod refresh;
pub mod state;

pub use broker::{HttpTokenBroker, Profile, TokenBroker, TokenGrant};
pub use callback::{AuthSurface, CallbackParams, LoopbackAuthSurface, RedirectOutcome};
pub use classifier::{AccountStatusClassifier, FailureClass, OperationError, Verdict};
pub use coordinator::{AuthOutcome, OAuthFlowCoordinator, PendingHandshake};
pub use refresh::TokenRefreshManager;
