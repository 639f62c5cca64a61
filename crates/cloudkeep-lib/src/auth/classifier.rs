//! Account status classifier.
//!
//! Every provider operation runs through [`AccountStatusClassifier::execute`].
//! It refuses to touch the network for accounts that are not `ok`,
//! refreshes tokens that are about to expire, and turns failed responses
//! into status transitions. It is the only place operation HTTP detail
//! becomes an `AuthFailure`.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;

use crate::account::{Account, AccountId, AccountStatus};
use crate::auth::broker::contains_marker;
use crate::auth::refresh::TokenRefreshManager;
use crate::errors::{AuthFailure, CloudKeepError, Result};
use crate::registry::AccountRegistry;

/// Raw failure of a provider operation, as seen by the file service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    Http { status: u16, body: String },
    /// The request never produced a response (DNS, connect, timeout...).
    Transport(String),
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationError::Http { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            OperationError::Http { status, body } => {
                let snippet: String = body.chars().take(200).collect();
                write!(f, "HTTP {status}: {snippet}")
            }
            OperationError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    InsufficientScope,
    AuthExpiredOrInvalidToken,
    GrantRevokedExplicit,
    Other,
}

const INSUFFICIENT_SCOPE_MARKERS: &[&str] = &[
    "insufficientpermissions",
    "insufficient_scope",
    "insufficientscope",
    "access_token_scope_insufficient",
    "scope_insufficient",
];

const REVOKED_MARKERS: &[&str] = &["invalid_grant", "token has been revoked", "revoked"];

impl FailureClass {
    pub fn of(err: &OperationError) -> Self {
        match err {
            OperationError::Transport(_) => FailureClass::Other,
            OperationError::Http { status, body } => match status {
                403 if contains_marker(body, INSUFFICIENT_SCOPE_MARKERS) => {
                    FailureClass::InsufficientScope
                }
                401 if contains_marker(body, INSUFFICIENT_SCOPE_MARKERS) => {
                    FailureClass::InsufficientScope
                }
                401 if contains_marker(body, REVOKED_MARKERS) => FailureClass::GrantRevokedExplicit,
                401 => FailureClass::AuthExpiredOrInvalidToken,
                _ => FailureClass::Other,
            },
        }
    }
}

/// What the classifier decided about a failed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Tokens were refreshed; the operation may be retried once with this account.
    Retry(Account),
    /// The operation failed. `account` is the record after any status change.
    Fail {
        account: Account,
        failure: AuthFailure,
    },
}

pub struct AccountStatusClassifier {
    registry: Arc<AccountRegistry>,
    refresher: Arc<TokenRefreshManager>,
}

impl AccountStatusClassifier {
    pub fn new(registry: Arc<AccountRegistry>, refresher: Arc<TokenRefreshManager>) -> Self {
        Self {
            registry,
            refresher,
        }
    }

    pub fn refresher(&self) -> &Arc<TokenRefreshManager> {
        &self.refresher
    }

    /// Classify a failed operation on `account` and apply the status change.
    pub async fn classify(&self, account: &Account, err: &OperationError) -> Result<Verdict> {
        self.classify_with(account, err, true).await
    }

    async fn classify_with(
        &self,
        account: &Account,
        err: &OperationError,
        allow_refresh: bool,
    ) -> Result<Verdict> {
        let class = FailureClass::of(err);
        tracing::debug!(account_id = %account.id, ?class, "Classifying operation failure: {}", err);

        match class {
            FailureClass::InsufficientScope => {
                self.fail_with(account, AccountStatus::MissingScopes, err, AuthFailure::InsufficientScope)
                    .await
            }
            FailureClass::GrantRevokedExplicit => {
                self.fail_with(
                    account,
                    AccountStatus::Revoked,
                    err,
                    AuthFailure::AuthRejected(err.to_string()),
                )
                .await
            }
            FailureClass::AuthExpiredOrInvalidToken if !allow_refresh => {
                // already refreshed during this execution
                self.fail_with(
                    account,
                    AccountStatus::Error,
                    err,
                    AuthFailure::ProviderError(err.to_string()),
                )
                .await
            }
            FailureClass::AuthExpiredOrInvalidToken if account.refresh_token.is_none() => {
                self.fail_with(account, AccountStatus::Error, err, AuthFailure::NoRefreshToken)
                    .await
            }
            FailureClass::AuthExpiredOrInvalidToken => match self.refresher.refresh(account).await {
                Ok(refreshed) => Ok(Verdict::Retry(refreshed)),
                Err(CloudKeepError::Auth(AuthFailure::AuthRejected(detail))) => {
                    // the refresh manager already stored `revoked`
                    let account = self.registry.get(&account.id).await?;
                    Ok(Verdict::Fail {
                        account,
                        failure: AuthFailure::AuthRejected(detail),
                    })
                }
                Err(CloudKeepError::Auth(failure)) => {
                    let detail = OperationError::Transport(failure.to_string());
                    self.fail_with(account, AccountStatus::Error, &detail, failure).await
                }
                Err(other) => Err(other),
            },
            FailureClass::Other => {
                let failure = match err {
                    OperationError::Transport(msg) => AuthFailure::NetworkError(msg.clone()),
                    OperationError::Http { status, .. }
                        if *status == 408 || *status == 429 || *status >= 500 =>
                    {
                        AuthFailure::NetworkError(err.to_string())
                    }
                    OperationError::Http { .. } => AuthFailure::ProviderError(err.to_string()),
                };
                self.fail_with(account, AccountStatus::Error, err, failure).await
            }
        }
    }

    async fn fail_with(
        &self,
        account: &Account,
        status: AccountStatus,
        err: &OperationError,
        failure: AuthFailure,
    ) -> Result<Verdict> {
        let detail = err.to_string();
        let account = self
            .registry
            .update(&account.id, move |a| a.mark_status(status, Some(detail), Utc::now()))
            .await?;
        Ok(Verdict::Fail { account, failure })
    }

    /// Run `op` against the account's current token under the sticky-failure,
    /// proactive-refresh and reactive-refresh rules.
    ///
    /// `op` runs at most twice: once, and once more after a reactive refresh.
    /// At most one refresh happens per call.
    pub async fn execute<T, F, Fut>(&self, account_id: &AccountId, op: F) -> Result<T>
    where
        F: Fn(Account) -> Fut,
        Fut: Future<Output = std::result::Result<T, OperationError>>,
    {
        let mut account = self.registry.get(account_id).await?;
        if !account.is_usable() {
            tracing::debug!(account_id = %account_id, status = %account.status, "Failing fast on unusable account");
            return Err(sticky_failure(&account).into());
        }

        let mut refreshed = false;
        if self.refresher.needs_refresh(&account) && account.refresh_token.is_some() {
            account = self.refresher.refresh(&account).await?;
            refreshed = true;
        }

        let err = match op(account.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match self.classify_with(&account, &err, !refreshed).await? {
            Verdict::Fail { failure, .. } => Err(failure.into()),
            Verdict::Retry(account) => match op(account.clone()).await {
                Ok(value) => Ok(value),
                Err(err) => match self.classify_with(&account, &err, false).await? {
                    Verdict::Fail { failure, .. } => Err(failure.into()),
                    Verdict::Retry(_) => Err(AuthFailure::ProviderError(err.to_string()).into()),
                },
            },
        }
    }

    /// Probe an account in `error` state and return it to `ok` on success.
    ///
    /// This is the one path that calls out for a non-`ok` account. Accounts
    /// that need reauthentication are refused; `ok` accounts are probed
    /// through the normal execution path.
    pub async fn revalidate<F, Fut>(&self, account_id: &AccountId, probe: F) -> Result<Account>
    where
        F: Fn(Account) -> Fut,
        Fut: Future<Output = std::result::Result<(), OperationError>>,
    {
        let account = self.registry.get(account_id).await?;
        match account.status {
            AccountStatus::Ok => {
                self.execute(account_id, probe).await?;
                return self.registry.get(account_id).await;
            }
            AccountStatus::Error => {}
            _ => return Err(sticky_failure(&account).into()),
        }

        tracing::info!(account_id = %account_id, "Revalidating account");
        let mut current = account;
        let mut allow_refresh = true;
        loop {
            match probe(current.clone()).await {
                Ok(()) => {
                    return self
                        .registry
                        .update(account_id, |a| a.mark_ok(Utc::now()))
                        .await;
                }
                Err(err) => match self.classify_with(&current, &err, allow_refresh).await? {
                    Verdict::Retry(next) => {
                        current = next;
                        allow_refresh = false;
                    }
                    Verdict::Fail { failure, .. } => return Err(failure.into()),
                },
            }
        }
    }
}

/// The failure an unusable account reports without any network call.
pub fn sticky_failure(account: &Account) -> AuthFailure {
    let detail = account
        .last_error
        .clone()
        .unwrap_or_else(|| format!("account status is {}", account.status));
    match &account.status {
        AccountStatus::MissingScopes => AuthFailure::InsufficientScope,
        AccountStatus::Revoked | AccountStatus::Unknown(_) => AuthFailure::AuthRejected(detail),
        AccountStatus::Error | AccountStatus::Ok => AuthFailure::ProviderError(detail),
    }
}
