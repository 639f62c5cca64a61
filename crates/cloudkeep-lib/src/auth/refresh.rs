//! Token refresh with per-account coalescing.
//!
//! At most one refresh call per account id is in flight. Callers that ask
//! while one is running await the same shared outcome. The refresh runs on
//! its own task, so it completes and persists even if every caller that
//! was waiting on it goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::account::{Account, AccountId, AccountStatus};
use crate::auth::broker::TokenBroker;
use crate::errors::{AuthFailure, CloudKeepError, Result};
use crate::provider::ProviderCatalog;
use crate::registry::AccountRegistry;

type SharedOutcome = std::result::Result<Account, Arc<CloudKeepError>>;
type InFlight = Shared<BoxFuture<'static, SharedOutcome>>;

pub struct TokenRefreshManager {
    registry: Arc<AccountRegistry>,
    broker: Arc<dyn TokenBroker>,
    catalog: Arc<ProviderCatalog>,
    timeout: Duration,
    margin: chrono::Duration,
    in_flight: Arc<Mutex<HashMap<AccountId, (u64, InFlight)>>>,
    generation: AtomicU64,
}

impl TokenRefreshManager {
    /// `timeout` bounds each refresh call; `margin` is how close to expiry
    /// a token may get before it is refreshed proactively.
    pub fn new(
        registry: Arc<AccountRegistry>,
        broker: Arc<dyn TokenBroker>,
        catalog: Arc<ProviderCatalog>,
        timeout: Duration,
        margin: chrono::Duration,
    ) -> Self {
        Self {
            registry,
            broker,
            catalog,
            timeout,
            margin,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// True when the account's token expires within the safety margin.
    pub fn needs_refresh(&self, account: &Account) -> bool {
        account.expires_within(self.margin, Utc::now())
    }

    /// Refresh `account`'s tokens through the intermediary.
    ///
    /// * no refresh token: `NoRefreshToken`, no call, status unchanged
    /// * success: new tokens stored; `ok` and `error` become `ok`, other
    ///   statuses only change through reauthentication
    /// * grant rejected: status `revoked`, `AuthRejected`
    /// * timeout or transport failure: status unchanged, `NetworkError`
    pub async fn refresh(&self, account: &Account) -> Result<Account> {
        let id = account.id.clone();
        let shared = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&id) {
                Some((_, shared)) => {
                    tracing::debug!(account_id = %id, "Joining in-flight token refresh");
                    shared.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let shared = self.spawn_refresh(id.clone(), generation);
                    in_flight.insert(id.clone(), (generation, shared.clone()));
                    shared
                }
            }
        };

        shared.await.map_err(unshare)
    }

    /// Refresh only when the token is about to expire.
    pub async fn ensure_fresh(&self, account: &Account) -> Result<Account> {
        if self.needs_refresh(account) {
            self.refresh(account).await
        } else {
            Ok(account.clone())
        }
    }

    fn spawn_refresh(&self, id: AccountId, generation: u64) -> InFlight {
        let registry = self.registry.clone();
        let broker = self.broker.clone();
        let catalog = self.catalog.clone();
        let in_flight = self.in_flight.clone();
        let timeout = self.timeout;
        let task_id = id.clone();

        let handle = tokio::spawn(async move {
            let outcome = run_refresh(&registry, broker.as_ref(), &catalog, &task_id, timeout)
                .await
                .map_err(Arc::new);
            // unregister before publishing so late callers start a new refresh
            let mut in_flight = in_flight.lock().await;
            if in_flight.get(&task_id).is_some_and(|(g, _)| *g == generation) {
                in_flight.remove(&task_id);
            }
            outcome
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Arc::new(CloudKeepError::Application(format!(
                    "Token refresh task for {id} failed: {e}"
                )))),
            }
        }
        .boxed()
        .shared()
    }
}

async fn run_refresh(
    registry: &AccountRegistry,
    broker: &dyn TokenBroker,
    catalog: &ProviderCatalog,
    id: &AccountId,
    timeout: Duration,
) -> Result<Account> {
    let current = registry.get(id).await?;
    let refresh_token = match current.refresh_token.as_deref() {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => return Err(AuthFailure::NoRefreshToken.into()),
    };
    let config = catalog.get(current.provider_type)?;

    tracing::debug!(account_id = %id, "Refreshing access token");
    let outcome = match tokio::time::timeout(timeout, broker.refresh(config, &refresh_token)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(AuthFailure::NetworkError(format!(
            "token refresh timed out after {}s",
            timeout.as_secs()
        ))),
    };

    match outcome {
        Ok(grant) => {
            let account = registry
                .update(id, move |account| {
                    let now = Utc::now();
                    account.apply_tokens(
                        grant.access_token,
                        grant.refresh_token,
                        grant.expires_at,
                        now,
                    );
                    if matches!(account.status, AccountStatus::Ok | AccountStatus::Error) {
                        account.mark_ok(now);
                    }
                })
                .await?;
            tracing::info!(account_id = %id, "Access token refreshed");
            Ok(account)
        }
        Err(AuthFailure::AuthRejected(detail)) => {
            let note = detail.clone();
            registry
                .update(id, move |account| {
                    account.mark_status(AccountStatus::Revoked, Some(note), Utc::now())
                })
                .await?;
            tracing::warn!(account_id = %id, "Refresh rejected, grant revoked: {}", detail);
            Err(AuthFailure::AuthRejected(detail).into())
        }
        Err(failure) => {
            tracing::warn!(account_id = %id, "Token refresh failed: {}", failure);
            Err(failure.into())
        }
    }
}

/// Turn a shared error back into an owned one for a single caller.
fn unshare(err: Arc<CloudKeepError>) -> CloudKeepError {
    match Arc::try_unwrap(err) {
        Ok(owned) => owned,
        Err(shared) => match shared.as_ref() {
            CloudKeepError::Auth(f) => CloudKeepError::Auth(f.clone()),
            CloudKeepError::AccountNotFound(id) => CloudKeepError::AccountNotFound(id.clone()),
            CloudKeepError::Config(msg) => CloudKeepError::Config(msg.clone()),
            other => CloudKeepError::Storage(other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, grant, ScriptedBroker, TestRegistry};

    fn manager(env: &TestRegistry, broker: &Arc<ScriptedBroker>) -> TokenRefreshManager {
        TokenRefreshManager::new(
            env.registry.clone(),
            broker.clone(),
            Arc::new(catalog()),
            Duration::from_secs(5),
            chrono::Duration::minutes(5),
        )
    }

    fn failure(result: Result<Account>) -> AuthFailure {
        match result {
            Err(CloudKeepError::Auth(f)) => f,
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_success_updates_tokens() {
        // expired an hour ago, refresh token r1
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
            .await;
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_refresh(Ok(grant("a2", Some("r2"), Some(3600))));
        let mgr = manager(&env, &broker);

        let refreshed = mgr.refresh(&account).await.unwrap();
        assert_eq!(refreshed.access_token, "a2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r2"));
        assert_eq!(refreshed.status, AccountStatus::Ok);
        assert!(refreshed.updated_at > account.updated_at);
        assert!(!mgr.needs_refresh(&refreshed));

        let stored = env.registry.get(&account.id).await.unwrap();
        assert_eq!(stored.access_token, "a2");
        assert_eq!(broker.refresh_tokens_seen(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_no_refresh_token_is_distinct_and_makes_no_call() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", None, chrono::Duration::hours(-1))
            .await;
        let broker = Arc::new(ScriptedBroker::new());
        let mgr = manager(&env, &broker);
        let saves_before = env.store.saves();

        let f = failure(mgr.refresh(&account).await);
        assert_eq!(f, AuthFailure::NoRefreshToken);
        assert_ne!(f, AuthFailure::AuthRejected(String::new()));
        assert_eq!(broker.refresh_calls(), 0);
        assert_eq!(env.store.saves(), saves_before);
        assert_eq!(
            env.registry.get(&account.id).await.unwrap().status,
            AccountStatus::Ok
        );
    }

    #[tokio::test]
    async fn test_rejected_grant_marks_revoked() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
            .await;
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_refresh(Err(AuthFailure::AuthRejected("invalid_grant".into())));
        let mgr = manager(&env, &broker);

        let f = failure(mgr.refresh(&account).await);
        assert_eq!(f, AuthFailure::AuthRejected("invalid_grant".into()));

        let stored = env.registry.get(&account.id).await.unwrap();
        assert_eq!(stored.status, AccountStatus::Revoked);
        assert!(!stored.is_usable());
        assert_eq!(stored.last_error.as_deref(), Some("invalid_grant"));
    }

    #[tokio::test]
    async fn test_network_failure_leaves_status_unchanged() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
            .await;
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_refresh(Err(AuthFailure::NetworkError("HTTP 503".into())));
        let mgr = manager(&env, &broker);
        let saves_before = env.store.saves();

        let f = failure(mgr.refresh(&account).await);
        assert!(matches!(f, AuthFailure::NetworkError(_)));
        assert_eq!(env.store.saves(), saves_before);
        assert_eq!(
            env.registry.get(&account.id).await.unwrap().status,
            AccountStatus::Ok
        );
    }

    #[tokio::test]
    async fn test_timeout_is_network_error_not_revocation() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
            .await;
        let broker = Arc::new(ScriptedBroker::with_delay(Duration::from_millis(500)));
        broker.push_refresh(Ok(grant("late", None, Some(3600))));
        let mgr = TokenRefreshManager::new(
            env.registry.clone(),
            broker.clone(),
            Arc::new(catalog()),
            Duration::from_millis(20),
            chrono::Duration::minutes(5),
        );

        let f = failure(mgr.refresh(&account).await);
        assert!(matches!(f, AuthFailure::NetworkError(_)));
        let stored = env.registry.get(&account.id).await.unwrap();
        assert_eq!(stored.status, AccountStatus::Ok);
        assert_ne!(stored.access_token, "late");
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
            .await;
        let broker = Arc::new(ScriptedBroker::with_delay(Duration::from_millis(50)));
        broker.push_refresh(Ok(grant("a2", Some("r2"), Some(3600))));
        broker.push_refresh(Ok(grant("a3", Some("r3"), Some(3600))));
        let mgr = Arc::new(manager(&env, &broker));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = mgr.clone();
            let account = account.clone();
            handles.push(tokio::spawn(async move { mgr.refresh(&account).await }));
        }
        for handle in handles {
            let refreshed = handle.await.unwrap().unwrap();
            assert_eq!(refreshed.access_token, "a2");
        }
        assert_eq!(broker.refresh_calls(), 1);

        // a later request starts a new call
        let again = mgr.refresh(&account).await.unwrap();
        assert_eq!(again.access_token, "a3");
        assert_eq!(broker.refresh_calls(), 2);
        assert_eq!(
            broker.refresh_tokens_seen(),
            vec!["r1".to_string(), "r2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_coalesced_failure_shared_by_all_waiters() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
            .await;
        let broker = Arc::new(ScriptedBroker::with_delay(Duration::from_millis(50)));
        broker.push_refresh(Err(AuthFailure::AuthRejected("invalid_grant".into())));
        let mgr = Arc::new(manager(&env, &broker));

        let a = {
            let mgr = mgr.clone();
            let account = account.clone();
            tokio::spawn(async move { mgr.refresh(&account).await })
        };
        let b = {
            let mgr = mgr.clone();
            let account = account.clone();
            tokio::spawn(async move { mgr.refresh(&account).await })
        };
        assert!(matches!(
            failure(a.await.unwrap()),
            AuthFailure::AuthRejected(_)
        ));
        assert!(matches!(
            failure(b.await.unwrap()),
            AuthFailure::AuthRejected(_)
        ));
        assert_eq!(broker.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_valid_tokens() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(2))
            .await;
        let broker = Arc::new(ScriptedBroker::new());
        let mgr = manager(&env, &broker);

        let same = mgr.ensure_fresh(&account).await.unwrap();
        assert_eq!(same.access_token, account.access_token);
        assert_eq!(broker.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_keeps_reauth_statuses() {
        for status in [
            AccountStatus::MissingScopes,
            AccountStatus::Revoked,
            AccountStatus::Unknown("suspended".into()),
        ] {
            let env = TestRegistry::new();
            let account = env
                .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
                .await;
            let expected = status.clone();
            env.registry
                .update(&account.id, move |a| a.mark_status(status, None, Utc::now()))
                .await
                .unwrap();
            let broker = Arc::new(ScriptedBroker::new());
            broker.push_refresh(Ok(grant("a2", None, Some(3600))));
            let mgr = manager(&env, &broker);

            let refreshed = mgr.refresh(&account).await.unwrap();
            assert_eq!(refreshed.access_token, "a2");
            assert_eq!(refreshed.status, expected);
            assert_eq!(env.registry.get(&account.id).await.unwrap().status, expected);
        }
    }

    #[tokio::test]
    async fn test_refresh_clears_error_status() {
        let env = TestRegistry::new();
        let account = env
            .insert_expired("ext-1", Some("r1"), chrono::Duration::hours(-1))
            .await;
        env.registry
            .update(&account.id, |a| {
                a.mark_status(AccountStatus::Error, Some("HTTP 500".into()), Utc::now())
            })
            .await
            .unwrap();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_refresh(Ok(grant("a2", None, Some(3600))));
        let mgr = manager(&env, &broker);

        let refreshed = mgr.refresh(&account).await.unwrap();
        assert_eq!(refreshed.status, AccountStatus::Ok);
        assert!(refreshed.last_error.is_none());
    }
}
