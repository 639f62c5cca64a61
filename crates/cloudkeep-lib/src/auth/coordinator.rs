//! OAuth flow coordinator.
//!
//! Drives authorize → redirect → token retrieval through the intermediary.
//! The authorization URL and the token retrieval both target the
//! intermediary; the app never sees an authorization code exchange or a
//! client secret. A registry mutation happens only after a callback with a
//! matching `state` produced tokens.

use std::sync::Arc;
use std::time::Duration;

use crate::account::Account;
use crate::auth::broker::TokenBroker;
use crate::auth::callback::{AuthSurface, CallbackParams, RedirectOutcome};
use crate::auth::state::PendingStates;
use crate::crypto;
use crate::errors::{AuthFailure, Result};
use crate::provider::{ProviderConfiguration, ProviderType};
use crate::registry::{AccountRegistry, AuthenticatedIdentity};

/// One started authentication attempt.
#[derive(Debug, Clone)]
pub struct PendingHandshake {
    pub provider_type: ProviderType,
    pub state: String,
    pub authorization_url: String,
}

/// Terminal result of an attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated(Account),
    Cancelled,
}

pub struct OAuthFlowCoordinator {
    registry: Arc<AccountRegistry>,
    broker: Arc<dyn TokenBroker>,
    pending: PendingStates,
}

impl OAuthFlowCoordinator {
    /// `handshake_ttl` bounds how long a started attempt stays pending.
    pub fn new(
        registry: Arc<AccountRegistry>,
        broker: Arc<dyn TokenBroker>,
        handshake_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            broker,
            pending: PendingStates::new(handshake_ttl),
        }
    }

    /// Issue a fresh `state` and build the intermediary authorization URL.
    pub async fn start_authentication(
        &self,
        config: &ProviderConfiguration,
    ) -> Result<PendingHandshake> {
        let state = self.pending.issue(config.provider_type()).await?;
        let authorization_url = config.auth_url(&state);
        tracing::info!(
            provider = %config.provider_type(),
            state = %crypto::mask_secret(&state),
            "Authentication started"
        );
        Ok(PendingHandshake {
            provider_type: config.provider_type(),
            state,
            authorization_url,
        })
    }

    /// Finish `handshake` with whatever the authentication surface reported.
    ///
    /// The handshake is consumed by this call whatever the outcome.
    pub async fn complete_authentication(
        &self,
        handshake: &PendingHandshake,
        config: &ProviderConfiguration,
        outcome: RedirectOutcome,
    ) -> Result<AuthOutcome> {
        let issued_for = self.pending.consume(&handshake.state).await;

        let params = match outcome {
            RedirectOutcome::Cancelled => {
                tracing::info!(provider = %config.provider_type(), "Authentication cancelled");
                return Ok(AuthOutcome::Cancelled);
            }
            RedirectOutcome::Redirected(params) => params,
        };

        let state_matches = params
            .state
            .as_deref()
            .is_some_and(|s| crypto::constant_time_eq(s.as_bytes(), handshake.state.as_bytes()));
        if !state_matches || issued_for != Some(config.provider_type()) {
            return Err(reject_state(config.provider_type(), params.state.as_deref()));
        }

        self.exchange(config, &handshake.state, params).await
    }

    /// Finish whichever pending attempt the callback's `state` belongs to.
    ///
    /// Used when the redirect arrives detached from the attempt that
    /// started it, e.g. through a custom URI scheme handler.
    pub async fn complete_callback(
        &self,
        config: &ProviderConfiguration,
        params: CallbackParams,
    ) -> Result<AuthOutcome> {
        let state = match params.state.clone() {
            Some(state) => state,
            None => return Err(reject_state(config.provider_type(), None)),
        };
        if self.pending.consume(&state).await != Some(config.provider_type()) {
            return Err(reject_state(config.provider_type(), Some(&state)));
        }
        self.exchange(config, &state, params).await
    }

    /// Run a complete attempt through `surface`.
    pub async fn authenticate(
        &self,
        config: &ProviderConfiguration,
        surface: &dyn AuthSurface,
    ) -> Result<AuthOutcome> {
        let handshake = self.start_authentication(config).await?;
        let outcome = match surface
            .authenticate(&handshake.authorization_url, config.redirect_scheme())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // drop the pending state before surfacing the error
                self.pending.consume(&handshake.state).await;
                return Err(e);
            }
        };
        self.complete_authentication(&handshake, config, outcome)
            .await
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    async fn exchange(
        &self,
        config: &ProviderConfiguration,
        state: &str,
        params: CallbackParams,
    ) -> Result<AuthOutcome> {
        if let Some(error) = params.error.as_deref() {
            if params.is_access_denied() {
                tracing::info!(provider = %config.provider_type(), "Consent declined at the provider");
                return Ok(AuthOutcome::Cancelled);
            }
            let detail = match params.error_description.as_deref() {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            return Err(AuthFailure::ProviderError(detail).into());
        }
        if params.code.is_none() {
            return Err(
                AuthFailure::ProviderError("callback carried no authorization code".into()).into(),
            );
        }

        let grant = self
            .broker
            .retrieve_token(config, state)
            .await
            .inspect_err(|e| {
                tracing::warn!(provider = %config.provider_type(), "Token retrieval failed: {}", e)
            })?;
        let profile = grant.profile.ok_or_else(|| {
            AuthFailure::ProviderError("intermediary returned no user profile".into())
        })?;

        let account = self
            .registry
            .upsert_authenticated(AuthenticatedIdentity {
                provider_type: config.provider_type(),
                external_id: profile.id,
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
                expires_at: grant.expires_at,
                display_name: profile.name,
                email: profile.email,
                photo_url: profile.photo_url,
            })
            .await?;
        tracing::info!(
            account_id = %account.id,
            provider = %account.provider_type,
            "Authentication completed"
        );
        Ok(AuthOutcome::Authenticated(account))
    }
}

fn reject_state(provider: ProviderType, received: Option<&str>) -> crate::errors::CloudKeepError {
    tracing::warn!(
        provider = %provider,
        received = %received.map(crypto::mask_secret).unwrap_or_else(|| "<none>".into()),
        "Rejected sign-in callback: state does not match a pending attempt"
    );
    AuthFailure::StateMismatch.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountStatus;
    use crate::errors::CloudKeepError;
    use crate::test_support::{
        google_config, grant_for, ScriptedBroker, ScriptedSurface, TestRegistry,
    };

    fn coordinator(env: &TestRegistry, broker: &Arc<ScriptedBroker>) -> OAuthFlowCoordinator {
        OAuthFlowCoordinator::new(env.registry.clone(), broker.clone(), Duration::from_secs(300))
    }

    fn redirect(state: &str) -> RedirectOutcome {
        RedirectOutcome::Redirected(CallbackParams {
            code: Some("code-1".into()),
            state: Some(state.into()),
            error: None,
            error_description: None,
        })
    }

    fn auth_failure(result: Result<AuthOutcome>) -> AuthFailure {
        match result {
            Err(CloudKeepError::Auth(f)) => f,
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_builds_intermediary_url_with_fresh_state() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let first = coord.start_authentication(&config).await.unwrap();
        let second = coord.start_authentication(&config).await.unwrap();
        assert_ne!(first.state, second.state);
        assert!(first
            .authorization_url
            .starts_with("https://auth.test/google_drive/auth?state="));
        assert!(first.authorization_url.ends_with(&first.state));
        assert_eq!(coord.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_success_creates_ok_account() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_retrieve(Ok(grant_for("ext-1", "a1", Some("r1"))));
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        let outcome = coord
            .complete_authentication(&handshake, &config, redirect(&handshake.state))
            .await
            .unwrap();

        let account = match outcome {
            AuthOutcome::Authenticated(a) => a,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(account.status, AccountStatus::Ok);
        assert_eq!(account.external_id, "ext-1");
        assert_eq!(account.access_token, "a1");
        assert_eq!(broker.retrieve_states(), vec![handshake.state.clone()]);
        assert_eq!(env.store.saves(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_mutates_nothing() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        let outcome = coord
            .complete_authentication(&handshake, &config, RedirectOutcome::Cancelled)
            .await
            .unwrap();

        assert_eq!(outcome, AuthOutcome::Cancelled);
        assert_eq!(env.store.saves(), 0);
        assert_eq!(broker.retrieve_calls(), 0);
        assert_eq!(coord.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_state_mismatch_rejected_without_mutation() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_retrieve(Ok(grant_for("ext-1", "a1", None)));
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        let failure = auth_failure(
            coord
                .complete_authentication(&handshake, &config, redirect("attacker-state"))
                .await,
        );

        assert_eq!(failure, AuthFailure::StateMismatch);
        assert_eq!(broker.retrieve_calls(), 0);
        assert_eq!(env.store.saves(), 0);
    }

    #[tokio::test]
    async fn test_missing_state_rejected() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        let outcome = RedirectOutcome::Redirected(CallbackParams {
            code: Some("c".into()),
            ..CallbackParams::default()
        });
        let failure = auth_failure(coord.complete_authentication(&handshake, &config, outcome).await);
        assert_eq!(failure, AuthFailure::StateMismatch);
    }

    #[tokio::test]
    async fn test_replayed_callback_rejected() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_retrieve(Ok(grant_for("ext-1", "a1", None)));
        broker.push_retrieve(Ok(grant_for("ext-1", "a-replay", None)));
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        coord
            .complete_authentication(&handshake, &config, redirect(&handshake.state))
            .await
            .unwrap();
        let failure = auth_failure(
            coord
                .complete_authentication(&handshake, &config, redirect(&handshake.state))
                .await,
        );

        assert_eq!(failure, AuthFailure::StateMismatch);
        assert_eq!(broker.retrieve_calls(), 1);
        assert_eq!(env.store.saves(), 1);
    }

    #[tokio::test]
    async fn test_callback_for_unknown_state_rejected() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        let coord = coordinator(&env, &broker);
        let config = google_config();
        coord.start_authentication(&config).await.unwrap();

        let params = CallbackParams::from_query("code=c&state=never-issued");
        let failure = auth_failure(coord.complete_callback(&config, params).await);
        assert_eq!(failure, AuthFailure::StateMismatch);
        assert_eq!(env.store.saves(), 0);
        assert_eq!(coord.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_complete_callback_by_state() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_retrieve(Ok(grant_for("ext-9", "a9", None)));
        let coord = coordinator(&env, &broker);
        let config = google_config();
        let handshake = coord.start_authentication(&config).await.unwrap();

        let params = CallbackParams::from_query(&format!("code=c&state={}", handshake.state));
        let outcome = coord.complete_callback(&config, params).await.unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
    }

    #[tokio::test]
    async fn test_access_denied_is_cancellation() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        let outcome = RedirectOutcome::Redirected(CallbackParams {
            state: Some(handshake.state.clone()),
            error: Some("access_denied".into()),
            ..CallbackParams::default()
        });
        let result = coord
            .complete_authentication(&handshake, &config, outcome)
            .await
            .unwrap();
        assert_eq!(result, AuthOutcome::Cancelled);
        assert_eq!(broker.retrieve_calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_and_missing_code() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        let outcome = RedirectOutcome::Redirected(CallbackParams {
            state: Some(handshake.state.clone()),
            error: Some("server_error".into()),
            error_description: Some("try later".into()),
            ..CallbackParams::default()
        });
        let failure =
            auth_failure(coord.complete_authentication(&handshake, &config, outcome).await);
        assert_eq!(failure, AuthFailure::ProviderError("server_error: try later".into()));

        let handshake = coord.start_authentication(&config).await.unwrap();
        let outcome = RedirectOutcome::Redirected(CallbackParams {
            state: Some(handshake.state.clone()),
            ..CallbackParams::default()
        });
        let failure =
            auth_failure(coord.complete_authentication(&handshake, &config, outcome).await);
        assert!(matches!(failure, AuthFailure::ProviderError(_)));
        assert_eq!(env.store.saves(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_mutates_nothing() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_retrieve(Err(AuthFailure::NetworkError("connection reset".into())));
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let handshake = coord.start_authentication(&config).await.unwrap();
        let failure = auth_failure(
            coord
                .complete_authentication(&handshake, &config, redirect(&handshake.state))
                .await,
        );
        assert!(matches!(failure, AuthFailure::NetworkError(_)));
        assert_eq!(env.store.saves(), 0);
    }

    #[tokio::test]
    async fn test_reauthentication_restores_ok_from_any_bad_status() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        let coord = coordinator(&env, &broker);
        let config = google_config();

        broker.push_retrieve(Ok(grant_for("ext-1", "a1", Some("r1"))));
        let handshake = coord.start_authentication(&config).await.unwrap();
        let account = match coord
            .complete_authentication(&handshake, &config, redirect(&handshake.state))
            .await
            .unwrap()
        {
            AuthOutcome::Authenticated(a) => a,
            other => panic!("unexpected {other:?}"),
        };

        for bad in [
            AccountStatus::MissingScopes,
            AccountStatus::Revoked,
            AccountStatus::Error,
        ] {
            env.registry
                .update(&account.id, |a| {
                    a.mark_status(bad.clone(), Some("stale".into()), chrono::Utc::now())
                })
                .await
                .unwrap();

            broker.push_retrieve(Ok(grant_for("ext-1", "fresh", None)));
            let handshake = coord.start_authentication(&config).await.unwrap();
            coord
                .complete_authentication(&handshake, &config, redirect(&handshake.state))
                .await
                .unwrap();

            let stored = env.registry.get(&account.id).await.unwrap();
            assert_eq!(stored.status, AccountStatus::Ok);
            assert!(stored.last_error.is_none());
            assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        }
        assert_eq!(env.registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_authenticate_through_surface() {
        let env = TestRegistry::new();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_retrieve(Ok(grant_for("ext-1", "a1", None)));
        let coord = coordinator(&env, &broker);
        let config = google_config();

        let surface = ScriptedSurface::echo_state();
        let outcome = coord.authenticate(&config, &surface).await.unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(_)));

        let cancelled = ScriptedSurface::cancelled();
        let outcome = coord.authenticate(&config, &cancelled).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Cancelled);
        assert_eq!(coord.pending_count().await, 0);
    }
}
