//! Calls to the trusted intermediary server.
//!
//! The intermediary holds every provider client secret. The app only
//! retrieves tokens for a completed handshake (`GET tokenUrlBase/<state>`)
//! and renews them (`POST refreshUrlBase {refresh_token}`). This is the
//! only place HTTP detail of those two calls is turned into `AuthFailure`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::errors::AuthFailure;
use crate::http_client::HttpClient;
use crate::provider::ProviderConfiguration;

/// Identity of the user who granted access.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default, alias = "displayName")]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "photoUrl", alias = "picture")]
    pub photo_url: Option<String>,
}

/// Tokens handed out by the intermediary.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub profile: Option<Profile>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &crate::crypto::mask_secret(&self.access_token))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("profile", &self.profile)
            .finish()
    }
}

/// Wire shape of both intermediary responses. Field names are accepted
/// in camelCase or snake_case.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<i64>,
    #[serde(default, alias = "expiresAt")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    profile: Option<Profile>,
}

impl TokenResponse {
    fn into_grant(self, now: DateTime<Utc>) -> Result<TokenGrant, AuthFailure> {
        if self.access_token.trim().is_empty() {
            return Err(AuthFailure::ProviderError(
                "intermediary returned an empty access token".into(),
            ));
        }
        let expires_at = match (self.expires_in, self.expires_at) {
            (Some(secs), _) => Some(
                Duration::try_seconds(secs.max(0))
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        AuthFailure::ProviderError(format!(
                            "intermediary returned an out-of-range expiresIn: {secs}"
                        ))
                    })?,
            ),
            (None, at) => at,
        };
        Ok(TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            profile: self.profile,
        })
    }
}

/// The per-provider token call shape.
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Fetch the tokens the intermediary obtained for `state`.
    async fn retrieve_token(
        &self,
        config: &ProviderConfiguration,
        state: &str,
    ) -> Result<TokenGrant, AuthFailure>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(
        &self,
        config: &ProviderConfiguration,
        refresh_token: &str,
    ) -> Result<TokenGrant, AuthFailure>;
}

/// `TokenBroker` over the shared `reqwest` client.
pub struct HttpTokenBroker {
    http: HttpClient,
}

impl HttpTokenBroker {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    async fn read_grant(resp: reqwest::Response) -> Result<TokenGrant, AuthFailure> {
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }
        let parsed = resp
            .json::<TokenResponse>()
            .await
            .map_err(transport_failure)?;
        parsed.into_grant(Utc::now())
    }
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn retrieve_token(
        &self,
        config: &ProviderConfiguration,
        state: &str,
    ) -> Result<TokenGrant, AuthFailure> {
        let client = self.http.get_client().await;
        tracing::debug!(provider = %config.provider_type(), "Retrieving tokens from intermediary");

        let resp = client
            .get(config.token_url(state))
            .send()
            .await
            .map_err(transport_failure)?;
        Self::read_grant(resp).await
    }

    async fn refresh(
        &self,
        config: &ProviderConfiguration,
        refresh_token: &str,
    ) -> Result<TokenGrant, AuthFailure> {
        let client = self.http.get_client().await;
        tracing::debug!(provider = %config.provider_type(), "Refreshing tokens via intermediary");

        let resp = client
            .post(config.refresh_url())
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(transport_failure)?;
        Self::read_grant(resp).await
    }
}

fn transport_failure(err: reqwest::Error) -> AuthFailure {
    if err.is_decode() {
        AuthFailure::ProviderError(format!("malformed intermediary response: {err}"))
    } else {
        AuthFailure::NetworkError(err.to_string())
    }
}

/// Markers the intermediary relays when the grant itself is unusable.
const REJECTED_GRANT_MARKERS: &[&str] = &[
    "invalid_grant",
    "invalid_token",
    "unauthorized_client",
    "revoked",
    "expired_token",
];

/// Map a non-success intermediary response onto the failure taxonomy.
pub fn classify_http_failure(status: u16, body: &str) -> AuthFailure {
    let detail = error_detail(body).unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        408 | 429 | 500..=599 => AuthFailure::NetworkError(format!("HTTP {status}: {detail}")),
        401 => AuthFailure::AuthRejected(detail),
        400 | 403 if contains_marker(body, REJECTED_GRANT_MARKERS) => {
            AuthFailure::AuthRejected(detail)
        }
        _ => AuthFailure::ProviderError(format!("HTTP {status}: {detail}")),
    }
}

pub(crate) fn contains_marker(body: &str, markers: &[&str]) -> bool {
    let lower = body.to_ascii_lowercase();
    markers.iter().any(|m| lower.contains(&m.to_ascii_lowercase()))
}

/// Pull `error` / `error_description` out of an OAuth-style JSON body.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = match value.get("error")? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => return None,
    };
    let description = value
        .get("error_description")
        .and_then(|d| d.as_str())
        .filter(|d| !d.is_empty());
    Some(match description {
        Some(d) => format!("{error}: {d}"),
        None => error,
    })
}
