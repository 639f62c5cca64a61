//! `account` command: list, login, refresh, status, remove.

use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;

use crate::account::{Account, AccountId, AccountStatus};
use crate::auth::{AuthOutcome, AuthSurface, LoopbackAuthSurface, OperationError};
use crate::cli::{self, CommandBuilder, CommandCategory, CommandMeta};
use crate::commands::config_cmd::required;
use crate::commands::registry_cmd::ServiceRegistry;
use crate::errors::{self, AuthFailure, CloudKeepError, Result};
use crate::http_client::HttpClient;
use crate::provider::{ProviderCatalog, ProviderType};
use crate::{output, prompt};

pub fn account_command() -> Command {
    let id_arg = || Arg::new("id").required(true).help("Account id (see `account list`)");
    Command::new("account")
        .visible_alias("acc")
        .about("Manage connected cloud accounts")
        .subcommand_required(true)
        .subcommand(Command::new("list").about("List connected accounts"))
        .subcommand(
            Command::new("login")
                .about("Connect an account through the provider's consent page")
                .arg(
                    Arg::new("provider")
                        .help("google_drive or onedrive; prompts when omitted"),
                )
                .arg(
                    Arg::new("no-browser")
                        .long("no-browser")
                        .action(ArgAction::SetTrue)
                        .help("Print the sign-in URL instead of opening a browser"),
                ),
        )
        .subcommand(
            Command::new("refresh")
                .about("Renew an account's access token now")
                .arg(id_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Show an account's status")
                .arg(id_arg())
                .arg(
                    Arg::new("revalidate")
                        .long("revalidate")
                        .action(ArgAction::SetTrue)
                        .help("Probe the provider and clear an error status on success"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Forget an account locally (the provider grant is left untouched)")
                .arg(id_arg())
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(ArgAction::SetTrue)
                        .help("Skip the confirmation prompt"),
                ),
        )
}

pub fn account_meta() -> CommandMeta {
    CommandBuilder::from_clap(account_command())
        .category(CommandCategory::Accounts)
        .build()
}

/// Account fields safe to print. Tokens are never included.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: AccountId,
    pub provider_type: ProviderType,
    pub display_name: String,
    pub email: String,
    pub status: AccountStatus,
    pub last_error: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountSummary {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id.clone(),
            provider_type: a.provider_type,
            display_name: a.display_name.clone(),
            email: a.email.clone(),
            status: a.status.clone(),
            last_error: a.last_error.clone(),
            expires_at: a.expires_at,
            has_refresh_token: a.refresh_token.as_deref().is_some_and(|t| !t.is_empty()),
            updated_at: a.updated_at,
        }
    }
}

pub fn render_accounts(accounts: &[Account]) -> String {
    let rows: Vec<Vec<String>> = accounts
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.provider_type.to_string(),
                a.email.clone(),
                a.status.to_string(),
                a.expires_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();
    output::render_table(&["ID", "PROVIDER", "EMAIL", "STATUS", "EXPIRES"], &rows)
}

pub fn render_status(account: &Account) -> String {
    let mut lines = vec![
        format!("Account:  {} ({})", account.id, account.provider_type),
        format!("User:     {} <{}>", account.display_name, account.email),
        format!("Status:   {}", account.status),
    ];
    if let Some(err) = &account.last_error {
        lines.push(format!("Error:    {err}"));
    }
    if let Some(exp) = account.expires_at {
        lines.push(format!("Expires:  {}", exp.to_rfc3339()));
    }
    if account.needs_reauth() {
        lines.push(format!(
            "Run `cloudkeep account login {}` to reconnect.",
            account.provider_type
        ));
    } else if account.has_error() {
        lines.push("Run `cloudkeep account status <id> --revalidate` to retry.".into());
    }
    lines.join("\n")
}

/// Run one sign-in for `provider_type` through `surface`.
pub async fn login(
    services: &ServiceRegistry,
    provider_type: ProviderType,
    surface: &dyn AuthSurface,
) -> Result<AuthOutcome> {
    let catalog = services.catalog().await?;
    let config = catalog.get(provider_type)?;
    services.coordinator().await?.authenticate(config, surface).await
}

pub async fn refresh_account(services: &ServiceRegistry, id: &AccountId) -> Result<Account> {
    let account = services.accounts().await?.get(id).await?;
    services.refresher().await?.refresh(&account).await
}

/// Forget `id` locally. Never contacts the provider.
pub async fn remove_account(services: &ServiceRegistry, id: &AccountId) -> Result<()> {
    services.accounts().await?.delete(id).await?;
    tracing::info!(account_id = %id, "Account removed");
    Ok(())
}

/// Probe `id` with a lightweight provider call.
pub async fn revalidate_account(services: &ServiceRegistry, id: &AccountId) -> Result<Account> {
    let http = services.http_client.clone();
    services
        .classifier()
        .await?
        .revalidate(id, |account| {
            let http = http.clone();
            async move { probe_profile(&http, &account).await }
        })
        .await
}

/// Endpoint returning the signed-in user; any 2xx proves the token works.
fn probe_url(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::GoogleDrive => "https://www.googleapis.com/drive/v3/about?fields=user",
        ProviderType::OneDrive => "https://graph.microsoft.com/v1.0/me/drive",
    }
}

async fn probe_profile(http: &HttpClient, account: &Account) -> std::result::Result<(), OperationError> {
    let client = http.get_client().await;
    let resp = client
        .get(probe_url(account.provider_type))
        .bearer_auth(&account.access_token)
        .send()
        .await
        .map_err(|e| OperationError::Transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(OperationError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

fn choose_provider(catalog: &ProviderCatalog) -> Result<Option<ProviderType>> {
    let kinds: Vec<ProviderType> = catalog.iter().map(|p| p.provider_type()).collect();
    let names: Vec<&str> = catalog.iter().map(|p| p.display_name()).collect();
    Ok(prompt::select_menu("Provider", &names)?.and_then(|i| kinds.get(i).copied()))
}

/// A cancelled sign-in is reported as a neutral notice, never a failure exit.
fn cancelled_error() -> CloudKeepError {
    AuthFailure::UserCancelled.into()
}

fn account_id(matches: &ArgMatches) -> Result<AccountId> {
    required(matches, "id").map(AccountId::new)
}

pub async fn handle_account(matches: &ArgMatches, services: &ServiceRegistry) -> Result<()> {
    let json = cli::is_json(matches);
    match matches.subcommand() {
        Some(("list", _)) => {
            let accounts = services.accounts().await?.list().await?;
            if json {
                let summaries: Vec<AccountSummary> = accounts.iter().map(Into::into).collect();
                output::print_json(&summaries)?;
            } else if accounts.is_empty() {
                output::info("No accounts connected. Run `cloudkeep account login`.");
            } else {
                println!("{}", render_accounts(&accounts));
            }
        }
        Some(("login", sub)) => {
            let provider_type = match sub.get_one::<String>("provider") {
                Some(raw) => raw.parse::<ProviderType>()?,
                None => match choose_provider(services.catalog().await?)? {
                    Some(kind) => kind,
                    None => return Ok(()),
                },
            };
            let config = services.config_manager.get_config().await;
            let mut surface = LoopbackAuthSurface::new(
                config.callback_port,
                config.auth_timeout(),
                services.shutdown_token().child_token(),
            );
            if sub.get_flag("no-browser") {
                surface = surface.without_browser();
            }
            if !json {
                output::info(&format!(
                    "Waiting for sign-in on port {} (Ctrl-C to cancel)...",
                    config.callback_port
                ));
            }
            match login(services, provider_type, &surface).await? {
                AuthOutcome::Authenticated(account) => {
                    if json {
                        output::print_json(&AccountSummary::from(&account))?;
                    } else {
                        output::success(&format!(
                            "Connected {} <{}> as {}",
                            account.display_name, account.email, account.id
                        ));
                    }
                }
                AuthOutcome::Cancelled => {
                    errors::handle_command_error(&cancelled_error());
                }
            }
        }
        Some(("refresh", sub)) => {
            let account = refresh_account(services, &account_id(sub)?).await?;
            if json {
                output::print_json(&AccountSummary::from(&account))?;
            } else {
                output::success(&format!("Refreshed tokens for {}", account.id));
            }
        }
        Some(("status", sub)) => {
            let id = account_id(sub)?;
            let account = if sub.get_flag("revalidate") {
                revalidate_account(services, &id).await?
            } else {
                services.accounts().await?.get(&id).await?
            };
            if json {
                output::print_json(&AccountSummary::from(&account))?;
            } else {
                println!("{}", render_status(&account));
            }
        }
        Some(("remove", sub)) => {
            let id = account_id(sub)?;
            let account = services.accounts().await?.get(&id).await?;
            if !sub.get_flag("yes") {
                let question = format!(
                    "Remove {} <{}> from this device? The provider grant is not revoked.",
                    account.display_name, account.email
                );
                if prompt::confirm(&question, false)? != Some(true) {
                    output::info("Nothing removed.");
                    return Ok(());
                }
            }
            remove_account(services, &id).await?;
            output::success(&format!("Removed {id}"));
        }
        _ => {
            return Err(CloudKeepError::Command(
                "Usage: cloudkeep account <list|login|refresh|status|remove>".into(),
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::commands::registry_cmd::tests::services;
    use crate::errors::UserAction;
    use crate::test_support::{account, grant, grant_for, identity, ScriptedBroker, ScriptedSurface};

    #[tokio::test]
    async fn test_login_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_retrieve(Ok(grant_for("user-1", "a1", Some("r1"))));
        let services = services(&dir, broker.clone()).await;

        let outcome = login(&services, ProviderType::GoogleDrive, &ScriptedSurface::echo_state())
            .await
            .unwrap();
        let account = match outcome {
            AuthOutcome::Authenticated(account) => account,
            other => panic!("expected account, got {other:?}"),
        };
        assert_eq!(account.external_id, "user-1");

        let listed = services.accounts().await.unwrap().list().await.unwrap();
        assert_eq!(listed.len(), 1);
        let table = render_accounts(&listed);
        assert!(table.contains("user-1@example.com"));
        assert!(!table.contains("a1"));
    }

    #[tokio::test]
    async fn test_login_cancelled_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(ScriptedBroker::new());
        let services = services(&dir, broker.clone()).await;

        let outcome = login(&services, ProviderType::OneDrive, &ScriptedSurface::cancelled())
            .await
            .unwrap();
        assert_eq!(outcome, AuthOutcome::Cancelled);
        assert_eq!(broker.retrieve_calls(), 0);
        assert_eq!(cancelled_error().user_action(), UserAction::Notice);
        assert!(services.accounts().await.unwrap().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(ScriptedBroker::new());
        broker.push_refresh(Ok(grant("a2", None, Some(3600))));
        let services = services(&dir, broker.clone()).await;
        let registry = services.accounts().await.unwrap().clone();
        let stored = registry
            .upsert_authenticated(identity("user-1", "a1", Some("r1")))
            .await
            .unwrap();

        let refreshed = refresh_account(&services, &stored.id).await.unwrap();
        assert_eq!(refreshed.access_token, "a2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r1"));
        assert_eq!(broker.refresh_tokens_seen(), vec!["r1"]);

        remove_account(&services, &stored.id).await.unwrap();
        assert!(matches!(
            remove_account(&services, &stored.id).await,
            Err(CloudKeepError::AccountNotFound(_))
        ));
        assert_eq!(broker.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_revalidate_refuses_revoked_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(&dir, Arc::new(ScriptedBroker::new())).await;
        let registry = services.accounts().await.unwrap().clone();
        let stored = registry
            .upsert_authenticated(identity("user-1", "a1", Some("r1")))
            .await
            .unwrap();
        registry
            .update(&stored.id, |a| {
                a.mark_status(AccountStatus::Revoked, Some("invalid_grant".into()), Utc::now())
            })
            .await
            .unwrap();

        let err = revalidate_account(&services, &stored.id).await.unwrap_err();
        assert!(matches!(
            err,
            CloudKeepError::Auth(AuthFailure::AuthRejected(_))
        ));
    }

    #[test]
    fn test_summary_hides_tokens() {
        let acc = account("acc_1", "user-1");
        let json = serde_json::to_string(&AccountSummary::from(&acc)).unwrap();
        assert!(!json.contains(&acc.access_token));
        assert!(json.contains("\"hasRefreshToken\":true"));
        assert!(json.contains("\"status\":\"ok\""));
    }

    #[test]
    fn test_render_status_hints() {
        let mut acc = account("acc_1", "user-1");
        acc.mark_status(AccountStatus::MissingScopes, None, Utc::now());
        assert!(render_status(&acc).contains("account login google_drive"));

        acc.mark_status(AccountStatus::Error, Some("HTTP 500".into()), Utc::now());
        let text = render_status(&acc);
        assert!(text.contains("Error:    HTTP 500"));
        assert!(text.contains("--revalidate"));
    }

    #[test]
    fn test_command_parses() {
        let m = account_command()
            .try_get_matches_from(["account", "remove", "acc_1", "--yes"])
            .unwrap();
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "remove");
        assert!(sub.get_flag("yes"));
        assert_eq!(account_id(sub).unwrap().as_str(), "acc_1");

        assert!(account_command()
            .try_get_matches_from(["account", "refresh"])
            .is_err());
    }
}
