//! Redirect capture.
//!
//! The coordinator only needs the callback query parameters or a
//! cancellation signal. `LoopbackAuthSurface` gets them by opening the
//! system browser and listening on `127.0.0.1:<callbackPort>` for the
//! intermediary's final redirect.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::errors::{CloudKeepError, Result};

const SUCCESS_HTML: &str = "<html><body><h1>Signed in</h1><p>You can close this window and return to cloudkeep.</p></body></html>";
const ERROR_HTML: &str = "<html><body><h1>Sign-in failed</h1><p>You can close this window and try again.</p></body></html>";

/// How long one loopback connection may take to send its request line.
/// Browsers open speculative sockets that never send anything.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Query parameters carried by the redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a full redirect URL, e.g. `cloudkeep://auth?code=..&state=..`.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| CloudKeepError::Application(format!("Invalid callback URL: {e}")))?;
        Ok(Self::from_pairs(url.query_pairs()))
    }

    /// Parse a bare query string (`code=..&state=..`, leading `?` allowed).
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        match Url::parse(&format!("http://127.0.0.1/?{query}")) {
            Ok(url) => Self::from_pairs(url.query_pairs()),
            Err(_) => Self::default(),
        }
    }

    fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }

    /// True when the provider reports that the user declined consent.
    pub fn is_access_denied(&self) -> bool {
        self.error.as_deref() == Some("access_denied")
    }
}

/// How the external authentication surface finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Redirected(CallbackParams),
    /// The user closed the surface or interrupted the wait; no redirect happened.
    Cancelled,
}

/// Platform surface that shows the authorization page and captures the
/// redirect.
#[async_trait]
pub trait AuthSurface: Send + Sync {
    async fn authenticate(
        &self,
        authorization_url: &str,
        redirect_scheme: &str,
    ) -> Result<RedirectOutcome>;
}

/// Opens the system browser and waits for the redirect on a loopback port.
pub struct LoopbackAuthSurface {
    port: u16,
    timeout: Duration,
    cancel: CancellationToken,
    open_browser: bool,
}

impl LoopbackAuthSurface {
    pub fn new(port: u16, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            port,
            timeout,
            cancel,
            open_browser: true,
        }
    }

    /// Skip launching the browser. The caller is expected to show the URL.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Wait for one callback request on an already bound listener.
    ///
    /// Accepting and reading both race the cancel token and the deadline,
    /// so an idle connection cannot hold the attempt open.
    async fn wait_for_redirect(&self, listener: TcpListener) -> Result<RedirectOutcome> {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            let (socket, _) = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(self.interrupted()),
                _ = &mut deadline => return Ok(self.timed_out()),
                accepted = listener.accept() => accepted?,
            };

            let handled = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(self.interrupted()),
                _ = &mut deadline => return Ok(self.timed_out()),
                handled = tokio::time::timeout(REQUEST_READ_TIMEOUT, handle_connection(socket)) => handled,
            };

            match handled {
                Ok(Ok(Some(params))) => return Ok(RedirectOutcome::Redirected(params)),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::debug!("Ignoring unreadable loopback request: {}", e),
                Err(_) => tracing::debug!("Dropping idle loopback connection"),
            }
        }
    }

    fn interrupted(&self) -> RedirectOutcome {
        tracing::info!("Sign-in interrupted by the user");
        RedirectOutcome::Cancelled
    }

    fn timed_out(&self) -> RedirectOutcome {
        tracing::info!(timeout_secs = self.timeout.as_secs(), "Sign-in timed out without a redirect");
        RedirectOutcome::Cancelled
    }
}

#[async_trait]
impl AuthSurface for LoopbackAuthSurface {
    async fn authenticate(
        &self,
        authorization_url: &str,
        redirect_scheme: &str,
    ) -> Result<RedirectOutcome> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await.map_err(|e| {
            CloudKeepError::Application(format!(
                "Cannot listen for the sign-in redirect on 127.0.0.1:{}: {e}",
                self.port
            ))
        })?;
        tracing::debug!(
            port = self.port,
            redirect_scheme,
            "Waiting for sign-in redirect"
        );

        if self.open_browser {
            if let Err(e) = open_in_browser(authorization_url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        self.wait_for_redirect(listener).await
    }
}

/// Answer one HTTP request. Returns the callback parameters when the
/// request carries a `code` or an `error`; anything else (favicon, a bare
/// `?state=`) gets a 404 and the wait continues.
async fn handle_connection(mut socket: TcpStream) -> Result<Option<CallbackParams>> {
    let mut buffer = vec![0u8; 8192];
    let size = socket.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..size]);

    let target = request
        .lines()
        .next()
        .and_then(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("GET"), Some(target)) => Some(target.to_string()),
                _ => None,
            }
        })
        .unwrap_or_default();

    let params = target
        .split_once('?')
        .map(|(_, query)| CallbackParams::from_query(query))
        .filter(|p| p.code.is_some() || p.error.is_some());

    let (status, body) = match &params {
        Some(p) if p.error.is_none() => ("200 OK", SUCCESS_HTML),
        Some(_) => ("400 Bad Request", ERROR_HTML),
        None => ("404 Not Found", ""),
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;

    Ok(params)
}

/// Launch the platform's default browser on `url`.
pub fn open_in_browser(url: &str) -> std::io::Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        let mut c = std::process::Command::new("open");
        c.arg(url);
        c
    } else if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    } else {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(url);
        c
    };
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
}
