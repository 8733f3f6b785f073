//! HttpExtractor - reads the metric from a page behind a form login
//!
//! ## Session Handling
//!
//! ```text
//! extract() → [not logged in?] POST login form → GET metric page → regex → raw text
//!                    ↑                                   │
//!                    └──── 401/403 or bounced to login ──┘ (next extract logs in again)
//! ```
//!
//! The session lives in the client's cookie store. Losing it surfaces as an
//! extraction failure for that cycle only.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, Url};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SourceSettings;

use super::{ExtractionError, MetricExtractor};

#[derive(Debug, Default)]
struct Session {
    logged_in: bool,

    /// Page reached after the login redirect chain
    landing_url: Option<Url>,
}

/// Scrapes the metric from an HTML page after logging in with a form post
pub struct HttpExtractor {
    settings: SourceSettings,

    /// HTTP client with cookie store (holds the authenticated session)
    client: reqwest::Client,

    login_url: Url,
    metric_url: Option<Url>,
    pattern: Regex,
    markup: Regex,
    timeout: Duration,
    session: Mutex<Session>,
}

impl HttpExtractor {
    /// Create a new extractor
    ///
    /// `timeout` bounds every single HTTP request.
    pub fn new(settings: SourceSettings, timeout: Duration) -> Result<Self> {
        let login_url = Url::parse(&settings.login_url).context("invalid LOGIN_URL")?;
        let metric_url = settings
            .metric_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("invalid METRIC_URL")?;
        let pattern = Regex::new(&settings.metric_pattern).context("invalid METRIC_PATTERN")?;
        let markup = Regex::new(r"<[^>]*>").context("invalid markup pattern")?;

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            settings,
            client,
            login_url,
            metric_url,
            pattern,
            markup,
            timeout,
            session: Mutex::new(Session::default()),
        })
    }

    fn request_error(&self, context: &str, err: reqwest::Error) -> ExtractionError {
        if err.is_timeout() {
            ExtractionError::Timeout(self.timeout)
        } else {
            ExtractionError::failure(format!("{context}: {err}"))
        }
    }

    /// Post the login form and return the page the site lands on
    #[instrument(skip(self), fields(url = %self.login_url))]
    async fn login(&self) -> Result<Url, ExtractionError> {
        info!("logging in");

        let form = [
            (self.settings.username_field.as_str(), self.settings.username.as_str()),
            (self.settings.password_field.as_str(), self.settings.password.as_str()),
        ];

        let response = self
            .client
            .post(self.login_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| self.request_error("login request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::failure(format!("login failed: HTTP {status}")));
        }

        let landing = response.url().clone();
        debug!("logged in, landed on {landing}");
        Ok(landing)
    }

    /// Pull the metric text out of a page body
    fn find_metric(&self, body: &str) -> Result<String, ExtractionError> {
        let captures = self
            .pattern
            .captures(body)
            .ok_or_else(|| ExtractionError::failure("metric not found on page"))?;

        let matched = captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str())
            .unwrap_or_default();

        let text = self.markup.replace_all(matched, " ");
        let text = decode_entities(&text);

        Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}

/// Replace the handful of entities that commonly wrap numbers
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[async_trait]
impl MetricExtractor for HttpExtractor {
    #[instrument(skip(self))]
    async fn extract(&self) -> Result<String, ExtractionError> {
        let mut session = self.session.lock().await;

        if !session.logged_in {
            let landing = self.login().await?;
            session.logged_in = true;
            session.landing_url = Some(landing);
        }

        let url = self
            .metric_url
            .clone()
            .or_else(|| session.landing_url.clone())
            .unwrap_or_else(|| self.login_url.clone());

        trace!("requesting metric page {url}");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.request_error("metric request failed", e))?;

        let status = response.status();
        let bounced_to_login = response.url() == &self.login_url && url != self.login_url;
        let unauthorized = status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
        if unauthorized || bounced_to_login {
            warn!("session lost (HTTP {status}), will log in again on next extraction");
            *session = Session::default();
            return Err(ExtractionError::failure("session lost"));
        }

        if !status.is_success() {
            return Err(ExtractionError::failure(format!("HTTP error: {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.request_error("failed to read metric page", e))?;

        let raw = self.find_metric(&body)?;
        trace!("extracted raw metric {raw:?}");
        Ok(raw)
    }

    async fn close(&self) {
        let mut session = self.session.lock().await;

        if session.logged_in
            && let Some(logout_url) = &self.settings.logout_url
        {
            match self.client.get(logout_url).send().await {
                Ok(response) => debug!("logged out (HTTP {})", response.status()),
                Err(e) => warn!("logout failed: {e}"),
            }
        }

        *session = Session::default();
        info!("extraction session closed");
    }
}
