//! Connector abstraction and provider implementations
//!
//! One connector per provider, all implementing a common contract: exchange
//! an authorization code for tokens, enumerate selectable targets, report
//! connection health with inline refresh, select a target, publish a post,
//! and log out. The router dispatches to these by provider tag and never
//! carries provider logic itself.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::{PreconditionError, ProviderError, Result};
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, Target};
use crate::vault::TokenVault;

pub mod blog;
pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod pinterest;
pub mod reddit;
pub mod x;

// Mock connector is available for all builds to support integration tests
pub mod mock;

/// Common contract implemented by every provider connector.
///
/// `status` and `logout` are advisory and never raise; everything else
/// returns typed errors. Preconditions and Post lifecycle transitions live in
/// [`crate::publisher::Publisher`], not here, so each implementation only
/// deals with its provider's wire protocol.
#[async_trait]
pub trait Connector: Send + Sync {
    fn provider(&self) -> Provider;

    /// The vault this connector persists token records through.
    fn vault(&self) -> &TokenVault;

    /// Exchange an authorization code for tokens, enumerate the selectable
    /// targets with the fresh token, and persist a normalized record.
    ///
    /// Only X consumes `code_verifier` (PKCE); other providers ignore it.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Auth` when the exchange is rejected and
    /// `ProviderError::Network` on transport failures.
    async fn connect(
        &self,
        account: &Account,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ConnectResult>;

    /// Whether the stored credentials are currently usable.
    ///
    /// Fails fast (returns `false`, never raises) when the record or access
    /// token is absent, a required target is unselected, or the expiry is
    /// missing. When time-to-expiry falls below the provider's buffer, a
    /// refresh is attempted inline; the refreshed record is persisted on
    /// success and `false` is returned on failure.
    async fn status(&self, account: &Account) -> bool;

    /// Remove this provider's entry from the account's token map.
    /// Logging out twice is not an error.
    async fn logout(&self, account: &Account) -> Result<bool> {
        let removed = self.vault().remove(account.id, self.provider()).await?;
        if removed {
            info!(
                "Disconnected {} for account {}",
                self.provider(),
                account.id
            );
        }
        Ok(true)
    }

    /// Select a publish target from the list cached at connect time.
    async fn select_target(&self, account: &Account, target_id: &str) -> Result<Target> {
        let provider = self.provider();
        if provider.resource_noun().is_none() {
            return Err(PreconditionError::SelectionNotSupported(provider).into());
        }

        let record = self
            .vault()
            .read(account.id, provider)
            .await?
            .ok_or_else(|| ProviderError::Auth(format!("{} is not connected", provider)))?;

        let Some(target) = record.targets.iter().find(|t| t.id == target_id).cloned() else {
            return Err(PreconditionError::UnknownTarget(target_id.to_string()).into());
        };

        self.vault()
            .update(account.id, provider, |r| {
                r.selected_target = Some(target.id.clone());
            })
            .await?;

        Ok(target)
    }

    /// The currently selected target, if any.
    async fn selected_target(&self, account: &Account) -> Result<Option<Target>> {
        if self.provider().resource_noun().is_none() {
            return Ok(None);
        }
        let record = self.vault().read(account.id, self.provider()).await?;
        Ok(record.and_then(|r| r.selected().cloned()))
    }

    /// Cheap, offline payload validation. Runs before any network call.
    fn validate(&self, post: &Post) -> Result<()> {
        if post.body.trim().is_empty() {
            return Err(PreconditionError::EmptyBody.into());
        }
        Ok(())
    }

    /// Build the provider-native payload from the post, call the create
    /// endpoint, and resolve the permanent URL.
    async fn create_content(&self, account: &Account, post: &Post)
        -> Result<PublishedArtifact>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// HTTP client shared by all connectors, with an explicit per-call timeout so
/// a hung provider surfaces as a transient network error instead of tying up
/// the request.
pub(crate) fn build_http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

/// Wire shape of the OAuth2 token endpoints. Providers that return extra
/// fields (scope, token_type) simply have them ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// POST a form grant against a token endpoint, optionally with HTTP Basic
/// client authentication.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
    basic: Option<(&str, &str)>,
) -> std::result::Result<TokenResponse, ProviderError> {
    let mut request = http.post(url).form(params);
    if let Some((client_id, client_secret)) = basic {
        request = request.basic_auth(client_id, Some(client_secret));
    }

    let response = request.send().await.map_err(ProviderError::from)?;
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::Auth(format!(
            "token endpoint rejected the grant ({})",
            status
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message: truncate(&body, 200),
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| ProviderError::Response(e.to_string()))
}

/// Map a non-success response to the error taxonomy: 401/403 are
/// authentication failures, 429 is a rate limit, everything else an API
/// error carrying the status and a trimmed body.
pub(crate) async fn error_for_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(ProviderError::Auth(truncate(&body, 200))),
        429 => Err(ProviderError::RateLimit(truncate(&body, 200))),
        code => Err(ProviderError::Api {
            status: code,
            message: truncate(&body, 200),
        }),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.trim().to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut.trim())
    }
}

/// Anchor a relative `expires_in` seconds value to an absolute instant.
pub(crate) fn absolute_expiry(now: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| now + Duration::seconds(secs))
}

/// Buffer-aware freshness check: a token is fresh only while its
/// time-to-expiry exceeds the provider's refresh buffer. A missing expiry is
/// never fresh.
pub(crate) fn token_is_fresh(
    expires_at: Option<DateTime<Utc>>,
    buffer: Duration,
    now: DateTime<Utc>,
) -> bool {
    match expires_at {
        Some(expires_at) => expires_at - now > buffer,
        None => false,
    }
}

/// Title for providers whose submissions are titled (Reddit, Pinterest,
/// Blog): first line of the body, capped at 300 characters.
pub(crate) fn post_title(post: &Post) -> String {
    let first_line = post.body.lines().next().unwrap_or("").trim();
    truncate_title(first_line, 300)
}

fn truncate_title(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 3).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Body plus hashtags in the plain `#tag` form providers expect inline.
pub(crate) fn compose_body(post: &Post) -> String {
    if post.hashtags.is_empty() {
        return post.body.clone();
    }
    let tags: Vec<String> = post
        .hashtags
        .iter()
        .map(|t| format!("#{}", t.trim_start_matches('#')))
        .collect();
    format!("{}\n\n{}", post.body.trim_end(), tags.join(" "))
}
