//! Reddit connector (OAuth API)
//!
//! Submissions go to the selected subreddit with a default flair attached
//! when the subreddit offers one. Subreddits that insist on a flair we
//! cannot satisfy get one retry without a flair, and if that is still
//! rejected the submission falls back to the user's profile feed
//! (`u_<username>`) instead of failing the publish.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::RedditConfig;
use crate::error::{PreconditionError, ProviderError, Result};
use crate::providers::{
    absolute_expiry, compose_body, error_for_status, post_title, request_token, token_is_fresh,
    Connector,
};
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, Target, TokenRecord};
use crate::vault::TokenVault;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

const FLAIR_REQUIRED: &str = "SUBMIT_VALIDATION_FLAIR_REQUIRED";

/// Tokens live an hour; refresh once less than five minutes remain, anchored
/// to the instant the record was last written.
const REFRESH_BUFFER_MINS: i64 = 5;

pub struct RedditConnector {
    config: RedditConfig,
    http: reqwest::Client,
    vault: Arc<TokenVault>,
}

#[derive(Debug, Deserialize)]
struct Identity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: SubredditEntry,
}

#[derive(Debug, Deserialize)]
struct SubredditEntry {
    display_name: String,
    title: Option<String>,
    community_icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Flair {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitEnvelope {
    json: SubmitBody,
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    url: Option<String>,
    id: Option<String>,
}

/// How one submission attempt resolved.
#[derive(Debug)]
enum SubmitOutcome {
    Posted(SubmitData),
    FlairRequired,
    Rejected(String),
}

fn classify_submission(envelope: SubmitEnvelope) -> SubmitOutcome {
    let flair_required = envelope
        .json
        .errors
        .iter()
        .any(|e| e.first().and_then(|v| v.as_str()) == Some(FLAIR_REQUIRED));
    if flair_required {
        return SubmitOutcome::FlairRequired;
    }
    if !envelope.json.errors.is_empty() {
        let summary = envelope
            .json
            .errors
            .iter()
            .filter_map(|e| e.first().and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        return SubmitOutcome::Rejected(summary);
    }
    match envelope.json.data {
        Some(data) => SubmitOutcome::Posted(data),
        None => SubmitOutcome::Rejected("submission returned no data".to_string()),
    }
}

/// The fallback chain: flaired submission, then bare, then the profile feed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Flaired(String),
    Bare,
    Profile,
}

fn fallback_after(attempt: &Attempt) -> Option<Attempt> {
    match attempt {
        Attempt::Flaired(_) => Some(Attempt::Bare),
        Attempt::Bare => Some(Attempt::Profile),
        Attempt::Profile => None,
    }
}

fn profile_feed(username: &str) -> String {
    format!("u_{}", username)
}

impl RedditConnector {
    pub fn new(config: RedditConfig, timeout_secs: u64, vault: Arc<TokenVault>) -> Self {
        // Reddit requires a descriptive User-Agent on every request, so this
        // connector carries its own client.
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            vault,
        }
    }

    fn basic(&self) -> (&str, &str) {
        (
            self.config.keys.client_id.as_str(),
            self.config.keys.client_secret.as_str(),
        )
    }

    async fn whoami(&self, access_token: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/api/v1/me", API_BASE))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let identity = error_for_status(response)
            .await?
            .json::<Identity>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;
        Ok(identity.name)
    }

    async fn list_subreddits(&self, access_token: &str) -> Result<Vec<Target>> {
        let response = self
            .http
            .get(format!("{}/subreddits/mine/subscriber", API_BASE))
            .query(&[("limit", "100")])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let listing = error_for_status(response)
            .await?
            .json::<Listing>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| Target {
                id: child.data.display_name.clone(),
                name: child.data.title.unwrap_or(child.data.display_name),
                image_url: child.data.community_icon,
            })
            .collect())
    }

    /// Default flair for a subreddit, if it exposes any. Many subreddits
    /// close this endpoint off; that is not an error, just no flair.
    async fn default_flair(&self, access_token: &str, subreddit: &str) -> Option<String> {
        let response = self
            .http
            .get(format!("{}/r/{}/api/link_flair_v2", API_BASE, subreddit))
            .bearer_auth(access_token)
            .send()
            .await
            .ok()?;
        let flairs = error_for_status(response)
            .await
            .ok()?
            .json::<Vec<Flair>>()
            .await
            .ok()?;
        flairs.into_iter().next().map(|f| f.id)
    }

    async fn submit(
        &self,
        access_token: &str,
        subreddit: &str,
        post: &Post,
        flair_id: Option<&str>,
    ) -> Result<SubmitEnvelope> {
        let title = post_title(post);
        let body = compose_body(post);

        let mut form: Vec<(&str, &str)> = vec![
            ("api_type", "json"),
            ("sr", subreddit),
            ("title", title.as_str()),
            ("resubmit", "true"),
        ];
        match &post.link_url {
            Some(link) => {
                form.push(("kind", "link"));
                form.push(("url", link.as_str()));
            }
            None => {
                form.push(("kind", "self"));
                form.push(("text", body.as_str()));
            }
        }
        if let Some(flair_id) = flair_id {
            form.push(("flair_id", flair_id));
        }

        let response = self
            .http
            .post(format!("{}/api/submit", API_BASE))
            .bearer_auth(access_token)
            .form(&form)
            .send()
            .await
            .map_err(ProviderError::from)?;

        Ok(error_for_status(response)
            .await?
            .json::<SubmitEnvelope>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?)
    }
}

#[async_trait]
impl Connector for RedditConnector {
    fn provider(&self) -> Provider {
        Provider::Reddit
    }

    fn vault(&self) -> &TokenVault {
        &self.vault
    }

    async fn connect(
        &self,
        account: &Account,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<ConnectResult> {
        let token = request_token(
            &self.http,
            TOKEN_URL,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.keys.redirect_url.as_str()),
            ],
            Some(self.basic()),
        )
        .await?;

        let username = self.whoami(&token.access_token).await?;
        let targets = self.list_subreddits(&token.access_token).await?;

        let mut record = TokenRecord::new(token.access_token);
        record.refresh_token = token.refresh_token;
        record.expires_at = absolute_expiry(Utc::now(), token.expires_in);
        record.username = Some(username.clone());
        record.targets = targets.clone();
        self.vault()
            .write(account.id, Provider::Reddit, record)
            .await?;

        info!(
            "Reddit connected for account {} as u/{} with {} subreddit(s)",
            account.id,
            username,
            targets.len()
        );
        Ok(ConnectResult {
            message: format!(
                "Reddit connected as u/{}, {} subreddit(s) available",
                username,
                targets.len()
            ),
            targets,
        })
    }

    async fn status(&self, account: &Account) -> bool {
        let record = match self.vault().read(account.id, Provider::Reddit).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("Reddit status read failed for {}: {}", account.id, e);
                return false;
            }
        };

        if record.access_token.is_empty() || record.selected_target.is_none() {
            return false;
        }

        if token_is_fresh(
            record.expires_at,
            Duration::minutes(REFRESH_BUFFER_MINS),
            Utc::now(),
        ) {
            return true;
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            return false;
        };

        debug!("Reddit token for {} near expiry, refreshing", account.id);
        match request_token(
            &self.http,
            TOKEN_URL,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ],
            Some(self.basic()),
        )
        .await
        {
            Ok(refreshed) => {
                let expires_at = absolute_expiry(Utc::now(), refreshed.expires_in);
                let persisted = self
                    .vault()
                    .update(account.id, Provider::Reddit, |r| {
                        r.access_token = refreshed.access_token;
                        if let Some(new_refresh) = refreshed.refresh_token {
                            r.refresh_token = Some(new_refresh);
                        }
                        r.expires_at = expires_at;
                    })
                    .await;
                persisted.is_ok()
            }
            Err(e) => {
                warn!("Reddit token refresh failed for {}: {}", account.id, e);
                false
            }
        }
    }

    async fn create_content(&self, account: &Account, post: &Post) -> Result<PublishedArtifact> {
        let record = self
            .vault()
            .read(account.id, Provider::Reddit)
            .await?
            .ok_or_else(|| ProviderError::Auth("Reddit is not connected".to_string()))?;

        let subreddit = record
            .selected()
            .ok_or_else(|| PreconditionError::NoTargetSelected("subreddit".to_string()))?
            .id
            .clone();
        let username = record
            .username
            .clone()
            .ok_or_else(|| ProviderError::Response("token record has no username".to_string()))?;

        let mut attempt = match self.default_flair(&record.access_token, &subreddit).await {
            Some(flair_id) => Attempt::Flaired(flair_id),
            None => Attempt::Bare,
        };

        let profile_sr = profile_feed(&username);
        loop {
            let (sr, flair): (&str, Option<&str>) = match &attempt {
                Attempt::Flaired(flair_id) => (subreddit.as_str(), Some(flair_id.as_str())),
                Attempt::Bare => (subreddit.as_str(), None),
                Attempt::Profile => (profile_sr.as_str(), None),
            };

            let envelope = self.submit(&record.access_token, sr, post, flair).await?;
            match classify_submission(envelope) {
                SubmitOutcome::Posted(data) => {
                    let id = data.id.unwrap_or_default();
                    let url = data
                        .url
                        .unwrap_or_else(|| format!("https://www.reddit.com/r/{}/comments/{}/", sr, id));
                    info!("Published post {} to r/{}", post.id, sr);
                    return Ok(PublishedArtifact {
                        external_id: id,
                        url,
                    });
                }
                SubmitOutcome::FlairRequired => match fallback_after(&attempt) {
                    Some(next) => {
                        warn!(
                            "r/{} requires a flair, falling back from {:?} to {:?}",
                            subreddit, attempt, next
                        );
                        attempt = next;
                    }
                    None => {
                        return Err(ProviderError::Semantic(FLAIR_REQUIRED.to_string()).into());
                    }
                },
                SubmitOutcome::Rejected(summary) => {
                    return Err(ProviderError::Semantic(summary).into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthKeys;
    use crate::store::MemoryAccountStore;
    use uuid::Uuid;

    fn connector() -> RedditConnector {
        RedditConnector::new(
            RedditConfig {
                keys: OAuthKeys {
                    client_id: "id".to_string(),
                    client_secret: "secret".to_string(),
                    redirect_url: "https://app.example.com/cb".to_string(),
                },
                user_agent: "hubcast tests".to_string(),
            },
            5,
            Arc::new(TokenVault::new(Arc::new(MemoryAccountStore::new()))),
        )
    }

    fn envelope(json: &str) -> SubmitEnvelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_classify_successful_submission() {
        let outcome = classify_submission(envelope(
            r#"{"json":{"errors":[],"data":{"url":"https://www.reddit.com/r/rust/comments/abc/post/","id":"abc"}}}"#,
        ));
        match outcome {
            SubmitOutcome::Posted(data) => {
                assert_eq!(data.id.as_deref(), Some("abc"));
            }
            other => panic!("expected posted, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_flair_required() {
        let outcome = classify_submission(envelope(
            r#"{"json":{"errors":[["SUBMIT_VALIDATION_FLAIR_REQUIRED","a flair is required","flair"]]}}"#,
        ));
        assert!(matches!(outcome, SubmitOutcome::FlairRequired));
    }

    #[test]
    fn test_classify_other_rejection() {
        let outcome = classify_submission(envelope(
            r#"{"json":{"errors":[["RATELIMIT","you are doing that too much","ratelimit"]]}}"#,
        ));
        match outcome {
            SubmitOutcome::Rejected(summary) => assert!(summary.contains("RATELIMIT")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_chain_ends_at_profile() {
        let flaired = Attempt::Flaired("f1".to_string());
        let bare = fallback_after(&flaired).unwrap();
        assert_eq!(bare, Attempt::Bare);

        let profile = fallback_after(&bare).unwrap();
        assert_eq!(profile, Attempt::Profile);

        assert!(fallback_after(&profile).is_none());
    }

    #[test]
    fn test_profile_feed_name() {
        assert_eq!(profile_feed("spez"), "u_spez");
    }

    #[tokio::test]
    async fn test_status_false_without_subreddit_selected() {
        let connector = connector();
        let account = Account::new(Uuid::new_v4());

        let mut record = TokenRecord::new("tok");
        record.expires_at = Some(Utc::now() + Duration::hours(1));
        record.targets = vec![Target::new("rust", "Rust")];
        connector
            .vault()
            .write(account.id, Provider::Reddit, record)
            .await
            .unwrap();

        assert!(!connector.status(&account).await);
    }

    #[tokio::test]
    async fn test_status_true_outside_refresh_buffer() {
        let connector = connector();
        let account = Account::new(Uuid::new_v4());

        let mut record = TokenRecord::new("tok");
        record.refresh_token = Some("refresh".to_string());
        record.expires_at = Some(Utc::now() + Duration::minutes(REFRESH_BUFFER_MINS + 1));
        record.targets = vec![Target::new("rust", "Rust")];
        record.selected_target = Some("rust".to_string());
        connector
            .vault()
            .write(account.id, Provider::Reddit, record)
            .await
            .unwrap();

        assert!(connector.status(&account).await);
    }

    #[tokio::test]
    async fn test_status_false_when_stale_and_no_refresh_token() {
        let connector = connector();
        let account = Account::new(Uuid::new_v4());

        let mut record = TokenRecord::new("tok");
        record.expires_at = Some(Utc::now() + Duration::minutes(1));
        record.targets = vec![Target::new("rust", "Rust")];
        record.selected_target = Some("rust".to_string());
        connector
            .vault()
            .write(account.id, Provider::Reddit, record)
            .await
            .unwrap();

        // Inside the buffer with nothing to refresh with: disconnected.
        assert!(!connector.status(&account).await);
    }

    #[test]
    fn test_listing_wire_shape() {
        let json = r#"{"data":{"children":[
            {"data":{"display_name":"rust","title":"The Rust Programming Language","community_icon":""}},
            {"data":{"display_name":"programming","title":null,"community_icon":null}}
        ]}}"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.data.children.len(), 2);
        assert_eq!(listing.data.children[1].data.display_name, "programming");
    }
}
