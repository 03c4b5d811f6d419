//! Facebook connector (Graph API)
//!
//! Publishes to a Facebook page selected from the pages enumerated at
//! connect time. Text-only posts go through the page feed endpoint, posts
//! with an image through the photos endpoint. The stored user token is
//! exchanged for a page access token on every publish.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::OAuthKeys;
use crate::error::{PreconditionError, ProviderError, Result};
use crate::providers::{
    absolute_expiry, error_for_status, token_is_fresh, compose_body, Connector,
};
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, Target, TokenRecord};
use crate::vault::TokenVault;

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

/// Refresh window: user tokens live for about 60 days, so a week of headroom
/// keeps the long-lived exchange off the hot path.
const REFRESH_BUFFER_DAYS: i64 = 7;

pub struct FacebookConnector {
    keys: OAuthKeys,
    http: reqwest::Client,
    vault: Arc<TokenVault>,
}

#[derive(Debug, Deserialize)]
struct PageList {
    data: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PictureEnvelope {
    data: PictureData,
}

#[derive(Debug, Deserialize)]
struct PictureData {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageAccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct FeedPostResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PhotoResponse {
    id: String,
    post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    permalink_url: Option<String>,
}

impl FacebookConnector {
    pub fn new(keys: OAuthKeys, http: reqwest::Client, vault: Arc<TokenVault>) -> Self {
        Self { keys, http, vault }
    }

    async fn exchange_code(&self, code: &str) -> Result<super::TokenResponse> {
        let response = self
            .http
            .get(format!("{}/oauth/access_token", GRAPH_BASE))
            .query(&[
                ("client_id", self.keys.client_id.as_str()),
                ("client_secret", self.keys.client_secret.as_str()),
                ("redirect_uri", self.keys.redirect_url.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(ProviderError::from)?;

        let response = error_for_status(response).await?;
        Ok(response
            .json::<super::TokenResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?)
    }

    /// Long-lived token exchange, also used as the refresh grant.
    async fn refresh_user_token(&self, current: &str) -> Result<super::TokenResponse> {
        let response = self
            .http
            .get(format!("{}/oauth/access_token", GRAPH_BASE))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.keys.client_id.as_str()),
                ("client_secret", self.keys.client_secret.as_str()),
                ("fb_exchange_token", current),
            ])
            .send()
            .await
            .map_err(ProviderError::from)?;

        let response = error_for_status(response).await?;
        Ok(response
            .json::<super::TokenResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?)
    }

    /// Enumerate the pages the user manages, decorating each with its
    /// profile picture. Picture fetches fan out concurrently and individual
    /// failures degrade to no picture rather than aborting the batch.
    async fn list_pages(&self, access_token: &str) -> Result<Vec<Target>> {
        let response = self
            .http
            .get(format!("{}/me/accounts", GRAPH_BASE))
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(ProviderError::from)?;

        let pages = error_for_status(response)
            .await?
            .json::<PageList>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        let lookups = pages.data.iter().map(|page| {
            let http = self.http.clone();
            let page_id = page.id.clone();
            let token = access_token.to_string();
            async move { fetch_page_picture(&http, &page_id, &token).await }
        });
        let pictures = join_all(lookups).await;

        Ok(pages
            .data
            .into_iter()
            .zip(pictures)
            .map(|(page, picture)| Target {
                id: page.id,
                name: page.name,
                image_url: picture,
            })
            .collect())
    }

    /// The page token is derived from the user token on every publish rather
    /// than cached, so page-level permission changes take effect immediately.
    async fn page_access_token(&self, page_id: &str, user_token: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/{}", GRAPH_BASE, page_id))
            .query(&[("fields", "access_token"), ("access_token", user_token)])
            .send()
            .await
            .map_err(ProviderError::from)?;

        let token = error_for_status(response)
            .await?
            .json::<PageAccessToken>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn resolve_permalink(&self, object_id: &str, page_token: &str) -> Option<String> {
        let response = self
            .http
            .get(format!("{}/{}", GRAPH_BASE, object_id))
            .query(&[("fields", "permalink_url"), ("access_token", page_token)])
            .send()
            .await
            .ok()?;

        let parsed = error_for_status(response).await.ok()?;
        parsed
            .json::<PermalinkResponse>()
            .await
            .ok()
            .and_then(|p| p.permalink_url)
    }
}

async fn fetch_page_picture(
    http: &reqwest::Client,
    page_id: &str,
    token: &str,
) -> Option<String> {
    let response = http
        .get(format!("{}/{}/picture", GRAPH_BASE, page_id))
        .query(&[("redirect", "false"), ("access_token", token)])
        .send()
        .await
        .ok()?;

    match error_for_status(response).await {
        Ok(ok) => ok
            .json::<PictureEnvelope>()
            .await
            .ok()
            .and_then(|p| p.data.url),
        Err(e) => {
            debug!("Skipping picture for page {}: {}", page_id, e);
            None
        }
    }
}

#[async_trait]
impl Connector for FacebookConnector {
    fn provider(&self) -> Provider {
        Provider::Facebook
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
        let token = self.exchange_code(code).await?;
        let targets = self.list_pages(&token.access_token).await?;

        let mut record = TokenRecord::new(token.access_token);
        record.expires_at = absolute_expiry(Utc::now(), token.expires_in);
        record.targets = targets.clone();
        self.vault()
            .write(account.id, Provider::Facebook, record)
            .await?;

        info!(
            "Facebook connected for account {} with {} page(s)",
            account.id,
            targets.len()
        );
        Ok(ConnectResult {
            message: format!("Facebook connected, {} page(s) available", targets.len()),
            targets,
        })
    }

    async fn status(&self, account: &Account) -> bool {
        let record = match self.vault().read(account.id, Provider::Facebook).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("Facebook status read failed for {}: {}", account.id, e);
                return false;
            }
        };

        if record.access_token.is_empty() || record.selected_target.is_none() {
            return false;
        }

        if token_is_fresh(record.expires_at, Duration::days(REFRESH_BUFFER_DAYS), Utc::now()) {
            return true;
        }

        debug!("Facebook token for {} near expiry, refreshing", account.id);
        match self.refresh_user_token(&record.access_token).await {
            Ok(refreshed) => {
                let expires_at = absolute_expiry(Utc::now(), refreshed.expires_in);
                let persisted = self
                    .vault()
                    .update(account.id, Provider::Facebook, |r| {
                        r.access_token = refreshed.access_token;
                        r.expires_at = expires_at;
                    })
                    .await;
                persisted.is_ok()
            }
            Err(e) => {
                warn!("Facebook token refresh failed for {}: {}", account.id, e);
                false
            }
        }
    }

    fn validate(&self, post: &Post) -> Result<()> {
        if post.body.trim().is_empty() && post.image_url.is_none() {
            return Err(PreconditionError::EmptyBody.into());
        }
        Ok(())
    }

    async fn create_content(&self, account: &Account, post: &Post) -> Result<PublishedArtifact> {
        let record = self
            .vault()
            .read(account.id, Provider::Facebook)
            .await?
            .ok_or_else(|| ProviderError::Auth("Facebook is not connected".to_string()))?;

        let page = record
            .selected()
            .ok_or_else(|| PreconditionError::NoTargetSelected("page".to_string()))?
            .clone();

        let page_token = self
            .page_access_token(&page.id, &record.access_token)
            .await?;
        let message = compose_body(post);

        let object_id = if let Some(image_url) = &post.image_url {
            // Image posts go through /photos as a multipart form.
            let form = reqwest::multipart::Form::new()
                .text("url", image_url.clone())
                .text("caption", message)
                .text("access_token", page_token.clone());

            let response = self
                .http
                .post(format!("{}/{}/photos", GRAPH_BASE, page.id))
                .multipart(form)
                .send()
                .await
                .map_err(ProviderError::from)?;

            let photo = error_for_status(response)
                .await?
                .json::<PhotoResponse>()
                .await
                .map_err(|e| ProviderError::Response(e.to_string()))?;
            photo
                .post_id
                .unwrap_or_else(|| format!("{}_{}", page.id, photo.id))
        } else {
            let response = self
                .http
                .post(format!("{}/{}/feed", GRAPH_BASE, page.id))
                .form(&[
                    ("message", message.as_str()),
                    ("access_token", page_token.as_str()),
                ])
                .send()
                .await
                .map_err(ProviderError::from)?;

            error_for_status(response)
                .await?
                .json::<FeedPostResponse>()
                .await
                .map_err(|e| ProviderError::Response(e.to_string()))?
                .id
        };

        let url = self
            .resolve_permalink(&object_id, &page_token)
            .await
            .unwrap_or_else(|| format!("https://facebook.com/{}", object_id));

        info!("Published post {} to Facebook page {}", post.id, page.id);
        Ok(PublishedArtifact {
            external_id: object_id,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAccountStore;
    use uuid::Uuid;

    fn connector() -> FacebookConnector {
        FacebookConnector::new(
            OAuthKeys {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                redirect_url: "https://app.example.com/cb".to_string(),
            },
            super::super::build_http_client(5),
            Arc::new(TokenVault::new(Arc::new(MemoryAccountStore::new()))),
        )
    }

    #[test]
    fn test_validate_allows_image_only_posts() {
        let connector = connector();
        let mut post = Post::new(Uuid::new_v4(), Provider::Facebook, "");
        post.image_url = Some("https://cdn.example.com/pic.jpg".to_string());
        assert!(connector.validate(&post).is_ok());
    }

    #[test]
    fn test_validate_rejects_fully_empty_posts() {
        let connector = connector();
        let post = Post::new(Uuid::new_v4(), Provider::Facebook, "  ");
        assert!(connector.validate(&post).is_err());
    }

    #[tokio::test]
    async fn test_status_false_without_record() {
        let connector = connector();
        let account = Account::new(Uuid::new_v4());
        assert!(!connector.status(&account).await);
    }

    #[tokio::test]
    async fn test_status_false_without_selected_page() {
        let connector = connector();
        let account = Account::new(Uuid::new_v4());

        let mut record = TokenRecord::new("tok");
        record.expires_at = Some(Utc::now() + Duration::days(60));
        record.targets = vec![Target::new("1", "Page")];
        connector
            .vault()
            .write(account.id, Provider::Facebook, record)
            .await
            .unwrap();

        assert!(!connector.status(&account).await);
    }

    #[tokio::test]
    async fn test_status_true_with_fresh_token_and_page() {
        let connector = connector();
        let account = Account::new(Uuid::new_v4());

        let mut record = TokenRecord::new("tok");
        record.expires_at = Some(Utc::now() + Duration::days(60));
        record.targets = vec![Target::new("1", "Page")];
        record.selected_target = Some("1".to_string());
        connector
            .vault()
            .write(account.id, Provider::Facebook, record)
            .await
            .unwrap();

        // Fresh token and selected page: no refresh, no network.
        assert!(connector.status(&account).await);
    }

    #[test]
    fn test_page_list_wire_shape() {
        let json = r#"{"data":[{"id":"123","name":"My Page","category":"Brand"}]}"#;
        let pages: PageList = serde_json::from_str(json).unwrap();
        assert_eq!(pages.data.len(), 1);
        assert_eq!(pages.data[0].name, "My Page");
    }

    #[test]
    fn test_photo_response_falls_back_to_composed_id() {
        let json = r#"{"id":"987"}"#;
        let photo: PhotoResponse = serde_json::from_str(json).unwrap();
        assert!(photo.post_id.is_none());
        assert_eq!(photo.id, "987");
    }
}
