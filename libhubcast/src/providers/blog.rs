//! Blog connector (CMS REST API)
//!
//! Publishes articles to the account's own CMS. Tokens are long-lived and
//! there is no target selection; the connected site is captured at connect
//! time for permalink construction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::BlogConfig;
use crate::error::{ProviderError, Result};
use crate::providers::{absolute_expiry, compose_body, error_for_status, post_title, request_token, Connector};
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, TokenRecord};
use crate::vault::TokenVault;

pub struct BlogConnector {
    config: BlogConfig,
    http: reqwest::Client,
    vault: Arc<TokenVault>,
}

#[derive(Debug, Deserialize)]
struct SiteInfo {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleResponse {
    id: serde_json::Value,
    link: Option<String>,
}

impl BlogConnector {
    pub fn new(config: BlogConfig, http: reqwest::Client, vault: Arc<TokenVault>) -> Self {
        Self {
            config,
            http,
            vault,
        }
    }

    async fn site_url(&self, access_token: &str) -> Option<String> {
        let response = self
            .http
            .get(format!("{}/site", self.config.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .ok()?;
        error_for_status(response)
            .await
            .ok()?
            .json::<SiteInfo>()
            .await
            .ok()?
            .url
    }
}

#[async_trait]
impl Connector for BlogConnector {
    fn provider(&self) -> Provider {
        Provider::Blog
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
            &format!("{}/oauth/token", self.config.api_base),
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.keys.redirect_url.as_str()),
                ("client_id", self.config.keys.client_id.as_str()),
                ("client_secret", self.config.keys.client_secret.as_str()),
            ],
            None,
        )
        .await?;

        let blog_url = self.site_url(&token.access_token).await;

        let mut record = TokenRecord::new(token.access_token);
        record.refresh_token = token.refresh_token;
        record.expires_at = absolute_expiry(Utc::now(), token.expires_in);
        record.blog_url = blog_url.clone();
        self.vault()
            .write(account.id, Provider::Blog, record)
            .await?;

        info!("Blog connected for account {}", account.id);
        Ok(ConnectResult {
            message: match blog_url {
                Some(url) => format!("Blog connected: {}", url),
                None => "Blog connected".to_string(),
            },
            targets: Vec::new(),
        })
    }

    async fn status(&self, account: &Account) -> bool {
        let record = match self.vault().read(account.id, Provider::Blog).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("Blog status read failed for {}: {}", account.id, e);
                return false;
            }
        };

        if record.access_token.is_empty() {
            return false;
        }

        // CMS tokens are typically issued without an expiry; when one was
        // recorded it is compared directly, with no refresh path.
        match record.expires_at {
            Some(expires_at) => expires_at > Utc::now(),
            None => true,
        }
    }

    async fn create_content(&self, account: &Account, post: &Post) -> Result<PublishedArtifact> {
        let record = self
            .vault()
            .read(account.id, Provider::Blog)
            .await?
            .ok_or_else(|| ProviderError::Auth("Blog is not connected".to_string()))?;

        let mut payload = serde_json::json!({
            "title": post_title(post),
            "content": compose_body(post),
            "status": "publish",
        });
        if let Some(image_url) = &post.image_url {
            payload["featured_image_url"] = serde_json::Value::String(image_url.clone());
        }

        let response = self
            .http
            .post(format!("{}/posts", self.config.api_base))
            .bearer_auth(&record.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let article = error_for_status(response)
            .await?
            .json::<ArticleResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        // CMS backends disagree on whether ids are numbers or strings.
        let external_id = match &article.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let url = article.link.unwrap_or_else(|| {
            let base = record.blog_url.as_deref().unwrap_or(&self.config.api_base);
            format!("{}/?p={}", base.trim_end_matches('/'), external_id)
        });

        info!("Published post {} to blog", post.id);
        Ok(PublishedArtifact { external_id, url })
    }
}
