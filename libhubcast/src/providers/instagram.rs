//! Instagram connector (Graph API)
//!
//! Instagram business profiles hang off Facebook pages, so enumeration walks
//! the page list and keeps the pages that carry a linked profile. Publishing
//! is two-phase: create a media container, then publish the container id.
//! There are no text-only posts; an image URL is mandatory.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::OAuthKeys;
use crate::error::{PreconditionError, ProviderError, Result};
use crate::providers::{absolute_expiry, compose_body, error_for_status, Connector};
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, Target, TokenRecord};
use crate::vault::TokenVault;

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

pub struct InstagramConnector {
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
}

#[derive(Debug, Deserialize)]
struct LinkedProfile {
    instagram_business_account: Option<ProfileEntry>,
}

#[derive(Debug, Deserialize)]
struct ProfileEntry {
    id: String,
    username: String,
    profile_picture_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MediaPermalink {
    permalink: Option<String>,
}

impl InstagramConnector {
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

    /// Business profiles linked to the user's pages. Pages without a linked
    /// profile, and pages whose lookup fails, are skipped.
    async fn list_profiles(&self, access_token: &str) -> Result<Vec<Target>> {
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

        let lookups = pages.data.into_iter().map(|page| {
            let http = self.http.clone();
            let token = access_token.to_string();
            async move {
                let response = http
                    .get(format!("{}/{}", GRAPH_BASE, page.id))
                    .query(&[
                        (
                            "fields",
                            "instagram_business_account{id,username,profile_picture_url}",
                        ),
                        ("access_token", token.as_str()),
                    ])
                    .send()
                    .await
                    .ok()?;
                let linked = error_for_status(response)
                    .await
                    .map_err(|e| debug!("Skipping page {}: {}", page.id, e))
                    .ok()?
                    .json::<LinkedProfile>()
                    .await
                    .ok()?;
                linked.instagram_business_account
            }
        });

        Ok(join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .map(|profile| Target {
                id: profile.id,
                name: profile.username,
                image_url: profile.profile_picture_url,
            })
            .collect())
    }

    async fn resolve_permalink(&self, media_id: &str, token: &str) -> Option<String> {
        let response = self
            .http
            .get(format!("{}/{}", GRAPH_BASE, media_id))
            .query(&[("fields", "permalink"), ("access_token", token)])
            .send()
            .await
            .ok()?;
        error_for_status(response)
            .await
            .ok()?
            .json::<MediaPermalink>()
            .await
            .ok()
            .and_then(|p| p.permalink)
    }
}

#[async_trait]
impl Connector for InstagramConnector {
    fn provider(&self) -> Provider {
        Provider::Instagram
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
        let targets = self.list_profiles(&token.access_token).await?;

        let mut record = TokenRecord::new(token.access_token);
        record.expires_at = absolute_expiry(Utc::now(), token.expires_in);
        record.targets = targets.clone();
        self.vault()
            .write(account.id, Provider::Instagram, record)
            .await?;

        info!(
            "Instagram connected for account {} with {} profile(s)",
            account.id,
            targets.len()
        );
        Ok(ConnectResult {
            message: format!(
                "Instagram connected, {} profile(s) available",
                targets.len()
            ),
            targets,
        })
    }

    async fn status(&self, account: &Account) -> bool {
        let record = match self.vault().read(account.id, Provider::Instagram).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("Instagram status read failed for {}: {}", account.id, e);
                return false;
            }
        };

        if record.access_token.is_empty() || record.selected_target.is_none() {
            return false;
        }

        // No refresh grant on this surface; the session simply expires.
        match record.expires_at {
            Some(expires_at) => expires_at > Utc::now(),
            None => false,
        }
    }

    fn validate(&self, post: &Post) -> Result<()> {
        if post.image_url.is_none() {
            return Err(PreconditionError::ImageRequired(Provider::Instagram).into());
        }
        Ok(())
    }

    async fn create_content(&self, account: &Account, post: &Post) -> Result<PublishedArtifact> {
        let record = self
            .vault()
            .read(account.id, Provider::Instagram)
            .await?
            .ok_or_else(|| ProviderError::Auth("Instagram is not connected".to_string()))?;

        let profile = record
            .selected()
            .ok_or_else(|| PreconditionError::NoTargetSelected("profile".to_string()))?
            .clone();

        let image_url = post
            .image_url
            .as_deref()
            .ok_or(PreconditionError::ImageRequired(Provider::Instagram))?;
        let caption = compose_body(post);

        // Phase one: create the media container.
        let response = self
            .http
            .post(format!("{}/{}/media", GRAPH_BASE, profile.id))
            .form(&[
                ("image_url", image_url),
                ("caption", caption.as_str()),
                ("access_token", record.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(ProviderError::from)?;
        let container = error_for_status(response)
            .await?
            .json::<ContainerResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        // Phase two: publish the container.
        let response = self
            .http
            .post(format!("{}/{}/media_publish", GRAPH_BASE, profile.id))
            .form(&[
                ("creation_id", container.id.as_str()),
                ("access_token", record.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(ProviderError::from)?;
        let media = error_for_status(response)
            .await?
            .json::<ContainerResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        let url = self
            .resolve_permalink(&media.id, &record.access_token)
            .await
            .unwrap_or_else(|| format!("https://www.instagram.com/{}", profile.name));

        info!(
            "Published post {} to Instagram profile {}",
            post.id, profile.name
        );
        Ok(PublishedArtifact {
            external_id: media.id,
            url,
        })
    }
}
