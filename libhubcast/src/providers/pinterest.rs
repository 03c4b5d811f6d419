//! Pinterest connector (API v5)
//!
//! Pins are created on a board selected from the boards enumerated at
//! connect time. Outside production the connector runs in sandbox mode: the
//! OAuth exchange is bypassed entirely in favor of a fixed sandbox token and
//! the sandbox API host. That branch is deliberate and config-conditioned,
//! not an implementation shortcut.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::PinterestConfig;
use crate::error::{ConfigError, PreconditionError, ProviderError, Result};
use crate::providers::{
    absolute_expiry, compose_body, error_for_status, post_title, request_token, token_is_fresh,
    Connector,
};
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, Target, TokenRecord};
use crate::vault::TokenVault;

const PRODUCTION_BASE: &str = "https://api.pinterest.com/v5";
const SANDBOX_BASE: &str = "https://api-sandbox.pinterest.com/v5";

pub struct PinterestConnector {
    config: PinterestConfig,
    http: reqwest::Client,
    vault: Arc<TokenVault>,
}

#[derive(Debug, Deserialize)]
struct BoardList {
    items: Vec<BoardEntry>,
}

#[derive(Debug, Deserialize)]
struct BoardEntry {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    id: String,
}

impl PinterestConnector {
    pub fn new(config: PinterestConfig, http: reqwest::Client, vault: Arc<TokenVault>) -> Self {
        Self {
            config,
            http,
            vault,
        }
    }

    fn api_base(&self) -> &'static str {
        if self.config.sandbox {
            SANDBOX_BASE
        } else {
            PRODUCTION_BASE
        }
    }

    /// Production credential acquisition: the standard authorization-code
    /// grant against the v5 token endpoint.
    async fn production_token(&self, code: &str) -> Result<TokenRecord> {
        let token = request_token(
            &self.http,
            &format!("{}/oauth/token", PRODUCTION_BASE),
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.keys.redirect_url.as_str()),
            ],
            Some((
                self.config.keys.client_id.as_str(),
                self.config.keys.client_secret.as_str(),
            )),
        )
        .await?;

        let mut record = TokenRecord::new(token.access_token);
        record.refresh_token = token.refresh_token;
        record.expires_at = absolute_expiry(Utc::now(), token.expires_in);
        Ok(record)
    }

    /// Sandbox credential acquisition: no exchange, just the fixed token
    /// from configuration. Sandbox tokens do not expire.
    fn sandbox_token(&self) -> Result<TokenRecord> {
        let token = self
            .config
            .sandbox_token
            .clone()
            .ok_or_else(|| ConfigError::MissingField("pinterest.sandbox_token".to_string()))?;
        Ok(TokenRecord::new(token))
    }

    async fn list_boards(&self, access_token: &str) -> Result<Vec<Target>> {
        let response = self
            .http
            .get(format!("{}/boards", self.api_base()))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let boards = error_for_status(response)
            .await?
            .json::<BoardList>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        Ok(boards
            .items
            .into_iter()
            .map(|board| Target::new(board.id, board.name))
            .collect())
    }
}

#[async_trait]
impl Connector for PinterestConnector {
    fn provider(&self) -> Provider {
        Provider::Pinterest
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
        let mut record = if self.config.sandbox {
            debug!("Pinterest sandbox mode, skipping OAuth exchange");
            self.sandbox_token()?
        } else {
            self.production_token(code).await?
        };

        let targets = self.list_boards(&record.access_token).await?;
        record.targets = targets.clone();
        self.vault()
            .write(account.id, Provider::Pinterest, record)
            .await?;

        info!(
            "Pinterest connected for account {} with {} board(s)",
            account.id,
            targets.len()
        );
        Ok(ConnectResult {
            message: format!("Pinterest connected, {} board(s) available", targets.len()),
            targets,
        })
    }

    async fn status(&self, account: &Account) -> bool {
        let record = match self.vault().read(account.id, Provider::Pinterest).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("Pinterest status read failed for {}: {}", account.id, e);
                return false;
            }
        };

        if record.access_token.is_empty() || record.selected_target.is_none() {
            return false;
        }

        // Sandbox tokens are fixed and never expire.
        if self.config.sandbox {
            return true;
        }

        if token_is_fresh(record.expires_at, Duration::zero(), Utc::now()) {
            return true;
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            return false;
        };

        debug!("Pinterest token for {} expired, refreshing", account.id);
        match request_token(
            &self.http,
            &format!("{}/oauth/token", PRODUCTION_BASE),
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ],
            Some((
                self.config.keys.client_id.as_str(),
                self.config.keys.client_secret.as_str(),
            )),
        )
        .await
        {
            Ok(refreshed) => {
                let expires_at = absolute_expiry(Utc::now(), refreshed.expires_in);
                let persisted = self
                    .vault()
                    .update(account.id, Provider::Pinterest, |r| {
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
                warn!("Pinterest token refresh failed for {}: {}", account.id, e);
                false
            }
        }
    }

    fn validate(&self, post: &Post) -> Result<()> {
        // A pin is an image; there is no text-only form.
        if post.image_url.is_none() {
            return Err(PreconditionError::ImageRequired(Provider::Pinterest).into());
        }
        Ok(())
    }

    async fn create_content(&self, account: &Account, post: &Post) -> Result<PublishedArtifact> {
        let record = self
            .vault()
            .read(account.id, Provider::Pinterest)
            .await?
            .ok_or_else(|| ProviderError::Auth("Pinterest is not connected".to_string()))?;

        let board = record
            .selected()
            .ok_or_else(|| PreconditionError::NoTargetSelected("board".to_string()))?
            .clone();
        let image_url = post
            .image_url
            .as_deref()
            .ok_or(PreconditionError::ImageRequired(Provider::Pinterest))?;

        let mut payload = serde_json::json!({
            "board_id": board.id,
            "title": post_title(post),
            "description": compose_body(post),
            "media_source": {
                "source_type": "image_url",
                "url": image_url,
            },
        });
        if let Some(link) = &post.link_url {
            payload["link"] = serde_json::Value::String(link.clone());
        }

        let response = self
            .http
            .post(format!("{}/pins", self.api_base()))
            .bearer_auth(&record.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let pin = error_for_status(response)
            .await?
            .json::<PinResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        info!("Published post {} to Pinterest board {}", post.id, board.name);
        Ok(PublishedArtifact {
            url: format!("https://www.pinterest.com/pin/{}/", pin.id),
            external_id: pin.id,
        })
    }
}
