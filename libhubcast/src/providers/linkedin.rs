//! LinkedIn connector (REST v2)
//!
//! Publishes UGC shares on behalf of an organization. Organizations the user
//! administers are enumerated at connect time; when none has been explicitly
//! selected, the first enumerated one is used. Image shares require the
//! three-step asset flow: register an upload, PUT the binary, then reference
//! the asset URN in the share payload.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::OAuthKeys;
use crate::error::{PreconditionError, ProviderError, Result};
use crate::providers::{absolute_expiry, compose_body, error_for_status, request_token, Connector};
use crate::types::{Account, ConnectResult, Post, Provider, PublishedArtifact, Target, TokenRecord};
use crate::vault::TokenVault;

const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
const API_BASE: &str = "https://api.linkedin.com/v2";

pub struct LinkedInConnector {
    keys: OAuthKeys,
    http: reqwest::Client,
    vault: Arc<TokenVault>,
}

#[derive(Debug, Deserialize)]
struct AclList {
    elements: Vec<AclEntry>,
}

#[derive(Debug, Deserialize)]
struct AclEntry {
    organization: String,
}

#[derive(Debug, Deserialize)]
struct OrganizationEntity {
    #[serde(rename = "localizedName")]
    localized_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShareResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RegisterUploadResponse {
    value: RegisterUploadValue,
}

#[derive(Debug, Deserialize)]
struct RegisterUploadValue {
    asset: String,
    #[serde(rename = "uploadMechanism")]
    upload_mechanism: UploadMechanism,
}

#[derive(Debug, Deserialize)]
struct UploadMechanism {
    #[serde(rename = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest")]
    request: UploadHttpRequest,
}

#[derive(Debug, Deserialize)]
struct UploadHttpRequest {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

impl LinkedInConnector {
    pub fn new(keys: OAuthKeys, http: reqwest::Client, vault: Arc<TokenVault>) -> Self {
        Self { keys, http, vault }
    }

    /// Organizations the user administers, name-decorated. Name lookups fan
    /// out concurrently; a failed lookup falls back to the URN.
    async fn list_organizations(&self, access_token: &str) -> Result<Vec<Target>> {
        let response = self
            .http
            .get(format!("{}/organizationalEntityAcls", API_BASE))
            .query(&[
                ("q", "roleAssignee"),
                ("role", "ADMINISTRATOR"),
                ("state", "APPROVED"),
            ])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let acls = error_for_status(response)
            .await?
            .json::<AclList>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        let lookups = acls.elements.into_iter().map(|entry| {
            let http = self.http.clone();
            let token = access_token.to_string();
            async move {
                let urn = entry.organization;
                let name = fetch_organization_name(&http, &urn, &token)
                    .await
                    .unwrap_or_else(|| urn.clone());
                Target::new(urn, name)
            }
        });

        Ok(join_all(lookups).await)
    }

    /// Share author: the selected organization, or the first enumerated one
    /// when none was selected.
    fn author(record: &TokenRecord) -> Result<Target> {
        if let Some(selected) = record.selected() {
            return Ok(selected.clone());
        }
        record
            .targets
            .first()
            .cloned()
            .ok_or_else(|| PreconditionError::NoTargetSelected("organization".to_string()).into())
    }

    /// Register an upload slot, PUT the image bytes into it, and return the
    /// asset URN to reference from the share.
    async fn upload_image(
        &self,
        access_token: &str,
        author_urn: &str,
        image_url: &str,
    ) -> Result<String> {
        let register = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": author_urn,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });

        let response = self
            .http
            .post(format!("{}/assets?action=registerUpload", API_BASE))
            .bearer_auth(access_token)
            .json(&register)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let slot = error_for_status(response)
            .await?
            .json::<RegisterUploadResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        let image = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let bytes = error_for_status(image)
            .await?
            .bytes()
            .await
            .map_err(ProviderError::from)?;

        let upload = self
            .http
            .put(&slot.value.upload_mechanism.request.upload_url)
            .bearer_auth(access_token)
            .body(bytes)
            .send()
            .await
            .map_err(ProviderError::from)?;
        error_for_status(upload).await?;

        Ok(slot.value.asset)
    }
}

async fn fetch_organization_name(
    http: &reqwest::Client,
    urn: &str,
    token: &str,
) -> Option<String> {
    let numeric_id = urn.rsplit(':').next()?;
    let response = http
        .get(format!("{}/organizations/{}", API_BASE, numeric_id))
        .bearer_auth(token)
        .send()
        .await
        .ok()?;
    match error_for_status(response).await {
        Ok(ok) => ok
            .json::<OrganizationEntity>()
            .await
            .ok()
            .and_then(|o| o.localized_name),
        Err(e) => {
            debug!("Skipping name lookup for {}: {}", urn, e);
            None
        }
    }
}

#[async_trait]
impl Connector for LinkedInConnector {
    fn provider(&self) -> Provider {
        Provider::LinkedIn
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
                ("redirect_uri", self.keys.redirect_url.as_str()),
                ("client_id", self.keys.client_id.as_str()),
                ("client_secret", self.keys.client_secret.as_str()),
            ],
            None,
        )
        .await?;

        let targets = self.list_organizations(&token.access_token).await?;

        let mut record = TokenRecord::new(token.access_token);
        record.expires_at = absolute_expiry(Utc::now(), token.expires_in);
        record.targets = targets.clone();
        self.vault()
            .write(account.id, Provider::LinkedIn, record)
            .await?;

        info!(
            "LinkedIn connected for account {} with {} organization(s)",
            account.id,
            targets.len()
        );
        Ok(ConnectResult {
            message: format!(
                "LinkedIn connected, {} organization(s) available",
                targets.len()
            ),
            targets,
        })
    }

    async fn status(&self, account: &Account) -> bool {
        let record = match self.vault().read(account.id, Provider::LinkedIn).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("LinkedIn status read failed for {}: {}", account.id, e);
                return false;
            }
        };

        // Explicit selection is optional here because the author defaults to
        // the first organization, but there must be at least one to publish
        // to.
        if record.access_token.is_empty() || record.targets.is_empty() {
            return false;
        }

        // No refresh grant; the session expires and requires re-auth.
        match record.expires_at {
            Some(expires_at) => expires_at > Utc::now(),
            None => false,
        }
    }

    async fn create_content(&self, account: &Account, post: &Post) -> Result<PublishedArtifact> {
        let record = self
            .vault()
            .read(account.id, Provider::LinkedIn)
            .await?
            .ok_or_else(|| ProviderError::Auth("LinkedIn is not connected".to_string()))?;

        let author = Self::author(&record)?;
        let commentary = compose_body(post);

        let media = match &post.image_url {
            Some(image_url) => {
                let asset = self
                    .upload_image(&record.access_token, &author.id, image_url)
                    .await?;
                json!([{ "status": "READY", "media": asset }])
            }
            None => json!([]),
        };
        let category = if post.image_url.is_some() { "IMAGE" } else { "NONE" };

        let payload = json!({
            "author": author.id,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": commentary },
                    "shareMediaCategory": category,
                    "media": media,
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        });

        let response = self
            .http
            .post(format!("{}/ugcPosts", API_BASE))
            .header("X-Restli-Protocol-Version", "2.0.0")
            .bearer_auth(&record.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let share = error_for_status(response)
            .await?
            .json::<ShareResponse>()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        let url = format!("https://www.linkedin.com/feed/update/{}/", share.id);
        info!(
            "Published post {} to LinkedIn as {}",
            post.id, author.name
        );
        Ok(PublishedArtifact {
            external_id: share.id,
            url,
        })
    }
}
