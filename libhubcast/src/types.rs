//! Core types for Hubcast

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported publishing providers.
///
/// The lowercase string form doubles as the key into the per-account token
/// map, so it must stay stable across releases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    X,
    LinkedIn,
    Facebook,
    Instagram,
    Reddit,
    Pinterest,
    Blog,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Provider::X,
        Provider::LinkedIn,
        Provider::Facebook,
        Provider::Instagram,
        Provider::Reddit,
        Provider::Pinterest,
        Provider::Blog,
    ];

    /// Stable lowercase identifier, used as the token map key.
    pub fn key(&self) -> &'static str {
        match self {
            Provider::X => "x",
            Provider::LinkedIn => "linkedin",
            Provider::Facebook => "facebook",
            Provider::Instagram => "instagram",
            Provider::Reddit => "reddit",
            Provider::Pinterest => "pinterest",
            Provider::Blog => "blog",
        }
    }

    /// What the selectable resource is called on this provider.
    ///
    /// X and Blog publish straight to the authenticated account and have no
    /// selection step.
    pub fn resource_noun(&self) -> Option<&'static str> {
        match self {
            Provider::Facebook => Some("page"),
            Provider::Instagram => Some("profile"),
            Provider::LinkedIn => Some("organization"),
            Provider::Reddit => Some("subreddit"),
            Provider::Pinterest => Some("board"),
            Provider::X | Provider::Blog => None,
        }
    }

    /// Whether publish must fail closed when no target has been selected.
    pub fn requires_target(&self) -> bool {
        self.resource_noun().is_some()
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x" | "twitter" => Ok(Provider::X),
            "linkedin" => Ok(Provider::LinkedIn),
            "facebook" => Ok(Provider::Facebook),
            "instagram" => Ok(Provider::Instagram),
            "reddit" => Ok(Provider::Reddit),
            "pinterest" => Ok(Provider::Pinterest),
            "blog" => Ok(Provider::Blog),
            _ => Err(format!("unknown provider: '{}'", s)),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A selectable destination on a provider: a page, board, organization,
/// subreddit or profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
}

impl Target {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_url: None,
        }
    }
}

/// Persisted credential state for one account and provider pair.
///
/// Expiry is always stored as an absolute instant. Connectors normalize
/// whatever their provider hands back (an absolute date, an ISO string, or a
/// relative seconds value) into `expires_at` before persisting, so downstream
/// comparison logic never has to re-derive it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set on every mutation.
    pub updated_at: DateTime<Utc>,
    /// Selectable resource list fetched at connect time.
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_target: Option<String>,
    /// Account handle where the provider exposes one (Reddit, X), used for
    /// permalink construction and the Reddit profile feed fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Base URL of the connected blog, for permalink construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog_url: Option<String>,
}

impl TokenRecord {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            updated_at: Utc::now(),
            targets: Vec::new(),
            selected_target: None,
            username: None,
            blog_url: None,
        }
    }

    /// The currently selected target, resolved against the cached list.
    pub fn selected(&self) -> Option<&Target> {
        let id = self.selected_target.as_deref()?;
        self.targets.iter().find(|t| t.id == id)
    }
}

/// Per-account settings relevant to the hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Token map keyed by [`Provider::key`]. Each connector owns and
    /// validates only its own entry.
    #[serde(default)]
    pub provider_tokens: HashMap<String, TokenRecord>,
}

/// An account as resolved by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    #[serde(default)]
    pub settings: AccountSettings,
}

impl Account {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            settings: AccountSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostState {
    Suggested,
    ToBePublished,
    Scheduled,
    Posted,
    Canceled,
    Failed,
    InProgress,
    Deleted,
}

/// A content item waiting to be published, owned by the host's content
/// pipeline. The hub only ever moves it to `Posted` or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: Provider,
    pub state: PostState,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Provider-side id, null until published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<Uuid>,
}

impl Post {
    pub fn new(account_id: Uuid, provider: Provider, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            provider,
            state: PostState::ToBePublished,
            body: body.into(),
            image_url: None,
            link_url: None,
            hashtags: Vec::new(),
            external_id: None,
            published_at: None,
            published_url: None,
            recommendation_id: None,
        }
    }
}

/// What a successful publish produced on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub external_id: String,
    pub url: String,
}

/// Outcome of a connect call: a human-readable confirmation plus the
/// resources enumerated with the fresh token.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub message: String,
    pub targets: Vec<Target>,
}

/// Outcome of a target selection call.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub message: String,
    pub provider: Provider,
}
