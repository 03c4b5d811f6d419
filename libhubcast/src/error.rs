//! Error types for Hubcast

use thiserror::Error;

use crate::types::Provider;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl HubError {
    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Network failures (including timeouts) and rate limits are transient;
    /// configuration, precondition, and authentication failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HubError::Provider(ProviderError::Network(_))
                | HubError::Provider(ProviderError::RateLimit(_))
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Provider {0} is not configured")]
    ProviderNotConfigured(Provider),
}

/// Rejections raised before any network call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("post {0} not found")]
    PostNotFound(uuid::Uuid),

    #[error("post {post} does not belong to account {account}")]
    NotOwned { post: uuid::Uuid, account: uuid::Uuid },

    #[error("post {0} is already published")]
    AlreadyPublished(uuid::Uuid),

    #[error("post {post} is for {expected}, not {requested}")]
    ProviderMismatch {
        post: uuid::Uuid,
        expected: Provider,
        requested: Provider,
    },

    #[error("no {0} selected")]
    NoTargetSelected(String),

    #[error("unknown target id: {0}")]
    UnknownTarget(String),

    #[error("{0} does not support target selection")]
    SelectionNotSupported(Provider),

    #[error("post body is empty")]
    EmptyBody,

    #[error("{0} requires an image")]
    ImageRequired(Provider),
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("provider rejected the request: {0}")]
    Semantic(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Response(e.to_string())
        } else {
            // Timeouts, connect failures and everything in between are
            // treated as transient network trouble.
            ProviderError::Network(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_network_error() {
        let error = HubError::Provider(ProviderError::Network("connection reset".to_string()));
        assert!(error.is_transient());
    }

    #[test]
    fn test_transient_rate_limit() {
        let error = HubError::Provider(ProviderError::RateLimit("too many requests".to_string()));
        assert!(error.is_transient());
    }

    #[test]
    fn test_auth_error_not_transient() {
        let error = HubError::Provider(ProviderError::Auth("token revoked".to_string()));
        assert!(!error.is_transient());
    }

    #[test]
    fn test_precondition_not_transient() {
        let error = HubError::Precondition(PreconditionError::EmptyBody);
        assert!(!error.is_transient());
    }

    #[test]
    fn test_config_error_not_transient() {
        let error = HubError::Config(ConfigError::MissingField("facebook.client_id".to_string()));
        assert!(!error.is_transient());
    }

    #[test]
    fn test_error_message_formatting_precondition() {
        let post = uuid::Uuid::new_v4();
        let error = HubError::Precondition(PreconditionError::AlreadyPublished(post));
        let message = format!("{}", error);
        assert_eq!(
            message,
            format!("Precondition failed: post {} is already published", post)
        );
    }

    #[test]
    fn test_error_message_formatting_provider_mismatch() {
        let post = uuid::Uuid::new_v4();
        let error = PreconditionError::ProviderMismatch {
            post,
            expected: Provider::Facebook,
            requested: Provider::Reddit,
        };
        let message = format!("{}", error);
        assert!(message.contains("facebook"));
        assert!(message.contains("reddit"));
    }

    #[test]
    fn test_error_message_formatting_api() {
        let error = ProviderError::Api {
            status: 422,
            message: "invalid board".to_string(),
        };
        assert_eq!(format!("{}", error), "provider returned 422: invalid board");
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let config_error = ConfigError::MissingField("x.client_secret".to_string());
        let hub_error: HubError = config_error.into();
        assert!(matches!(hub_error, HubError::Config(_)));
    }

    #[test]
    fn test_error_conversion_from_provider_error() {
        let provider_error = ProviderError::Auth("expired".to_string());
        let hub_error: HubError = provider_error.into();
        assert!(matches!(hub_error, HubError::Provider(_)));
    }

    #[test]
    fn test_provider_not_configured_formatting() {
        let error = ConfigError::ProviderNotConfigured(Provider::Pinterest);
        assert_eq!(format!("{}", error), "Provider pinterest is not configured");
    }

    #[test]
    fn test_provider_error_clone() {
        let original = ProviderError::Semantic("SUBMIT_VALIDATION_FLAIR_REQUIRED".to_string());
        let cloned = original.clone();
        assert_eq!(format!("{}", original), format!("{}", cloned));
    }
}
