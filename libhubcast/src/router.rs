//! Connection router
//!
//! Single dispatch point from provider tag to connector instance. The router
//! forwards every hub operation, normalizes connect outcomes into a tagged
//! summary for logging, and owns no provider logic of its own. Providers
//! without a configuration section are unroutable and surface as a
//! configuration error, never a panic.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::HubConfig;
use crate::error::{ConfigError, Result};
use crate::providers::{
    blog::BlogConnector, build_http_client, facebook::FacebookConnector,
    instagram::InstagramConnector, linkedin::LinkedInConnector, pinterest::PinterestConnector,
    reddit::RedditConnector, x::XConnector, Connector,
};
use crate::publisher::Publisher;
use crate::store::{AccountStore, PostStore, RecommendationTracker};
use crate::types::{
    Account, ConnectResult, Provider, PublishedArtifact, SelectionResult, Target,
};
use crate::vault::TokenVault;

/// Provider-tagged summary of a connect outcome, for observability.
#[derive(Debug, Clone)]
pub struct ConnectSummary {
    pub provider: Provider,
    pub resource: Option<&'static str>,
    pub count: usize,
}

impl ConnectSummary {
    fn from_result(provider: Provider, result: &ConnectResult) -> Self {
        Self {
            provider,
            resource: provider.resource_noun(),
            count: result.targets.len(),
        }
    }
}

impl std::fmt::Display for ConnectSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.resource {
            Some(resource) => write!(
                f,
                "{} connected ({} {}(s))",
                self.provider, self.count, resource
            ),
            None => write!(f, "{} connected", self.provider),
        }
    }
}

pub struct ConnectorHub {
    connectors: HashMap<Provider, Box<dyn Connector>>,
    publisher: Publisher,
}

impl ConnectorHub {
    /// Build a hub over an explicit connector set. Most hosts want
    /// [`ConnectorHub::from_config`] instead.
    pub fn new(connectors: Vec<Box<dyn Connector>>, publisher: Publisher) -> Self {
        let connectors = connectors
            .into_iter()
            .map(|connector| (connector.provider(), connector))
            .collect();
        Self {
            connectors,
            publisher,
        }
    }

    /// Assemble connectors for every configured provider over the given
    /// collaborator seams.
    pub fn from_config(
        config: &HubConfig,
        accounts: Arc<dyn AccountStore>,
        posts: Arc<dyn PostStore>,
        tracker: Arc<dyn RecommendationTracker>,
    ) -> Self {
        let vault = Arc::new(TokenVault::new(accounts));
        let connectors = create_connectors(config, vault);
        info!("Connector hub ready with {} provider(s)", connectors.len());
        Self::new(connectors, Publisher::new(posts, tracker))
    }

    fn connector(&self, provider: Provider) -> Result<&dyn Connector> {
        self.connectors
            .get(&provider)
            .map(|c| c.as_ref())
            .ok_or_else(|| ConfigError::ProviderNotConfigured(provider).into())
    }

    /// Providers this hub can route to, in declaration order.
    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.connectors.contains_key(p))
            .collect()
    }

    pub async fn connect(
        &self,
        account: &Account,
        provider: Provider,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ConnectResult> {
        let result = self
            .connector(provider)?
            .connect(account, code, code_verifier)
            .await?;
        info!("{}", ConnectSummary::from_result(provider, &result));
        Ok(result)
    }

    /// Connection health. Routing failures surface as errors; everything
    /// else degrades to `false` inside the connector.
    pub async fn status(&self, account: &Account, provider: Provider) -> Result<bool> {
        Ok(self.connector(provider)?.status(account).await)
    }

    pub async fn logout(&self, account: &Account, provider: Provider) -> Result<bool> {
        self.connector(provider)?.logout(account).await
    }

    pub async fn publish(
        &self,
        account: &Account,
        post_id: Uuid,
        provider: Provider,
    ) -> Result<PublishedArtifact> {
        self.publisher
            .publish(account, post_id, self.connector(provider)?)
            .await
    }

    pub async fn select_target(
        &self,
        account: &Account,
        provider: Provider,
        target_id: &str,
    ) -> Result<SelectionResult> {
        let target = self
            .connector(provider)?
            .select_target(account, target_id)
            .await?;
        let noun = provider.resource_noun().unwrap_or("target");
        Ok(SelectionResult {
            message: format!("Selected {} '{}' for {}", noun, target.name, provider),
            provider,
        })
    }

    pub async fn selected_target(
        &self,
        account: &Account,
        provider: Provider,
    ) -> Result<Option<Target>> {
        self.connector(provider)?.selected_target(account).await
    }
}

/// Create connector instances for every provider with a config section.
pub fn create_connectors(config: &HubConfig, vault: Arc<TokenVault>) -> Vec<Box<dyn Connector>> {
    let http = build_http_client(config.http.timeout_secs);
    let mut connectors: Vec<Box<dyn Connector>> = Vec::new();

    if let Some(keys) = &config.x {
        connectors.push(Box::new(XConnector::new(
            keys.clone(),
            http.clone(),
            vault.clone(),
        )));
    }
    if let Some(keys) = &config.linkedin {
        connectors.push(Box::new(LinkedInConnector::new(
            keys.clone(),
            http.clone(),
            vault.clone(),
        )));
    }
    if let Some(keys) = &config.facebook {
        connectors.push(Box::new(FacebookConnector::new(
            keys.clone(),
            http.clone(),
            vault.clone(),
        )));
    }
    if let Some(keys) = &config.instagram {
        connectors.push(Box::new(InstagramConnector::new(
            keys.clone(),
            http.clone(),
            vault.clone(),
        )));
    }
    if let Some(reddit) = &config.reddit {
        connectors.push(Box::new(RedditConnector::new(
            reddit.clone(),
            config.http.timeout_secs,
            vault.clone(),
        )));
    }
    if let Some(pinterest) = &config.pinterest {
        connectors.push(Box::new(PinterestConnector::new(
            pinterest.clone(),
            http.clone(),
            vault.clone(),
        )));
    }
    if let Some(blog) = &config.blog {
        connectors.push(Box::new(BlogConnector::new(
            blog.clone(),
            http.clone(),
            vault.clone(),
        )));
    }

    connectors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;
    use crate::providers::mock::MockConnector;
    use crate::store::{MemoryPostStore, MemoryTracker};

    fn hub_with(connectors: Vec<Box<dyn Connector>>) -> ConnectorHub {
        let publisher = Publisher::new(
            Arc::new(MemoryPostStore::new()),
            Arc::new(MemoryTracker::new()),
        );
        ConnectorHub::new(connectors, publisher)
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_a_config_error() {
        let hub = hub_with(vec![Box::new(MockConnector::new(Provider::X))]);
        let account = Account::new(Uuid::new_v4());

        let result = hub.status(&account, Provider::Pinterest).await;
        assert!(matches!(
            result,
            Err(HubError::Config(ConfigError::ProviderNotConfigured(
                Provider::Pinterest
            )))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_the_matching_connector() {
        let hub = hub_with(vec![
            Box::new(MockConnector::new(Provider::X)),
            Box::new(MockConnector::new(Provider::Facebook).disconnected()),
        ]);
        let account = Account::new(Uuid::new_v4());

        assert!(hub.status(&account, Provider::X).await.unwrap());
        assert!(!hub.status(&account, Provider::Facebook).await.unwrap());
    }

    #[tokio::test]
    async fn test_providers_listing_follows_declaration_order() {
        let hub = hub_with(vec![
            Box::new(MockConnector::new(Provider::Reddit)),
            Box::new(MockConnector::new(Provider::X)),
        ]);
        assert_eq!(hub.providers(), vec![Provider::X, Provider::Reddit]);
    }

    #[tokio::test]
    async fn test_select_then_get_round_trip() {
        let hub = hub_with(vec![Box::new(MockConnector::new(Provider::Facebook))]);
        let account = Account::new(Uuid::new_v4());

        // Connect seeds the target cache, selection picks from it.
        hub.connect(&account, Provider::Facebook, "code", None)
            .await
            .unwrap();
        let selection = hub
            .select_target(&account, Provider::Facebook, "mock-target")
            .await
            .unwrap();
        assert_eq!(selection.provider, Provider::Facebook);
        assert!(selection.message.contains("Mock Target"));

        let selected = hub
            .selected_target(&account, Provider::Facebook)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, "mock-target");
    }

    #[tokio::test]
    async fn test_logout_twice_is_idempotent() {
        let hub = hub_with(vec![Box::new(MockConnector::new(Provider::X))]);
        let account = Account::new(Uuid::new_v4());

        assert!(hub.logout(&account, Provider::X).await.unwrap());
        assert!(hub.logout(&account, Provider::X).await.unwrap());
    }

    #[test]
    fn test_connect_summary_formatting() {
        let result = ConnectResult {
            message: String::new(),
            targets: vec![Target::new("1", "A"), Target::new("2", "B")],
        };
        let summary = ConnectSummary::from_result(Provider::Facebook, &result);
        assert_eq!(summary.to_string(), "facebook connected (2 page(s))");

        let bare = ConnectSummary::from_result(
            Provider::X,
            &ConnectResult {
                message: String::new(),
                targets: Vec::new(),
            },
        );
        assert_eq!(bare.to_string(), "x connected");
    }

    #[test]
    fn test_create_connectors_respects_config_sections() {
        let config = HubConfig {
            x: Some(crate::config::OAuthKeys {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                redirect_url: "https://app.example.com/cb".to_string(),
            }),
            ..Default::default()
        };
        let vault = Arc::new(TokenVault::new(Arc::new(
            crate::store::MemoryAccountStore::new(),
        )));

        let connectors = create_connectors(&config, vault);
        assert_eq!(connectors.len(), 1);
        assert_eq!(connectors[0].provider(), Provider::X);
    }
}
