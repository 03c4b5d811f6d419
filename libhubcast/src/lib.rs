//! Hubcast - Social publishing connector hub
//!
//! This library manages OAuth credential lifecycles per provider per
//! account, exposes a uniform contract over seven provider protocols, and
//! publishes posts with provider-specific failure handling. Persistence and
//! tracking are collaborator seams implemented by the host application.

pub mod config;
pub mod error;
pub mod logging;
pub mod providers;
pub mod publisher;
pub mod router;
pub mod store;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::HubConfig;
pub use error::{HubError, Result};
pub use router::{ConnectSummary, ConnectorHub};
pub use store::{AccountStore, PostStore, RecommendationTracker};
pub use types::{
    Account, ConnectResult, Post, PostState, Provider, PublishedArtifact, Target, TokenRecord,
};
pub use vault::TokenVault;
