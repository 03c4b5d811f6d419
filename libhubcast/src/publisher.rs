//! Publication pipeline
//!
//! The provider-independent half of publishing: load and gate the Post,
//! revalidate the connection, hand off to the connector, then persist the
//! lifecycle transition and fire the tracking side channel. The tracking
//! call sits behind its own error boundary so its failure cannot affect the
//! outcome of a publish that already happened.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PreconditionError, ProviderError, Result};
use crate::providers::Connector;
use crate::store::{PostStore, RecommendationTracker};
use crate::types::{Account, Post, PostState, PublishedArtifact};

pub struct Publisher {
    posts: Arc<dyn PostStore>,
    tracker: Arc<dyn RecommendationTracker>,
}

impl Publisher {
    pub fn new(posts: Arc<dyn PostStore>, tracker: Arc<dyn RecommendationTracker>) -> Self {
        Self { posts, tracker }
    }

    /// Publish one post through the given connector.
    ///
    /// Precondition failures (missing, foreign, already published,
    /// mismatched, or invalid posts) are rejected before any network call
    /// and leave the Post untouched. Once the provider has been called, an
    /// unrecoverable error marks the Post `Failed` and is returned to the
    /// caller; a published Post never transitions backward.
    pub async fn publish(
        &self,
        account: &Account,
        post_id: Uuid,
        connector: &dyn Connector,
    ) -> Result<PublishedArtifact> {
        let provider = connector.provider();

        let mut post = self
            .posts
            .post(post_id)
            .await?
            .ok_or(PreconditionError::PostNotFound(post_id))?;

        if post.account_id != account.id {
            return Err(PreconditionError::NotOwned {
                post: post_id,
                account: account.id,
            }
            .into());
        }
        if post.state == PostState::Posted {
            return Err(PreconditionError::AlreadyPublished(post_id).into());
        }
        if post.provider != provider {
            return Err(PreconditionError::ProviderMismatch {
                post: post_id,
                expected: post.provider,
                requested: provider,
            }
            .into());
        }
        connector.validate(&post)?;

        if !connector.status(account).await {
            return Err(ProviderError::Auth(format!(
                "{} connection is not usable for account {}",
                provider, account.id
            ))
            .into());
        }

        match connector.create_content(account, &post).await {
            Ok(artifact) => {
                post.state = PostState::Posted;
                post.external_id = Some(artifact.external_id.clone());
                post.published_at = Some(Utc::now());
                post.published_url = Some(artifact.url.clone());
                self.posts.update_post(&post).await?;

                self.track(&post, &artifact).await;

                info!(
                    "Post {} published to {} at {}",
                    post.id, provider, artifact.url
                );
                Ok(artifact)
            }
            Err(error) => {
                warn!("Post {} failed to publish to {}: {}", post.id, provider, error);
                post.state = PostState::Failed;
                if let Err(store_error) = self.posts.update_post(&post).await {
                    warn!(
                        "Failed to mark post {} as failed: {}",
                        post.id, store_error
                    );
                }
                Err(error)
            }
        }
    }

    /// Best-effort notification of the tracking collaborator. Failures are
    /// logged and swallowed.
    async fn track(&self, post: &Post, artifact: &PublishedArtifact) {
        let Some(recommendation_id) = post.recommendation_id else {
            return;
        };
        if let Err(error) = self
            .tracker
            .add_published_url(recommendation_id, &artifact.url)
            .await
        {
            warn!(
                "Failed to record published URL for recommendation {}: {}",
                recommendation_id, error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;
    use crate::providers::mock::MockConnector;
    use crate::store::{MemoryPostStore, MemoryTracker};
    use crate::types::Provider;

    fn pipeline() -> (Arc<MemoryPostStore>, Arc<MemoryTracker>, Publisher) {
        let posts = Arc::new(MemoryPostStore::new());
        let tracker = Arc::new(MemoryTracker::new());
        let publisher = Publisher::new(posts.clone(), tracker.clone());
        (posts, tracker, publisher)
    }

    #[tokio::test]
    async fn test_publish_success_transitions_post() {
        let (posts, tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::X);
        let account = Account::new(Uuid::new_v4());

        let mut post = Post::new(account.id, Provider::X, "hello world");
        post.recommendation_id = Some(Uuid::new_v4());
        let post_id = post.id;
        posts.insert(post.clone());

        let artifact = publisher
            .publish(&account, post_id, &connector)
            .await
            .unwrap();

        let stored = posts.post(post_id).await.unwrap().unwrap();
        assert_eq!(stored.state, PostState::Posted);
        assert_eq!(stored.external_id.as_deref(), Some(artifact.external_id.as_str()));
        assert_eq!(stored.published_url.as_deref(), Some(artifact.url.as_str()));
        assert!(stored.published_at.is_some());

        // Tracking collaborator invoked exactly once with the published URL.
        let calls = tracker.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, artifact.url);
    }

    #[tokio::test]
    async fn test_publish_missing_post_rejected() {
        let (_posts, _tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::X);
        let account = Account::new(Uuid::new_v4());

        let result = publisher
            .publish(&account, Uuid::new_v4(), &connector)
            .await;
        assert!(matches!(
            result,
            Err(HubError::Precondition(PreconditionError::PostNotFound(_)))
        ));
        assert_eq!(connector.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_publish_foreign_post_rejected() {
        let (posts, _tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::X);
        let account = Account::new(Uuid::new_v4());

        let post = Post::new(Uuid::new_v4(), Provider::X, "someone else's");
        let post_id = post.id;
        posts.insert(post);

        let result = publisher.publish(&account, post_id, &connector).await;
        assert!(matches!(
            result,
            Err(HubError::Precondition(PreconditionError::NotOwned { .. }))
        ));
        assert_eq!(connector.create_calls(), 0);
        assert_eq!(connector.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_publish_already_posted_rejected_without_network() {
        let (posts, _tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::Reddit);
        let account = Account::new(Uuid::new_v4());

        let mut post = Post::new(account.id, Provider::Reddit, "published already");
        post.state = PostState::Posted;
        post.published_url = Some("https://www.reddit.com/r/rust/comments/abc/".to_string());
        let post_id = post.id;
        posts.insert(post);

        let result = publisher.publish(&account, post_id, &connector).await;
        assert!(matches!(
            result,
            Err(HubError::Precondition(PreconditionError::AlreadyPublished(_)))
        ));
        assert_eq!(connector.create_calls(), 0);
        assert_eq!(connector.status_calls(), 0);

        // Nothing was clobbered.
        let stored = posts.post(post_id).await.unwrap().unwrap();
        assert_eq!(stored.state, PostState::Posted);
        assert!(stored.published_url.is_some());
    }

    #[tokio::test]
    async fn test_publish_provider_mismatch_rejected() {
        let (posts, _tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::Facebook);
        let account = Account::new(Uuid::new_v4());

        let post = Post::new(account.id, Provider::LinkedIn, "wrong hub");
        let post_id = post.id;
        posts.insert(post);

        let result = publisher.publish(&account, post_id, &connector).await;
        assert!(matches!(
            result,
            Err(HubError::Precondition(PreconditionError::ProviderMismatch { .. }))
        ));
        assert_eq!(connector.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_publish_empty_body_rejected_before_any_call() {
        let (posts, _tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::X);
        let account = Account::new(Uuid::new_v4());

        let post = Post::new(account.id, Provider::X, "");
        let post_id = post.id;
        posts.insert(post);

        let result = publisher.publish(&account, post_id, &connector).await;
        assert!(matches!(
            result,
            Err(HubError::Precondition(PreconditionError::EmptyBody))
        ));
        // Rejected offline: neither the status check nor the create endpoint
        // was reached, and the post is untouched.
        assert_eq!(connector.status_calls(), 0);
        assert_eq!(connector.create_calls(), 0);
        let stored = posts.post(post_id).await.unwrap().unwrap();
        assert_eq!(stored.state, PostState::ToBePublished);
    }

    #[tokio::test]
    async fn test_publish_unusable_connection_rejected_before_create() {
        let (posts, _tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::X).disconnected();
        let account = Account::new(Uuid::new_v4());

        let post = Post::new(account.id, Provider::X, "hello");
        let post_id = post.id;
        posts.insert(post);

        let result = publisher.publish(&account, post_id, &connector).await;
        assert!(matches!(
            result,
            Err(HubError::Provider(ProviderError::Auth(_)))
        ));
        assert_eq!(connector.create_calls(), 0);

        // Connection failures happen before the provider is asked to create
        // anything, so the post stays publishable.
        let stored = posts.post(post_id).await.unwrap().unwrap();
        assert_eq!(stored.state, PostState::ToBePublished);
    }

    #[tokio::test]
    async fn test_publish_provider_failure_marks_post_failed() {
        let (posts, tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::X)
            .failing(ProviderError::Api {
                status: 500,
                message: "server error".to_string(),
            });
        let account = Account::new(Uuid::new_v4());

        let mut post = Post::new(account.id, Provider::X, "hello");
        post.recommendation_id = Some(Uuid::new_v4());
        let post_id = post.id;
        posts.insert(post);

        let result = publisher.publish(&account, post_id, &connector).await;
        assert!(result.is_err());

        let stored = posts.post(post_id).await.unwrap().unwrap();
        assert_eq!(stored.state, PostState::Failed);
        assert!(stored.published_url.is_none());
        assert!(tracker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tracking_failure_never_fails_the_publish() {
        let posts = Arc::new(MemoryPostStore::new());
        let tracker = Arc::new(MemoryTracker::failing());
        let publisher = Publisher::new(posts.clone(), tracker);
        let connector = MockConnector::new(Provider::X);
        let account = Account::new(Uuid::new_v4());

        let mut post = Post::new(account.id, Provider::X, "hello");
        post.recommendation_id = Some(Uuid::new_v4());
        let post_id = post.id;
        posts.insert(post);

        let artifact = publisher
            .publish(&account, post_id, &connector)
            .await
            .unwrap();
        assert!(!artifact.url.is_empty());

        let stored = posts.post(post_id).await.unwrap().unwrap();
        assert_eq!(stored.state, PostState::Posted);
    }

    #[tokio::test]
    async fn test_publish_without_recommendation_skips_tracking() {
        let (posts, tracker, publisher) = pipeline();
        let connector = MockConnector::new(Provider::X);
        let account = Account::new(Uuid::new_v4());

        let post = Post::new(account.id, Provider::X, "untracked");
        let post_id = post.id;
        posts.insert(post);

        publisher
            .publish(&account, post_id, &connector)
            .await
            .unwrap();
        assert!(tracker.calls().is_empty());
    }
}
