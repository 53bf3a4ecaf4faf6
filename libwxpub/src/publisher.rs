//! Publish orchestration
//!
//! [`Publisher::publish`] drives one article through these stages:
//!
//! ```text
//! Init -> PipelineRunning -> CredentialEnsuring -> Submitting
//!      -> (RetryWithoutCover) -> Done | Failed
//! ```
//!
//! Submission recovers from exactly one class of platform rejection: when draft
//! creation reports an invalid media reference (`invalid media_id` or
//! `thumb_media`) for an article that carries a cover, the draft is created once
//! more with the cover removed. A rejection from the publish step refers to the
//! draft, not the cover, and is never retried. Transport failures are retried with bounded
//! exponential backoff; platform rejections never are.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::accounts::{AccountClient, AccountRegistry};
use crate::error::{PlatformError, PlatformResult, PublishError, Result};
use crate::pipeline::{Plugin, PluginContext, PluginPipeline};
use crate::platform::{DraftArticle, DRAFT_ENDPOINT};
use crate::plugins::default_plugins;
use crate::types::{Article, PublishOptions, PublishOutcome, CONTENT_PREVIEW_CHARS};

const COVER_REJECTION_MARKERS: [&str; 2] = ["invalid media_id", "thumb_media"];

/// Stages of a publish call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Init,
    PipelineRunning,
    CredentialEnsuring,
    Submitting,
    RetryWithoutCover,
    Done,
    Failed,
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PublishStage::Init => "init",
            PublishStage::PipelineRunning => "pipeline-running",
            PublishStage::CredentialEnsuring => "credential-ensuring",
            PublishStage::Submitting => "submitting",
            PublishStage::RetryWithoutCover => "retry-without-cover",
            PublishStage::Done => "done",
            PublishStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Settings fixed for the lifetime of a [`Publisher`]
#[derive(Clone)]
pub struct PublisherConfig {
    /// Account to publish to; the registry's active account when `None`
    pub account: Option<String>,
    pub plugins: Vec<Arc<dyn Plugin>>,
    /// Run everything up to submission, then report a simulated result
    pub debug: bool,
    /// Stop after `create_draft` instead of submitting for publication
    pub publish_as_draft: bool,
    /// Attempts per platform call when the transport fails
    pub network_attempts: u32,
    /// Delay before the first transport retry; doubles on each further one
    pub retry_backoff: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            account: None,
            plugins: default_plugins(),
            debug: false,
            publish_as_draft: true,
            network_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl std::fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("account", &self.account)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("debug", &self.debug)
            .field("publish_as_draft", &self.publish_as_draft)
            .field("network_attempts", &self.network_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl PublisherConfig {
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_plugins(mut self, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_draft(mut self, publish_as_draft: bool) -> Self {
        self.publish_as_draft = publish_as_draft;
        self
    }

    pub fn with_network_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.network_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }
}

/// True when draft creation rejected the article's media reference
pub fn is_cover_rejection(error: &PlatformError) -> bool {
    match error {
        PlatformError::Api {
            endpoint, message, ..
        } if endpoint == DRAFT_ENDPOINT => {
            let message = message.to_lowercase();
            COVER_REJECTION_MARKERS
                .iter()
                .any(|marker| message.contains(marker))
        }
        _ => false,
    }
}

struct Submission {
    media_id: String,
    publish_id: Option<String>,
}

/// Publishes articles to one account of a shared registry
pub struct Publisher {
    registry: Arc<AccountRegistry>,
    pipeline: PluginPipeline,
    account: Option<String>,
    debug: bool,
    publish_as_draft: bool,
    network_attempts: u32,
    retry_backoff: Duration,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("account", &self.account)
            .field("pipeline", &self.pipeline)
            .field("debug", &self.debug)
            .field("publish_as_draft", &self.publish_as_draft)
            .finish()
    }
}

impl Publisher {
    /// # Errors
    ///
    /// `ConfigError::InvalidPlugin` for duplicate plugin names,
    /// `InvalidInput` when `network_attempts` is zero.
    pub fn new(registry: Arc<AccountRegistry>, config: PublisherConfig) -> Result<Self> {
        if config.network_attempts == 0 {
            return Err(PublishError::InvalidInput(
                "network_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            registry,
            pipeline: PluginPipeline::new(config.plugins)?,
            account: config.account,
            debug: config.debug,
            publish_as_draft: config.publish_as_draft,
            network_attempts: config.network_attempts,
            retry_backoff: config.retry_backoff,
        })
    }

    pub fn registry(&self) -> &Arc<AccountRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &PluginPipeline {
        &self.pipeline
    }

    /// Run the plugin chain over `input` and submit the resulting article
    pub async fn publish(&self, input: &str, options: &PublishOptions) -> Result<PublishOutcome> {
        let mut stage = PublishStage::Init;
        let result = self.run(input, options, &mut stage).await;

        match &result {
            Ok(outcome) => {
                advance(&mut stage, PublishStage::Done);
                tracing::info!(
                    title = %outcome.article.title,
                    media_id = ?outcome.article.media_id,
                    publish_id = ?outcome.publish_id,
                    cover_dropped = outcome.cover_dropped,
                    "{}",
                    outcome.message
                );
            }
            Err(e) => {
                let failed_at = stage;
                advance(&mut stage, PublishStage::Failed);
                tracing::error!(stage = %failed_at, error = %e, "Publish failed");
            }
        }

        result
    }

    async fn run(
        &self,
        input: &str,
        options: &PublishOptions,
        stage: &mut PublishStage,
    ) -> Result<PublishOutcome> {
        let client = self.registry.get_client(self.account.as_deref())?;
        tracing::info!(account = %client.account_id(), input = %input, "Publishing article");

        let ctx = PluginContext::new(input)
            .with_article(Article::from_options(options))
            .with_client(Arc::clone(&client));

        advance(stage, PublishStage::PipelineRunning);
        let mut ctx = self.pipeline.run(ctx).await?;
        let mut article = ctx.article.take().unwrap_or_default();

        if article.content.trim().is_empty() {
            return Err(PublishError::InvalidInput(
                "article content is empty".to_string(),
            ));
        }
        if article.title.trim().is_empty() {
            return Err(PublishError::InvalidInput("article title is empty".to_string()));
        }

        advance(stage, PublishStage::CredentialEnsuring);
        client.ensure_credential().await?;

        if self.debug || client.account().config.debug {
            article.result_message = if self.publish_as_draft {
                "Debug mode: draft creation simulated, nothing was sent".to_string()
            } else {
                "Debug mode: direct publication simulated, nothing was sent".to_string()
            };
            return Ok(PublishOutcome {
                message: article.result_message.clone(),
                article: article.with_content_preview(CONTENT_PREVIEW_CHARS),
                publish_id: None,
                cover_dropped: false,
                simulated: true,
            });
        }

        advance(stage, PublishStage::Submitting);
        let (submission, cover_dropped) = self
            .submit_with_cover_retry(&client, &mut article, stage)
            .await?;

        let mut message = match &submission.publish_id {
            Some(publish_id) => format!("Submitted for publication (publish_id: {})", publish_id),
            None => format!("Draft created (media_id: {})", submission.media_id),
        };
        if cover_dropped {
            message.push_str(", cover removed after media rejection");
        }

        article.media_id = Some(submission.media_id);
        article.result_message = message.clone();

        Ok(PublishOutcome {
            message,
            article: article.with_content_preview(CONTENT_PREVIEW_CHARS),
            publish_id: submission.publish_id,
            cover_dropped,
            simulated: false,
        })
    }

    async fn submit_with_cover_retry(
        &self,
        client: &AccountClient,
        article: &mut Article,
        stage: &mut PublishStage,
    ) -> Result<(Submission, bool)> {
        let (media_id, cover_dropped) = match self.create_draft(client, article).await {
            Ok(media_id) => (media_id, false),
            Err(e) if is_cover_rejection(&e) && article.has_cover() => {
                tracing::warn!(
                    error = %e,
                    cover_media_id = ?article.cover_media_id,
                    "Cover media rejected, retrying without cover"
                );
                advance(stage, PublishStage::RetryWithoutCover);
                article.drop_cover();

                (self.create_draft(client, article).await?, true)
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(media_id = %media_id, "Draft created");

        if self.publish_as_draft {
            return Ok((
                Submission {
                    media_id,
                    publish_id: None,
                },
                cover_dropped,
            ));
        }

        let publish_id = self
            .with_network_retry(|| client.submit_publish(&media_id))
            .await?;
        Ok((
            Submission {
                media_id,
                publish_id: Some(publish_id),
            },
            cover_dropped,
        ))
    }

    async fn create_draft(&self, client: &AccountClient, article: &Article) -> PlatformResult<String> {
        let drafts = [DraftArticle::from_article(article)];
        self.with_network_retry(|| client.create_draft(&drafts))
            .await
    }

    async fn with_network_retry<T, F, Fut>(&self, mut call: F) -> PlatformResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PlatformResult<T>>,
    {
        let mut attempt = 1;
        let mut backoff = self.retry_backoff;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.network_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.network_attempts,
                        endpoint = %e.endpoint(),
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn advance(stage: &mut PublishStage, next: PublishStage) {
    tracing::debug!(from = %stage, to = %next, "Publish stage");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialCache;
    use crate::error::ConfigError;
    use crate::platform::mock::MockPlatform;
    use crate::platform::PUBLISH_ENDPOINT;
    use crate::types::AccountConfig;
    use async_trait::async_trait;

    /// Produces a fixed article without touching the file system
    struct StaticSource;

    #[async_trait]
    impl Plugin for StaticSource {
        fn name(&self) -> &str {
            "static-source"
        }

        async fn execute(&self, mut ctx: PluginContext) -> Result<PluginContext> {
            let content = format!("<p>{}</p>", ctx.input);
            let article = ctx.article_mut();
            if article.title.is_empty() {
                article.title = "Static".to_string();
            }
            article.content = content;
            Ok(ctx)
        }
    }

    fn publisher(mock: &MockPlatform, config: PublisherConfig) -> Publisher {
        let registry = AccountRegistry::new(Arc::new(mock.clone()), CredentialCache::new());
        registry.add("main", AccountConfig::new("wx1", "s1")).unwrap();
        Publisher::new(
            Arc::new(registry),
            config
                .with_plugins(vec![Arc::new(StaticSource)])
                .with_network_retry(3, Duration::from_millis(1)),
        )
        .unwrap()
    }

    fn network_error(endpoint: &str) -> PlatformError {
        PlatformError::Network {
            endpoint: endpoint.to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_cover_rejection_markers() {
        assert!(is_cover_rejection(&MockPlatform::draft_rejection(40007, "invalid media_id hint: [x]")));
        assert!(is_cover_rejection(&MockPlatform::draft_rejection(40007, "Invalid Media_ID")));
        assert!(is_cover_rejection(&MockPlatform::draft_rejection(45009, "missing thumb_media_id")));
        assert!(!is_cover_rejection(&MockPlatform::draft_rejection(45003, "title size out of limit")));
        assert!(!is_cover_rejection(&network_error("/draft/add")));
        assert!(!is_cover_rejection(&PlatformError::Api {
            endpoint: PUBLISH_ENDPOINT.to_string(),
            code: 40007,
            message: "invalid media_id".to_string(),
        }));
    }

    #[test]
    fn test_duplicate_plugins_rejected() {
        let registry = Arc::new(AccountRegistry::new(
            Arc::new(MockPlatform::success()),
            CredentialCache::new(),
        ));
        let config = PublisherConfig::default()
            .with_plugins(vec![Arc::new(StaticSource), Arc::new(StaticSource)]);

        assert!(matches!(
            Publisher::new(registry, config),
            Err(PublishError::Config(ConfigError::InvalidPlugin(_)))
        ));
    }

    #[test]
    fn test_zero_network_attempts_rejected() {
        let registry = Arc::new(AccountRegistry::new(
            Arc::new(MockPlatform::success()),
            CredentialCache::new(),
        ));
        let config = PublisherConfig::default().with_network_retry(0, Duration::ZERO);
        assert!(matches!(
            Publisher::new(registry, config),
            Err(PublishError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_default_config() {
        let config = PublisherConfig::default();
        assert!(config.publish_as_draft);
        assert!(!config.debug);
        assert_eq!(config.network_attempts, 3);
        assert_eq!(config.plugins.len(), 4);
    }

    #[tokio::test]
    async fn test_draft_mode_skips_publication() {
        let mock = MockPlatform::success();
        let outcome = publisher(&mock, PublisherConfig::default())
            .publish("hello", &PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(mock.draft_call_count(), 1);
        assert_eq!(mock.submit_call_count(), 0);
        assert_eq!(outcome.article.media_id.as_deref(), Some("DRAFT_1"));
        assert!(outcome.message.contains("DRAFT_1"));
        assert!(outcome.publish_id.is_none());
    }

    #[tokio::test]
    async fn test_publish_mode_submits_draft() {
        let mock = MockPlatform::success();
        let outcome = publisher(&mock, PublisherConfig::default().with_draft(false))
            .publish("hello", &PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(mock.submit_call_count(), 1);
        assert_eq!(outcome.publish_id.as_deref(), Some("PUB_DRAFT_1"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mock = MockPlatform::submit_failures(vec![
            network_error(PUBLISH_ENDPOINT),
            network_error(PUBLISH_ENDPOINT),
        ]);
        let outcome = publisher(&mock, PublisherConfig::default().with_draft(false))
            .publish("hello", &PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(mock.submit_call_count(), 3);
        assert_eq!(mock.draft_call_count(), 1);
        assert!(outcome.publish_id.is_some());
    }

    #[tokio::test]
    async fn test_network_retries_are_bounded() {
        let mock = MockPlatform::submit_failures(vec![
            network_error(PUBLISH_ENDPOINT),
            network_error(PUBLISH_ENDPOINT),
            network_error(PUBLISH_ENDPOINT),
            network_error(PUBLISH_ENDPOINT),
        ]);
        let error = publisher(&mock, PublisherConfig::default().with_draft(false))
            .publish("hello", &PublishOptions::default())
            .await
            .unwrap_err();

        assert_eq!(mock.submit_call_count(), 3);
        assert!(error.platform_error().unwrap().is_transient());
    }

    #[tokio::test]
    async fn test_api_rejection_is_not_retried() {
        let mock = MockPlatform::draft_failures(vec![MockPlatform::draft_rejection(
            45003,
            "title size out of limit",
        )]);
        let error = publisher(&mock, PublisherConfig::default())
            .publish("hello", &PublishOptions::default())
            .await
            .unwrap_err();

        assert_eq!(mock.draft_call_count(), 1);
        assert_eq!(error.platform_error().unwrap().code(), Some(45003));
    }

    #[tokio::test]
    async fn test_debug_mode_simulates_submission() {
        let mock = MockPlatform::success();
        let outcome = publisher(&mock, PublisherConfig::default().with_debug(true))
            .publish("hello", &PublishOptions::default())
            .await
            .unwrap();

        assert!(outcome.simulated);
        assert_eq!(mock.token_call_count(), 1);
        assert_eq!(mock.draft_call_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_step_rejection_keeps_cover() {
        let mock = MockPlatform::submit_failures(vec![PlatformError::Api {
            endpoint: PUBLISH_ENDPOINT.to_string(),
            code: 40007,
            message: "invalid media_id".to_string(),
        }]);
        let options = PublishOptions {
            cover_media_id: Some("COVER".to_string()),
            ..Default::default()
        };

        let error = publisher(&mock, PublisherConfig::default().with_draft(false))
            .publish("hello", &options)
            .await
            .unwrap_err();

        assert_eq!(error.platform_error().unwrap().code(), Some(40007));
        assert_eq!(mock.draft_call_count(), 1);
        assert_eq!(mock.submit_call_count(), 1);
        assert_eq!(mock.drafts()[0][0].thumb_media_id.as_deref(), Some("COVER"));
    }

    #[tokio::test]
    async fn test_cover_retry_then_publish() {
        let mock = MockPlatform::draft_failures(vec![MockPlatform::draft_rejection(
            40007,
            "invalid media_id",
        )]);
        let options = PublishOptions {
            cover_media_id: Some("COVER".to_string()),
            ..Default::default()
        };

        let outcome = publisher(&mock, PublisherConfig::default().with_draft(false))
            .publish("hello", &options)
            .await
            .unwrap();

        assert!(outcome.cover_dropped);
        assert_eq!(mock.draft_call_count(), 2);
        assert_eq!(mock.submit_call_count(), 1);
        assert_eq!(outcome.publish_id.as_deref(), Some("PUB_DRAFT_2"));
    }

    #[tokio::test]
    async fn test_debug_message_names_the_skipped_path() {
        let mock = MockPlatform::success();
        let draft = publisher(&mock, PublisherConfig::default().with_debug(true))
            .publish("hello", &PublishOptions::default())
            .await
            .unwrap();
        let direct = publisher(
            &mock,
            PublisherConfig::default().with_debug(true).with_draft(false),
        )
        .publish("hello", &PublishOptions::default())
        .await
        .unwrap();

        assert!(draft.message.contains("draft creation simulated"));
        assert!(direct.message.contains("direct publication simulated"));
        assert_eq!(mock.submit_call_count(), 0);
    }

    #[tokio::test]
    async fn test_result_content_is_preview() {
        let mock = MockPlatform::success();
        let long_input = "x".repeat(500);
        let outcome = publisher(&mock, PublisherConfig::default())
            .publish(&long_input, &PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.article.content.chars().count(), CONTENT_PREVIEW_CHARS + 3);
        assert!(outcome.article.content.ends_with("..."));
        assert_eq!(mock.drafts()[0][0].content.len(), long_input.len() + 7);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(PublishStage::RetryWithoutCover.to_string(), "retry-without-cover");
        assert_eq!(PublishStage::CredentialEnsuring.to_string(), "credential-ensuring");
    }
}
