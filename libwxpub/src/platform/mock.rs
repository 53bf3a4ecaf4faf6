//! Mock platform implementation for testing
//!
//! Configurable stand-in for the official account API that can simulate token
//! grants, rejected submissions and network latency. Every call is counted and
//! draft payloads are recorded, so tests can assert on exactly what would have
//! been sent.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{
    media_endpoint, DraftArticle, PlatformApi, DRAFT_ENDPOINT, STABLE_TOKEN_ENDPOINT,
    TOKEN_ENDPOINT,
};
use crate::error::{FileError, PlatformError, PlatformResult, Result};
use crate::types::{MediaKind, MediaType, TokenGrant, UploadedMedia};

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// `expires_in` reported with every token grant
    pub token_ttl_secs: i64,

    /// Error returned by every token fetch
    pub token_error: Option<PlatformError>,

    /// Delay before a token fetch completes
    pub token_delay: Duration,

    /// Error returned by every media upload
    pub upload_error: Option<PlatformError>,

    /// Errors returned by successive `create_draft` calls, front first
    pub draft_errors: Arc<Mutex<VecDeque<PlatformError>>>,

    /// Errors returned by successive `submit_publish` calls, front first
    pub submit_errors: Arc<Mutex<VecDeque<PlatformError>>>,

    pub token_call_count: Arc<Mutex<usize>>,
    pub upload_call_count: Arc<Mutex<usize>>,
    pub draft_call_count: Arc<Mutex<usize>>,
    pub submit_call_count: Arc<Mutex<usize>>,

    /// App ids passed to `fetch_token`, in call order
    pub token_requests: Arc<Mutex<Vec<String>>>,

    /// Payload of every `create_draft` call
    pub drafts: Arc<Mutex<Vec<Vec<DraftArticle>>>>,

    /// Access token used for every `create_draft` call
    pub draft_tokens: Arc<Mutex<Vec<String>>>,

    /// Files passed to the upload operations
    pub uploaded_paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 7200,
            token_error: None,
            token_delay: Duration::from_millis(0),
            upload_error: None,
            draft_errors: Arc::new(Mutex::new(VecDeque::new())),
            submit_errors: Arc::new(Mutex::new(VecDeque::new())),
            token_call_count: Arc::new(Mutex::new(0)),
            upload_call_count: Arc::new(Mutex::new(0)),
            draft_call_count: Arc::new(Mutex::new(0)),
            submit_call_count: Arc::new(Mutex::new(0)),
            token_requests: Arc::new(Mutex::new(Vec::new())),
            drafts: Arc::new(Mutex::new(Vec::new())),
            draft_tokens: Arc::new(Mutex::new(Vec::new())),
            uploaded_paths: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock platform for testing
///
/// Tokens are handed out as `TOK1`, `TOK2`, ... in fetch order.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock platform where every call succeeds
    pub fn success() -> Self {
        Self::default()
    }

    /// Create a mock platform whose token endpoint rejects every request
    pub fn token_failure(code: i64, message: &str) -> Self {
        Self::new(MockConfig {
            token_error: Some(PlatformError::Api {
                endpoint: TOKEN_ENDPOINT.to_string(),
                code,
                message: message.to_string(),
            }),
            ..Default::default()
        })
    }

    /// Create a mock platform whose token fetch takes `delay`
    pub fn with_token_delay(delay: Duration) -> Self {
        Self::new(MockConfig {
            token_delay: delay,
            ..Default::default()
        })
    }

    /// Create a mock platform that grants tokens with the given lifetime
    pub fn with_token_ttl(ttl_secs: i64) -> Self {
        Self::new(MockConfig {
            token_ttl_secs: ttl_secs,
            ..Default::default()
        })
    }

    /// Create a mock platform whose `create_draft` fails with `errors` in order
    pub fn draft_failures(errors: Vec<PlatformError>) -> Self {
        Self::new(MockConfig {
            draft_errors: Arc::new(Mutex::new(errors.into())),
            ..Default::default()
        })
    }

    /// Create a mock platform whose `submit_publish` fails with `errors` in order
    pub fn submit_failures(errors: Vec<PlatformError>) -> Self {
        Self::new(MockConfig {
            submit_errors: Arc::new(Mutex::new(errors.into())),
            ..Default::default()
        })
    }

    /// Create a mock platform that rejects every media upload
    pub fn upload_failure(code: i64, message: &str) -> Self {
        Self::new(MockConfig {
            upload_error: Some(PlatformError::Api {
                endpoint: media_endpoint(MediaKind::Permanent).to_string(),
                code,
                message: message.to_string(),
            }),
            ..Default::default()
        })
    }

    /// Convenience for a draft rejection as the live API reports it
    pub fn draft_rejection(code: i64, message: &str) -> PlatformError {
        PlatformError::Api {
            endpoint: DRAFT_ENDPOINT.to_string(),
            code,
            message: message.to_string(),
        }
    }

    pub fn token_call_count(&self) -> usize {
        *lock(&self.config.token_call_count)
    }

    pub fn upload_call_count(&self) -> usize {
        *lock(&self.config.upload_call_count)
    }

    pub fn draft_call_count(&self) -> usize {
        *lock(&self.config.draft_call_count)
    }

    pub fn submit_call_count(&self) -> usize {
        *lock(&self.config.submit_call_count)
    }

    pub fn token_requests(&self) -> Vec<String> {
        lock(&self.config.token_requests).clone()
    }

    /// All draft payloads that were submitted
    pub fn drafts(&self) -> Vec<Vec<DraftArticle>> {
        lock(&self.config.drafts).clone()
    }

    pub fn draft_tokens(&self) -> Vec<String> {
        lock(&self.config.draft_tokens).clone()
    }

    pub fn uploaded_paths(&self) -> Vec<PathBuf> {
        lock(&self.config.uploaded_paths).clone()
    }

    async fn record_upload(&self, path: &Path) -> Result<()> {
        *lock(&self.config.upload_call_count) += 1;
        lock(&self.config.uploaded_paths).push(path.to_path_buf());

        tokio::fs::metadata(path)
            .await
            .map_err(|e| FileError::from_io(path, e))?;

        if let Some(error) = &self.config.upload_error {
            return Err(error.clone().into());
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn fetch_token(
        &self,
        app_id: &str,
        _app_secret: &str,
        use_stable: bool,
    ) -> PlatformResult<TokenGrant> {
        let call = {
            let mut count = lock(&self.config.token_call_count);
            *count += 1;
            *count
        };
        lock(&self.config.token_requests).push(app_id.to_string());

        if !self.config.token_delay.is_zero() {
            sleep(self.config.token_delay).await;
        }

        if let Some(error) = &self.config.token_error {
            let mut error = error.clone();
            if use_stable {
                if let PlatformError::Api { endpoint, .. } = &mut error {
                    *endpoint = STABLE_TOKEN_ENDPOINT.to_string();
                }
            }
            return Err(error);
        }

        Ok(TokenGrant {
            access_token: format!("TOK{}", call),
            expires_in: self.config.token_ttl_secs,
        })
    }

    async fn upload_media(
        &self,
        _token: &str,
        path: &Path,
        _kind: MediaKind,
        media_type: MediaType,
    ) -> Result<UploadedMedia> {
        self.record_upload(path).await?;
        let count = self.upload_call_count();
        Ok(UploadedMedia {
            media_id: format!("MEDIA_{}_{}", media_type, count),
            url: Some(format!("https://mmbiz.example/{}/{}", media_type, count)),
        })
    }

    async fn upload_article_image(&self, _token: &str, path: &Path) -> Result<String> {
        self.record_upload(path).await?;
        Ok(format!("https://mmbiz.example/article/{}", self.upload_call_count()))
    }

    async fn create_draft(&self, token: &str, articles: &[DraftArticle]) -> PlatformResult<String> {
        let call = {
            let mut count = lock(&self.config.draft_call_count);
            *count += 1;
            *count
        };
        lock(&self.config.drafts).push(articles.to_vec());
        lock(&self.config.draft_tokens).push(token.to_string());

        if let Some(error) = lock(&self.config.draft_errors).pop_front() {
            return Err(error);
        }
        Ok(format!("DRAFT_{}", call))
    }

    async fn submit_publish(&self, _token: &str, media_id: &str) -> PlatformResult<String> {
        *lock(&self.config.submit_call_count) += 1;

        if let Some(error) = lock(&self.config.submit_errors).pop_front() {
            return Err(error);
        }
        Ok(format!("PUB_{}", media_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokens_numbered_in_fetch_order() {
        let mock = MockPlatform::success();
        let first = mock.fetch_token("wx1", "s1", false).await.unwrap();
        let second = mock.fetch_token("wx2", "s2", false).await.unwrap();

        assert_eq!(first.access_token, "TOK1");
        assert_eq!(first.expires_in, 7200);
        assert_eq!(second.access_token, "TOK2");
        assert_eq!(mock.token_requests(), vec!["wx1", "wx2"]);
    }

    #[tokio::test]
    async fn test_token_failure_reports_stable_endpoint() {
        let mock = MockPlatform::token_failure(40013, "invalid appid");
        let error = mock.fetch_token("wx1", "s1", true).await.unwrap_err();
        assert_eq!(error.endpoint(), STABLE_TOKEN_ENDPOINT);
        assert_eq!(error.code(), Some(40013));
    }

    #[tokio::test]
    async fn test_draft_failures_consumed_in_order() {
        let mock = MockPlatform::draft_failures(vec![MockPlatform::draft_rejection(
            40007,
            "invalid media_id",
        )]);

        assert!(mock.create_draft("TOK1", &[]).await.is_err());
        assert_eq!(mock.create_draft("TOK1", &[]).await.unwrap(), "DRAFT_2");
        assert_eq!(mock.draft_call_count(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let mock = MockPlatform::success();
        let clone = mock.clone();
        clone.submit_publish("TOK1", "DRAFT_1").await.unwrap();
        assert_eq!(mock.submit_call_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let mock = MockPlatform::success();
        let result = mock
            .upload_media("TOK1", Path::new("/no/such/cover.jpg"), MediaKind::Permanent, MediaType::Image)
            .await;
        assert!(matches!(
            result,
            Err(crate::error::PublishError::File(FileError::NotFound(_)))
        ));
    }
}
