//! Cover image upload

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::images::{ImagePreparer, LimitCheckingPreparer};
use super::resolve_relative;
use crate::error::{FileError, Result};
use crate::pipeline::{Plugin, PluginContext};
use crate::types::{MediaKind, MediaType};

pub const NAME: &str = "cover-upload";

/// Uploads `cover_image_path` as permanent image material
///
/// On success the article carries the new `cover_media_id` with the cover
/// shown, and the cover URL is recorded under this plugin's extension
/// namespace. An article that already has a cover media id is left as is;
/// one with neither a path nor an id has its cover hidden.
pub struct CoverUploadPlugin {
    preparer: Arc<dyn ImagePreparer>,
}

impl Default for CoverUploadPlugin {
    fn default() -> Self {
        Self::new(Arc::new(LimitCheckingPreparer::default()))
    }
}

impl CoverUploadPlugin {
    pub fn new(preparer: Arc<dyn ImagePreparer>) -> Self {
        Self { preparer }
    }
}

#[async_trait]
impl Plugin for CoverUploadPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, mut ctx: PluginContext) -> Result<PluginContext> {
        if ctx.article_mut().has_cover() {
            tracing::debug!("Cover media id supplied, skipping upload");
            return Ok(ctx);
        }

        let cover_image_path = ctx.article_mut().cover_image_path.clone();
        let cover_path = match cover_image_path {
            Some(path) => resolve_relative(&ctx.extensions, &path.to_string_lossy()),
            None => {
                ctx.article_mut().cover_is_shown = false;
                return Ok(ctx);
            }
        };

        if !tokio::fs::try_exists(&cover_path).await.unwrap_or(false) {
            return Err(FileError::NotFound(cover_path).into());
        }

        let client = Arc::clone(ctx.client()?);
        let prepared = self.preparer.prepare(&cover_path).await?;
        let media = client
            .upload_media(&prepared, MediaKind::Permanent, MediaType::Image)
            .await?;

        tracing::info!(
            path = %cover_path.display(),
            media_id = %media.media_id,
            "Uploaded cover image"
        );

        ctx.extensions.insert(NAME, "media_id", json!(media.media_id));
        if let Some(url) = &media.url {
            ctx.extensions.insert(NAME, "url", json!(url));
        }

        let article = ctx.article_mut();
        article.cover_media_id = Some(media.media_id);
        article.cover_is_shown = true;

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::platform::mock::MockPlatform;
    use crate::plugins::test_support::client_for;
    use crate::types::Article;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn context(article: Article, mock: &MockPlatform) -> PluginContext {
        PluginContext::new("post.md")
            .with_article(article)
            .with_client(client_for(mock))
    }

    #[tokio::test]
    async fn test_cover_uploaded_and_shown() {
        let dir = TempDir::new().unwrap();
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, b"jpeg").unwrap();
        let mock = MockPlatform::success();

        let ctx = CoverUploadPlugin::default()
            .execute(context(
                Article {
                    cover_image_path: Some(cover.clone()),
                    ..Default::default()
                },
                &mock,
            ))
            .await
            .unwrap();

        let article = ctx.article.as_ref().unwrap();
        assert_eq!(article.cover_media_id.as_deref(), Some("MEDIA_image_1"));
        assert!(article.cover_is_shown);
        assert_eq!(
            ctx.extensions.get_as::<String>(NAME, "url").as_deref(),
            Some("https://mmbiz.example/image/1")
        );
        assert_eq!(mock.uploaded_paths(), vec![cover]);
    }

    #[tokio::test]
    async fn test_missing_cover_is_file_error() {
        let mock = MockPlatform::success();
        let error = CoverUploadPlugin::default()
            .execute(context(
                Article {
                    cover_image_path: Some(PathBuf::from("/no/such/cover.jpg")),
                    ..Default::default()
                },
                &mock,
            ))
            .await
            .unwrap_err();

        assert!(matches!(error, PublishError::File(FileError::NotFound(_))));
        assert_eq!(mock.upload_call_count(), 0);
    }

    #[tokio::test]
    async fn test_supplied_media_id_skips_upload() {
        let mock = MockPlatform::success();
        let ctx = CoverUploadPlugin::default()
            .execute(context(
                Article {
                    cover_image_path: Some(PathBuf::from("/ignored.jpg")),
                    cover_media_id: Some("EXISTING".to_string()),
                    cover_is_shown: true,
                    ..Default::default()
                },
                &mock,
            ))
            .await
            .unwrap();

        assert_eq!(
            ctx.article.unwrap().cover_media_id.as_deref(),
            Some("EXISTING")
        );
        assert_eq!(mock.upload_call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_cover_hides_display() {
        let ctx = PluginContext::new("post.md").with_article(Article {
            cover_is_shown: true,
            ..Default::default()
        });
        let ctx = CoverUploadPlugin::default().execute(ctx).await.unwrap();
        assert!(!ctx.article.unwrap().cover_is_shown);
    }

    #[tokio::test]
    async fn test_upload_rejection_propagates() {
        let dir = TempDir::new().unwrap();
        let cover = dir.path().join("cover.png");
        std::fs::write(&cover, b"png").unwrap();
        let mock = MockPlatform::upload_failure(40009, "invalid image size");

        let error = CoverUploadPlugin::default()
            .execute(context(
                Article {
                    cover_image_path: Some(cover),
                    ..Default::default()
                },
                &mock,
            ))
            .await
            .unwrap_err();

        let platform = error.platform_error().unwrap();
        assert_eq!(platform.code(), Some(40009));
    }
}
