//! Image preparation and inline image upload

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{image_refs, resolve_relative};
use crate::error::{FileError, Result};
use crate::pipeline::{Plugin, PluginContext};

pub const NAME: &str = "inline-images";

/// Turns a local image into one the platform will accept
///
/// Implementations may convert, resize or simply vet the file; the returned
/// path is what gets uploaded.
#[async_trait]
pub trait ImagePreparer: Send + Sync {
    async fn prepare(&self, path: &Path) -> Result<PathBuf>;
}

/// Vets images against an extension allow-list and a size cap
#[derive(Debug, Clone)]
pub struct LimitCheckingPreparer {
    pub allowed_extensions: Vec<String>,
    pub max_bytes: u64,
}

impl Default for LimitCheckingPreparer {
    /// Limits for permanent image material: 10 MiB of JPEG, PNG or GIF
    fn default() -> Self {
        Self {
            allowed_extensions: ["jpg", "jpeg", "png", "gif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl LimitCheckingPreparer {
    /// Limits for images embedded in an article body: 1 MiB of JPEG or PNG
    pub fn article_images() -> Self {
        Self {
            allowed_extensions: ["jpg", "jpeg", "png"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_bytes: 1024 * 1024,
        }
    }
}

#[async_trait]
impl ImagePreparer for LimitCheckingPreparer {
    async fn prepare(&self, path: &Path) -> Result<PathBuf> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(FileError::Unsupported {
                path: path.to_path_buf(),
                reason: format!(
                    "image type must be one of: {}",
                    self.allowed_extensions.join(", ")
                ),
            }
            .into());
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| FileError::from_io(path, e))?;
        if metadata.len() > self.max_bytes {
            return Err(FileError::Unsupported {
                path: path.to_path_buf(),
                reason: format!(
                    "image is {} bytes, limit is {} bytes",
                    metadata.len(),
                    self.max_bytes
                ),
            }
            .into());
        }

        Ok(path.to_path_buf())
    }
}

/// Uploads local images referenced in the body and points them at the
/// uploaded URLs
///
/// Remote references are left alone. A missing local file is skipped with a
/// warning; an image that cannot be prepared or uploaded is replaced by a
/// visible placeholder so the article still goes out.
pub struct InlineImagePlugin {
    preparer: Arc<dyn ImagePreparer>,
}

impl Default for InlineImagePlugin {
    fn default() -> Self {
        Self::new(Arc::new(LimitCheckingPreparer::article_images()))
    }
}

impl InlineImagePlugin {
    pub fn new(preparer: Arc<dyn ImagePreparer>) -> Self {
        Self { preparer }
    }

    pub fn placeholder(alt: &str) -> String {
        format!("[image upload failed: {}]", alt)
    }
}

#[async_trait]
impl Plugin for InlineImagePlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, mut ctx: PluginContext) -> Result<PluginContext> {
        let content = ctx.article_mut().content.clone();
        let refs: Vec<_> = image_refs(&content)
            .into_iter()
            .filter(|image| !image.is_remote())
            .collect();
        if refs.is_empty() {
            return Ok(ctx);
        }

        let client = Arc::clone(ctx.client()?);
        let mut rewritten = String::with_capacity(content.len());
        let mut cursor = 0;
        let (mut uploaded, mut skipped, mut failed) = (0u64, 0u64, 0u64);

        for image in refs {
            rewritten.push_str(&content[cursor..image.range.start]);
            cursor = image.range.end;
            let original = &content[image.range.clone()];

            let path = resolve_relative(&ctx.extensions, &image.target);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tracing::warn!(path = %path.display(), "Inline image not found, leaving reference as is");
                rewritten.push_str(original);
                skipped += 1;
                continue;
            }

            let result = match self.preparer.prepare(&path).await {
                Ok(prepared) => client.upload_article_image(&prepared).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(url) => {
                    tracing::debug!(path = %path.display(), url = %url, "Uploaded inline image");
                    rewritten.push_str(&format!("![{}]({})", image.alt, url));
                    uploaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Inline image upload failed");
                    rewritten.push_str(&Self::placeholder(&image.alt));
                    failed += 1;
                }
            }
        }
        rewritten.push_str(&content[cursor..]);

        tracing::info!(uploaded, skipped, failed, "Processed inline images");
        ctx.article_mut().content = rewritten;
        ctx.extensions.insert(NAME, "uploaded", json!(uploaded));
        ctx.extensions.insert(NAME, "skipped", json!(skipped));
        ctx.extensions.insert(NAME, "failed", json!(failed));

        Ok(ctx)
    }
}
