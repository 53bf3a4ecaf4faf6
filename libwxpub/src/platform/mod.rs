//! Platform API abstraction
//!
//! [`PlatformApi`] is the seam between the publishing core and the official
//! account HTTP API. [`client::PlatformClient`] talks to the real service;
//! [`mock::MockPlatform`] stands in for it in tests.
//!
//! Implementations are stateless per call: they know the wire format but hold
//! no credentials, perform no retries and cache nothing.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult, Result};
use crate::types::{Article, MediaKind, MediaType, TokenGrant, UploadedMedia};

pub mod client;

// Mock platform is available for all builds to support integration tests
pub mod mock;

pub const TOKEN_ENDPOINT: &str = "/token";
pub const STABLE_TOKEN_ENDPOINT: &str = "/stable_token";
pub const TEMPORARY_MEDIA_ENDPOINT: &str = "/media/upload";
pub const PERMANENT_MEDIA_ENDPOINT: &str = "/material/add_material";
pub const ARTICLE_IMAGE_ENDPOINT: &str = "/media/uploadimg";
pub const DRAFT_ENDPOINT: &str = "/draft/add";
pub const PUBLISH_ENDPOINT: &str = "/freepublish/submit";

/// Operations offered by the official account API
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Exchange app id and secret for an access token
    ///
    /// `use_stable` selects `POST /stable_token` over `GET /token`.
    async fn fetch_token(
        &self,
        app_id: &str,
        app_secret: &str,
        use_stable: bool,
    ) -> PlatformResult<TokenGrant>;

    /// Upload a local file as temporary or permanent media
    ///
    /// # Errors
    ///
    /// `FileError::NotFound` when `path` does not exist, `PlatformError::Api`
    /// when the platform rejects the upload.
    async fn upload_media(
        &self,
        token: &str,
        path: &Path,
        kind: MediaKind,
        media_type: MediaType,
    ) -> Result<UploadedMedia>;

    /// Upload an image for use inside an article body, returning its URL
    async fn upload_article_image(&self, token: &str, path: &Path) -> Result<String>;

    /// Create a draft, returning its media id
    async fn create_draft(&self, token: &str, articles: &[DraftArticle]) -> PlatformResult<String>;

    /// Submit a draft for publication, returning the publish id
    async fn submit_publish(&self, token: &str, media_id: &str) -> PlatformResult<String>;
}

/// One entry of the `/draft/add` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftArticle {
    pub title: String,
    pub content: String,
    pub author: String,
    pub digest: String,
    pub show_cover_pic: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_media_id: Option<String>,
    pub content_source_url: String,
    pub need_open_comment: u8,
    pub only_fans_can_comment: u8,
}

impl DraftArticle {
    /// Build the wire entry for an article
    ///
    /// A present cover id is always sent; `cover_is_shown` only drives
    /// `show_cover_pic`, which is never set without a cover.
    pub fn from_article(article: &Article) -> Self {
        let thumb_media_id = article
            .cover_media_id
            .clone()
            .filter(|id| !id.is_empty());
        Self {
            title: article.title.clone(),
            content: article.content.clone(),
            author: article.author.clone().unwrap_or_default(),
            digest: article.digest.clone().unwrap_or_default(),
            show_cover_pic: u8::from(article.cover_is_shown && thumb_media_id.is_some()),
            thumb_media_id,
            content_source_url: article.source_url.clone().unwrap_or_default(),
            need_open_comment: u8::from(article.need_open_comment),
            only_fans_can_comment: u8::from(article.only_fans_can_comment),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct DraftRequest<'a> {
    pub articles: &'a [DraftArticle],
}

/// Union of the response bodies the API returns
///
/// Every endpoint may answer with `{errcode, errmsg}` instead of its payload.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiResponse {
    pub errcode: Option<i64>,
    pub errmsg: Option<String>,
    pub access_token: Option<String>,
    pub expires_in: Option<i64>,
    pub media_id: Option<String>,
    pub url: Option<String>,
    pub publish_id: Option<serde_json::Value>,
}

impl ApiResponse {
    /// Turn a non-zero `errcode` into `PlatformError::Api`
    pub fn check(self, endpoint: &str) -> PlatformResult<Self> {
        match self.errcode {
            None | Some(0) => Ok(self),
            Some(code) => Err(PlatformError::Api {
                endpoint: endpoint.to_string(),
                code,
                message: self.errmsg.unwrap_or_default(),
            }),
        }
    }

    pub fn require(field: Option<String>, endpoint: &str, name: &str) -> PlatformResult<String> {
        field
            .filter(|value| !value.is_empty())
            .ok_or_else(|| PlatformError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: format!("missing {}", name),
            })
    }

    pub fn into_grant(self, endpoint: &str) -> PlatformResult<TokenGrant> {
        let expires_in = self.expires_in.ok_or_else(|| PlatformError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: "missing expires_in".to_string(),
        })?;
        let access_token = Self::require(self.access_token, endpoint, "access_token")?;
        Ok(TokenGrant {
            access_token,
            expires_in,
        })
    }

    /// `publish_id` comes back as a number from the live service
    pub fn into_publish_id(self, endpoint: &str) -> PlatformResult<String> {
        match self.publish_id {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            _ => Err(PlatformError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: "missing publish_id".to_string(),
            }),
        }
    }
}

pub(crate) fn media_endpoint(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Temporary => TEMPORARY_MEDIA_ENDPOINT,
        MediaKind::Permanent => PERMANENT_MEDIA_ENDPOINT,
    }
}
