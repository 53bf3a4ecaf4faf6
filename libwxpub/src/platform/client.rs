//! HTTP client for the official account API

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::json;

use super::{
    media_endpoint, ApiResponse, DraftArticle, DraftRequest, PlatformApi, ARTICLE_IMAGE_ENDPOINT,
    DRAFT_ENDPOINT, PUBLISH_ENDPOINT, STABLE_TOKEN_ENDPOINT, TOKEN_ENDPOINT,
};
use crate::error::{FileError, PlatformError, PlatformResult, Result};
use crate::types::{content_type_for, MediaKind, MediaType, TokenGrant, UploadedMedia};

pub const DEFAULT_BASE_URL: &str = "https://api.weixin.qq.com/cgi-bin";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed [`PlatformApi`]
///
/// Holds only the connection pool and base URL. Non-2xx statuses and transport
/// failures map to `PlatformError::Network`; bodies that are not JSON map to
/// `PlatformError::InvalidResponse`.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
}

impl PlatformClient {
    pub fn new() -> PlatformResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Client against another host, e.g. a local mock server
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> PlatformResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network {
                endpoint: "client".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> PlatformResult<ApiResponse> {
        let network = |e: reqwest::Error| PlatformError::Network {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        };

        let response = request.send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Network {
                endpoint: endpoint.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let body = response.text().await.map_err(network)?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| PlatformError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        parsed.check(endpoint)
    }

    async fn media_form(path: &Path) -> Result<Form> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FileError::from_io(path, e))?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("media")
            .to_string();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(content_type_for(path))
            .map_err(|e| FileError::Unsupported {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(Form::new().part("media", part))
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn fetch_token(
        &self,
        app_id: &str,
        app_secret: &str,
        use_stable: bool,
    ) -> PlatformResult<TokenGrant> {
        let (endpoint, request) = if use_stable {
            let body = json!({
                "grant_type": "client_credential",
                "appid": app_id,
                "secret": app_secret,
                "force_refresh": false,
            });
            (
                STABLE_TOKEN_ENDPOINT,
                self.http.post(self.url(STABLE_TOKEN_ENDPOINT)).json(&body),
            )
        } else {
            (
                TOKEN_ENDPOINT,
                self.http.get(self.url(TOKEN_ENDPOINT)).query(&[
                    ("grant_type", "client_credential"),
                    ("appid", app_id),
                    ("secret", app_secret),
                ]),
            )
        };

        tracing::debug!(app_id = %app_id, endpoint, "Requesting access token");
        self.send(endpoint, request).await?.into_grant(endpoint)
    }

    async fn upload_media(
        &self,
        token: &str,
        path: &Path,
        kind: MediaKind,
        media_type: MediaType,
    ) -> Result<UploadedMedia> {
        let endpoint = media_endpoint(kind);
        let form = Self::media_form(path).await?;

        tracing::debug!(path = %path.display(), ?kind, %media_type, "Uploading media");
        let request = self
            .http
            .post(self.url(endpoint))
            .query(&[("access_token", token), ("type", media_type.as_str())])
            .multipart(form);

        let response = self.send(endpoint, request).await?;
        let media_id = ApiResponse::require(response.media_id, endpoint, "media_id")?;
        Ok(UploadedMedia {
            media_id,
            url: response.url,
        })
    }

    async fn upload_article_image(&self, token: &str, path: &Path) -> Result<String> {
        let form = Self::media_form(path).await?;

        tracing::debug!(path = %path.display(), "Uploading article image");
        let request = self
            .http
            .post(self.url(ARTICLE_IMAGE_ENDPOINT))
            .query(&[("access_token", token)])
            .multipart(form);

        let response = self.send(ARTICLE_IMAGE_ENDPOINT, request).await?;
        Ok(ApiResponse::require(
            response.url,
            ARTICLE_IMAGE_ENDPOINT,
            "url",
        )?)
    }

    async fn create_draft(&self, token: &str, articles: &[DraftArticle]) -> PlatformResult<String> {
        let request = self
            .http
            .post(self.url(DRAFT_ENDPOINT))
            .query(&[("access_token", token)])
            .json(&DraftRequest { articles });

        let response = self.send(DRAFT_ENDPOINT, request).await?;
        ApiResponse::require(response.media_id, DRAFT_ENDPOINT, "media_id")
    }

    async fn submit_publish(&self, token: &str, media_id: &str) -> PlatformResult<String> {
        let request = self
            .http
            .post(self.url(PUBLISH_ENDPOINT))
            .query(&[("access_token", token)])
            .json(&json!({ "media_id": media_id }));

        self.send(PUBLISH_ENDPOINT, request)
            .await?
            .into_publish_id(PUBLISH_ENDPOINT)
    }
}
