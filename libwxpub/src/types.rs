//! Core types for wxpub

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Seconds shaved off the platform-reported token lifetime
pub const EXPIRY_MARGIN_SECS: i64 = 300;

/// Number of characters of rendered content kept in a publish result
pub const CONTENT_PREVIEW_CHARS: usize = 100;

// ============================================================================
// Accounts and credentials
// ============================================================================

/// Settings of one official account
///
/// The app secret is held in a [`SecretString`] so it never shows up in
/// `Debug` output or logs.
#[derive(Debug)]
pub struct AccountConfig {
    pub app_id: String,
    pub app_secret: SecretString,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Use the `stable_token` endpoint instead of `token`
    pub use_stable_token: bool,
    pub debug: bool,
}

impl AccountConfig {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: SecretString::from(app_secret.into()),
            display_name: None,
            description: None,
            use_stable_token: false,
            debug: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_stable_token(mut self, use_stable_token: bool) -> Self {
        self.use_stable_token = use_stable_token;
        self
    }

    pub fn secret(&self) -> &str {
        self.app_secret.expose_secret()
    }
}

impl Clone for AccountConfig {
    fn clone(&self) -> Self {
        Self {
            app_id: self.app_id.clone(),
            app_secret: SecretString::from(self.secret().to_owned()),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            use_stable_token: self.use_stable_token,
            debug: self.debug,
        }
    }
}

/// A registered account: local id plus its settings
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub config: AccountConfig,
}

impl Account {
    /// Display name, falling back to the app id
    pub fn label(&self) -> &str {
        self.config.display_name.as_deref().unwrap_or(&self.config.app_id)
    }
}

/// Raw token grant as returned by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
}

/// Cached access token with its local expiry
///
/// `expires_at` already includes the [`EXPIRY_MARGIN_SECS`] safety margin. The
/// serialized form (`{"token", "expiresAt"}` with epoch milliseconds) is what
/// the token store writes, next to the owning app id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(rename = "expiresAt", with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn from_grant(grant: &TokenGrant, fetched_at: DateTime<Utc>) -> Self {
        Self {
            token: grant.access_token.clone(),
            expires_at: fetched_at + Duration::seconds(grant.expires_in - EXPIRY_MARGIN_SECS),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.expires_at > now
    }

    /// Short prefix of the token, safe for logs
    pub fn preview(&self) -> String {
        let prefix: String = self.token.chars().take(8).collect();
        format!("{}...", prefix)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.preview())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// Articles
// ============================================================================

/// Article being assembled by the plugin chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    /// Rendered body
    pub content: String,
    pub author: Option<String>,
    pub digest: Option<String>,
    pub cover_image_path: Option<PathBuf>,
    pub cover_media_id: Option<String>,
    pub cover_is_shown: bool,
    pub source_url: Option<String>,
    pub need_open_comment: bool,
    pub only_fans_can_comment: bool,
    /// Draft id assigned by the platform
    pub media_id: Option<String>,
    pub result_message: String,
}

impl Article {
    /// Seed an article from caller-supplied overrides
    pub fn from_options(options: &PublishOptions) -> Self {
        let cover_media_id = options.cover_media_id.clone().filter(|id| !id.is_empty());
        Self {
            title: options.title.clone().unwrap_or_default(),
            author: options.author.clone(),
            digest: options.digest.clone(),
            cover_image_path: options.cover_image_path.clone(),
            cover_is_shown: cover_media_id.is_some(),
            cover_media_id,
            source_url: options.source_url.clone(),
            need_open_comment: options.open_comment,
            only_fans_can_comment: options.only_fans_can_comment,
            ..Default::default()
        }
    }

    pub fn has_cover(&self) -> bool {
        self.cover_media_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Remove the cover reference and hide the cover
    pub fn drop_cover(&mut self) {
        self.cover_media_id = None;
        self.cover_is_shown = false;
    }

    /// Copy of the article with `content` cut down to a short preview
    pub fn with_content_preview(&self, max_chars: usize) -> Self {
        let mut preview = self.clone();
        let truncated: String = self.content.chars().take(max_chars).collect();
        preview.content = format!("{}...", truncated);
        preview
    }
}

/// Caller overrides applied before the plugin chain runs
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub title: Option<String>,
    pub author: Option<String>,
    pub digest: Option<String>,
    pub cover_image_path: Option<PathBuf>,
    /// Already-uploaded cover media, bypassing the cover upload
    pub cover_media_id: Option<String>,
    pub source_url: Option<String>,
    pub open_comment: bool,
    pub only_fans_can_comment: bool,
}

/// Result of a publish call
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub message: String,
    /// Submitted article; `content` is only a preview
    pub article: Article,
    pub publish_id: Option<String>,
    /// The cover was removed to get past a media rejection
    pub cover_dropped: bool,
    /// Debug mode: nothing was sent to the platform
    pub simulated: bool,
}

// ============================================================================
// Media
// ============================================================================

/// Storage lifetime of uploaded media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Temporary,
    Permanent,
}

/// Platform media category, sent as the `type` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Voice,
    Video,
    Thumb,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::Thumb => "thumb",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub media_id: String,
    pub url: Option<String>,
}

/// Image MIME types the platform accepts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
}

impl ImageMimeType {
    /// Detect MIME type from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }
}

/// Content type for a multipart upload of `path`
pub fn content_type_for(path: &Path) -> &'static str {
    ImageMimeType::from_path(path)
        .map(|mime| mime.as_str())
        .unwrap_or("application/octet-stream")
}
