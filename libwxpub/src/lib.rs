//! wxpub - article publishing for WeChat official accounts
//!
//! This library turns a source file into a platform draft (and optionally a
//! publication) for one of several configured accounts. Access tokens are
//! cached per account and refreshed with a single request no matter how many
//! tasks need them at once.

pub mod accounts;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod plugins;
pub mod publisher;
pub mod types;

// Re-export commonly used types
pub use accounts::{AccountClient, AccountInfo, AccountRegistry, TokenStatus};
pub use config::Config;
pub use credentials::{CredentialCache, FileTokenStore, StoredToken, TokenStore};
pub use error::{ConfigError, FileError, PlatformError, PublishError, Result};
pub use pipeline::{Plugin, PluginContext, PluginPipeline};
pub use platform::client::PlatformClient;
pub use platform::PlatformApi;
pub use publisher::{Publisher, PublisherConfig};
pub use types::{Account, AccountConfig, Article, Credential, PublishOptions, PublishOutcome};
