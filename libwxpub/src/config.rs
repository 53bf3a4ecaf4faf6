//! Configuration management for wxpub
//!
//! Settings come from a TOML file, with `WECHAT_*` environment variables
//! layered on top for account credentials:
//!
//! ```toml
//! active_account = "main"
//!
//! [api]
//! base_url = "https://api.weixin.qq.com/cgi-bin"
//! timeout_secs = 30
//!
//! [cache]
//! dir = "~/.cache/wxpub/tokens"
//! persist = true
//!
//! [publisher]
//! draft = true
//! author = "Editorial Team"
//!
//! [[accounts]]
//! id = "main"
//! app_id = "wx0123456789abcdef"
//! app_secret = "..."
//! name = "Main account"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::accounts::AccountRegistry;
use crate::credentials::{CredentialCache, FileTokenStore};
use crate::error::{ConfigError, Result};
use crate::platform::client::{PlatformClient, DEFAULT_BASE_URL};
use crate::platform::PlatformApi;
use crate::publisher::PublisherConfig;
use crate::types::{AccountConfig, PublishOptions};

pub const CONFIG_PATH_ENV: &str = "WXPUB_CONFIG";
pub const APP_ID_ENV: &str = "WECHAT_APP_ID";
pub const APP_SECRET_ENV: &str = "WECHAT_APP_SECRET";
pub const ACCOUNTS_ENV: &str = "WECHAT_ACCOUNTS";
pub const STABLE_TOKEN_ENV: &str = "WECHAT_USE_STABLE_TOKEN";

/// Account id given to the account defined by `WECHAT_APP_ID`
pub const ENV_ACCOUNT_ID: &str = "default";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub active_account: Option<String>,
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub publisher: PublisherSettings,
    pub accounts: Vec<AccountEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Token directory; the user cache directory when unset
    pub dir: Option<String>,
    /// Keep tokens on disk between runs
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub draft: bool,
    pub debug: bool,
    pub author: Option<String>,
    pub network_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            draft: true,
            debug: false,
            author: None,
            network_attempts: 3,
            retry_backoff_ms: 1000,
        }
    }
}

/// One `[[accounts]]` table
#[derive(Clone, Deserialize)]
pub struct AccountEntry {
    pub id: String,
    pub app_id: String,
    pub app_secret: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub use_stable_token: bool,
    #[serde(default)]
    pub debug: bool,
}

impl std::fmt::Debug for AccountEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountEntry")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("name", &self.name)
            .field("use_stable_token", &self.use_stable_token)
            .field("debug", &self.debug)
            .finish()
    }
}

impl AccountEntry {
    pub fn to_account_config(&self) -> AccountConfig {
        let mut config = AccountConfig::new(self.app_id.clone(), self.app_secret.clone())
            .with_stable_token(self.use_stable_token);
        config.display_name = self.name.clone();
        config.description = self.description.clone();
        config.debug = self.debug;
        config
    }
}

impl Config {
    /// Load configuration from the default location, then apply the
    /// environment overlay
    ///
    /// A missing config file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Merge `WECHAT_*` variables from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Merge `WECHAT_*` variables supplied by `lookup`
    ///
    /// - `WECHAT_APP_ID` and `WECHAT_APP_SECRET` define account `default`,
    ///   which becomes the active account.
    /// - `WECHAT_ACCOUNTS=id:appid:secret[:name],...` defines further accounts.
    /// - `WECHAT_USE_STABLE_TOKEN=true` enables the stable token endpoint for
    ///   the accounts defined here.
    ///
    /// An environment account replaces a file account with the same id.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let use_stable_token = non_empty(STABLE_TOKEN_ENV)
            .map(|value| is_truthy(&value))
            .unwrap_or(false);

        let mut env_accounts = Vec::new();

        match (non_empty(APP_ID_ENV), non_empty(APP_SECRET_ENV)) {
            (Some(app_id), Some(app_secret)) => {
                env_accounts.push(AccountEntry {
                    id: ENV_ACCOUNT_ID.to_string(),
                    app_id: app_id.trim().to_string(),
                    app_secret: app_secret.trim().to_string(),
                    name: None,
                    description: None,
                    use_stable_token,
                    debug: false,
                });
                self.active_account = Some(ENV_ACCOUNT_ID.to_string());
            }
            (Some(_), None) => {
                return Err(ConfigError::MissingField(APP_SECRET_ENV.to_string()).into())
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingField(APP_ID_ENV.to_string()).into())
            }
            (None, None) => {}
        }

        if let Some(spec) = non_empty(ACCOUNTS_ENV) {
            for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                env_accounts.push(parse_account_spec(item, use_stable_token)?);
            }
        }

        for entry in env_accounts {
            tracing::debug!(account = %entry.id, "Account defined by environment");
            self.accounts.retain(|existing| existing.id != entry.id);
            self.accounts.push(entry);
        }

        Ok(())
    }

    /// Token cache honouring `[cache]`
    ///
    /// Falls back to a memory-only cache when persistence is off or no cache
    /// directory can be determined.
    pub fn credential_cache(&self) -> CredentialCache {
        if !self.cache.persist {
            return CredentialCache::new();
        }

        let dir = match &self.cache.dir {
            Some(dir) => Some(PathBuf::from(shellexpand::tilde(dir).to_string())),
            None => FileTokenStore::default_dir(),
        };

        match dir {
            Some(dir) => CredentialCache::with_store(FileTokenStore::new(dir)),
            None => {
                tracing::warn!("No cache directory available, tokens will not persist");
                CredentialCache::new()
            }
        }
    }

    pub fn platform_client(&self) -> Result<PlatformClient> {
        let client = PlatformClient::with_base_url(
            self.api.base_url.clone(),
            Duration::from_secs(self.api.timeout_secs),
        )?;
        Ok(client)
    }

    /// Register every configured account with a new registry
    pub fn build_registry(&self, api: Arc<dyn PlatformApi>) -> Result<AccountRegistry> {
        let registry = AccountRegistry::new(api, self.credential_cache());
        for entry in &self.accounts {
            registry.add(&entry.id, entry.to_account_config())?;
        }

        if let Some(active) = &self.active_account {
            registry.set_active(active)?;
        }

        tracing::debug!(
            accounts = registry.len(),
            active = ?registry.active_id(),
            "Built account registry"
        );
        Ok(registry)
    }

    /// Publisher settings from `[publisher]`, with the built-in plugins
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig::default()
            .with_draft(self.publisher.draft)
            .with_debug(self.publisher.debug)
            .with_network_retry(
                self.publisher.network_attempts,
                Duration::from_millis(self.publisher.retry_backoff_ms),
            )
    }

    /// Publish options prefilled with configured defaults
    pub fn default_options(&self) -> PublishOptions {
        PublishOptions {
            author: self.publisher.author.clone(),
            ..Default::default()
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse `id:appid:secret[:name]`
fn parse_account_spec(item: &str, use_stable_token: bool) -> Result<AccountEntry> {
    let mut parts = item.splitn(4, ':').map(str::trim);
    let id = parts.next().unwrap_or_default();
    let app_id = parts.next().unwrap_or_default();
    let app_secret = parts.next().unwrap_or_default();
    let name = parts.next().filter(|name| !name.is_empty());

    if id.is_empty() || app_id.is_empty() || app_secret.is_empty() {
        return Err(ConfigError::InvalidAccount {
            id: id.to_string(),
            reason: format!("{} entries must look like id:appid:secret[:name]", ACCOUNTS_ENV),
        }
        .into());
    }

    Ok(AccountEntry {
        id: id.to_string(),
        app_id: app_id.to_string(),
        app_secret: app_secret.to_string(),
        name: name.map(str::to_string),
        description: None,
        use_stable_token,
        debug: false,
    })
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("wxpub").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::platform::mock::MockPlatform;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const FULL: &str = r#"
active_account = "second"

[api]
base_url = "http://localhost:9999/cgi-bin"
timeout_secs = 5

[cache]
dir = "/tmp/wxpub-test-tokens"
persist = false

[publisher]
draft = false
debug = true
author = "Desk"
network_attempts = 2
retry_backoff_ms = 10

[[accounts]]
id = "main"
app_id = "wx1"
app_secret = "s1"
name = "Main"

[[accounts]]
id = "second"
app_id = "wx2"
app_secret = "s2"
use_stable_token = true
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();

        assert_eq!(config.active_account.as_deref(), Some("second"));
        assert_eq!(config.api.base_url, "http://localhost:9999/cgi-bin");
        assert_eq!(config.api.timeout_secs, 5);
        assert!(!config.cache.persist);
        assert!(!config.publisher.draft);
        assert_eq!(config.publisher.author.as_deref(), Some("Desk"));
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].name.as_deref(), Some("Main"));
        assert!(config.accounts[1].use_stable_token);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api.timeout_secs, 30);
        assert!(config.cache.persist);
        assert!(config.publisher.draft);
        assert_eq!(config.publisher.network_attempts, 3);
        assert!(config.accounts.is_empty());
        assert!(config.active_account.is_none());
    }

    #[test]
    fn test_parse_error() {
        let result = Config::parse("[api\nbase_url = 1");
        assert!(matches!(
            result,
            Err(PublishError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_load_from_missing_path_is_read_error() {
        let result = Config::load_from_path(Path::new("/no/such/wxpub.toml"));
        assert!(matches!(
            result,
            Err(PublishError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    fn test_env_single_account_becomes_active() {
        let mut config = Config::parse(FULL).unwrap();
        config
            .apply_env_from(env(&[
                (APP_ID_ENV, "wxenv"),
                (APP_SECRET_ENV, "senv"),
                (STABLE_TOKEN_ENV, "true"),
            ]))
            .unwrap();

        assert_eq!(config.active_account.as_deref(), Some(ENV_ACCOUNT_ID));
        let entry = config.accounts.iter().find(|a| a.id == "default").unwrap();
        assert_eq!(entry.app_id, "wxenv");
        assert!(entry.use_stable_token);
        assert_eq!(config.accounts.len(), 3);
    }

    #[test]
    fn test_env_accounts_list() {
        let mut config = Config::parse(FULL).unwrap();
        config
            .apply_env_from(env(&[(
                ACCOUNTS_ENV,
                "main:wxA:sA:Main From Env, extra:wxB:sB",
            )]))
            .unwrap();

        // file account "main" is replaced, active account untouched
        assert_eq!(config.accounts.len(), 3);
        let main = config.accounts.iter().find(|a| a.id == "main").unwrap();
        assert_eq!(main.app_id, "wxA");
        assert_eq!(main.name.as_deref(), Some("Main From Env"));
        let extra = config.accounts.iter().find(|a| a.id == "extra").unwrap();
        assert!(extra.name.is_none());
        assert_eq!(config.active_account.as_deref(), Some("second"));
    }

    #[test]
    fn test_env_malformed_entries() {
        let mut config = Config::default();
        let result = config.apply_env_from(env(&[(ACCOUNTS_ENV, "broken:wx1")]));
        assert!(matches!(
            result,
            Err(PublishError::Config(ConfigError::InvalidAccount { .. }))
        ));

        let mut config = Config::default();
        let result = config.apply_env_from(env(&[(APP_ID_ENV, "wx1")]));
        assert!(matches!(
            result,
            Err(PublishError::Config(ConfigError::MissingField(field))) if field == APP_SECRET_ENV
        ));
    }

    #[test]
    fn test_build_registry() {
        let config = Config::parse(FULL).unwrap();
        let registry = config
            .build_registry(Arc::new(MockPlatform::success()))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_id().as_deref(), Some("second"));
        assert!(registry.get("second").unwrap().config.use_stable_token);
        assert!(!registry.cache().is_persistent());
    }

    #[test]
    fn test_build_registry_rejects_unknown_active() {
        let mut config = Config::parse(FULL).unwrap();
        config.active_account = Some("ghost".to_string());

        let result = config.build_registry(Arc::new(MockPlatform::success()));
        assert!(matches!(
            result,
            Err(PublishError::Config(ConfigError::AccountNotFound(_)))
        ));
    }

    #[test]
    fn test_build_registry_rejects_duplicate_ids() {
        let mut config = Config::parse(FULL).unwrap();
        let duplicate = config.accounts[0].clone();
        config.accounts.push(duplicate);

        let result = config.build_registry(Arc::new(MockPlatform::success()));
        assert!(matches!(
            result,
            Err(PublishError::Config(ConfigError::DuplicateAccount(_)))
        ));
    }

    #[test]
    fn test_persistent_cache_uses_configured_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.dir = Some(dir.path().to_string_lossy().into_owned());

        assert!(config.credential_cache().is_persistent());
    }

    #[test]
    fn test_publisher_config_and_options() {
        let config = Config::parse(FULL).unwrap();
        let publisher = config.publisher_config();

        assert!(!publisher.publish_as_draft);
        assert!(publisher.debug);
        assert_eq!(publisher.network_attempts, 2);
        assert_eq!(publisher.retry_backoff, Duration::from_millis(10));
        assert_eq!(config.default_options().author.as_deref(), Some("Desk"));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = Config::parse(FULL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("\"s1\""));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_from_env() {
        std::env::set_var(CONFIG_PATH_ENV, "/tmp/custom/wxpub.toml");
        assert_eq!(
            resolve_config_path().unwrap(),
            PathBuf::from("/tmp/custom/wxpub.toml")
        );
        std::env::remove_var(CONFIG_PATH_ENV);
    }

    #[test]
    #[serial]
    fn test_load_with_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(CONFIG_PATH_ENV, dir.path().join("absent.toml"));
        for key in [APP_ID_ENV, APP_SECRET_ENV, ACCOUNTS_ENV, STABLE_TOKEN_ENV] {
            std::env::remove_var(key);
        }

        let config = Config::load().unwrap();
        assert!(config.accounts.is_empty());
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);

        std::env::remove_var(CONFIG_PATH_ENV);
    }
}
