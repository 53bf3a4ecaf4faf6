//! Account registry for multi-account publishing
//!
//! [`AccountRegistry`] owns the configured official accounts, tracks which one
//! is active and hands out one memoized [`AccountClient`] per account. Clients
//! bind an account to the shared [`CredentialCache`], so every platform call
//! made through them carries a valid access token.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::credentials::CredentialCache;
use crate::error::{ConfigError, PlatformResult, Result};
use crate::platform::{DraftArticle, PlatformApi};
use crate::types::{Account, AccountConfig, Credential, MediaKind, MediaType, UploadedMedia};

const MAX_ACCOUNT_ID_LEN: usize = 64;
const RESERVED_ACCOUNT_IDS: [&str; 3] = ["all", "none", "list"];

/// Platform access bound to one account
///
/// Every operation first ensures a valid credential through the shared cache.
pub struct AccountClient {
    account: Account,
    api: Arc<dyn PlatformApi>,
    cache: CredentialCache,
}

impl std::fmt::Debug for AccountClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountClient")
            .field("account", &self.account.id)
            .finish()
    }
}

impl AccountClient {
    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn account_id(&self) -> &str {
        &self.account.id
    }

    /// Cached credential, or a fresh one from the token endpoint
    pub async fn ensure_credential(&self) -> PlatformResult<Credential> {
        let api = Arc::clone(&self.api);
        let app_id = self.account.config.app_id.clone();
        let app_secret = SecretString::from(self.account.config.secret().to_owned());
        let use_stable = self.account.config.use_stable_token;

        self.cache
            .ensure(&self.account.id, move || async move {
                api.fetch_token(&app_id, app_secret.expose_secret(), use_stable)
                    .await
            })
            .await
    }

    /// Forget this account's credential; the next call fetches a new one
    pub fn clear_credential(&self) {
        self.cache.invalidate(&self.account.id);
    }

    pub async fn upload_media(
        &self,
        path: &Path,
        kind: MediaKind,
        media_type: MediaType,
    ) -> Result<UploadedMedia> {
        let credential = self.ensure_credential().await?;
        self.api
            .upload_media(&credential.token, path, kind, media_type)
            .await
    }

    pub async fn upload_article_image(&self, path: &Path) -> Result<String> {
        let credential = self.ensure_credential().await?;
        self.api.upload_article_image(&credential.token, path).await
    }

    pub async fn create_draft(&self, articles: &[DraftArticle]) -> PlatformResult<String> {
        let credential = self.ensure_credential().await?;
        self.api.create_draft(&credential.token, articles).await
    }

    pub async fn submit_publish(&self, media_id: &str) -> PlatformResult<String> {
        let credential = self.ensure_credential().await?;
        self.api.submit_publish(&credential.token, media_id).await
    }
}

/// State of an account's cached token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Valid,
    Expired,
    Unknown,
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStatus::Valid => write!(f, "valid"),
            TokenStatus::Expired => write!(f, "expired"),
            TokenStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Summary of one account, without secrets
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub id: String,
    pub app_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub use_stable_token: bool,
    pub debug: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub token_status: TokenStatus,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_accounts: usize,
    pub active_account: Option<String>,
    pub valid_tokens: usize,
    pub bound_clients: usize,
}

/// Exportable account settings, secrets excluded
#[derive(Debug, Clone, Serialize)]
pub struct ExportedAccount {
    pub id: String,
    pub app_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub use_stable_token: bool,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountExport {
    pub active_account: Option<String>,
    pub accounts: Vec<ExportedAccount>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Registration order
    accounts: Vec<Account>,
    active: Option<String>,
}

impl RegistryState {
    fn find(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|account| account.id == id)
    }
}

/// Registered accounts, the active account and their bound clients
pub struct AccountRegistry {
    state: RwLock<RegistryState>,
    clients: Mutex<HashMap<String, Arc<AccountClient>>>,
    last_used: Mutex<HashMap<String, DateTime<Utc>>>,
    cache: CredentialCache,
    api: Arc<dyn PlatformApi>,
}

impl std::fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("AccountRegistry")
            .field("accounts", &state.accounts.iter().map(|a| &a.id).collect::<Vec<_>>())
            .field("active", &state.active)
            .field("cache", &self.cache)
            .finish()
    }
}

impl AccountRegistry {
    pub fn new(api: Arc<dyn PlatformApi>, cache: CredentialCache) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            clients: Mutex::new(HashMap::new()),
            last_used: Mutex::new(HashMap::new()),
            cache,
            api,
        }
    }

    /// Validate account id format
    ///
    /// Rules:
    /// - Alphanumeric characters, hyphens, and underscores only
    /// - Maximum 64 characters
    /// - Cannot be empty
    /// - Cannot be a reserved name
    pub fn validate_account_id(id: &str) -> std::result::Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAccount {
            id: id.to_string(),
            reason,
        };

        if id.is_empty() {
            return Err(invalid("account id cannot be empty".to_string()));
        }

        if id.chars().count() > MAX_ACCOUNT_ID_LEN {
            return Err(invalid(format!(
                "account id too long (max {} characters)",
                MAX_ACCOUNT_ID_LEN
            )));
        }

        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "must be alphanumeric with hyphens/underscores only".to_string(),
            ));
        }

        if RESERVED_ACCOUNT_IDS.contains(&id.to_lowercase().as_str()) {
            return Err(invalid("account id is reserved".to_string()));
        }

        Ok(())
    }

    fn validate_config(id: &str, config: &AccountConfig) -> std::result::Result<(), ConfigError> {
        if config.app_id.trim().is_empty() {
            return Err(ConfigError::InvalidAccount {
                id: id.to_string(),
                reason: "app id cannot be empty".to_string(),
            });
        }
        if config.secret().trim().is_empty() {
            return Err(ConfigError::InvalidAccount {
                id: id.to_string(),
                reason: "app secret cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Register an account; the first one becomes active
    pub fn add(&self, id: &str, config: AccountConfig) -> Result<()> {
        Self::validate_account_id(id)?;
        Self::validate_config(id, &config)?;

        let mut state = self.write_state();
        if state.find(id).is_some() {
            return Err(ConfigError::DuplicateAccount(id.to_string()).into());
        }

        self.cache.bind_app(id, &config.app_id);
        state.accounts.push(Account {
            id: id.to_string(),
            config,
        });
        if state.active.is_none() {
            state.active = Some(id.to_string());
        }

        tracing::info!(account = %id, "Registered account");
        Ok(())
    }

    /// Deregister an account, purging its credential and bound client
    ///
    /// When the removed account was active, the first remaining account in
    /// registration order takes over.
    pub fn remove(&self, id: &str) -> Result<()> {
        {
            let mut state = self.write_state();
            let index = state
                .accounts
                .iter()
                .position(|account| account.id == id)
                .ok_or_else(|| ConfigError::AccountNotFound(id.to_string()))?;
            state.accounts.remove(index);

            if state.active.as_deref() == Some(id) {
                state.active = state.accounts.first().map(|account| account.id.clone());
                tracing::info!(active = ?state.active, "Active account switched");
            }
        }

        self.drop_client(id);
        lock(&self.last_used).remove(id);
        self.cache.invalidate(id);
        self.cache.unbind_app(id);

        tracing::info!(account = %id, "Removed account");
        Ok(())
    }

    /// Replace an account's settings
    ///
    /// Drops the old credential and client so the new settings take effect on
    /// the next call.
    pub fn update(&self, id: &str, config: AccountConfig) -> Result<()> {
        Self::validate_config(id, &config)?;
        let app_id = config.app_id.clone();

        {
            let mut state = self.write_state();
            let account = state
                .accounts
                .iter_mut()
                .find(|account| account.id == id)
                .ok_or_else(|| ConfigError::AccountNotFound(id.to_string()))?;
            account.config = config;
        }

        self.drop_client(id);
        self.cache.invalidate(id);
        self.cache.bind_app(id, &app_id);

        tracing::info!(account = %id, "Updated account");
        Ok(())
    }

    pub fn set_active(&self, id: &str) -> Result<()> {
        let mut state = self.write_state();
        if state.find(id).is_none() {
            return Err(ConfigError::AccountNotFound(id.to_string()).into());
        }
        state.active = Some(id.to_string());

        tracing::info!(account = %id, "Active account set");
        Ok(())
    }

    pub fn get_active(&self) -> Option<Account> {
        let state = self.read_state();
        state
            .active
            .as_deref()
            .and_then(|id| state.find(id))
            .cloned()
    }

    pub fn active_id(&self) -> Option<String> {
        self.read_state().active.clone()
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.read_state().find(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_state().find(id).is_some()
    }

    /// Account ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.read_state()
            .accounts
            .iter()
            .map(|account| account.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_state().accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Bound client for `id`, or for the active account when `None`
    ///
    /// Clients are memoized: repeated calls for the same account return the
    /// same instance until the account is updated or removed.
    pub fn get_client(&self, id: Option<&str>) -> Result<Arc<AccountClient>> {
        let account = {
            let state = self.read_state();
            let id = match id {
                Some(id) => id,
                None => state
                    .active
                    .as_deref()
                    .ok_or(ConfigError::NoActiveAccount)?,
            };
            state
                .find(id)
                .cloned()
                .ok_or_else(|| ConfigError::AccountNotFound(id.to_string()))?
        };

        lock(&self.last_used).insert(account.id.clone(), Utc::now());

        let mut clients = lock(&self.clients);
        let client = clients.entry(account.id.clone()).or_insert_with(|| {
            tracing::debug!(account = %account.id, "Binding platform client");
            Arc::new(AccountClient {
                account,
                api: Arc::clone(&self.api),
                cache: self.cache.clone(),
            })
        });
        Ok(Arc::clone(client))
    }

    /// Check an account by ensuring it has a credential
    ///
    /// Failures are logged and reported as `false`.
    pub async fn validate_account(&self, id: &str) -> bool {
        let client = match self.get_client(Some(id)) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(account = %id, error = %e, "Account validation failed");
                return false;
            }
        };

        match client.ensure_credential().await {
            Ok(_) => {
                tracing::info!(account = %id, "Account validated");
                true
            }
            Err(e) => {
                tracing::warn!(account = %id, error = %e, "Account validation failed");
                false
            }
        }
    }

    /// Validate every account in registration order
    pub async fn validate_all_accounts(&self) -> Vec<(String, bool)> {
        let mut results = Vec::new();
        for id in self.ids() {
            let valid = self.validate_account(&id).await;
            results.push((id, valid));
        }
        results
    }

    pub fn get_all_accounts(&self) -> Vec<AccountInfo> {
        let state = self.read_state();
        let last_used = lock(&self.last_used);

        state
            .accounts
            .iter()
            .map(|account| {
                let token_expires_at = self.cache.expires_at(&account.id);
                let token_status = match token_expires_at {
                    Some(_) if self.cache.get(&account.id).is_some() => TokenStatus::Valid,
                    Some(_) => TokenStatus::Expired,
                    None => TokenStatus::Unknown,
                };

                AccountInfo {
                    id: account.id.clone(),
                    app_id: account.config.app_id.clone(),
                    display_name: account.config.display_name.clone(),
                    description: account.config.description.clone(),
                    is_active: state.active.as_deref() == Some(account.id.as_str()),
                    use_stable_token: account.config.use_stable_token,
                    debug: account.config.debug,
                    last_used: last_used.get(&account.id).copied(),
                    token_status,
                    token_expires_at,
                }
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.read_state();
        RegistryStats {
            total_accounts: state.accounts.len(),
            active_account: state.active.clone(),
            valid_tokens: state
                .accounts
                .iter()
                .filter(|account| self.cache.get(&account.id).is_some())
                .count(),
            bound_clients: lock(&self.clients).len(),
        }
    }

    pub fn export_config(&self) -> AccountExport {
        let state = self.read_state();
        AccountExport {
            active_account: state.active.clone(),
            accounts: state
                .accounts
                .iter()
                .map(|account| ExportedAccount {
                    id: account.id.clone(),
                    app_id: account.config.app_id.clone(),
                    name: account.config.display_name.clone(),
                    description: account.config.description.clone(),
                    use_stable_token: account.config.use_stable_token,
                    debug: account.config.debug,
                })
                .collect(),
        }
    }

    pub fn clear_account_cache(&self, id: &str) -> Result<()> {
        if !self.contains(id) {
            return Err(ConfigError::AccountNotFound(id.to_string()).into());
        }
        self.cache.invalidate(id);
        Ok(())
    }

    pub fn clear_all_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Pull stored tokens into memory so introspection can see them
    ///
    /// Returns how many accounts had a stored token.
    pub fn load_persisted_tokens(&self) -> usize {
        self.ids()
            .iter()
            .filter(|id| self.cache.load_persisted(id).is_some())
            .count()
    }

    fn drop_client(&self, id: &str) {
        lock(&self.clients).remove(id);
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
