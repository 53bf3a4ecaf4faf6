//! Access token cache
//!
//! [`CredentialCache`] keeps one [`Credential`] per account id in memory and,
//! when a [`TokenStore`] is attached, mirrors it to durable storage so a fresh
//! process can reuse a token that is still valid.
//!
//! # Refresh discipline
//!
//! - A cached credential is handed out only while `expires_at > now`.
//! - `expires_at` is computed as `fetch_time + (expires_in - 300s)`.
//! - Concurrent [`CredentialCache::ensure`] calls for the same account share a
//!   single underlying fetch. Every waiter receives that fetch's result, success
//!   or failure. If all waiters are dropped, the next caller resumes the same
//!   fetch.
//! - A failed fetch writes nothing. An expired entry that was already cached
//!   stays in place but is never returned.
//! - A refresh caches its result only while it is still the account's
//!   registered flight. After [`CredentialCache::invalidate`] the next
//!   `ensure` always fetches, even if an older fetch completes later.
//! - Once an account is bound to an app id with
//!   [`CredentialCache::bind_app`], stored tokens written for another app id
//!   are ignored.
//!
//! # Example
//!
//! ```no_run
//! use libwxpub::credentials::{CredentialCache, FileTokenStore};
//! use libwxpub::types::TokenGrant;
//!
//! # async fn example() -> libwxpub::error::PlatformResult<()> {
//! let cache = CredentialCache::with_store(FileTokenStore::new("/tmp/wxpub-tokens"));
//! let credential = cache
//!     .ensure("main", || async {
//!         Ok(TokenGrant { access_token: "TOK1".into(), expires_in: 7200 })
//!     })
//!     .await?;
//! assert_eq!(credential.token, "TOK1");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};
use crate::platform::TOKEN_ENDPOINT;
use crate::types::{Credential, TokenGrant, EXPIRY_MARGIN_SECS};

const TOKEN_FILE_SUFFIX: &str = ".token.json";

/// A persisted credential and the app it was issued to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    /// Absent in records written without a bound app
    #[serde(rename = "appId", default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(flatten)]
    pub credential: Credential,
}

impl StoredToken {
    pub fn new(app_id: Option<String>, credential: Credential) -> Self {
        Self { app_id, credential }
    }

    /// Usable for an account bound to `app_id`; anything goes when unbound
    pub fn issued_to(&self, app_id: Option<&str>) -> bool {
        match app_id {
            Some(app_id) => self.app_id.as_deref() == Some(app_id),
            None => true,
        }
    }
}

/// Durable storage for cached credentials
///
/// Implementations treat unreadable or corrupt entries as absent: `load`
/// never fails, it only misses.
pub trait TokenStore: Send + Sync {
    fn load(&self, account_id: &str) -> Option<StoredToken>;

    /// Replace the stored record atomically
    fn save(&self, account_id: &str, token: &StoredToken) -> io::Result<()>;

    fn remove(&self, account_id: &str) -> io::Result<()>;

    fn remove_all(&self) -> io::Result<()>;

    fn backend_name(&self) -> &str;
}

/// One JSON file per account under a cache directory
///
/// # File Format
///
/// - Naming: `{account_id}.token.json`
/// - Content: `{"appId": "...", "token": "...", "expiresAt": <epoch millis>}`
/// - Permissions: 600 (owner read/write only) on Unix systems
///
/// Writes go to a uniquely named temp file in the same directory and are
/// renamed over the target, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_CACHE_HOME/wxpub/tokens` or the platform equivalent
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("wxpub").join("tokens"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", account_id, TOKEN_FILE_SUFFIX))
    }

    fn checked_path(&self, account_id: &str) -> io::Result<PathBuf> {
        if account_id.is_empty()
            || account_id.contains(['/', '\\'])
            || account_id.starts_with('.')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("account id '{}' cannot be used as a file name", account_id),
            ));
        }
        Ok(self.path_for(account_id))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, account_id: &str) -> Option<StoredToken> {
        let path = self.checked_path(account_id).ok()?;

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read cached token");
                return None;
            }
        };

        match serde_json::from_str::<StoredToken>(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cached token");
                None
            }
        }
    }

    fn save(&self, account_id: &str, token: &StoredToken) -> io::Result<()> {
        let path = self.checked_path(account_id)?;
        std::fs::create_dir_all(&self.dir)?;

        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", account_id, uuid::Uuid::new_v4()));
        let body = serde_json::to_vec(token)?;

        let written = std::fs::write(&tmp_path, body).and_then(|_| {
            // Set file permissions to 600 on Unix
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
            }
            std::fs::rename(&tmp_path, &path)
        });

        if written.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        } else {
            tracing::debug!(account = %account_id, path = %path.display(), "Persisted access token");
        }
        written
    }

    fn remove(&self, account_id: &str) -> io::Result<()> {
        let path = self.checked_path(account_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(account = %account_id, "Deleted cached token file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn remove_all(&self) -> io::Result<()> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();
            let is_token_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(TOKEN_FILE_SUFFIX));
            if is_token_file {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

type SharedFetch = Shared<BoxFuture<'static, PlatformResult<Credential>>>;

struct Inner {
    entries: RwLock<HashMap<String, Credential>>,
    in_flight: Mutex<HashMap<String, (u64, SharedFetch)>>,
    next_flight: AtomicU64,
    apps: RwLock<HashMap<String, String>>,
    store: Option<Arc<dyn TokenStore>>,
}

impl Inner {
    fn bound_app(&self, account_id: &str) -> Option<String> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account_id)
            .cloned()
    }

    /// Stored credential for the account, if it was issued to the bound app
    fn load_stored(&self, account_id: &str) -> Option<Credential> {
        let stored = self.store.as_ref()?.load(account_id)?;
        let app_id = self.bound_app(account_id);
        if !stored.issued_to(app_id.as_deref()) {
            tracing::debug!(
                account = %account_id,
                stored_app = ?stored.app_id,
                bound_app = ?app_id,
                "Ignoring persisted token issued to another app"
            );
            return None;
        }
        Some(stored.credential)
    }

    fn persist(&self, account_id: &str, credential: &Credential) {
        let Some(store) = &self.store else {
            return;
        };
        let record = StoredToken::new(self.bound_app(account_id), credential.clone());
        if let Err(e) = store.save(account_id, &record) {
            tracing::warn!(account = %account_id, error = %e, "Failed to persist access token");
        }
    }
}

/// Per-account access token cache with single-flight refresh
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("accounts", &self.read_entries().len())
            .field(
                "store",
                &self.inner.store.as_ref().map(|store| store.backend_name()),
            )
            .finish()
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialCache {
    /// Memory-only cache
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Cache backed by durable storage
    pub fn with_store(store: impl TokenStore + 'static) -> Self {
        Self::build(Some(Arc::new(store)))
    }

    fn build(store: Option<Arc<dyn TokenStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                apps: RwLock::new(HashMap::new()),
                store,
            }),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.store.is_some()
    }

    /// Valid in-memory credential, if any; never refreshes
    pub fn get(&self, account_id: &str) -> Option<Credential> {
        self.read_entries()
            .get(account_id)
            .filter(|credential| credential.is_valid())
            .cloned()
    }

    /// Expiry of the in-memory entry, valid or not
    pub fn expires_at(&self, account_id: &str) -> Option<DateTime<Utc>> {
        self.read_entries()
            .get(account_id)
            .map(|credential| credential.expires_at)
    }

    /// Tie an account to the app its tokens must be issued to
    ///
    /// Rebinding to a different app drops the in-memory credential.
    pub fn bind_app(&self, account_id: &str, app_id: &str) {
        let previous = self
            .inner
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id.to_string(), app_id.to_string());

        if previous.is_some_and(|previous| previous != app_id) {
            let _in_flight = self.lock_in_flight();
            self.write_entries().remove(account_id);
            tracing::debug!(account = %account_id, app_id = %app_id, "Account rebound to another app");
        }
    }

    pub fn unbind_app(&self, account_id: &str) {
        self.inner
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account_id);
    }

    /// Seed the in-memory entry for an account
    pub fn put(&self, account_id: &str, credential: Credential) {
        self.write_entries()
            .insert(account_id.to_string(), credential);
    }

    /// Copy an account's stored credential into memory, expired or not
    ///
    /// Lets introspection report on tokens written by earlier processes.
    /// Returns the loaded credential; a memory-only cache loads nothing.
    pub fn load_persisted(&self, account_id: &str) -> Option<Credential> {
        let credential = self.inner.load_stored(account_id)?;
        self.write_entries()
            .entry(account_id.to_string())
            .or_insert_with(|| credential.clone());
        Some(credential)
    }

    /// Return a valid credential, fetching one if needed
    ///
    /// Lookup order: memory, then the attached store, then `fetch`. `fetch` is
    /// only invoked when this call starts a new refresh; callers that join an
    /// in-flight refresh drop it unused.
    ///
    /// # Errors
    ///
    /// The platform error from `fetch`, unchanged. A grant whose lifetime does
    /// not exceed the 300 s margin is rejected as `InvalidResponse`.
    pub async fn ensure<F, Fut>(&self, account_id: &str, fetch: F) -> PlatformResult<Credential>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PlatformResult<TokenGrant>> + Send + 'static,
    {
        if let Some(credential) = self.get(account_id) {
            return Ok(credential);
        }

        let flight = {
            let mut in_flight = self.lock_in_flight();

            // A refresh may have landed while we waited for the lock
            if let Some(credential) = self.get(account_id) {
                return Ok(credential);
            }

            match in_flight.get(account_id) {
                Some((_, flight)) => {
                    tracing::debug!(account = %account_id, "Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let flight_id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight = Self::refresh(
                        Arc::clone(&self.inner),
                        flight_id,
                        account_id.to_string(),
                        fetch(),
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(account_id.to_string(), (flight_id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    /// Drop an account's credential from memory and storage
    ///
    /// A refresh still running for the account keeps serving its current
    /// waiters but no longer caches its result.
    pub fn invalidate(&self, account_id: &str) {
        let mut in_flight = self.lock_in_flight();
        in_flight.remove(account_id);
        self.write_entries().remove(account_id);

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.remove(account_id) {
                tracing::warn!(account = %account_id, error = %e, "Failed to delete cached token");
            }
        }
        drop(in_flight);
        tracing::debug!(account = %account_id, "Invalidated access token");
    }

    /// Drop every credential from memory and storage
    pub fn invalidate_all(&self) {
        let mut in_flight = self.lock_in_flight();
        in_flight.clear();
        self.write_entries().clear();

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.remove_all() {
                tracing::warn!(error = %e, "Failed to clear token store");
            }
        }
        drop(in_flight);
        tracing::debug!("Invalidated all access tokens");
    }

    async fn refresh<Fut>(
        inner: Arc<Inner>,
        flight_id: u64,
        account_id: String,
        fetch: Fut,
    ) -> PlatformResult<Credential>
    where
        Fut: Future<Output = PlatformResult<TokenGrant>> + Send + 'static,
    {
        let result = Self::load_or_fetch(&inner, &account_id, fetch).await;

        // Publishing happens under the flight lock so invalidate cannot
        // interleave between the ownership check and the writes
        let mut in_flight = inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.get(&account_id).is_some_and(|(id, _)| *id == flight_id) {
            tracing::debug!(account = %account_id, "Token refresh superseded, result not cached");
            return result.map(|(credential, _)| credential);
        }
        in_flight.remove(&account_id);

        if let Ok((credential, fetched)) = &result {
            inner
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(account_id.clone(), credential.clone());
            if *fetched {
                inner.persist(&account_id, credential);
            }
        }
        drop(in_flight);

        result.map(|(credential, _)| credential)
    }

    /// Stored credential if still valid, else a live fetch
    ///
    /// The flag is `true` when the credential came from `fetch`.
    async fn load_or_fetch<Fut>(
        inner: &Arc<Inner>,
        account_id: &str,
        fetch: Fut,
    ) -> PlatformResult<(Credential, bool)>
    where
        Fut: Future<Output = PlatformResult<TokenGrant>>,
    {
        if inner.store.is_some() {
            let loader = Arc::clone(inner);
            let id = account_id.to_string();
            let persisted = tokio::task::spawn_blocking(move || loader.load_stored(&id))
                .await
                .ok()
                .flatten();

            match persisted {
                Some(credential) if credential.is_valid() => {
                    tracing::debug!(account = %account_id, "Reusing persisted access token");
                    return Ok((credential, false));
                }
                Some(_) => tracing::debug!(account = %account_id, "Persisted access token expired"),
                None => {}
            }
        }

        let fetched_at = Utc::now();
        let grant = fetch.await.map_err(|e| {
            tracing::warn!(account = %account_id, error = %e, "Access token fetch failed");
            e
        })?;

        if grant.expires_in <= EXPIRY_MARGIN_SECS {
            return Err(PlatformError::InvalidResponse {
                endpoint: TOKEN_ENDPOINT.to_string(),
                message: format!(
                    "token lifetime of {}s does not exceed the {}s expiry margin",
                    grant.expires_in, EXPIRY_MARGIN_SECS
                ),
            });
        }

        let credential = Credential::from_grant(&grant, fetched_at);
        tracing::info!(
            account = %account_id,
            token = %credential.preview(),
            expires_at = %credential.expires_at,
            "Fetched access token"
        );

        Ok((credential, true))
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Credential>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Credential>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, SharedFetch)>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
