//! Plugin pipeline
//!
//! A publish call threads one [`PluginContext`] through an ordered list of
//! [`Plugin`]s. Each plugin receives the context by value and hands it back,
//! so ownership makes the sequential hand-off explicit.
//!
//! The chain is fail-fast: the first failing plugin aborts the run with
//! `PublishError::Plugin` naming it. Side effects already committed by earlier
//! plugins (uploaded media, for instance) are not rolled back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::accounts::AccountClient;
use crate::error::{ConfigError, PublishError, Result};
use crate::types::Article;

/// A named transformation step
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name within a pipeline; used in error messages
    fn name(&self) -> &str;

    async fn execute(&self, ctx: PluginContext) -> Result<PluginContext>;
}

/// Namespaced side-table for data plugins share outside the article
///
/// Keys are scoped by namespace, conventionally the writing plugin's name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extensions {
    entries: HashMap<String, HashMap<String, Value>>,
}

impl Extensions {
    pub fn insert(
        &mut self,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Option<Value> {
        self.entries
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value)
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.entries.get(namespace)?.get(key)
    }

    /// Typed read; `None` when missing or of another shape
    pub fn get_as<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        self.get(namespace, key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn remove(&mut self, namespace: &str, key: &str) -> Option<Value> {
        self.entries.get_mut(namespace)?.remove(key)
    }

    pub fn namespace(&self, namespace: &str) -> Option<&HashMap<String, Value>> {
        self.entries.get(namespace)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(HashMap::is_empty)
    }
}

/// State threaded through one publish call
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Input reference: a file path or raw source text
    pub input: String,
    pub article: Option<Article>,
    pub extensions: Extensions,
    /// Platform access for the account being published to
    pub client: Option<Arc<AccountClient>>,
}

impl PluginContext {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_article(mut self, article: Article) -> Self {
        self.article = Some(article);
        self
    }

    pub fn with_client(mut self, client: Arc<AccountClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// The article, created empty if no plugin has produced one yet
    pub fn article_mut(&mut self) -> &mut Article {
        self.article.get_or_insert_with(Article::default)
    }

    pub fn client(&self) -> Result<&Arc<AccountClient>> {
        self.client
            .as_ref()
            .ok_or_else(|| PublishError::InvalidInput("no account bound to this publish".to_string()))
    }
}

/// Ordered plugin chain with unique names
#[derive(Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PluginPipeline {
    /// # Errors
    ///
    /// `ConfigError::InvalidPlugin` when two plugins share a name.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> std::result::Result<Self, ConfigError> {
        Self::check_names(&plugins)?;
        Ok(Self { plugins })
    }

    fn check_names(plugins: &[Arc<dyn Plugin>]) -> std::result::Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for plugin in plugins {
            if plugin.name().is_empty() {
                return Err(ConfigError::InvalidPlugin("plugin name cannot be empty".to_string()));
            }
            if !seen.insert(plugin.name()) {
                return Err(ConfigError::InvalidPlugin(format!(
                    "duplicate plugin name '{}'",
                    plugin.name()
                )));
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn run(&self, ctx: PluginContext) -> Result<PluginContext> {
        run(&self.plugins, ctx).await
    }
}

/// Run `plugins` in order over `ctx`, stopping at the first failure
pub async fn run(plugins: &[Arc<dyn Plugin>], mut ctx: PluginContext) -> Result<PluginContext> {
    for plugin in plugins {
        let name = plugin.name();
        tracing::debug!(plugin = %name, "Running plugin");

        ctx = plugin.execute(ctx).await.map_err(|e| {
            tracing::warn!(plugin = %name, error = %e, "Plugin failed");
            PublishError::plugin(name, e)
        })?;
    }
    Ok(ctx)
}
