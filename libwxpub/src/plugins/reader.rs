//! Source file reader

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{FileError, PublishError, Result};
use crate::pipeline::{Plugin, PluginContext};

pub const NAME: &str = "source-reader";
pub(crate) const NAMESPACE: &str = NAME;
pub(crate) const BASE_DIR_KEY: &str = "base_dir";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Markdown,
    Text,
}

impl SourceFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("md") | Some("markdown") => Some(Self::Markdown),
            Some("txt") => Some(Self::Text),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }
}

/// Loads the article source named by `ctx.input`
///
/// Sets the raw body and a title taken from a leading `# ` heading, from the
/// first line of a text file, or from the file stem. A title supplied by the
/// caller is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceReaderPlugin;

fn split_title(source: &str, format: SourceFormat, path: &Path) -> (String, String) {
    let source = source.trim_start_matches(['\n', '\r']);
    let (first, rest) = source.split_once('\n').unwrap_or((source, ""));
    let first = first.trim();

    if let Some(heading) = first.strip_prefix("# ") {
        return (heading.trim().to_string(), rest.trim().to_string());
    }

    match format {
        SourceFormat::Text => (first.to_string(), rest.trim().to_string()),
        SourceFormat::Markdown => {
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            (stem, source.trim().to_string())
        }
    }
}

#[async_trait]
impl Plugin for SourceReaderPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, mut ctx: PluginContext) -> Result<PluginContext> {
        let path = Path::new(&ctx.input).to_path_buf();

        let format = SourceFormat::from_path(&path).ok_or_else(|| FileError::Unsupported {
            path: path.clone(),
            reason: "expected a .md, .markdown or .txt file".to_string(),
        })?;

        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FileError::from_io(&path, e))?;

        if source.trim().is_empty() {
            return Err(PublishError::InvalidInput(format!(
                "{} is empty",
                path.display()
            )));
        }

        let (title, body) = split_title(&source, format, &path);
        tracing::info!(
            file = %path.display(),
            format = format.as_str(),
            title = %title,
            length = body.chars().count(),
            "Read article source"
        );

        let article = ctx.article_mut();
        if article.title.trim().is_empty() {
            article.title = title;
        }
        article.content = body;

        if let Some(parent) = path.parent() {
            ctx.extensions
                .insert(NAMESPACE, BASE_DIR_KEY, json!(parent.to_string_lossy()));
        }
        ctx.extensions
            .insert(NAMESPACE, "format", json!(format.as_str()));

        Ok(ctx)
    }
}
