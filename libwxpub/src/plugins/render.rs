//! Body rendering

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::image_refs;
use crate::error::{PublishError, Result};
use crate::pipeline::{Plugin, PluginContext};

pub const NAME: &str = "render";

/// Turns raw source text into the HTML body the platform stores
pub trait Renderer: Send + Sync {
    /// Short identifier recorded alongside the rendered article
    fn name(&self) -> &str;

    fn render(&self, source: &str) -> Result<String>;
}

/// Minimal renderer: headings, paragraphs and images
///
/// Blank lines separate paragraphs, single newlines become `<br/>`, `#`
/// headings map to `<h1>`..`<h6>` and `![alt](src)` becomes an `<img>`.
/// Everything else is HTML-escaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphRenderer;

impl ParagraphRenderer {
    fn render_inline(text: &str) -> String {
        let mut html = String::with_capacity(text.len());
        let mut cursor = 0;
        for image in image_refs(text) {
            html.push_str(&escape_html(&text[cursor..image.range.start]));
            html.push_str(&format!(
                r#"<img src="{}" alt="{}"/>"#,
                escape_html(&image.target),
                escape_html(&image.alt)
            ));
            cursor = image.range.end;
        }
        html.push_str(&escape_html(&text[cursor..]));
        html
    }

    fn render_block(block: &str) -> String {
        let level = block.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&level) && block[level..].starts_with(' ') && !block.contains('\n') {
            let text = Self::render_inline(block[level..].trim());
            return format!("<h{level}>{text}</h{level}>");
        }

        let lines = block
            .lines()
            .map(|line| Self::render_inline(line.trim_end()))
            .collect::<Vec<_>>();
        format!("<p>{}</p>", lines.join("<br/>"))
    }
}

impl Renderer for ParagraphRenderer {
    fn name(&self) -> &str {
        "paragraph"
    }

    fn render(&self, source: &str) -> Result<String> {
        let normalized = source.replace("\r\n", "\n");
        let blocks = normalized
            .split("\n\n")
            .map(str::trim)
            .filter(|block| !block.is_empty())
            .map(Self::render_block)
            .collect::<Vec<_>>();
        Ok(blocks.join("\n"))
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Replaces the article body with its rendered form
pub struct RenderPlugin {
    renderer: Arc<dyn Renderer>,
}

impl Default for RenderPlugin {
    fn default() -> Self {
        Self::new(Arc::new(ParagraphRenderer))
    }
}

impl RenderPlugin {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl Plugin for RenderPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, mut ctx: PluginContext) -> Result<PluginContext> {
        let article = ctx.article_mut();
        let rendered = self.renderer.render(&article.content)?;
        if rendered.trim().is_empty() {
            return Err(PublishError::InvalidInput(
                "rendered article body is empty".to_string(),
            ));
        }

        tracing::debug!(
            renderer = self.renderer.name(),
            length = rendered.chars().count(),
            "Rendered article body"
        );
        article.content = rendered;
        ctx.extensions
            .insert(NAME, "renderer", json!(self.renderer.name()));

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Article;

    #[test]
    fn test_paragraphs_and_line_breaks() {
        let html = ParagraphRenderer.render("one\ntwo\n\nthree").unwrap();
        assert_eq!(html, "<p>one<br/>two</p>\n<p>three</p>");
    }

    #[test]
    fn test_headings() {
        let html = ParagraphRenderer.render("## Section\n\nbody").unwrap();
        assert_eq!(html, "<h2>Section</h2>\n<p>body</p>");

        let html = ParagraphRenderer.render("#hashtag").unwrap();
        assert_eq!(html, "<p>#hashtag</p>");
    }

    #[test]
    fn test_images_become_img_tags() {
        let html = ParagraphRenderer
            .render("![a \"chart\"](https://cdn.example/c.png)")
            .unwrap();
        assert_eq!(
            html,
            r#"<p><img src="https://cdn.example/c.png" alt="a &quot;chart&quot;"/></p>"#
        );
    }

    #[test]
    fn test_images_on_several_lines() {
        let source = "![one](a.png) first\nplain line\n![two](b.png)\n\n### ![three](c.png)";
        let html = ParagraphRenderer.render(source).unwrap();
        assert_eq!(
            html,
            "<p><img src=\"a.png\" alt=\"one\"/> first<br/>plain line<br/><img src=\"b.png\" alt=\"two\"/></p>\n<h3><img src=\"c.png\" alt=\"three\"/></h3>"
        );
    }

    #[test]
    fn test_html_is_escaped() {
        let html = ParagraphRenderer.render("<script>alert('x')</script> & co").unwrap();
        assert_eq!(
            html,
            "<p>&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; co</p>"
        );
    }

    #[test]
    fn test_crlf_input() {
        let html = ParagraphRenderer.render("a\r\n\r\nb").unwrap();
        assert_eq!(html, "<p>a</p>\n<p>b</p>");
    }

    #[tokio::test]
    async fn test_plugin_replaces_body() {
        let ctx = PluginContext::new("post.md").with_article(Article {
            content: "hello".to_string(),
            ..Default::default()
        });
        let ctx = RenderPlugin::default().execute(ctx).await.unwrap();

        assert_eq!(ctx.article.unwrap().content, "<p>hello</p>");
        assert_eq!(
            ctx.extensions.get_as::<String>(NAME, "renderer").as_deref(),
            Some("paragraph")
        );
    }

    #[tokio::test]
    async fn test_plugin_rejects_empty_body() {
        let ctx = PluginContext::new("post.md").with_article(Article::default());
        let error = RenderPlugin::default().execute(ctx).await.unwrap_err();
        assert!(matches!(error, PublishError::InvalidInput(_)));
    }
}
