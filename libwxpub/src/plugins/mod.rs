//! Built-in plugins
//!
//! The default chain reads the source file, uploads inline images, renders the
//! body and finally uploads the cover:
//!
//! ```text
//! source-reader -> inline-images -> render -> cover-upload
//! ```

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::pipeline::{Extensions, Plugin};

pub mod cover;
pub mod images;
pub mod reader;
pub mod render;

pub use cover::CoverUploadPlugin;
pub use images::{ImagePreparer, InlineImagePlugin, LimitCheckingPreparer};
pub use reader::SourceReaderPlugin;
pub use render::{ParagraphRenderer, RenderPlugin, Renderer};

static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").expect("image reference pattern is valid")
});

/// The standard publishing chain
pub fn default_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(SourceReaderPlugin),
        Arc::new(InlineImagePlugin::default()),
        Arc::new(RenderPlugin::default()),
        Arc::new(CoverUploadPlugin::default()),
    ]
}

/// A `![alt](target)` reference in source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Byte range of the whole reference
    pub range: Range<usize>,
    pub alt: String,
    pub target: String,
}

impl ImageRef {
    pub fn is_remote(&self) -> bool {
        self.target.starts_with("http://") || self.target.starts_with("https://")
    }
}

/// All image references in `text`, in order
pub fn image_refs(text: &str) -> Vec<ImageRef> {
    IMAGE_REF
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(ImageRef {
                range: whole.range(),
                alt: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                target: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Resolve a path from the source document against the document's directory
pub(crate) fn resolve_relative(extensions: &Extensions, target: &str) -> PathBuf {
    let path = Path::new(target);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match extensions.get_as::<PathBuf>(reader::NAMESPACE, reader::BASE_DIR_KEY) {
        Some(base) => base.join(path),
        None => path.to_path_buf(),
    }
}
