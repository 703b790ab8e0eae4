//! Per-file classification cache.
//!
//! A previously stored type tag attached to the file itself (an extended
//! attribute such as `user.mime_type`) short-circuits classification. The
//! cache is read-only from here: misses and read errors look the same.

use std::path::Path;
use std::sync::Arc;

use mimesniff_config::DispatcherConfig;
use tracing::trace;

/// Source of cached type tags, probed before running the matchers.
pub trait TagCache: Send + Sync {
    /// Return the cached tag for `path`, if a non-empty one exists.
    fn lookup(&self, path: &Path) -> Option<String>;
}

/// Reads the tag from an extended attribute.
#[derive(Debug, Clone)]
pub struct XattrCache {
    attribute: String,
}

impl XattrCache {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }

    /// The attribute name probed on each file.
    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl TagCache for XattrCache {
    fn lookup(&self, path: &Path) -> Option<String> {
        match xattr::get(path, &self.attribute) {
            Ok(Some(raw)) => decode_tag(&raw),
            Ok(None) => None,
            Err(e) => {
                trace!(path = %path.display(), error = %e, "Tag cache read failed");
                None
            }
        }
    }
}

/// A cache that never has anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl TagCache for NoCache {
    fn lookup(&self, _path: &Path) -> Option<String> {
        None
    }
}

/// Build the cache described by the dispatcher config.
pub fn from_config(config: &DispatcherConfig) -> Arc<dyn TagCache> {
    if config.cache_attribute.is_empty() || !xattr::SUPPORTED_PLATFORM {
        Arc::new(NoCache)
    } else {
        Arc::new(XattrCache::new(config.cache_attribute.clone()))
    }
}

/// Attribute values are sometimes stored NUL-terminated.
fn decode_tag(raw: &[u8]) -> Option<String> {
    let tag = std::str::from_utf8(raw).ok()?;
    let tag = tag.trim_end_matches('\0').trim();
    (!tag.is_empty()).then(|| tag.to_string())
}
