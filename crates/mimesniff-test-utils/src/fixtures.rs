//! Rule database fixtures.
//!
//! [`MagicDbBuilder`] encodes magic databases in the on-disk binary format so
//! tests never carry opaque byte blobs. [`write_globs`] drops a glob database
//! into a directory. [`MemoryCache`] is an in-memory [`TagCache`].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use mimesniff_core::cache::TagCache;
use mimesniff_core::magic::MAGIC_SIGNATURE;

/// One rule line of a magic section.
#[derive(Debug, Clone)]
pub struct MagicRuleSpec {
    indent: usize,
    offset: usize,
    value: Vec<u8>,
    mask: Option<Vec<u8>>,
    word_size: Option<usize>,
    range: Option<usize>,
}

impl MagicRuleSpec {
    /// Match `value` at `offset`.
    pub fn new(offset: usize, value: &[u8]) -> Self {
        Self {
            indent: 0,
            offset,
            value: value.to_vec(),
            mask: None,
            word_size: None,
            range: None,
        }
    }

    /// Nest this rule under the previous rule of `indent - 1`.
    pub fn indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    /// AND mask; must be as long as the value.
    pub fn mask(mut self, mask: &[u8]) -> Self {
        self.mask = Some(mask.to_vec());
        self
    }

    pub fn word_size(mut self, size: usize) -> Self {
        self.word_size = Some(size);
        self
    }

    /// Try every start offset in `offset..offset + len`.
    pub fn range(mut self, len: usize) -> Self {
        self.range = Some(len);
        self
    }

    fn encode(&self, out: &mut Vec<u8>) {
        if self.indent > 0 {
            out.extend(self.indent.to_string().bytes());
        }
        out.extend(format!(">{}=", self.offset).bytes());
        let len = u16::try_from(self.value.len()).unwrap_or(u16::MAX);
        out.extend(len.to_be_bytes());
        out.extend(&self.value);
        if let Some(mask) = &self.mask {
            out.push(b'&');
            out.extend(mask);
        }
        if let Some(size) = self.word_size {
            out.extend(format!("~{size}").bytes());
        }
        if let Some(range) = self.range {
            out.extend(format!("+{range}").bytes());
        }
        out.push(b'\n');
    }
}

/// Builds a binary magic database.
///
/// ```ignore
/// let bytes = MagicDbBuilder::new()
///     .section(50, "image/png", [MagicRuleSpec::new(0, b"\x89PNG")])
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MagicDbBuilder {
    body: Vec<u8>,
}

impl MagicDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `[priority:mime_type]` section with its rules.
    pub fn section(
        mut self,
        priority: u32,
        mime_type: &str,
        rules: impl IntoIterator<Item = MagicRuleSpec>,
    ) -> Self {
        self.body
            .extend(format!("[{priority}:{mime_type}]\n").bytes());
        for rule in rules {
            rule.encode(&mut self.body);
        }
        self
    }

    /// Signature followed by every section, in insertion order.
    pub fn build(&self) -> Vec<u8> {
        let mut out = MAGIC_SIGNATURE.to_vec();
        out.extend(&self.body);
        out
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.build())
    }
}

/// Write a `globs2` file into `dir` and return its path.
pub fn write_globs(dir: &Path, content: &str) -> io::Result<PathBuf> {
    let path = dir.join("globs2");
    std::fs::write(&path, content)?;
    Ok(path)
}

/// In-memory [`TagCache`] keyed by path.
#[derive(Debug, Default)]
pub struct MemoryCache {
    tags: Mutex<HashMap<PathBuf, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(self, path: impl Into<PathBuf>, mime_type: &str) -> Self {
        self.insert(path, mime_type);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, mime_type: &str) {
        if let Ok(mut tags) = self.tags.lock() {
            tags.insert(path.into(), mime_type.to_string());
        }
    }
}

impl TagCache for MemoryCache {
    fn lookup(&self, path: &Path) -> Option<String> {
        self.tags.lock().ok()?.get(path).cloned()
    }
}
