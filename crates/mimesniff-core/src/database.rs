//! Content-type database: filename rules plus content signatures.
//!
//! [`MimeDatabase`] owns a [`GlobIndex`] and a [`MagicRuleSet`] and decides
//! how to combine them. The filename is consulted first; the file is only
//! opened and sniffed when no filename rule applies or the winning rule is
//! flagged as ambiguous. Once magic has been consulted its answer is final,
//! even when that answer is "unknown".

use std::fs::File;
use std::path::Path;

use mimesniff_config::DatabaseConfig;
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::glob::{GlobIndex, GlobMatch};
use crate::magic::MagicRuleSet;
use crate::paths::{self, DatabaseKind};

/// Loaded rule databases. Read-only once loading is done.
#[derive(Debug, Default)]
pub struct MimeDatabase {
    globs: GlobIndex,
    magic: MagicRuleSet,
}

impl MimeDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a database from configuration: explicit files first, then the
    /// files discovered under the XDG data directories.
    pub fn from_config(config: &DatabaseConfig) -> Self {
        let mut db = Self::new();

        let mut glob_files = config.glob_files.clone();
        let mut magic_files = config.magic_files.clone();
        if config.use_xdg_dirs {
            glob_files.extend(paths::xdg_database_files(DatabaseKind::Globs));
            magic_files.extend(paths::xdg_database_files(DatabaseKind::Magic));
        }

        for path in &glob_files {
            db.load_glob_rules(path);
        }
        for path in &magic_files {
            db.load_magic_rules(path);
        }

        info!(
            glob_rules = db.globs.len(),
            magic_sections = db.magic.len(),
            "MIME database ready"
        );
        db
    }

    /// Add a glob database. Returns whether any rule was added.
    pub fn load_glob_rules(&mut self, path: &Path) -> bool {
        match self.globs.add_file(path) {
            Ok(added) => added > 0,
            Err(e) => {
                warn!(error = %e, "Failed to load glob database");
                false
            }
        }
    }

    /// Add a magic database. Returns whether any section was added.
    ///
    /// A malformed file still contributes the sections before the fault.
    pub fn load_magic_rules(&mut self, path: &Path) -> bool {
        match self.magic.add_file(path) {
            Ok(added) => added > 0,
            Err(e) => {
                warn!(error = %e, "Failed to load magic database");
                matches!(e, LoadError::Malformed { .. }) && e.sections_loaded() > 0
            }
        }
    }

    /// Filename rules.
    pub fn globs(&self) -> &GlobIndex {
        &self.globs
    }

    /// Content signature rules.
    pub fn magic(&self) -> &MagicRuleSet {
        &self.magic
    }

    /// Mutable access to the filename rules, for building databases in code.
    pub fn globs_mut(&mut self) -> &mut GlobIndex {
        &mut self.globs
    }

    /// Mutable access to the signature rules, for building databases in code.
    pub fn magic_mut(&mut self) -> &mut MagicRuleSet {
        &mut self.magic
    }

    /// Filename verdict for the last component of `name`.
    pub fn lookup_glob(&self, name: &str) -> Option<GlobMatch<'_>> {
        let base = Path::new(name).file_name()?.to_str()?;
        self.globs.lookup(base)
    }

    /// Content verdict for an open reader.
    pub fn lookup_magic<R: std::io::Read>(&self, reader: R) -> Option<&str> {
        self.magic.lookup(reader)
    }

    /// Determine the type of the file at `path`.
    ///
    /// Returns `None` when nothing matched or the file could not be read.
    pub fn classify(&self, path: &Path) -> Option<String> {
        let name = path.file_name().map(|n| n.to_string_lossy());
        if let Some(found) = name.as_deref().and_then(|n| self.globs.lookup(n))
            && !found.needs_magic
        {
            return Some(found.mime_type.to_string());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot open file for magic detection");
                return None;
            }
        };
        let found = self.magic.lookup(file).map(str::to_string);
        debug!(path = %path.display(), mime_type = ?found, "Classified by content");
        found
    }

    /// Same arbitration as [`classify`](Self::classify) for content held in
    /// memory, with an optional filename.
    pub fn classify_data(&self, name: Option<&str>, data: &[u8]) -> Option<String> {
        if let Some(found) = name.and_then(|n| self.lookup_glob(n))
            && !found.needs_magic
        {
            return Some(found.mime_type.to_string());
        }
        self.magic.lookup_bytes(data).map(str::to_string)
    }

    /// Release every loaded rule. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.globs.clear();
        self.magic.clear();
    }

    /// Nothing loaded?
    pub fn is_empty(&self) -> bool {
        self.globs.is_empty() && self.magic.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimesniff_test_utils::fixtures::{MagicDbBuilder, MagicRuleSpec};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn database(globs: &str, magic: &MagicDbBuilder) -> MimeDatabase {
        let mut db = MimeDatabase::new();
        db.globs_mut().parse_str(globs);
        db.magic_mut().parse_bytes(&magic.build(), "test").unwrap();
        db
    }

    fn png_magic() -> MagicDbBuilder {
        MagicDbBuilder::new().section(50, "image/png", [MagicRuleSpec::new(0, b"\x89PNG")])
    }

    #[test]
    fn test_glob_answer_skips_file() {
        let db = database("50:text/plain:*.txt\n", &png_magic());
        // The file does not exist; a confident glob never opens it.
        assert_eq!(
            db.classify(Path::new("/nonexistent/notes.txt")).as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn test_unknown_name_falls_back_to_magic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("picture");
        std::fs::write(&path, b"\x89PNG\r\n").unwrap();

        let db = database("50:text/plain:*.txt\n", &png_magic());
        assert_eq!(db.classify(&path).as_deref(), Some("image/png"));
    }

    #[test]
    fn test_ambiguous_glob_defers_to_magic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clip.ogg");
        std::fs::write(&path, b"OggS\0\x02").unwrap();

        let magic = MagicDbBuilder::new()
            .section(60, "video/ogg", [MagicRuleSpec::new(0, b"OggS")]);
        let db = database("50:audio/ogg:*.ogg\n50:video/ogg:*.ogg\n", &magic);
        assert_eq!(db.classify(&path).as_deref(), Some("video/ogg"));
    }

    #[test]
    fn test_magic_miss_is_final() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clip.ogg");
        std::fs::write(&path, b"garbage").unwrap();

        let db = database("50:audio/ogg:*.ogg\n50:video/ogg:*.ogg\n", &png_magic());
        assert_eq!(db.classify(&path), None);
    }

    #[test]
    fn test_unreadable_file_is_none() {
        let db = database("50:audio/ogg:*.ogg\n50:video/ogg:*.ogg\n", &png_magic());
        assert_eq!(db.classify(Path::new("/nonexistent/clip.ogg")), None);
    }

    #[test]
    fn test_classify_data() {
        let db = database("50:text/plain:*.txt\n", &png_magic());
        assert_eq!(
            db.classify_data(Some("dir/a.txt"), b"\x89PNG").as_deref(),
            Some("text/plain")
        );
        assert_eq!(db.classify_data(None, b"\x89PNG").as_deref(), Some("image/png"));
        assert_eq!(db.classify_data(Some("blob"), b"zzz"), None);
    }

    #[test]
    fn test_lookup_glob_uses_basename() {
        let db = database("50:text/x-readme:README\n", &MagicDbBuilder::new());
        let found = db.lookup_glob("/usr/share/doc/README").unwrap();
        assert_eq!(found.mime_type, "text/x-readme");
        assert!(db.lookup_glob("/").is_none());
    }

    #[test]
    fn test_load_reports_success() {
        let tmp = TempDir::new().unwrap();
        let globs = tmp.path().join("globs2");
        let magic = tmp.path().join("magic");
        std::fs::write(&globs, "50:text/plain:*.txt\n").unwrap();
        png_magic().write_to(&magic).unwrap();

        let mut db = MimeDatabase::new();
        assert!(db.load_glob_rules(&globs));
        assert!(db.load_magic_rules(&magic));
        assert!(!db.load_glob_rules(&tmp.path().join("missing")));
        assert!(!db.load_magic_rules(&globs));
        assert_eq!(db.globs().len(), 1);
        assert_eq!(db.magic().len(), 1);
    }

    #[test]
    fn test_partial_magic_load_counts() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("magic");
        let mut bytes = png_magic().build();
        bytes.extend(b"[40:application/x-broken]\n>0");
        std::fs::write(&path, bytes).unwrap();

        let mut db = MimeDatabase::new();
        assert!(db.load_magic_rules(&path));
        assert_eq!(db.magic().len(), 1);
    }

    #[test]
    fn test_from_config_loads_explicit_files() {
        let tmp = TempDir::new().unwrap();
        let globs = tmp.path().join("globs2");
        let magic = tmp.path().join("magic");
        std::fs::write(&globs, "50:text/plain:*.txt\n").unwrap();
        png_magic().write_to(&magic).unwrap();

        let config = DatabaseConfig {
            glob_files: vec![globs],
            magic_files: vec![magic, tmp.path().join("missing")],
            use_xdg_dirs: false,
        };
        let db = MimeDatabase::from_config(&config);
        assert_eq!(db.globs().len(), 1);
        assert_eq!(db.magic().len(), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut db = database("50:text/plain:*.txt\n", &png_magic());
        assert!(!db.is_empty());
        db.shutdown();
        db.shutdown();
        assert!(db.is_empty());
        assert_eq!(db.classify(Path::new("/nonexistent/a.txt")), None);
    }
}
