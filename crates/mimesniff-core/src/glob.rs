//! Filename pattern index.
//!
//! Rules come from `globs2`-style databases, one `weight:mime-type:pattern`
//! entry per line. Each pattern is filed into one of three buckets:
//!
//! - **literal**: no wildcard at all (`README`, `Makefile`), looked up by exact name
//! - **simple**: `*.<suffix>` with a wildcard-free suffix, looked up by suffix
//! - **fancy**: anything else, tested one by one with shell-glob semantics
//!
//! When two rules for different types claim the same pattern the stored rule
//! is flagged `needs_magic`, so the content sniffer gets the final say.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

use crate::error::LoadError;

const WILDCARDS: [char; 3] = ['*', '?', '['];

const FANCY_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Which bucket a pattern is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobKind {
    Literal,
    Simple,
    Fancy,
}

impl GlobKind {
    /// Classify a pattern string.
    pub fn of(pattern: &str) -> Self {
        if let Some(suffix) = pattern.strip_prefix("*.")
            && !suffix.contains(WILDCARDS)
        {
            GlobKind::Simple
        } else if !pattern.contains(WILDCARDS) {
            GlobKind::Literal
        } else {
            GlobKind::Fancy
        }
    }
}

/// A single filename rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobRule {
    pub pattern: String,
    pub weight: u32,
    pub mime_type: String,
    /// Set when another rule claims the same pattern for a different type.
    pub needs_magic: bool,
}

#[derive(Debug)]
struct FancyGlob {
    rule: GlobRule,
    matcher: Pattern,
}

/// The verdict of a filename lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobMatch<'a> {
    pub mime_type: &'a str,
    pub weight: u32,
    pub needs_magic: bool,
}

impl<'a> From<&'a GlobRule> for GlobMatch<'a> {
    fn from(rule: &'a GlobRule) -> Self {
        Self {
            mime_type: &rule.mime_type,
            weight: rule.weight,
            needs_magic: rule.needs_magic,
        }
    }
}

/// In-memory index of filename rules, built once and read-only afterwards.
#[derive(Debug, Default)]
pub struct GlobIndex {
    literals: HashMap<String, GlobRule>,
    /// Keyed by the suffix without the leading `*.`.
    simple: HashMap<String, GlobRule>,
    fancy: Vec<FancyGlob>,
    max_fancy_weight: Option<u32>,
}

impl GlobIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a glob database file.
    ///
    /// Returns the number of rules added. Entries already present are never
    /// overwritten by later files.
    pub fn add_file(&mut self, path: &Path) -> Result<usize, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let added = self.parse_str(&String::from_utf8_lossy(&bytes));
        debug!(path = %path.display(), added, "Loaded glob database");
        Ok(added)
    }

    /// Parse glob database text, returning the number of rules added.
    ///
    /// Comment lines, lines that do not start with a digit and lines with a
    /// missing field are skipped.
    pub fn parse_str(&mut self, content: &str) -> usize {
        let mut added = 0;

        for line in content.lines() {
            if !line.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }

            // weight:mime:pattern[:flags...]
            let mut fields = line.splitn(4, ':');
            let (Some(weight), Some(mime_type), Some(pattern)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let pattern = pattern.trim_end_matches('\r');
            if mime_type.is_empty() || pattern.is_empty() {
                continue;
            }
            let Ok(weight) = weight.parse::<u32>() else {
                debug!(line, "Skipping glob rule with unparsable weight");
                continue;
            };

            if self.insert(GlobRule {
                pattern: pattern.to_string(),
                weight,
                mime_type: mime_type.to_string(),
                needs_magic: false,
            }) {
                added += 1;
            }
        }

        added
    }

    /// Insert a rule, returning whether it was stored.
    ///
    /// A duplicate with the same type is ignored. A rule that collides with an
    /// existing pattern of a different type is not stored either, but flags the
    /// existing rule as needing magic confirmation.
    pub fn insert(&mut self, rule: GlobRule) -> bool {
        match GlobKind::of(&rule.pattern) {
            GlobKind::Literal => insert_keyed(&mut self.literals, rule.pattern.clone(), rule),
            GlobKind::Simple => {
                let suffix = rule.pattern[2..].to_string();
                insert_keyed(&mut self.simple, suffix, rule)
            }
            GlobKind::Fancy => self.insert_fancy(rule),
        }
    }

    fn insert_fancy(&mut self, rule: GlobRule) -> bool {
        if let Some(existing) = self
            .fancy
            .iter_mut()
            .find(|f| f.rule.pattern == rule.pattern)
        {
            if existing.rule.mime_type != rule.mime_type {
                existing.rule.needs_magic = true;
            }
            return false;
        }

        let matcher = match Pattern::new(&rule.pattern) {
            Ok(m) => m,
            Err(e) => {
                warn!(pattern = %rule.pattern, error = %e, "Skipping invalid glob pattern");
                return false;
            }
        };

        let weight = rule.weight;
        self.max_fancy_weight = Some(self.max_fancy_weight.map_or(weight, |w| w.max(weight)));
        self.fancy.push(FancyGlob { rule, matcher });
        true
    }

    /// Find the best rule for a bare filename (no directory components).
    ///
    /// Tries the name as given first, then once more ASCII-lowercased.
    pub fn lookup(&self, filename: &str) -> Option<GlobMatch<'_>> {
        if let Some(found) = self.lookup_case_sensitive(filename) {
            return Some(found);
        }
        let folded = filename.to_ascii_lowercase();
        if folded == filename {
            return None;
        }
        self.lookup_case_sensitive(&folded)
    }

    fn lookup_case_sensitive(&self, filename: &str) -> Option<GlobMatch<'_>> {
        // Literal hits are final, whatever the weights elsewhere say.
        if let Some(rule) = self.literals.get(filename) {
            return Some(rule.into());
        }

        let mut candidates: Vec<&GlobRule> = Vec::new();

        // Anchored at the first dot so `.tar.gz` beats `.gz`.
        let simple_hit = filename
            .match_indices('.')
            .map(|(i, _)| &filename[i + 1..])
            .filter(|suffix| !suffix.is_empty())
            .find_map(|suffix| self.simple.get(suffix));
        if let Some(rule) = simple_hit {
            candidates.push(rule);
        }

        let fancy_can_win = match (simple_hit, self.max_fancy_weight) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(rule), Some(max)) => rule.weight <= max,
        };
        if fancy_can_win {
            candidates.extend(
                self.fancy
                    .iter()
                    .filter(|f| f.matcher.matches_with(filename, FANCY_MATCH))
                    .map(|f| &f.rule),
            );
        }

        // Stable: on equal weight the earlier candidate wins.
        candidates.sort_by(|a, b| b.weight.cmp(&a.weight));
        candidates.first().map(|rule| GlobMatch::from(*rule))
    }

    /// Look up a literal rule by its exact pattern.
    pub fn literal(&self, name: &str) -> Option<&GlobRule> {
        self.literals.get(name)
    }

    /// Look up a simple rule by suffix (without the leading `*.`).
    pub fn simple(&self, suffix: &str) -> Option<&GlobRule> {
        self.simple.get(suffix)
    }

    /// Fancy rules in insertion order.
    pub fn fancy(&self) -> impl Iterator<Item = &GlobRule> {
        self.fancy.iter().map(|f| &f.rule)
    }

    /// Highest weight among the fancy rules, if there are any.
    pub fn max_fancy_weight(&self) -> Option<u32> {
        self.max_fancy_weight
    }

    /// Total number of stored rules.
    pub fn len(&self) -> usize {
        self.literals.len() + self.simple.len() + self.fancy.len()
    }

    /// Is the index empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every rule.
    pub fn clear(&mut self) {
        self.literals.clear();
        self.simple.clear();
        self.fancy.clear();
        self.max_fancy_weight = None;
    }
}

fn insert_keyed(map: &mut HashMap<String, GlobRule>, key: String, rule: GlobRule) -> bool {
    match map.entry(key) {
        Entry::Occupied(mut existing) => {
            if existing.get().mime_type != rule.mime_type {
                existing.get_mut().needs_magic = true;
            }
            false
        }
        Entry::Vacant(slot) => {
            slot.insert(rule);
            true
        }
    }
}
