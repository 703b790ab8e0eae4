//! Content signature ("magic") database.
//!
//! The on-disk format is the freedesktop binary magic file: a fixed signature
//! followed by sections. Each section starts with a `[priority:mime-type]`
//! header line and holds rule lines of the form
//!
//! ```text
//! [indent]>offset=<u16 BE length><value>[&<mask>][~word-size][+range-length]\n
//! ```
//!
//! The indent levels encode a tree: a rule followed by rules one level deeper
//! only matches if its own bytes match *and* at least one of those children
//! matches. The tree is built once at load time into an arena of
//! [`MagicRule`] nodes addressed by index.
//!
//! ## Matching
//!
//! ```text
//! file ──read up to max(read_size)──▶ buffer (missing bytes read as 0)
//!                                  │
//!        sections (descending priority)
//!                                  │
//!        any root ── base bytes ── any child ── ...
//! ```

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::LoadError;

/// Leading bytes of every magic database.
pub const MAGIC_SIGNATURE: &[u8] = b"MIME-Magic\0\n";

/// Furthest byte position a rule may reach into a file.
pub const MAX_RULE_EXTENT: usize = 1 << 20;

/// One node of a section's refinement tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicRule {
    pub indent: usize,
    pub start_offset: usize,
    pub value: Vec<u8>,
    /// Same length as `value` when present.
    pub mask: Option<Vec<u8>>,
    /// 1, 2 or 4.
    pub word_size: usize,
    /// Number of consecutive offsets, starting at `start_offset`, to try.
    pub range_length: usize,
    /// Indices of the refinement children (indent + 1) in the section arena.
    pub children: Vec<usize>,
}

impl MagicRule {
    /// Highest byte position (exclusive) this rule may inspect.
    fn extent(&self) -> Option<usize> {
        self.start_offset
            .checked_add(self.value.len())?
            .checked_add(self.range_length)
    }

    /// Test the rule's own bytes, ignoring children.
    ///
    /// Succeeds if the value matches at any offset of the window. Bytes past
    /// the end of `data` read as 0.
    pub fn base_matches(&self, data: &[u8]) -> bool {
        let len = self.value.len();
        let end = self.start_offset.saturating_add(self.range_length);
        for offset in self.start_offset..end {
            if offset >= data.len() {
                // This window and every later one is all padding.
                return self.compare(&vec![0; len]);
            }
            let matched = match data.get(offset..offset + len) {
                Some(window) => self.compare(window),
                None => {
                    let mut window = data[offset..].to_vec();
                    window.resize(len, 0);
                    self.compare(&window)
                }
            };
            if matched {
                return true;
            }
        }
        false
    }

    fn compare(&self, window: &[u8]) -> bool {
        let size = self.word_size;
        let mut words = window.chunks(size).zip(self.value.chunks(size));
        match &self.mask {
            None => words.all(|(file, value)| read_be_word(file) == read_be_word(value)),
            Some(mask) => words.zip(mask.chunks(size)).all(|((file, value), mask)| {
                let mask = read_be_word(mask);
                read_be_word(file) & mask == read_be_word(value) & mask
            }),
        }
    }
}

/// Decode a big-endian word of up to four bytes.
fn read_be_word(bytes: &[u8]) -> u32 {
    match *bytes {
        [a, b, c, d] => u32::from_be_bytes([a, b, c, d]),
        [a, b] => u32::from(u16::from_be_bytes([a, b])),
        _ => bytes.iter().fold(0, |acc, &b| (acc << 8) | u32::from(b)),
    }
}

/// All rules for one MIME type at one priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicSection {
    pub mime_type: String,
    pub priority: u32,
    /// Bytes from the start of the file needed to evaluate every rule.
    pub read_size: usize,
    nodes: Vec<MagicRule>,
    roots: Vec<usize>,
}

impl MagicSection {
    fn new(priority: u32, mime_type: String) -> Self {
        Self {
            mime_type,
            priority,
            read_size: 0,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Rules in file order.
    pub fn rules(&self) -> &[MagicRule] {
        &self.nodes
    }

    /// Indices of the indent-0 rules.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Evaluate the section against the leading bytes of a file.
    ///
    /// `data` shorter than `read_size` is treated as zero-padded.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.roots.iter().any(|&root| self.match_rule(data, root))
    }

    /// Rewind `file`, read `read_size` bytes and evaluate the section.
    pub fn match_file<R: Read + Seek>(&self, file: &mut R) -> std::io::Result<bool> {
        file.seek(SeekFrom::Start(0))?;
        let data = read_prefix(file, self.read_size)?;
        Ok(self.matches(&data))
    }

    fn match_rule(&self, data: &[u8], index: usize) -> bool {
        let Some(rule) = self.nodes.get(index) else {
            return false;
        };
        rule.base_matches(data)
            && (rule.children.is_empty()
                || rule.children.iter().any(|&child| self.match_rule(data, child)))
    }

    fn push_rule(&mut self, rule: MagicRule, path: &mut Vec<usize>) -> Result<(), String> {
        if rule.indent > path.len() {
            return Err(format!(
                "rule indent {} skips a level (parent depth {})",
                rule.indent,
                path.len()
            ));
        }
        let extent = rule
            .extent()
            .filter(|&extent| extent <= MAX_RULE_EXTENT)
            .ok_or_else(|| format!("rule reaches past byte {MAX_RULE_EXTENT}"))?;

        let index = self.nodes.len();
        path.truncate(rule.indent);
        match path.last() {
            Some(&parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        path.push(index);

        self.read_size = self.read_size.max(extent);
        self.nodes.push(rule);
        Ok(())
    }
}

/// Read up to `len` bytes from the current position, stopping early at EOF.
fn read_prefix<R: Read>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.take(len as u64).read_to_end(&mut data)?;
    Ok(data)
}

/// Ordered collection of magic sections, highest priority first.
#[derive(Debug, Default)]
pub struct MagicRuleSet {
    sections: Vec<MagicSection>,
    max_read_size: usize,
}

impl MagicRuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load sections from a magic database file.
    ///
    /// On a malformed section the rest of the file is skipped, but every
    /// section read before it is kept and the error reports how many.
    pub fn add_file(&mut self, path: &Path) -> Result<usize, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let added = self.parse_bytes(&bytes, &path.display().to_string())?;
        debug!(path = %path.display(), added, "Loaded magic database");
        Ok(added)
    }

    /// Parse a magic database held in memory. `origin` names it in errors.
    pub fn parse_bytes(&mut self, bytes: &[u8], origin: &str) -> Result<usize, LoadError> {
        let Some(body) = bytes.strip_prefix(MAGIC_SIGNATURE) else {
            return Err(LoadError::BadSignature {
                origin: origin.to_string(),
            });
        };

        let mut parser = Parser::new(body);
        let mut parsed = Vec::new();
        let outcome = parser.sections(&mut parsed);

        let added = parsed.len();
        self.sections.extend(parsed);
        self.sections.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.max_read_size = self
            .sections
            .iter()
            .map(|s| s.read_size)
            .max()
            .unwrap_or(0);

        outcome.map(|()| added).map_err(|failure| LoadError::Malformed {
            origin: origin.to_string(),
            section: failure.section,
            reason: failure.reason,
            sections_loaded: added,
        })
    }

    /// Sections in evaluation order.
    pub fn sections(&self) -> &[MagicSection] {
        &self.sections
    }

    /// Bytes needed from a file to evaluate every section.
    pub fn max_read_size(&self) -> usize {
        self.max_read_size
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Is the rule set empty?
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Drop every section.
    pub fn clear(&mut self) {
        self.sections.clear();
        self.max_read_size = 0;
    }

    /// Classify the leading bytes of some content.
    ///
    /// Returns the type of the first matching section in descending priority.
    pub fn lookup_bytes(&self, data: &[u8]) -> Option<&str> {
        self.sections
            .iter()
            .find(|section| section.matches(data))
            .map(|section| section.mime_type.as_str())
    }

    /// Classify an open file from its current position.
    ///
    /// A read error is logged and treated as "no match".
    pub fn lookup<R: Read>(&self, mut reader: R) -> Option<&str> {
        if self.sections.is_empty() {
            return None;
        }
        match read_prefix(&mut reader, self.max_read_size) {
            Ok(data) => self.lookup_bytes(&data),
            Err(e) => {
                warn!(error = %e, "Failed to read content for magic detection");
                None
            }
        }
    }
}

struct ParseFailure {
    section: Option<String>,
    reason: String,
}

/// Byte cursor over the body of a magic database (after the signature).
struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let data = self.data;
        let bytes = data.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(bytes)
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn number(&mut self) -> Option<usize> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    /// Consume through the next `\n` (or to the end), returning the line.
    fn line(&mut self) -> &'a [u8] {
        let data = self.data;
        let rest = &data[self.pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(end) => {
                self.pos += end + 1;
                &rest[..end]
            }
            None => {
                self.pos = self.data.len();
                rest
            }
        }
    }

    fn sections(&mut self, out: &mut Vec<MagicSection>) -> Result<(), ParseFailure> {
        while !self.at_end() {
            let mut section = self.header().map_err(|reason| ParseFailure {
                section: None,
                reason,
            })?;

            let mut path = Vec::new();
            while !self.at_end() && self.peek() != Some(b'[') {
                let pushed = self
                    .rule()
                    .and_then(|rule| section.push_rule(rule, &mut path));
                if let Err(reason) = pushed {
                    return Err(ParseFailure {
                        section: Some(section.mime_type),
                        reason,
                    });
                }
            }

            out.push(section);
        }
        Ok(())
    }

    fn header(&mut self) -> Result<MagicSection, String> {
        let line = self.line();
        let inner = line
            .strip_prefix(b"[")
            .and_then(|l| l.strip_suffix(b"]"))
            .ok_or_else(|| "expected a [priority:mime-type] header".to_string())?;
        let inner = std::str::from_utf8(inner).map_err(|_| "header is not UTF-8".to_string())?;
        let (priority, mime_type) = inner
            .split_once(':')
            .ok_or_else(|| format!("header {inner:?} has no ':'"))?;
        let priority = priority
            .parse()
            .map_err(|_| format!("bad priority {priority:?}"))?;
        if mime_type.is_empty() {
            return Err("header has an empty mime type".to_string());
        }
        Ok(MagicSection::new(priority, mime_type.to_string()))
    }

    fn rule(&mut self) -> Result<MagicRule, String> {
        let indent = if self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.number().ok_or("bad indent")?
        } else {
            0
        };
        if !self.eat(b'>') {
            return Err("missing '>'".to_string());
        }
        let start_offset = self.number().ok_or("missing start offset")?;
        if !self.eat(b'=') {
            return Err("missing '='".to_string());
        }

        let len = self.take(2).ok_or("truncated value length")?;
        let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
        let value = self.take(len).ok_or("truncated value")?.to_vec();

        let mask = if self.eat(b'&') {
            Some(self.take(len).ok_or("truncated mask")?.to_vec())
        } else {
            None
        };

        let word_size = if self.eat(b'~') {
            match self.number().ok_or("missing word size")? {
                0 | 1 => 1,
                n @ (2 | 4) => n,
                n => return Err(format!("unsupported word size {n}")),
            }
        } else {
            1
        };

        let range_length = if self.eat(b'+') {
            self.number().ok_or("missing range length")?.max(1)
        } else {
            1
        };

        // Unknown extension fields run to the end of the line.
        self.line();

        Ok(MagicRule {
            indent,
            start_offset,
            value,
            mask,
            word_size,
            range_length,
            children: Vec::new(),
        })
    }
}
