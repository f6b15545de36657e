//! Tag URIs and tag patterns.
//!
//! A tag URI names the semantic type of a tree node, for example
//! `asdf://example.com/tags/point-1.0.0` or `tag:example.org:geo/point-1.2.0`.
//! Tag URIs are opaque strings: two tags are equal iff they are
//! string-identical and they sort lexically.
//!
//! Converters declare tag *patterns* which select the concrete tags of an
//! extension they are able to handle. Patterns may contain wildcards:
//!
//! - `*` matches any run of characters other than `/`
//! - `**` matches any run of characters, `/` included
//!
//! So `asdf://example.com/tags/point-1.*` matches every `1.x.y` version of
//! `point`, and `asdf://example.com/tags/*-1.0.0` matches every tag of that
//! namespace at version `1.0.0`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing tag URIs and tag patterns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag URI must not be empty")]
    Empty,

    #[error("tag URI '{0}' contains whitespace or control characters")]
    InvalidCharacter(String),

    #[error("malformed tag pattern '{pattern}': {reason}")]
    MalformedPattern {
        pattern: String,
        reason: &'static str,
    },
}

fn has_forbidden_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_whitespace() || c.is_control())
}

// =============================================================================
// Tag URI
// =============================================================================

/// A concrete, versioned tag URI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagUri(String);

impl TagUri {
    /// Parse a tag URI. Only emptiness and whitespace are rejected, any
    /// other string is accepted as an opaque identifier.
    pub fn parse(uri: impl Into<String>) -> Result<Self, TagError> {
        let uri = uri.into();
        if uri.is_empty() {
            return Err(TagError::Empty);
        }
        if has_forbidden_chars(&uri) {
            return Err(TagError::InvalidCharacter(uri));
        }
        Ok(Self(uri))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URI without its trailing `-major.minor.patch`, if it has one.
    pub fn base(&self) -> &str {
        match self.split_version() {
            Some((base, _)) => base,
            None => &self.0,
        }
    }

    /// The last path component without its version, e.g. `point` for
    /// `asdf://example.com/tags/point-1.0.0`.
    pub fn name(&self) -> &str {
        let base = self.base();
        let start = base.rfind(['/', ':']).map(|i| i + 1).unwrap_or(0);
        &base[start..]
    }

    /// The version suffix, when the tag carries a well-formed one.
    pub fn version(&self) -> Option<TagVersion> {
        self.split_version().map(|(_, version)| version)
    }

    fn split_version(&self) -> Option<(&str, TagVersion)> {
        let (base, version) = self.0.rsplit_once('-')?;
        let version = version.parse().ok()?;
        Some((base, version))
    }
}

impl fmt::Display for TagUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TagUri {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TagUri {
    type Error = TagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TagUri> for String {
    fn from(tag: TagUri) -> Self {
        tag.0
    }
}

impl AsRef<str> for TagUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `major.minor.patch` version carried at the end of a tag URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl TagVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for TagVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u64, ()> {
            let part = parts.next().ok_or(())?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(());
            }
            part.parse().map_err(|_| ())
        };
        let version = TagVersion::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(());
        }
        Ok(version)
    }
}

impl fmt::Display for TagVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// =============================================================================
// Tag pattern
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Piece {
    Literal(String),
    /// `*`
    Segment,
    /// `**`
    Any,
}

/// A validated tag pattern.
///
/// Patterns are validated when parsed so that a converter declaring a
/// broken pattern is rejected when its extension loads, not when the
/// pattern is first used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagPattern {
    source: String,
    pieces: Vec<Piece>,
}

impl TagPattern {
    pub fn parse(pattern: &str) -> Result<Self, TagError> {
        let malformed = |reason| TagError::MalformedPattern {
            pattern: pattern.to_string(),
            reason,
        };

        if pattern.is_empty() {
            return Err(malformed("pattern is empty"));
        }
        if has_forbidden_chars(pattern) {
            return Err(malformed("pattern contains whitespace or control characters"));
        }

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '*' {
                literal.push(c);
                continue;
            }

            let mut stars = 1;
            while chars.peek() == Some(&'*') {
                chars.next();
                stars += 1;
            }
            if stars > 2 {
                return Err(malformed("more than two consecutive '*'"));
            }
            if pieces.is_empty() && !literal.contains(':') {
                return Err(malformed("wildcard appears before the namespace"));
            }

            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(if stars == 1 { Piece::Segment } else { Piece::Any });
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            source: pattern.to_string(),
            pieces,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the pattern has no wildcard and matches a single tag.
    pub fn is_literal(&self) -> bool {
        self.pieces.iter().all(|p| matches!(p, Piece::Literal(_)))
    }

    /// Check whether `uri` is matched by this pattern.
    pub fn matches(&self, uri: &TagUri) -> bool {
        if self.is_literal() {
            return self.source == uri.as_str();
        }
        match_pieces(&self.pieces, uri.as_str())
    }
}

/// Matches piece by piece, tracking every byte offset of `text` the pieces
/// seen so far can end at. Offsets are always char boundaries.
fn match_pieces(pieces: &[Piece], text: &str) -> bool {
    let len = text.len();
    let mut reachable = vec![false; len + 1];
    reachable[0] = true;

    for piece in pieces {
        let mut next = vec![false; len + 1];
        match piece {
            Piece::Literal(literal) => {
                for (i, _) in reachable.iter().enumerate().filter(|(_, r)| **r) {
                    if text.get(i..).is_some_and(|tail| tail.starts_with(literal.as_str())) {
                        next[i + literal.len()] = true;
                    }
                }
            }
            Piece::Segment | Piece::Any => {
                let crosses_slash = matches!(piece, Piece::Any);
                let mut open = false;
                for (i, c) in text.char_indices() {
                    open |= reachable[i];
                    next[i] = open;
                    if c == '/' && !crosses_slash {
                        open = false;
                    }
                }
                next[len] = open || reachable[len];
            }
        }
        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }
    reachable[len]
}

impl fmt::Display for TagPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for TagPattern {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
