// ── Item paths ──
//
// Absolute addresses into the tree. Accepts both `/` and `.` as separators
// on input; always displays with `/`.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Ordered sequence of name segments. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemPath {
    segments: Vec<String>,
}

impl ItemPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Split on `/` or `.`, dropping empty segments.
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw
                .split(['/', '.'])
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Split on `/` only, for sources whose names may contain dots.
    pub fn from_slash_path(raw: &str) -> Self {
        Self {
            segments: raw
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::<String>::into)
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_owned());
        Self { segments }
    }

    /// Append all segments of `rel`.
    pub fn join(&self, rel: &ItemPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(rel.segments.iter().cloned());
        Self { segments }
    }

    /// Whether `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &ItemPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// The first `n` segments.
    pub fn truncated(&self, n: usize) -> Self {
        Self {
            segments: self.segments.iter().take(n).cloned().collect(),
        }
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for ItemPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for ItemPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for ItemPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── PathPattern ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Name(String),
    Any,
}

/// A path where a `*` segment matches exactly one name, e.g. `devices/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: ItemPath::parse(raw)
                .segments
                .into_iter()
                .map(|s| if s == "*" { Segment::Any } else { Segment::Name(s) })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn matches(&self, path: &ItemPath) -> bool {
        path.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(path.segments())
                .all(|(pat, seg)| match pat {
                    Segment::Any => true,
                    Segment::Name(n) => n == seg,
                })
    }

    /// The longest wildcard-free prefix. Every match lies below it.
    pub fn fixed_prefix(&self) -> ItemPath {
        ItemPath::from_segments(self.segments.iter().map_while(|s| match s {
            Segment::Name(n) => Some(n.clone()),
            Segment::Any => None,
        }))
    }

    /// If `path` or one of its ancestors matches, return the matching one.
    pub fn enclosing_match(&self, path: &ItemPath) -> Option<ItemPath> {
        if path.len() < self.segments.len() {
            return None;
        }
        let candidate = path.truncated(self.segments.len());
        self.matches(&candidate).then_some(candidate)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Name(n) => n.as_str(),
                Segment::Any => "*",
            })
            .collect();
        f.write_str(&parts.join("/"))
    }
}
