//! Dot-path addressing for the state tree (`"user.profile.name"`).
//!
//! Paths are normalised on parse: surrounding whitespace is trimmed from the
//! whole path and from each segment, and empty segments are rejected, so two
//! spellings of the same location always compare equal.

use std::fmt;

use crate::error::{KernelError, KernelResult};

/// A parsed, normalised dot-path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DotPath {
    segments: Vec<String>,
}

impl DotPath {
    pub fn parse(raw: &str) -> KernelResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(KernelError::invalid_path(raw, "path is empty"));
        }
        let mut segments = Vec::new();
        for (i, part) in trimmed.split('.').enumerate() {
            let part = part.trim();
            if part.is_empty() {
                return Err(KernelError::invalid_path(
                    raw,
                    format!("segment {i} is empty"),
                ));
            }
            segments.push(part.to_string());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment (the key inside the parent object).
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Parent path, `None` for a top-level key.
    pub fn parent(&self) -> Option<DotPath> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, key: &str) -> DotPath {
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Self { segments }
    }

    /// True if `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &DotPath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl fmt::Display for DotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl std::str::FromStr for DotPath {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_whitespace() {
        let a = DotPath::parse(" user . profile.name ").unwrap();
        let b = DotPath::parse("user.profile.name").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "user.profile.name");
        assert_eq!(a.leaf(), "name");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            DotPath::parse("a..b"),
            Err(KernelError::InvalidPath { .. })
        ));
        assert!(DotPath::parse("").is_err());
        assert!(DotPath::parse("a.").is_err());
    }

    #[test]
    fn parent_and_ancestry() {
        let p = DotPath::parse("a.b.c").unwrap();
        let parent = p.parent().unwrap();
        assert_eq!(parent.to_string(), "a.b");
        assert!(parent.is_ancestor_of(&p));
        assert!(!p.is_ancestor_of(&parent));
        assert!(DotPath::parse("a").unwrap().parent().is_none());
    }
}
