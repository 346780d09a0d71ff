//! Repository paths
//!
//! A [`RepoPath`] is an absolute, slash-delimited path into the resource tree.
//! Paths order segment by segment, which gives two useful properties:
//!
//! - every set of paths has one canonical acquisition order for path locks
//! - the descendants of a path form one contiguous range directly after it

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),
    #[error("path contains an empty segment: {0}")]
    EmptySegment(String),
    #[error("path segment is reserved: {0}")]
    Reserved(String),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoPath {
    segments: Vec<String>,
}

impl RepoPath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse an absolute path. A single trailing slash is tolerated.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(PathError::NotAbsolute(raw.to_string()));
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(raw.to_string()));
            }
            if segment == "." || segment == ".." {
                return Err(PathError::Reserved(segment.to_string()));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<RepoPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> Result<RepoPath, PathError> {
        if name.is_empty() || name.contains('/') {
            return Err(PathError::InvalidName(name.to_string()));
        }
        if name == "." || name == ".." {
            return Err(PathError::Reserved(name.to_string()));
        }
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Strict ancestor check; a path is not its own ancestor.
    pub fn is_ancestor_of(&self, other: &RepoPath) -> bool {
        self.segments.len() < other.segments.len() && other.segments.starts_with(&self.segments)
    }

    pub fn is_descendant_of(&self, other: &RepoPath) -> bool {
        other.is_ancestor_of(self)
    }

    /// All strict ancestors, root first.
    pub fn ancestors(&self) -> Vec<RepoPath> {
        (0..self.segments.len())
            .map(|len| Self {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for RepoPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepoPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepoPath> for String {
    fn from(path: RepoPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn p(raw: &str) -> RepoPath {
        RepoPath::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(p("/").to_string(), "/");
        assert_eq!(p("/a/b").to_string(), "/a/b");
        assert_eq!(p("/a/b/").to_string(), "/a/b");
        assert!(p("/").is_root());

        assert!(matches!(
            RepoPath::parse("a/b"),
            Err(PathError::NotAbsolute(_))
        ));
        assert!(matches!(
            RepoPath::parse("/a//b"),
            Err(PathError::EmptySegment(_))
        ));
        assert!(matches!(
            RepoPath::parse("/a/../b"),
            Err(PathError::Reserved(_))
        ));
    }

    #[test]
    fn test_parent_and_join() {
        let path = p("/a/b/c");
        assert_eq!(path.parent(), Some(p("/a/b")));
        assert_eq!(path.name(), Some("c"));
        assert_eq!(p("/a").parent(), Some(RepoPath::root()));
        assert_eq!(RepoPath::root().parent(), None);
        assert_eq!(RepoPath::root().name(), None);

        assert_eq!(p("/a").join("b").unwrap(), p("/a/b"));
        assert!(p("/a").join("b/c").is_err());
        assert!(p("/a").join("").is_err());
        assert!(p("/a").join("..").is_err());
    }

    #[test]
    fn test_ancestry() {
        assert!(p("/a").is_ancestor_of(&p("/a/b")));
        assert!(RepoPath::root().is_ancestor_of(&p("/a")));
        assert!(!p("/a").is_ancestor_of(&p("/a")));
        assert!(!p("/a").is_ancestor_of(&p("/ab")));
        assert!(p("/a/b/c").is_descendant_of(&p("/a")));

        assert_eq!(
            p("/a/b/c").ancestors(),
            vec![RepoPath::root(), p("/a"), p("/a/b")]
        );
        assert!(RepoPath::root().ancestors().is_empty());
    }

    #[test]
    fn test_descendants_are_contiguous() {
        let mut paths = vec![p("/a-b"), p("/a/b/c"), p("/b"), p("/a"), p("/a/b"), p("/a/a")];
        paths.sort();
        assert_eq!(
            paths,
            vec![p("/a"), p("/a/a"), p("/a/b"), p("/a/b/c"), p("/a-b"), p("/b")]
        );
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&p("/a/b")).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: RepoPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("/a/b"));
        assert!(serde_json::from_str::<RepoPath>("\"relative\"").is_err());
    }
}
