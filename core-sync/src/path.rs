//! # Path Normalization
//!
//! Turns an absolute filesystem path into the ordered collection path below a
//! configured root.
//!
//! `/data/2024/01` under root `/data` becomes `["2024", "01"]`. Redundant
//! separators collapse, case is preserved, and `.`/`..` components are
//! rejected rather than resolved because resolving them would need the
//! filesystem.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, SyncError};

/// Ordered collection path components relative to the mapping root.
///
/// Never contains empty, `.` or `..` components. Ordering is component-wise,
/// so an ancestor always sorts before its descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathSegments(Vec<String>);

impl PathSegments {
    /// Build from raw components, validating each one
    pub fn new<I, S>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = components.into_iter().map(Into::into).collect();
        for segment in &segments {
            check_segment(segment, &segments.join("/"))?;
        }
        Ok(Self(segments))
    }

    /// The mapping root itself
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last component, the collection's own name
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// First `len` components
    pub fn prefix(&self, len: usize) -> PathSegments {
        Self(self.0[..len.min(self.0.len())].to_vec())
    }

    /// Every non-empty prefix, shortest first
    pub fn prefixes(&self) -> impl Iterator<Item = PathSegments> + '_ {
        (1..=self.0.len()).map(move |len| self.prefix(len))
    }

    /// Whether `ancestor` is this path or one of its ancestors
    pub fn starts_with(&self, ancestor: &PathSegments) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Components joined with `/`, empty for the root
    pub fn join(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for PathSegments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.join())
        }
    }
}

fn check_segment(segment: &str, path: &str) -> Result<()> {
    let reason = match segment {
        "" => "empty path component",
        "." => "'.' path component",
        ".." => "'..' path component",
        s if s.contains('/') => "path component contains a separator",
        _ => return Ok(()),
    };
    Err(SyncError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    })
}

fn components<'a>(path: &'a str, original: &str) -> Result<Vec<&'a str>> {
    if !path.starts_with('/') {
        return Err(SyncError::InvalidPath {
            path: original.to_string(),
            reason: "path is not absolute".to_string(),
        });
    }

    path.split('/')
        .filter(|component| !component.is_empty())
        .map(|component| {
            check_segment(component, original)?;
            Ok(component)
        })
        .collect()
}

/// Collection path of `absolute_path` relative to `root_path`.
///
/// The root match is case-sensitive and on whole components: `/data` is not a
/// prefix of `/database`.
///
/// # Errors
///
/// `SyncError::InvalidPath` when either path is relative, contains `.` or
/// `..`, or `absolute_path` does not lie under `root_path`.
pub fn normalize(absolute_path: &str, root_path: &str) -> Result<PathSegments> {
    let path = components(absolute_path, absolute_path)?;
    let root = components(root_path, root_path)?;

    if !path.starts_with(&root) {
        return Err(SyncError::InvalidPath {
            path: absolute_path.to_string(),
            reason: format!("not under root {}", root_path),
        });
    }

    Ok(PathSegments(
        path[root.len()..].iter().map(|s| s.to_string()).collect(),
    ))
}
