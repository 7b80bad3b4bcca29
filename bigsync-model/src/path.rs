//! Workspace-relative resource paths
//!
//! Paths are absolute within the workspace (`/project/folder/file`), always use `/`
//! as separator and never end with one. The first segment is the project, which is
//! named after the owning connection.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{ModelError, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// The workspace root (`/`)
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse a path, normalizing duplicate and trailing separators
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(ModelError::InvalidPath(format!(
                        "parent references are not allowed: {}",
                        raw
                    )))
                }
                s => segments.push(s),
            }
        }
        Ok(Self::from_segments(segments))
    }

    fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = String::new();
        for segment in segments {
            out.push('/');
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push('/');
        }
        Self(out)
    }

    /// Append one segment. Separators inside `segment` are kept as nested segments;
    /// `.` and `..` segments are dropped so the result never leaves `self`.
    pub fn join(&self, segment: &str) -> Self {
        let joined: Vec<&str> = self
            .segments()
            .chain(segment.split('/').filter(|s| !matches!(*s, "" | "." | "..")))
            .collect();
        Self::from_segments(joined)
    }

    /// Append a single name, refusing anything that is not one plain segment
    pub fn child(&self, name: &str) -> Result<Self> {
        if !Self::is_valid_name(name) {
            return Err(ModelError::InvalidPath(format!(
                "invalid name '{}' below {}",
                name, self
            )));
        }
        Ok(self.join(name))
    }

    /// Whether `name` can stand as one path segment
    pub fn is_valid_name(name: &str) -> bool {
        !matches!(name, "" | "." | "..") && !name.contains(['/', '\\', '\0'])
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let segments: Vec<&str> = self.segments().collect();
        Some(Self::from_segments(
            segments[..segments.len() - 1].iter().copied(),
        ))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// File name without its extension
    pub fn stem(&self) -> Option<&str> {
        self.file_name()
            .map(|name| name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name))
    }

    /// First segment, i.e. the project the resource lives in
    pub fn project(&self) -> Option<&str> {
        self.segments().next()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Iterate over ancestors, nearest first, stopping at the project folder
    pub fn ancestors(&self) -> impl Iterator<Item = ResourcePath> {
        let mut current = self.parent();
        std::iter::from_fn(move || {
            let next = current.take()?;
            if next.is_root() {
                return None;
            }
            current = next.parent();
            Some(next)
        })
    }

    pub fn starts_with(&self, other: &ResourcePath) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0 || self.0.starts_with(&format!("{}/", other.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
