// src/tree/path.rs

//! Colon-separated identity paths (`:`, `:lib`, `:lib:core:jar`).

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::errors::BuildError;

/// An absolute, colon-separated path. `:` is the root path.
///
/// Ordering is segment-wise, so a path always sorts before its children.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub const SEPARATOR: &'static str = ":";

    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an absolute path such as `:lib:jar`.
    pub fn parse(raw: &str) -> Result<Self, BuildError> {
        let rest = raw.strip_prefix(Self::SEPARATOR).ok_or_else(|| {
            BuildError::ConfigError(format!("path '{raw}' must start with ':'"))
        })?;
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let segments: Vec<String> = rest.split(Self::SEPARATOR).map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty() || s.trim() != s) {
            return Err(BuildError::ConfigError(format!(
                "path '{raw}' contains an empty or padded segment"
            )));
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// `self` followed by every segment of `other`.
    pub fn append(&self, other: &Path) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(Self::SEPARATOR);
        }
        for segment in &self.segments {
            write!(f, "{}{}", Self::SEPARATOR, segment)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identity of one build in a build tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildIdentifier(Path);

impl BuildIdentifier {
    pub fn new(build_path: Path) -> Self {
        Self(build_path)
    }

    pub fn root() -> Self {
        Self(Path::root())
    }

    pub fn build_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for BuildIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build '{}'", self.0)
    }
}
