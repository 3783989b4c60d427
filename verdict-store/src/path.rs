//! Validated slash-separated store paths.

use std::fmt;

/// A store path: a sequence of non-empty segments. The empty path denotes
/// the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path(Vec<String>);

impl Path {
    /// Parse a slash-separated path. The input must start with `/`; `/` on
    /// its own is the empty path. Empty segments are rejected.
    pub fn parse(s: &str) -> Option<Path> {
        let rest = s.strip_prefix('/')?;
        if rest.is_empty() {
            return Some(Path(Vec::new()));
        }
        let mut segments = Vec::new();
        for seg in rest.split('/') {
            if seg.is_empty() {
                return None;
            }
            segments.push(seg.to_string());
        }
        Some(Path(segments))
    }

    /// Parse a URL-style path, tolerating leading and trailing slashes.
    pub fn from_url(raw: &str) -> Option<Path> {
        Path::parse(&format!("/{}", raw.trim_matches('/')))
    }

    pub fn from_segments(segments: Vec<String>) -> Path {
        Path(segments)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_str())
    }

    /// The path without its final segment. The empty path is its own
    /// parent.
    pub fn parent(&self) -> Path {
        match self.0.split_last() {
            Some((_, init)) => Path(init.to_vec()),
            None => Path(Vec::new()),
        }
    }

    /// The path without a trailing `-` append marker, if present.
    pub fn without_append_marker(&self) -> Path {
        if self.last() == Some("-") {
            self.parent()
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.0 {
            write!(f, "/{}", seg)?;
        }
        Ok(())
    }
}
