//! Scheme-dispatched resource identifiers.
//!
//! A [`Uri`] is `scheme://path`; a bare path is treated as `file`. The engine
//! only ever joins path segments and strips the last component, so the type
//! stays a thin wrapper over the string form.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri(String);

impl Uri {
    pub fn new(s: impl Into<String>) -> Self {
        let mut s = s.into();
        while s.len() > 1 && s.ends_with('/') && !s.ends_with("://") {
            s.pop();
        }
        Uri(s)
    }

    /// The scheme, defaulting to `file` for bare paths.
    pub fn scheme(&self) -> &str {
        match self.0.find("://") {
            Some(idx) => &self.0[..idx],
            None => "file",
        }
    }

    /// The path component (everything after `scheme://`).
    pub fn path(&self) -> &str {
        match self.0.find("://") {
            Some(idx) => &self.0[idx + 3..],
            None => &self.0,
        }
    }

    /// Appends one path segment.
    pub fn join(&self, segment: &str) -> Uri {
        let base = self.0.trim_end_matches('/');
        Uri(format!("{}/{}", base, segment))
    }

    /// The last path component (the file or directory name).
    pub fn last_component(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri::new(s)
    }
}
