use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const SCHEME_SEPARATOR: &str = "://";

/// Normalized identifier of a cached resource.
///
/// Identifiers are URL-like strings of the form `scheme://path`:
/// - a bare absolute path (`/home/u/a.txt`) becomes `file:///home/u/a.txt`
/// - repeated slashes inside the path collapse to one
/// - a trailing slash is stripped, except for the root itself
///
/// Two identifiers naming the same resource therefore compare equal and hash
/// identically, which is what the cache keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Build a normalized identifier from a URL-like string or absolute path
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize(raw.as_ref()))
    }

    /// Identifier for a local filesystem path (`file://` scheme)
    pub fn from_path(path: &Path) -> Self {
        Self::new(format!("file://{}", path.to_string_lossy()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme part (`file`, `trash`, ...), `None` for scheme-less identifiers
    pub fn scheme(&self) -> Option<&str> {
        self.0
            .find(SCHEME_SEPARATOR)
            .map(|idx| &self.0[..idx])
            .filter(|s| !s.is_empty())
    }

    /// Path part after the scheme separator
    pub fn path(&self) -> &str {
        match self.0.find(SCHEME_SEPARATOR) {
            Some(idx) => &self.0[idx + SCHEME_SEPARATOR.len()..],
            None => &self.0,
        }
    }

    /// Parent scope of this resource (same scheme, last segment dropped).
    ///
    /// Returns `None` for a root (`file:///`) or a single relative segment.
    ///
    /// ```
    /// use infocache_types::ResourceId;
    ///
    /// let id = ResourceId::new("file:///home/user/notes.txt");
    /// assert_eq!(id.parent().unwrap().as_str(), "file:///home/user");
    /// assert!(ResourceId::new("file:///").parent().is_none());
    /// ```
    pub fn parent(&self) -> Option<ResourceId> {
        let path = self.path();
        if path == "/" || path.is_empty() {
            return None;
        }

        let idx = path.rfind('/')?;
        let parent_path = if idx == 0 { "/" } else { &path[..idx] };

        Some(match self.scheme() {
            Some(scheme) => Self(format!("{scheme}{SCHEME_SEPARATOR}{parent_path}")),
            None => Self(parent_path.to_string()),
        })
    }

    /// Local path for `file://` identifiers
    pub fn to_path(&self) -> Option<PathBuf> {
        match self.scheme() {
            Some("file") => Some(PathBuf::from(self.path())),
            _ => None,
        }
    }
}

fn normalize(raw: &str) -> String {
    let raw = raw.trim();
    let (scheme, path) = match raw.find(SCHEME_SEPARATOR) {
        Some(idx) => (Some(&raw[..idx]), &raw[idx + SCHEME_SEPARATOR.len()..]),
        None if raw.starts_with('/') => (Some("file"), raw),
        None => (None, raw),
    };

    let mut normalized_path = String::with_capacity(path.len());
    let mut previous_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        normalized_path.push(ch);
    }
    while normalized_path.len() > 1 && normalized_path.ends_with('/') {
        normalized_path.pop();
    }

    match scheme {
        Some(scheme) => format!("{}{SCHEME_SEPARATOR}{normalized_path}", scheme.to_lowercase()),
        None => normalized_path,
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ResourceId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
