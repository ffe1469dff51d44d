use std::fmt;

/// Opaque image identifier, unique within its cluster's namespace.
///
/// Used verbatim as a driver argument, and sanitized (path separators
/// stripped) when used as a lock key — see `rbvault-lock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used for the advisory lock: path separators removed so the
    /// lock file always lives directly inside `lockdir`.
    pub fn lock_key(&self) -> String {
        self.0.replace('/', "")
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ImageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
