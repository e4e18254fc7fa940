use serde::{Deserialize, Serialize};
use std::fmt;

/// Room id used when a connection asks for the root path
pub const DEFAULT_DOC_ID: &str = "default";

/// Identifier of a collaborative document, derived from the connection path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve a request path into a document id.
    ///
    /// Leading slashes are stripped and an empty remainder maps to [`DEFAULT_DOC_ID`],
    /// so `""`, `"/"` and `"//"` all address the same room.
    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            Self(DEFAULT_DOC_ID.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
