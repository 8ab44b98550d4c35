//! `file://` URI helpers.

use crate::error::{ClientError, Result};
use std::path::{Path, PathBuf};

/// Encodes an absolute filesystem path as a `file://` URI.
///
/// `file_path_to_uri("/usr/local/test/test.test") == "file:///usr/local/test/test.test"`
pub fn file_path_to_uri(path: &Path) -> String {
    let path_str = path.to_string_lossy();
    if path_str.starts_with('/') {
        format!("file://{path_str}")
    } else {
        format!("file:///{path_str}")
    }
}

/// Decodes a `file://` URI back to an absolute path. Any scheme other
/// than `file` is rejected with [`ClientError::InvalidURI`].
pub fn uri_to_file_path(uri: &str) -> Result<PathBuf> {
    let rest = uri
        .strip_prefix("file://")
        .ok_or_else(|| ClientError::InvalidURI(uri.to_string()))?;
    Ok(PathBuf::from(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_absolute_path() {
        let path = Path::new("/usr/local/test/test.test");
        let uri = file_path_to_uri(path);
        assert_eq!(uri, "file:///usr/local/test/test.test");
        assert_eq!(uri_to_file_path(&uri).unwrap(), path);
    }

    #[test]
    fn rejects_non_file_scheme() {
        let err = uri_to_file_path("test").unwrap_err();
        assert!(matches!(err, ClientError::InvalidURI(_)));

        let err = uri_to_file_path("http://example.com/test").unwrap_err();
        assert!(matches!(err, ClientError::InvalidURI(_)));
    }
}
