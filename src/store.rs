//! File-backed summary cache.
//!
//! Each namespace is a directory holding one file per key. The file name is
//! the URL-safe base64 encoding of the key's UTF-8 bytes and the file content
//! is the cached text, verbatim.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name used for the empty key, whose base64 encoding is empty.
/// No non-empty byte sequence encodes to a bare padding character.
const EMPTY_KEY_NAME: &str = "=";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Cache directory {path} is unavailable: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read cache entry {path}: {source}")]
    StorageReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write cache entry {path}: {source}")]
    StorageWriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Maps a content key to the file name it is stored under.
pub fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return EMPTY_KEY_NAME.to_string();
    }
    URL_SAFE.encode(key.as_bytes())
}

/// Persistent mapping from content keys to summary text, scoped to one
/// root directory.
///
/// There is no locking and no expiry: concurrent writers to the same key
/// race and the last completed write wins.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Opens the namespace rooted at `root`, creating the directory and any
    /// missing parents.
    ///
    /// Fails with [`StoreError::StorageUnavailable`] if `root` exists but is
    /// not a directory, or if it cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();

        if root.exists() && !root.is_dir() {
            return Err(StoreError::StorageUnavailable {
                source: io::Error::other("path exists but is not a directory"),
                path: root,
            });
        }

        if let Err(source) = fs::create_dir_all(&root) {
            return Err(StoreError::StorageUnavailable { path: root, source });
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `key`. Always a direct child of the root.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }

    /// Stores `value` under `key`, replacing any previous contents.
    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        fs::write(&path, value).map_err(|source| StoreError::StorageWriteError { path, source })
    }

    /// Returns the value stored under `key`, or `None` when nothing has been
    /// stored yet.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::StorageReadError { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn create_test_cache() -> (ContentCache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache =
            ContentCache::open(temp_dir.path().join("youtube")).expect("Open should succeed");
        (cache, temp_dir)
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for entry in fs::read_dir(dir).expect("Should list directory") {
            let path = entry.expect("Should read entry").path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
        found
    }

    #[test]
    fn test_get_returns_none_for_missing_key() {
        let (cache, _temp_dir) = create_test_cache();

        let result = cache.get("never-written").expect("Miss should not be an error");

        assert!(result.is_none());
    }

    #[test]
    fn test_put_then_get_round_trips_awkward_keys_and_values() {
        let (cache, _temp_dir) = create_test_cache();
        let cases = [
            ("dQw4w9WgXcQ", "# Title\nSummary text"),
            ("https://arxiv.org/pdf/2506.21384?x=1&y=2#frag", "Summary A"),
            ("a/b/c", ""),
            ("../../secret", "   \n\t  "),
            ("", "empty key"),
            ("   ", "whitespace key"),
            ("논문 요약", "한국어 요약이다.\r\n$$E = mc^2$$"),
            ("C:\\Windows\\system32", "backslashes"),
        ];

        for (key, value) in cases {
            cache.put(key, value).expect("Write should succeed");
        }
        for (key, value) in cases {
            let stored = cache.get(key).expect("Read should succeed");
            assert_eq!(stored.as_deref(), Some(value), "round trip for key {:?}", key);
        }
    }

    #[test]
    fn test_overwrite_leaves_no_residual_bytes() {
        let (cache, _temp_dir) = create_test_cache();

        cache.put("key", "a much longer first summary").expect("First write should succeed");
        cache.put("key", "short").expect("Second write should succeed");

        assert_eq!(cache.get("key").unwrap().as_deref(), Some("short"));
    }

    #[test]
    fn test_file_name_is_url_safe_base64_of_key() {
        let (cache, _temp_dir) = create_test_cache();

        cache.put("dQw4w9WgXcQ", "summary").expect("Write should succeed");

        let path = cache.root().join("ZFF3NHc5V2dYY1E=");
        assert!(path.exists(), "Cache file should be named after the encoded key");
        assert_eq!(fs::read_to_string(path).unwrap(), "summary");
        assert_eq!(
            encode_key("https://arxiv.org/pdf/2506.21384"),
            "aHR0cHM6Ly9hcnhpdi5vcmcvcGRmLzI1MDYuMjEzODQ="
        );
    }

    #[test]
    fn test_encoded_names_are_distinct_and_file_safe() {
        let keys = [
            "", "=", "a", "a=", "aa", "a/b", "a_b", "a-b", "../x", "..", ".", "?", ">", "~",
            "https://example.com/", "https://example.com",
        ];

        let names: HashSet<String> = keys.iter().map(|k| encode_key(k)).collect();

        assert_eq!(names.len(), keys.len(), "Distinct keys must not collide");
        for name in &names {
            assert!(!name.is_empty());
            assert!(
                name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '='))
            );
        }
    }

    #[test]
    fn test_path_escape_keys_stay_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("ns").join("inner");
        let cache = ContentCache::open(&root).unwrap();

        for key in ["../../secret", "a/b/c", "/etc/passwd", "..", "../"] {
            cache.put(key, "payload").expect("Write should succeed");
            assert_eq!(cache.entry_path(key).parent(), Some(root.as_path()));
        }

        let files = files_under(temp_dir.path());
        assert_eq!(files.len(), 5);
        assert!(files.iter().all(|f| f.parent() == Some(root.as_path())));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let youtube = ContentCache::open(temp_dir.path().join("youtube")).unwrap();
        let arxiv = ContentCache::open(temp_dir.path().join("arxiv")).unwrap();

        youtube.put("shared", "from youtube").unwrap();

        assert!(arxiv.get("shared").unwrap().is_none());
        arxiv.put("shared", "from arxiv").unwrap();
        assert_eq!(youtube.get("shared").unwrap().as_deref(), Some("from youtube"));
        assert_eq!(arxiv.get("shared").unwrap().as_deref(), Some("from arxiv"));
    }

    #[test]
    fn test_open_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("data").join("nested").join("youtube");

        let cache = ContentCache::open(&nested).expect("Open should succeed");

        assert!(nested.is_dir());
        assert_eq!(cache.root(), nested.as_path());
    }

    #[test]
    fn test_open_fails_when_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        fs::write(&file, "occupied").unwrap();

        let err = ContentCache::open(&file).expect_err("Open should fail");

        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_get_reports_read_error_for_unreadable_entry() {
        let (cache, _temp_dir) = create_test_cache();
        // A directory where a file is expected cannot be read as text.
        fs::create_dir(cache.entry_path("blocked")).unwrap();

        let err = cache.get("blocked").expect_err("Read should fail");

        assert!(matches!(err, StoreError::StorageReadError { .. }));
    }

    #[test]
    fn test_put_reports_write_error() {
        let (cache, _temp_dir) = create_test_cache();
        fs::create_dir(cache.entry_path("blocked")).unwrap();

        let err = cache.put("blocked", "value").expect_err("Write should fail");

        assert!(matches!(err, StoreError::StorageWriteError { .. }));
    }

    #[test]
    fn test_youtube_lookup_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ContentCache::open(temp_dir.path().join("data").join("youtube")).unwrap();

        assert!(cache.get("dQw4w9WgXcQ").unwrap().is_none());
        cache.put("dQw4w9WgXcQ", "# Title\nSummary text").unwrap();

        assert_eq!(
            cache.get("dQw4w9WgXcQ").unwrap().as_deref(),
            Some("# Title\nSummary text")
        );
    }

    #[test]
    fn test_entries_survive_reopening() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data").join("arxiv");

        {
            let cache = ContentCache::open(&root).unwrap();
            cache.put("https://arxiv.org/pdf/2506.21384", "Summary A").unwrap();
        }

        let reopened = ContentCache::open(&root).unwrap();
        assert_eq!(
            reopened.get("https://arxiv.org/pdf/2506.21384").unwrap().as_deref(),
            Some("Summary A")
        );
    }
}
