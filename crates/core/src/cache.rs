//! Persistent hash cache
//!
//! Stored at `<base>/.hashes`, one entry per line:
//!
//! ```text
//! <absolute-path>:<mtime-seconds>:<size-bytes>:<sha1-hex>
//! ```
//!
//! If a file's current `(size, mtime)` still match its entry, the stored
//! hash is trusted and the file is not re-read. The file is rewritten in
//! full after every mutation; a truncated cache just means the affected
//! files are re-hashed on the next sync.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::warn;

use crate::hash::ContentHash;

/// Cache file name, stored at the repository root
pub const HASH_CACHE_FILE: &str = ".hashes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheEntry {
    mtime: i64,
    size: u64,
    hash: ContentHash,
}

/// Metadata-keyed hash memo for the mirrored tree.
///
/// Keys are canonical absolute paths; mixing path forms would defeat
/// every lookup, so all callers resolve against the repository base
/// first.
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    entries: HashMap<PathBuf, CacheEntry>,
}

impl HashCache {
    /// Load the cache under `base`, or start empty if absent.
    /// Malformed lines are skipped.
    #[must_use]
    pub fn load(base: &Path) -> Self {
        let path = base.join(HASH_CACHE_FILE);
        let mut entries = HashMap::new();

        if let Ok(text) = std::fs::read_to_string(&path) {
            for line in text.lines() {
                let Some((path, entry)) = parse_line(line) else {
                    continue;
                };
                entries.insert(path, entry);
            }
        }

        Self { path, entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hash for the file at `path`, trusting the cache when the current
    /// `(size, mtime)` still match the stored entry and re-hashing
    /// otherwise. `None` means the file does not exist (or cannot be
    /// read).
    pub fn hash_for_path(&mut self, path: &Path) -> Option<ContentHash> {
        if let Some(entry) = self.entries.get(path) {
            if let Some((mtime, size)) = stat(path) {
                if entry.mtime == mtime && entry.size == size {
                    return Some(entry.hash);
                }
            }
            // stale entry; drop it and fall through to a fresh hash
            self.entries.remove(path);
        }

        if !path.exists() {
            return None;
        }

        let hash = match ContentHash::from_file(path) {
            Ok(hash) => hash,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to hash file");
                return None;
            }
        };
        self.update_contents(path, Some(hash));
        Some(hash)
    }

    /// Record new contents for `path`, re-reading its `(mtime, size)`
    /// from the filesystem. `None` marks the file as deleted. The cache
    /// is persisted either way.
    pub fn update_contents(&mut self, path: &Path, hash: Option<ContentHash>) {
        self.entries.remove(path);

        if let Some(hash) = hash {
            match stat(path) {
                Some((mtime, size)) => {
                    self.entries
                        .insert(path.to_path_buf(), CacheEntry { mtime, size, hash });
                }
                None => {
                    warn!(path = %path.display(), "cannot stat freshly written file");
                }
            }
        }

        self.persist();
    }

    /// Drop every entry at or under `prefix` and persist. Used when a
    /// whole directory is removed.
    pub fn remove_subtree(&mut self, prefix: &Path) {
        self.entries.retain(|path, _| !path.starts_with(prefix));
        self.persist();
    }

    fn persist(&self) {
        use std::fmt::Write as _;

        let mut out = String::new();
        for (path, entry) in &self.entries {
            let _ = writeln!(
                out,
                "{}:{}:{}:{}",
                path.display(),
                entry.mtime,
                entry.size,
                entry.hash.to_hex()
            );
        }

        if let Err(err) = std::fs::write(&self.path, out) {
            warn!(path = %self.path.display(), %err, "failed to write hash cache");
        }
    }
}

/// Parse one cache line. Fields are taken from the right so absolute
/// paths containing `:` survive.
fn parse_line(line: &str) -> Option<(PathBuf, CacheEntry)> {
    let mut fields = line.rsplitn(4, ':');
    let hash = fields.next()?;
    let size = fields.next()?.parse().ok()?;
    let mtime = fields.next()?.parse().ok()?;
    let path = fields.next()?;
    if path.is_empty() {
        return None;
    }

    let hash = ContentHash::from_hex(hash).ok()?;
    Some((PathBuf::from(path), CacheEntry { mtime, size, hash }))
}

/// Current `(mtime seconds, size)` of a path, if it exists
fn stat(path: &Path) -> Option<(i64, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let mtime = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    Some((mtime, meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn write_and_stamp(path: &Path, data: &[u8], mtime_secs: i64) {
        std::fs::write(path, data).unwrap();
        filetime::set_file_mtime(path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let mut cache = HashCache::load(dir.path());
        assert_eq!(cache.hash_for_path(&dir.path().join("nope")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hash_and_persist_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, b"hello world").unwrap();

        let mut cache = HashCache::load(dir.path());
        let hash = cache.hash_for_path(&file).unwrap();
        assert_eq!(hash, ContentHash::from_bytes(b"hello world"));

        // a freshly loaded cache sees the persisted entry
        let mut reloaded = HashCache::load(dir.path());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.hash_for_path(&file), Some(hash));
    }

    #[test]
    fn test_matching_stat_trusts_cache() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        write_and_stamp(&file, b"hello world", 1_700_000_000);

        let mut cache = HashCache::load(dir.path());
        let original = cache.hash_for_path(&file).unwrap();

        // same length, same mtime: the cache cannot tell the content
        // changed, and answers from the stored entry
        write_and_stamp(&file, b"jello world", 1_700_000_000);
        assert_eq!(cache.hash_for_path(&file), Some(original));
    }

    #[test]
    fn test_stale_entry_is_rehashed() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        write_and_stamp(&file, b"hello world", 1_700_000_000);

        let mut cache = HashCache::load(dir.path());
        cache.hash_for_path(&file).unwrap();

        write_and_stamp(&file, b"jello world", 1_700_000_050);
        assert_eq!(
            cache.hash_for_path(&file),
            Some(ContentHash::from_bytes(b"jello world"))
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_update_contents_none_removes_and_persists() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, b"bytes").unwrap();

        let mut cache = HashCache::load(dir.path());
        cache.hash_for_path(&file).unwrap();
        assert_eq!(cache.len(), 1);

        cache.update_contents(&file, None);
        assert!(cache.is_empty());
        assert!(HashCache::load(dir.path()).is_empty());
    }

    #[test]
    fn test_update_contents_missing_file_inserts_nothing() {
        let dir = TempDir::new().unwrap();
        let mut cache = HashCache::load(dir.path());

        cache.update_contents(&dir.path().join("gone"), Some(ContentHash::from_bytes(b"x")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_subtree() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"keep").unwrap();

        let mut cache = HashCache::load(dir.path());
        cache.hash_for_path(&sub.join("a.txt")).unwrap();
        cache.hash_for_path(&dir.path().join("keep.txt")).unwrap();
        assert_eq!(cache.len(), 2);

        cache.remove_subtree(&sub);
        assert_eq!(cache.len(), 1);
        assert!(!HashCache::load(dir.path()).is_empty());
    }

    #[test]
    fn test_malformed_lines_skipped_on_load() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, b"hello world").unwrap();

        let mut cache = HashCache::load(dir.path());
        let hash = cache.hash_for_path(&good).unwrap();

        // append garbage to the cache file
        let cache_path = dir.path().join(HASH_CACHE_FILE);
        let mut text = std::fs::read_to_string(&cache_path).unwrap();
        text.push_str("no fields here\n/some/path:bad:fields:nothex\n");
        std::fs::write(&cache_path, text).unwrap();

        let mut reloaded = HashCache::load(dir.path());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.hash_for_path(&good), Some(hash));
    }

    #[test]
    fn test_zero_byte_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("empty");
        std::fs::write(&file, b"").unwrap();

        let mut cache = HashCache::load(dir.path());
        let hash = cache.hash_for_path(&file).unwrap();
        assert_eq!(hash.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
