//! Per-directory mirror state

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::manifest::{self, DIR_INDEX_FILE, ManifestEntry};

/// One directory of the mirrored tree.
///
/// The relative path doubles as the URL path and the filesystem path
/// under the repository base; the root is the empty string. The child
/// list reflects the last successfully parsed local `.dirindex`, or is
/// empty.
#[derive(Debug)]
pub struct Directory {
    relative_path: String,
    children: Vec<ManifestEntry>,
}

impl Directory {
    /// Create the node, parsing any `.dirindex` already on disk into the
    /// child list. Parse failures leave the list empty.
    pub(crate) fn new(base: &Path, relative_path: &str) -> Self {
        let mut dir = Self {
            relative_path: relative_path.to_string(),
            children: Vec::new(),
        };
        dir.reload_index(base);
        dir
    }

    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Children as listed by the last good manifest, sorted by name
    #[must_use]
    pub fn children(&self) -> &[ManifestEntry] {
        &self.children
    }

    #[must_use]
    pub fn find_child(&self, name: &str) -> Option<&ManifestEntry> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Filesystem location under the repository base
    #[must_use]
    pub fn absolute_path(&self, base: &Path) -> PathBuf {
        if self.relative_path.is_empty() {
            base.to_path_buf()
        } else {
            base.join(&self.relative_path)
        }
    }

    /// Re-parse the on-disk `.dirindex`; the child list becomes empty on
    /// any failure.
    pub(crate) fn reload_index(&mut self, base: &Path) {
        self.children.clear();

        let index = self.absolute_path(base).join(DIR_INDEX_FILE);
        let Ok(text) = std::fs::read_to_string(&index) else {
            return;
        };
        match manifest::parse_dir_index(&text) {
            Ok(children) => self.children = children,
            Err(err) => {
                debug!(path = %index.display(), %err, "ignoring unparseable dir index");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::manifest::EntryKind;
    use tempfile::TempDir;

    #[test]
    fn test_new_without_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let node = Directory::new(dir.path(), "");
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_new_parses_existing_index() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let text = format!(
            "version:1\nf:a.txt:{}:1\nd:deeper:{}\n",
            ContentHash::from_bytes(b"a").to_hex(),
            ContentHash::from_bytes(b"deeper index").to_hex(),
        );
        std::fs::write(sub.join(DIR_INDEX_FILE), text).unwrap();

        let node = Directory::new(dir.path(), "sub");
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.find_child("a.txt").unwrap().kind, EntryKind::File);
        assert_eq!(
            node.find_child("deeper").unwrap().kind,
            EntryKind::Directory
        );
        assert!(node.find_child("missing").is_none());
    }

    #[test]
    fn test_corrupt_index_leaves_children_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DIR_INDEX_FILE), "x:not:a:manifest\n").unwrap();

        let node = Directory::new(dir.path(), "");
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_absolute_path_of_root_is_base() {
        let dir = TempDir::new().unwrap();
        let node = Directory::new(dir.path(), "");
        assert_eq!(node.absolute_path(dir.path()), dir.path());

        let nested = Directory::new(dir.path(), "a/b");
        assert_eq!(nested.absolute_path(dir.path()), dir.path().join("a/b"));
    }
}
