//! `.dirindex` manifest codec
//!
//! Every directory on the mirror exposes a `.dirindex` artifact listing
//! its children, one per line, colon-separated:
//!
//! ```text
//! version:1
//! path:Models/Airport
//! d:Objects:70c881d4a26984ddce795f6f71817c9cf4480e79
//! f:windsock.xml:2aae6c35c94fcfb415dbe95f408b9ce91ee846ed:8842
//! ```
//!
//! `version:` and `path:` headers and blank lines are ignored. File
//! entries carry an optional decimal byte size; a directory entry's hash
//! is the hash of that directory's own `.dirindex`.

use color_eyre::Result;
use color_eyre::eyre::bail;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Manifest file name, present in every mirrored directory
pub const DIR_INDEX_FILE: &str = ".dirindex";

/// What kind of child a manifest entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a mirrored directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: EntryKind,
    pub name: String,
    pub hash: ContentHash,
    /// Byte size; zero for directories and for file lines without a
    /// size field
    pub size: u64,
}

/// Parse a `.dirindex` body into entries sorted by name.
///
/// The whole manifest is rejected on the first malformed line; callers
/// treat that as "no usable index" and fall back to an empty child list.
///
/// # Errors
/// Returns an error on an unknown leading token, a missing name or hash
/// field, an invalid hash, or a name containing a path separator.
pub fn parse_dir_index(text: &str) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(':');
        let token = fields.next().unwrap_or("");
        if token == "version" || token == "path" {
            continue;
        }

        let kind = match token.as_bytes().first() {
            Some(b'f') => EntryKind::File,
            Some(b'd') => EntryKind::Directory,
            _ => bail!("unknown entry kind {token:?} in dir index"),
        };

        let Some(name) = fields.next() else {
            bail!("dir index entry is missing a name");
        };
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            bail!("invalid child name {name:?} in dir index");
        }

        let Some(hash) = fields.next() else {
            bail!("dir index entry {name:?} is missing a hash");
        };
        let hash = ContentHash::from_hex(hash)?;

        let size = match fields.next() {
            Some(s) if kind == EntryKind::File => s.parse().unwrap_or(0),
            _ => 0,
        };

        entries.push(ManifestEntry {
            kind,
            name: name.to_string(),
            hash,
            size,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(data: &[u8]) -> String {
        ContentHash::from_bytes(data).to_hex()
    }

    #[test]
    fn test_parse_basic() {
        let text = format!(
            "version:1\npath:some/dir\nf:readme.txt:{}:42\nd:models:{}\n",
            hex(b"readme"),
            hex(b"models index"),
        );
        let entries = parse_dir_index(&text).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "models");
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[1].name, "readme.txt");
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].size, 42);
        assert_eq!(entries[1].hash, ContentHash::from_bytes(b"readme"));
    }

    #[test]
    fn test_sorted_by_name() {
        let text = format!("f:zzz:{}:1\nf:aaa:{}:1\n", hex(b"z"), hex(b"a"));
        let entries = parse_dir_index(&text).unwrap();
        assert_eq!(entries[0].name, "aaa");
        assert_eq!(entries[1].name, "zzz");
    }

    #[test]
    fn test_blank_lines_and_crlf_tolerated() {
        let text = format!("version:1\r\n\r\nf:a.txt:{}:7\r\n\n", hex(b"a"));
        let entries = parse_dir_index(&text).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].size, 7);
    }

    #[test]
    fn test_size_is_optional() {
        let text = format!("f:a.txt:{}\n", hex(b"a"));
        let entries = parse_dir_index(&text).unwrap();
        assert_eq!(entries[0].size, 0);
    }

    #[test]
    fn test_unknown_token_rejects_manifest() {
        let text = format!("f:good.txt:{}:1\nx:bad:{}\n", hex(b"g"), hex(b"b"));
        assert!(parse_dir_index(&text).is_err());
    }

    #[test]
    fn test_missing_fields_reject_manifest() {
        assert!(parse_dir_index("f\n").is_err());
        assert!(parse_dir_index("f:name-without-hash\n").is_err());
    }

    #[test]
    fn test_bad_hash_rejects_manifest() {
        assert!(parse_dir_index("f:a.txt:nothex:1\n").is_err());
    }

    #[test]
    fn test_separator_in_name_rejects_manifest() {
        let text = format!("f:up/../and-over:{}:1\n", hex(b"x"));
        assert!(parse_dir_index(&text).is_err());
        let text = format!("d:..:{}\n", hex(b"x"));
        assert!(parse_dir_index(&text).is_err());
    }

    #[test]
    fn test_duplicate_names_are_kept() {
        let text = format!("f:dup:{}:1\nf:dup:{}:2\n", hex(b"one"), hex(b"two"));
        let entries = parse_dir_index(&text).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.name == "dup"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let text = format!("d:sub:{}\nf:a.txt:{}:3\n", hex(b"s"), hex(b"a"));
        assert_eq!(
            parse_dir_index(&text).unwrap(),
            parse_dir_index(&text).unwrap()
        );
    }

    #[test]
    fn test_empty_manifest() {
        assert!(parse_dir_index("version:1\n").unwrap().is_empty());
        assert!(parse_dir_index("").unwrap().is_empty());
    }
}
