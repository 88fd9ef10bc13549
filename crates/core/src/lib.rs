//! hsync-core: content-addressed HTTP mirror engine
//!
//! Synchronizes a local directory tree against a remote tree served over
//! plain HTTP. Every remote directory exposes a `.dirindex` manifest
//! listing its children with SHA-1 hashes; the engine walks the tree
//! manifest-by-manifest, fetching what changed, deleting what the server
//! no longer lists, and skipping anything whose hash already matches.
//! A persistent hash cache keeps repeat syncs from re-reading unchanged
//! files.

pub mod cache;
pub mod dir;
pub mod engine;
pub mod hash;
pub mod http;
pub mod manifest;

pub use cache::HashCache;
pub use dir::Directory;
pub use engine::{SyncEngine, SyncStats, SyncStatus};
pub use hash::ContentHash;
pub use http::{HttpClient, RequestId};
pub use manifest::{DIR_INDEX_FILE, EntryKind, ManifestEntry, parse_dir_index};
