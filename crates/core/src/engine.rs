//! The synchronization engine
//!
//! `update()` fetches the root `.dirindex`. Every manifest that arrives
//! reconciles its directory against the local tree: children whose hash
//! already matches are left alone (subdirectories are walked offline),
//! mismatched and new children are fetched, and local entries the
//! manifest no longer lists are deleted. A sync is finished when the
//! in-flight request set drains.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::cache::{HASH_CACHE_FILE, HashCache};
use crate::dir::Directory;
use crate::hash::{ContentHash, HashContext};
use crate::http::{HttpClient, RequestId};
use crate::manifest::{DIR_INDEX_FILE, EntryKind};

/// Repository-wide result of the last `update()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Ok,
    /// The root `.dirindex` could not be fetched
    NotFound,
    /// The root `.dirindex` could not be written locally
    IoError,
}

/// Counters for one sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub files_fetched: u64,
    pub dirs_fetched: u64,
    pub orphans_removed: u64,
    pub failed_requests: u64,
}

/// State of one outstanding GET
enum Transfer {
    /// File body, streamed straight to disk as chunks arrive
    File {
        dir: String,
        name: String,
        out: Option<File>,
        write_failed: bool,
        hash: HashContext,
    },
    /// Directory manifest, buffered in memory for the eventual write
    DirIndex {
        dir: String,
        body: Vec<u8>,
        hash: HashContext,
    },
}

/// Content-addressed mirror of a remote HTTP tree.
///
/// The engine is single-threaded and cooperative: it submits GETs
/// through its [`HttpClient`] and makes progress only as the driver
/// feeds results back via [`deliver_body`](Self::deliver_body) and
/// [`deliver_done`](Self::deliver_done). The local base path is owned
/// exclusively by one engine instance.
pub struct SyncEngine<C> {
    base_path: PathBuf,
    base_url: String,
    client: C,
    cache: HashCache,
    directories: HashMap<String, Directory>,
    in_flight: HashMap<RequestId, Transfer>,
    next_request: RequestId,
    updating: bool,
    status: SyncStatus,
    stats: SyncStats,
}

impl<C: HttpClient> SyncEngine<C> {
    /// Create an engine mirroring into `base_path`. The base directory
    /// is created if missing and the path canonicalized, so every hash
    /// cache key derives from one spelling of the base. Loads the hash
    /// cache and the root directory node; does not touch the network.
    pub fn new(base_path: impl Into<PathBuf>, client: C) -> Self {
        let base_path = canonical_base(base_path.into());
        let cache = HashCache::load(&base_path);
        let mut directories = HashMap::new();
        directories.insert(String::new(), Directory::new(&base_path, ""));

        Self {
            base_path,
            base_url: String::new(),
            client,
            cache,
            directories,
            in_flight: HashMap::new(),
            next_request: 0,
            updating: false,
            status: SyncStatus::Ok,
            stats: SyncStats::default(),
        }
    }

    /// Set the remote repository root. A trailing slash is stripped.
    pub fn set_base_url(&mut self, url: &str) {
        self.base_url = url.trim_end_matches('/').to_string();
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Last terminal failure
    #[must_use]
    pub fn failure(&self) -> SyncStatus {
        self.status
    }

    /// Counters for the current (or last completed) sync
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// The transport. Drivers pop their queued work through this.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// `true` while a sync is in progress and has not failed terminally
    #[must_use]
    pub fn is_doing_sync(&self) -> bool {
        self.status == SyncStatus::Ok && self.updating
    }

    /// Start a sync by fetching the root manifest. A second call while
    /// one is in progress is a no-op.
    pub fn update(&mut self) {
        if self.updating {
            return;
        }

        self.status = SyncStatus::Ok;
        self.stats = SyncStats::default();
        self.updating = true;
        self.update_dir("");
    }

    // --- delivery surface, driven by the transport --------------------

    /// Feed body bytes for an outstanding request.
    ///
    /// # Panics
    /// Panics if `id` is not in flight; that is a driver bug.
    pub fn deliver_body(&mut self, id: RequestId, chunk: &[u8]) {
        let Self {
            in_flight,
            base_path,
            ..
        } = self;
        let Some(transfer) = in_flight.get_mut(&id) else {
            panic!("body delivered for unknown request {id}");
        };

        match transfer {
            Transfer::File {
                dir,
                name,
                out,
                write_failed,
                hash,
            } => {
                if out.is_none() && !*write_failed {
                    let path = join_rel(base_path, dir).join(name.as_str());
                    match open_for_write(&path) {
                        Ok(file) => *out = Some(file),
                        Err(err) => {
                            warn!(path = %path.display(), %err, "unable to create file");
                            *write_failed = true;
                        }
                    }
                }
                if let Some(file) = out {
                    if let Err(err) = file.write_all(chunk) {
                        warn!(dir = dir.as_str(), name = name.as_str(), %err,
                              "write failed, abandoning file");
                        *out = None;
                        *write_failed = true;
                    }
                }
                hash.update(chunk);
            }
            Transfer::DirIndex { body, hash, .. } => {
                body.extend_from_slice(chunk);
                hash.update(chunk);
            }
        }
    }

    /// Complete an outstanding request with its HTTP status code. Any
    /// code other than 200 is a failure for that artifact; transport
    /// errors are conventionally delivered as 0.
    ///
    /// # Panics
    /// Panics if `id` is not in flight; that is a driver bug.
    pub fn deliver_done(&mut self, id: RequestId, status_code: u16) {
        let Some(transfer) = self.in_flight.remove(&id) else {
            panic!("completed request {id} was not in flight");
        };

        match transfer {
            Transfer::File {
                dir,
                name,
                mut out,
                mut write_failed,
                hash,
            } => {
                if status_code == 200 && !write_failed && out.is_none() {
                    // zero-byte body: the chunk path never opened the file
                    let path = join_rel(&self.base_path, &dir).join(&name);
                    match open_for_write(&path) {
                        Ok(file) => out = Some(file),
                        Err(err) => {
                            warn!(path = %path.display(), %err, "unable to create file");
                            write_failed = true;
                        }
                    }
                }
                drop(out); // close before the cache re-stats the file

                if status_code == 200 && !write_failed {
                    self.did_update_file(&dir, &name, hash.finish());
                } else {
                    self.stats.failed_requests += 1;
                    warn!(%dir, %name, status_code, "failed to update file");
                }
            }
            Transfer::DirIndex { dir, body, hash } => {
                if status_code == 200 {
                    self.dir_index_received(&dir, &body, hash.finish());
                } else {
                    self.stats.failed_requests += 1;
                    self.failed_to_update(&dir, status_code);
                }
            }
        }

        if self.in_flight.is_empty() {
            self.updating = false;
        }
    }

    // --- directory registry -------------------------------------------

    /// Node for `relative_path`, creating it (and parsing any manifest
    /// already on disk) on first reference.
    fn get_or_create_directory(&mut self, relative_path: &str) -> &mut Directory {
        let Self {
            directories,
            base_path,
            ..
        } = self;
        directories
            .entry(relative_path.to_string())
            .or_insert_with(|| Directory::new(base_path, relative_path))
    }

    /// Remove `relative_path` from the registry and from disk, and purge
    /// its hash cache subtree. Returns whether the filesystem removal
    /// succeeded.
    pub fn delete_directory(&mut self, relative_path: &str) -> bool {
        self.directories.remove(relative_path);

        let abs = join_rel(&self.base_path, relative_path);
        let removed = match std::fs::remove_dir_all(&abs) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %abs.display(), %err, "failed to remove directory");
                false
            }
        };
        self.cache.remove_subtree(&abs);
        removed
    }

    // --- request scheduling -------------------------------------------

    fn submit(&mut self, url: String, transfer: Transfer) {
        let id = self.next_request;
        self.next_request += 1;
        self.in_flight.insert(id, transfer);
        self.client.request(id, &url);
    }

    /// Issue a GET for a file child of `dir`
    fn update_file(&mut self, dir: &str, name: &str) {
        let url = format!("{}/{name}", self.dir_url(dir));
        info!(%url, "will GET file");
        self.submit(
            url,
            Transfer::File {
                dir: dir.to_string(),
                name: name.to_string(),
                out: None,
                write_failed: false,
                hash: HashContext::new(),
            },
        );
    }

    /// Issue a GET for the `.dirindex` of `dir`
    fn update_dir(&mut self, dir: &str) {
        self.get_or_create_directory(dir);
        let url = format!("{}/{DIR_INDEX_FILE}", self.dir_url(dir));
        info!(%url, "will GET dir index");
        self.submit(
            url,
            Transfer::DirIndex {
                dir: dir.to_string(),
                body: Vec::new(),
                hash: HashContext::new(),
            },
        );
    }

    fn dir_url(&self, dir: &str) -> String {
        if dir.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{dir}", self.base_url)
        }
    }

    // --- completion handling ------------------------------------------

    fn did_update_file(&mut self, dir: &str, name: &str, digest: ContentHash) {
        let path = join_rel(&self.base_path, dir).join(name);
        self.cache.update_contents(&path, Some(digest));
        self.stats.files_fetched += 1;
        info!(path = %path.display(), "did update file");
    }

    /// A directory manifest arrived with status 200. Store it if its
    /// hash moved, then reconcile the directory's children.
    fn dir_index_received(&mut self, dir: &str, body: &[u8], digest: ContentHash) {
        let abs_dir = join_rel(&self.base_path, dir);
        let index_path = abs_dir.join(DIR_INDEX_FILE);

        if self.cache.hash_for_path(&index_path) != Some(digest) {
            if let Err(err) = write_dir_index(&abs_dir, &index_path, body) {
                error!(path = %index_path.display(), %err, "cannot store dir index");
                self.stats.failed_requests += 1;
                if dir.is_empty() {
                    self.status = SyncStatus::IoError;
                }
                return;
            }
            self.cache.update_contents(&index_path, Some(digest));

            let base = self.base_path.clone();
            self.get_or_create_directory(dir).reload_index(&base);
            self.stats.dirs_fetched += 1;
            debug!(dir, "updated dir index");
        }

        // the index is confirmed current either way; update children now
        self.reconcile(dir);
    }

    fn failed_to_update(&mut self, dir: &str, status_code: u16) {
        if dir.is_empty() {
            warn!(status_code, base_url = self.base_url.as_str(),
                  "failed to get repository root");
            self.status = SyncStatus::NotFound;
        } else {
            warn!(dir, status_code, "failed to update directory");
        }
    }

    // --- reconciliation -----------------------------------------------

    /// Bring one directory's local contents into agreement with its
    /// manifest: remove orphans, schedule fetches for mismatched and new
    /// children, and recurse offline into subdirectories whose manifest
    /// hash already matches.
    fn reconcile(&mut self, dir: &str) {
        debug!(dir, "updating children");

        let abs_dir = join_rel(&self.base_path, dir);
        let children = self.get_or_create_directory(dir).children().to_vec();

        let mut seen = HashSet::new();
        let mut orphans: Vec<(String, bool)> = Vec::new();
        let mut to_update: Vec<String> = Vec::new();

        for (name, is_dir) in list_local_children(&abs_dir, dir.is_empty()) {
            let hash_path = if is_dir {
                abs_dir.join(&name).join(DIR_INDEX_FILE)
            } else {
                abs_dir.join(&name)
            };
            let local_hash = self.cache.hash_for_path(&hash_path);

            match children.iter().find(|c| c.name == name) {
                None => orphans.push((name, is_dir)),
                Some(entry) if local_hash != Some(entry.hash) => {
                    if local_hash.is_some() {
                        info!(dir, name = entry.name.as_str(),
                              "exists locally but hash is wrong");
                    }
                    seen.insert(entry.name.clone());
                    to_update.push(entry.name.clone());
                }
                Some(entry) => {
                    seen.insert(entry.name.clone());
                    if entry.kind == EntryKind::Directory {
                        // hash already matches, so walk the subtree
                        // without re-fetching its manifest
                        self.reconcile(&child_rel(dir, &entry.name));
                    } else {
                        debug!(dir, name = entry.name.as_str(), "existing file is ok");
                    }
                }
            }
        }

        // manifest entries never seen locally are new children
        for entry in &children {
            if !seen.contains(&entry.name) {
                to_update.push(entry.name.clone());
            }
        }

        for (name, is_dir) in orphans {
            self.remove_child(dir, &abs_dir, &name, is_dir);
        }

        for name in to_update {
            match children.iter().find(|c| c.name == name) {
                None => warn!(dir, %name, "cannot schedule update for unknown child"),
                Some(entry) if entry.kind == EntryKind::File => {
                    self.update_file(dir, &name);
                }
                Some(_) => {
                    self.update_dir(&child_rel(dir, &name));
                }
            }
        }
    }

    /// Remove a local child the manifest no longer lists
    fn remove_child(&mut self, dir: &str, abs_dir: &Path, name: &str, is_dir: bool) {
        info!(dir, name, "removing orphan");

        let ok = if is_dir {
            self.delete_directory(&child_rel(dir, name))
        } else {
            let path = abs_dir.join(name);
            self.cache.update_contents(&path, None);
            match std::fs::remove_file(&path) {
                Ok(()) => true,
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to remove file");
                    false
                }
            }
        };

        if ok {
            self.stats.orphans_removed += 1;
        } else {
            warn!(dir, name, "removal failed for orphan");
        }
    }
}

/// Relative path of `name` under `dir`
fn child_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn join_rel(base: &Path, rel: &str) -> PathBuf {
    if rel.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rel)
    }
}

/// Non-recursive `(name, is_dir)` listing of `path`, sorted by name.
/// The manifest file itself is skipped, as is the hash cache at the
/// repository root.
fn list_local_children(path: &Path, is_root: bool) -> Vec<(String, bool)> {
    let Ok(read_dir) = std::fs::read_dir(path) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in read_dir.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == DIR_INDEX_FILE || (is_root && name == HASH_CACHE_FILE) {
            continue;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        out.push((name.to_string(), is_dir));
    }

    out.sort();
    out
}

/// Open a mirrored file for create+truncate. Mode 0666, subject to the
/// umask, so the mirror is shareable between local users.
fn open_for_write(path: &Path) -> std::io::Result<File> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        opts.mode(0o666);
    }
    opts.open(path)
}

/// Resolve the base to one canonical absolute form, creating it first
/// so a fresh clone can be resolved too. Differently spelled paths to
/// the same directory must not produce distinct hash cache keys.
fn canonical_base(base: PathBuf) -> PathBuf {
    if let Err(err) = create_dir_0700(&base) {
        warn!(path = %base.display(), %err, "cannot create base directory");
    }
    match base.canonicalize() {
        Ok(canonical) => canonical,
        Err(err) => {
            warn!(path = %base.display(), %err, "cannot canonicalize base directory");
            base
        }
    }
}

/// Create a directory (and missing parents) with mode 0700
fn create_dir_0700(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt as _;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Write a fetched manifest, creating its directory first if needed
fn write_dir_index(abs_dir: &Path, index_path: &Path, body: &[u8]) -> std::io::Result<()> {
    if !abs_dir.exists() {
        create_dir_0700(abs_dir)?;
    }
    std::fs::write(index_path, body)
}
