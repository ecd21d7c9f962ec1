//! The inotify engine: one kernel notification instance, a watch per
//! directory, recursive installation and event translation.
//!
//! Watch descriptors are the only kernel-side handle; the engine resolves
//! them through [`WatchTree`] to rebuild absolute paths at event time.
//! Recursion stops at symlinks and at the per-root mount exclusions, and
//! never crosses into a directory the kernel refused to watch.

use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind};
use std::mem;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

use super::error::{InitError, RegisterError};
use super::tree::{RootId, WatchTree};

/// Sized for a few hundred queued events per drain; the kernel splits
/// larger backlogs across reads.
const EVENT_BUF_LEN: usize = 32768;

/// Successful outcome of [`Engine::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The root is installed; the id addresses it until `unwatch`.
    Watched(RootId),
    /// The path does not exist; the caller keeps the root and retries on
    /// the missing-root tick.
    Missing,
}

/// Dispatcher invoked for every translated kernel event.
///
/// Receives the absolute path and the raw event mask; synthesized events
/// (contents of a directory that appeared before its watch took effect)
/// arrive with a plain `CREATE` mask, queue overflow with `Q_OVERFLOW`
/// and an empty path.
pub type EventSink<'a> = dyn FnMut(&Path, EventMask) + 'a;

struct Root {
    /// Effective path (flat sentinel already stripped).
    path: PathBuf,
    /// Watch only the root directory itself, no descent.
    flat: bool,
    /// Absolute paths recursion must not enter; rescans honor them too.
    excludes: Vec<PathBuf>,
}

enum WalkError {
    /// Watch limit hit; the partial subtree has already been abandoned.
    Limit,
    /// This entry cannot be watched; siblings are unaffected.
    Skip,
}

pub struct Engine {
    inotify: Inotify,
    roots: Vec<Option<Root>>,
    tree: WatchTree<WatchDescriptor>,
    /// The watch-limit user message is emitted at most once per session.
    limit_reached: bool,
    limit_notice: bool,
    buffer: Vec<u8>,
}

impl Engine {
    /// Acquires the kernel notification instance.
    pub fn init() -> Result<Self, InitError> {
        let inotify = Inotify::init().map_err(|e| match e.raw_os_error() {
            Some(nix::libc::EMFILE) | Some(nix::libc::ENFILE) => InitError::InstanceLimit(e),
            _ => InitError::Io(e),
        })?;
        Ok(Self {
            inotify,
            roots: Vec::new(),
            tree: WatchTree::new(),
            limit_reached: false,
            limit_notice: false,
            buffer: vec![0u8; EVENT_BUF_LEN],
        })
    }

    /// The notification descriptor, for multiplexing.
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.inotify.as_fd()
    }

    /// Installs watches on `path` and (unless `flat`) every directory
    /// below it, stopping at symlinks and at `excludes`.
    pub fn watch(
        &mut self,
        path: &Path,
        excludes: Vec<PathBuf>,
        flat: bool,
    ) -> Result<Registration, RegisterError> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Registration::Missing),
            Err(e) => {
                tracing::warn!("cannot stat root {}: {e}", path.display());
                return Err(RegisterError::Skip(path.to_path_buf()));
            }
        };
        if meta.file_type().is_symlink() || !meta.is_dir() {
            tracing::info!("not a watchable directory: {}", path.display());
            return Err(RegisterError::Skip(path.to_path_buf()));
        }

        let root_id = self.allocate_slot();
        let mut created = Vec::new();
        match self.walk_tree(path, None, root_id, &excludes, !flat, false, &mut created) {
            Ok(_) => {
                self.roots[root_id] = Some(Root {
                    path: path.to_path_buf(),
                    flat,
                    excludes,
                });
                Ok(Registration::Watched(root_id))
            }
            Err(WalkError::Limit) => Err(RegisterError::WatchLimit),
            Err(WalkError::Skip) => Err(RegisterError::Skip(path.to_path_buf())),
        }
    }

    /// Removes every kernel watch in the subtree rooted at `id` and frees
    /// the root slot.
    pub fn unwatch(&mut self, id: RootId) {
        if let Some(slot) = self.roots.get_mut(id) {
            if let Some(root) = slot.take() {
                tracing::info!("unwatching: {}", root.path.display());
            }
        }
        self.drop_root_watches(id);
    }

    /// Drains the kernel event queue once, translating each event and
    /// dispatching it to `sink`.
    pub fn process_events(&mut self, sink: &mut EventSink<'_>) -> io::Result<()> {
        let mut buffer = mem::take(&mut self.buffer);
        let result = self.drain(&mut buffer, sink);
        self.buffer = buffer;
        result
    }

    /// Pending once-per-session watch-limit notice, cleared on read.
    pub fn take_watch_limit_notice(&mut self) -> bool {
        mem::take(&mut self.limit_notice)
    }

    /// Live kernel watch count (all roots).
    pub fn watch_count(&self) -> usize {
        self.tree.len()
    }

    fn drain(&mut self, buffer: &mut [u8], sink: &mut EventSink<'_>) -> io::Result<()> {
        struct RawEvent {
            wd: WatchDescriptor,
            mask: EventMask,
            name: Option<OsString>,
        }

        let events: Vec<RawEvent> = match self.inotify.read_events(buffer) {
            Ok(events) => events
                .map(|event| RawEvent {
                    wd: event.wd,
                    mask: event.mask,
                    name: event.name.map(OsString::from),
                })
                .collect(),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        };

        for event in events {
            if event.mask.contains(EventMask::Q_OVERFLOW) {
                tracing::error!("event queue overflow");
                sink(Path::new(""), EventMask::Q_OVERFLOW);
                break;
            }
            if event.mask.contains(EventMask::IGNORED) {
                continue;
            }

            let Some(root_id) = self.tree.root_of(&event.wd) else {
                tracing::debug!("event on unknown watch descriptor, skipping");
                continue;
            };
            let Some(root) = self.roots.get(root_id).and_then(Option::as_ref) else {
                continue;
            };
            let flat = root.flat;
            let excludes = root.excludes.clone();
            let node_path = self.tree.rebuild_path(&root.path, &event.wd);
            let path = match &event.name {
                Some(name) => node_path.join(name),
                None => node_path,
            };

            sink(&path, event.mask);

            if !flat
                && event.mask.contains(EventMask::ISDIR)
                && event.mask.intersects(EventMask::CREATE | EventMask::MOVED_TO)
            {
                self.rescan(&event.wd, &path, root_id, &excludes, sink);
            }

            if event.name.is_none()
                && event.mask.intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF)
            {
                // a move within the tree re-attaches the node before its
                // MOVE_SELF arrives; a node whose current path is live
                // must be kept
                let reattached = !event.mask.contains(EventMask::DELETE_SELF)
                    && fs::symlink_metadata(&path).is_ok();
                if !reattached {
                    self.forget(&event.wd);
                }
            }
        }
        Ok(())
    }

    /// A directory appeared below a watched one. Its contents may predate
    /// the watch, so every entry found during installation is replayed to
    /// the sink as a synthesized CREATE.
    fn rescan(
        &mut self,
        parent: &WatchDescriptor,
        dir: &Path,
        root_id: RootId,
        excludes: &[PathBuf],
        sink: &mut EventSink<'_>,
    ) {
        let mut created = Vec::new();
        match self.walk_tree(
            dir,
            Some(parent.clone()),
            root_id,
            excludes,
            true,
            true,
            &mut created,
        ) {
            Ok(_) | Err(WalkError::Skip) => {
                for path in &created {
                    sink(path, EventMask::CREATE);
                }
            }
            Err(WalkError::Limit) => {
                tracing::warn!("new subtree {} left unwatched", dir.display());
            }
        }
    }

    /// A non-root directory reported its own deletion or move; drop its
    /// subtree. Self-events on subtree roots are left to the registry,
    /// which unwatches the whole root.
    fn forget(&mut self, wd: &WatchDescriptor) {
        let is_subtree_root = match self.tree.get(wd) {
            Some(node) => node.parent.is_none(),
            None => return,
        };
        if is_subtree_root {
            return;
        }
        for key in self.tree.remove_subtree(wd) {
            let _ = self.inotify.watches().remove(key);
        }
    }

    /// Depth-first watch installation. On success returns the top node's
    /// descriptor; on `Limit` the partially-installed subtree has been
    /// removed already. Per-entry failures below the top are logged and
    /// skipped.
    #[allow(clippy::too_many_arguments)]
    fn walk_tree(
        &mut self,
        dir: &Path,
        parent: Option<WatchDescriptor>,
        root_id: RootId,
        excludes: &[PathBuf],
        recurse: bool,
        collect: bool,
        created: &mut Vec<PathBuf>,
    ) -> Result<WatchDescriptor, WalkError> {
        let wd = match self.inotify.watches().add(dir, watch_mask()) {
            Ok(wd) => wd,
            Err(e) => return Err(self.classify_watch_error(dir, e)),
        };
        if let Some(node) = self.tree.get(&wd) {
            if node.parent.is_none() {
                // another root already owns this directory
                tracing::info!("{} is already a watch root", dir.display());
                return Err(WalkError::Skip);
            }
            // watch descriptor reuse: the directory moved here from a
            // previously watched location; re-attach its subtree
            tracing::debug!("watch descriptor reused for {}", dir.display());
            self.tree.remove_subtree(&wd);
        }
        let name = match &parent {
            Some(_) => dir.file_name().unwrap_or_default().to_os_string(),
            None => OsString::new(),
        };
        self.tree.insert(wd.clone(), name, parent, root_id);
        tracing::debug!("watching: {}", dir.display());

        if !recurse {
            return Ok(wd);
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::info!("cannot list {}: {e}", dir.display());
                return Ok(wd);
            }
        };
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let child = entry.path();
            let Ok(meta) = fs::symlink_metadata(&child) else {
                continue;
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            if !meta.is_dir() {
                if collect {
                    created.push(child);
                }
                continue;
            }
            if excludes.iter().any(|mount| mount == &child) {
                tracing::info!("skipping excluded mount point: {}", child.display());
                continue;
            }
            if collect {
                created.push(child.clone());
            }
            match self.walk_tree(&child, Some(wd.clone()), root_id, excludes, true, collect, created)
            {
                Ok(_) | Err(WalkError::Skip) => {}
                Err(WalkError::Limit) => {
                    // abandon everything installed under this call
                    for key in self.tree.remove_subtree(&wd) {
                        let _ = self.inotify.watches().remove(key);
                    }
                    return Err(WalkError::Limit);
                }
            }
        }
        Ok(wd)
    }

    fn classify_watch_error(&mut self, dir: &Path, e: io::Error) -> WalkError {
        if e.raw_os_error() == Some(nix::libc::ENOSPC) {
            tracing::error!("inotify watch limit reached at {}", dir.display());
            if !self.limit_reached {
                self.limit_reached = true;
                self.limit_notice = true;
            }
            WalkError::Limit
        } else {
            tracing::info!("cannot watch {}: {e}", dir.display());
            WalkError::Skip
        }
    }

    fn allocate_slot(&mut self) -> RootId {
        match self.roots.iter().position(Option::is_none) {
            Some(id) => id,
            None => {
                self.roots.push(None);
                self.roots.len() - 1
            }
        }
    }

    fn drop_root_watches(&mut self, id: RootId) {
        for key in self.tree.remove_root(id) {
            // DELETE_SELF already detached some of these kernel-side
            let _ = self.inotify.watches().remove(key);
        }
    }
}

fn watch_mask() -> WatchMask {
    WatchMask::MODIFY
        | WatchMask::ATTRIB
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
        | WatchMask::DONT_FOLLOW
}
