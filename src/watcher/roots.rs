//! The root registry: the authoritative set of watch roots.
//!
//! The parent replaces the whole root set on every `ROOTS` command; the
//! registry diffs the new set against the current one, registers and
//! unregisters through the engine, and reports everything that cannot be
//! watched in a single UNWATCHEABLE block. Roots whose path does not
//! exist yet are held in missing state and re-checked on every idle tick.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::mounts;
use crate::paths::{is_parent_path, split_flat};
use crate::protocol::{ChangeKind, OutputSink};

use super::engine::{Engine, Registration};
use super::error::{RegisterError, UpdateError};
use super::tree::RootId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootState {
    Watched(RootId),
    Missing,
}

/// One user-requested root, keyed by its raw path line (flat sentinel
/// preserved).
struct WatchRoot {
    raw: OsString,
    state: RootState,
}

/// Holds the current root set and each root's registration state.
#[derive(Default)]
pub struct RootRegistry {
    current: BTreeSet<OsString>,
    roots: Vec<WatchRoot>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the root set: set-diff registration against the engine
    /// plus one UNWATCHEABLE report. Watching `/` alone is refused
    /// outright; it would exhaust the watch limit for no usable signal.
    pub fn update<W: Write>(
        &mut self,
        new_roots: Vec<OsString>,
        engine: &mut Engine,
        out: &mut OutputSink<W>,
    ) -> Result<(), UpdateError> {
        let new_roots: BTreeSet<OsString> = new_roots.into_iter().collect();
        tracing::info!(
            "updating roots (current: {}, new: {})",
            self.current.len(),
            new_roots.len()
        );

        if new_roots.len() == 1 && new_roots.contains(OsStr::new("/")) {
            out.unwatchable(&[Path::new("/")])
                .map_err(UpdateError::Output)?;
            self.unregister_all(engine);
            self.current.clear();
            return Ok(());
        }

        let mounts = mounts::unwatchable_mounts()?;
        self.apply(new_roots, &mounts, engine, out)
    }

    /// `update` with the mount list supplied by the caller.
    pub fn apply<W: Write>(
        &mut self,
        new_roots: BTreeSet<OsString>,
        mounts: &[PathBuf],
        engine: &mut Engine,
        out: &mut OutputSink<W>,
    ) -> Result<(), UpdateError> {
        let to_add: Vec<OsString> = new_roots.difference(&self.current).cloned().collect();
        let to_remove: Vec<OsString> = self.current.difference(&new_roots).cloned().collect();

        let mut unwatchable = Vec::new();
        for raw in &to_add {
            self.register(raw, mounts, engine, &mut unwatchable)?;
        }
        for raw in &to_remove {
            self.unregister(raw, engine);
        }

        let listed: Vec<&Path> = unwatchable.iter().map(PathBuf::as_path).collect();
        out.unwatchable(&listed).map_err(UpdateError::Output)?;

        self.current = new_roots;
        Ok(())
    }

    /// Re-checks every missing root; a root whose path has reappeared is
    /// registered and announced with a CREATE/CHANGE pair.
    pub fn check_missing<W: Write>(
        &mut self,
        engine: &mut Engine,
        out: &mut OutputSink<W>,
    ) -> Result<(), UpdateError> {
        for root in &mut self.roots {
            if root.state != RootState::Missing {
                continue;
            }
            let (flat, path) = split_flat(&root.raw);
            if fs::metadata(path).is_err() {
                continue;
            }
            match engine.watch(path, Vec::new(), flat) {
                Ok(Registration::Watched(id)) => {
                    root.state = RootState::Watched(id);
                    tracing::info!("root restored: {}", path.display());
                    out.created(path).map_err(UpdateError::Output)?;
                }
                Ok(Registration::Missing) => {}
                Err(RegisterError::Fatal(e)) => return Err(UpdateError::Engine(e)),
                // left missing, retried on the next tick
                Err(_) => {}
            }
        }
        Ok(())
    }

    /// A watched root reported its own deletion or move: unwatch it, hold
    /// it in missing state, and tell the parent it is gone.
    pub fn on_root_vanished<W: Write>(
        &mut self,
        path: &Path,
        engine: &mut Engine,
        out: &mut OutputSink<W>,
    ) -> Result<(), UpdateError> {
        for root in &mut self.roots {
            let (_, effective) = split_flat(&root.raw);
            if effective != path {
                continue;
            }
            if let RootState::Watched(id) = root.state {
                engine.unwatch(id);
                root.state = RootState::Missing;
                tracing::info!("root deleted: {}", path.display());
                out.change(ChangeKind::Delete, path)
                    .map_err(UpdateError::Output)?;
            }
        }
        Ok(())
    }

    /// Unregisters everything; used on shutdown and for the `/` refusal.
    pub fn unregister_all(&mut self, engine: &mut Engine) {
        for root in self.roots.drain(..) {
            if let RootState::Watched(id) = root.state {
                engine.unwatch(id);
            }
        }
    }

    /// Number of roots currently held in missing state.
    pub fn missing_count(&self) -> usize {
        self.roots
            .iter()
            .filter(|root| root.state == RootState::Missing)
            .count()
    }

    fn register(
        &mut self,
        raw: &OsStr,
        mounts: &[PathBuf],
        engine: &mut Engine,
        unwatchable: &mut Vec<PathBuf>,
    ) -> Result<(), UpdateError> {
        let (flat, path) = split_flat(raw);
        tracing::info!("registering root: {}", Path::new(raw).display());

        if path.as_os_str().as_bytes().first() != Some(&b'/') {
            tracing::warn!("invalid root: {}", Path::new(raw).display());
            unwatchable.push(path.to_path_buf());
            return Ok(());
        }

        let mut inner = Vec::new();
        for mount in mounts {
            if is_parent_path(mount, path) {
                tracing::info!(
                    "watch root {} is under mount point {} - skipping",
                    path.display(),
                    mount.display()
                );
                unwatchable.push(path.to_path_buf());
                return Ok(());
            } else if is_parent_path(path, mount) {
                tracing::info!(
                    "watch root {} contains mount point {} - partial watch",
                    path.display(),
                    mount.display()
                );
                unwatchable.push(mount.clone());
                inner.push(mount.clone());
            }
        }

        match engine.watch(path, inner, flat) {
            Ok(Registration::Watched(id)) => self.roots.push(WatchRoot {
                raw: raw.to_os_string(),
                state: RootState::Watched(id),
            }),
            Ok(Registration::Missing) => self.roots.push(WatchRoot {
                raw: raw.to_os_string(),
                state: RootState::Missing,
            }),
            Err(RegisterError::WatchLimit) => {
                tracing::warn!("watch root {} cannot be watched", path.display());
                unwatchable.push(path.to_path_buf());
            }
            Err(RegisterError::Skip(_)) => {}
            Err(RegisterError::Fatal(e)) => return Err(UpdateError::Engine(e)),
        }
        Ok(())
    }

    fn unregister(&mut self, raw: &OsStr, engine: &mut Engine) {
        self.roots.retain(|root| {
            if root.raw.as_os_str() == raw {
                tracing::info!("unregistering root: {}", Path::new(raw).display());
                if let RootState::Watched(id) = root.state {
                    engine.unwatch(id);
                }
                false
            } else {
                true
            }
        });
    }
}
