//! Error types for the watch engine.
//!
//! The engine distinguishes four failure classes: fatal initialization
//! failures, the per-instance watch limit (the session continues, the root
//! does not), entries that simply cannot be watched (symlinks, files,
//! directories that raced away), and unrecoverable I/O faults that tear
//! down the main loop.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::mounts::MountTableError;

/// The kernel notification instance could not be acquired.
#[derive(Error, Debug)]
pub enum InitError {
    /// Per-process inotify instance limit; reported to the user before
    /// the daemon gives up.
    #[error("inotify instances limit reached")]
    InstanceLimit(#[source] io::Error),

    #[error("cannot initialize inotify: {0}")]
    Io(#[from] io::Error),
}

/// Failed outcome of registering one watch root.
#[derive(Error, Debug)]
pub enum RegisterError {
    /// The per-instance watch limit is exhausted; the root stays
    /// unwatchable, the session continues.
    #[error("inotify watches limit reached")]
    WatchLimit,

    /// The path is not a watchable directory (symlink, plain file, or it
    /// vanished between stat and watch). The caller drops the root
    /// silently.
    #[error("not a watchable directory: {0}")]
    Skip(PathBuf),

    /// Unrecoverable; propagates to the main loop.
    #[error("watch installation failed: {0}")]
    Fatal(#[from] io::Error),
}

/// Failure of a root-set update or missing-root re-check; all variants
/// abort the main loop.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    MountTable(#[from] MountTableError),

    #[error("engine failure: {0}")]
    Engine(#[source] io::Error),

    #[error("cannot write to parent: {0}")]
    Output(#[source] io::Error),
}
