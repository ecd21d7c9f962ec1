//! fsnotifier: an IDE companion daemon that watches a dynamic set of
//! filesystem roots recursively and reports changes over a line-oriented
//! stdin/stdout protocol.

pub mod config;
pub mod daemon;
pub mod logging;
pub mod mounts;
pub mod paths;
pub mod protocol;
pub mod watcher;

pub use daemon::{Daemon, LoopError};
pub use protocol::{Command, LineReader, OutputSink};
pub use watcher::{Engine, RootRegistry};
