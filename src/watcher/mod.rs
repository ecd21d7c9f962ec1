//! Recursive inotify watch engine.
//!
//! One kernel notification instance serves every watch root. The engine
//! installs a watch per directory, keeps a wd-keyed node tree to turn bare
//! descriptors back into absolute paths, and replays structural changes
//! (new subtrees, vanished directories, queue overflow) into the event
//! callback. The registry above it owns the mapping from the parent's
//! root set to engine-side root slots.
//!
//! ```text
//! RootRegistry
//!   - current root set, set-diff updates
//!   - missing-root re-checks, vanish handling
//!         |
//!       Engine
//!   - inotify instance + wd table
//!   - recursive walk, mount excludes
//!   - event drain + path reconstruction
//! ```

mod engine;
mod error;
mod roots;
mod tree;

pub use engine::{Engine, EventSink, Registration};
pub use error::{InitError, RegisterError, UpdateError};
pub use roots::RootRegistry;
pub use tree::RootId;
