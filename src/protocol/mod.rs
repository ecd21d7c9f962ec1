//! Line-oriented parent protocol.
//!
//! The parent process drives the daemon over stdin (`ROOTS` blocks, `EXIT`)
//! and consumes newline-delimited event records on stdout. Input and output
//! are split into submodules; the main loop in [`crate::daemon`] wires them
//! to the watch engine.

pub mod input;
pub mod output;

pub use input::{Command, LineReader, LINE_BUF_LEN};
pub use output::{ChangeKind, OutputSink, INSTANCE_LIMIT_TEXT, WATCH_LIMIT_TEXT};
