//! Event output: the record stream the parent consumes.
//!
//! Every complete message is flushed immediately; the parent blocks on
//! this stream and must stay responsive. Change records always reach the
//! stream; control messages (RESET, MESSAGE, UNWATCHEABLE, GIVEUP) are
//! suppressed in self-test mode, where no parent is listening.

use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::paths::scrub_newlines;

/// User-facing notification shown when the per-process inotify instance
/// limit prevents the daemon from starting.
pub const INSTANCE_LIMIT_TEXT: &str =
    "The <b>inotify</b>(7) instances limit is reached; file watching is unavailable.";

/// User-facing notification shown (once per session) when the watch limit
/// leaves part of the tree unwatched.
pub const WATCH_LIMIT_TEXT: &str =
    "The current <b>inotify</b>(7) watches limit is too low; some directories are not watched.";

/// Per-path change record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Change,
    Delete,
    Stats,
}

impl ChangeKind {
    fn label(self) -> &'static str {
        match self {
            ChangeKind::Create => "CREATE",
            ChangeKind::Change => "CHANGE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::Stats => "STATS",
        }
    }
}

/// Writes protocol records to the parent's stream.
pub struct OutputSink<W> {
    out: W,
    quiet: bool,
}

impl<W: Write> OutputSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, quiet: false }
    }

    /// Self-test sink: change records still print, control messages do not.
    pub fn quiet(out: W) -> Self {
        Self { out, quiet: true }
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Emits `KIND\n<path>\n`. Newlines inside the path are replaced with
    /// `\0` so the record stays two lines.
    pub fn change(&mut self, kind: ChangeKind, path: &Path) -> io::Result<()> {
        tracing::debug!("{}: {}", kind.label(), path.display());
        self.out.write_all(kind.label().as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.write_all(&scrub_newlines(path))?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }

    /// Emits the create-then-change pair used for paths the parent has not
    /// seen yet (new directories, restored roots).
    pub fn created(&mut self, path: &Path) -> io::Result<()> {
        self.change(ChangeKind::Create, path)?;
        self.change(ChangeKind::Change, path)
    }

    /// Tells the parent to drop its cached state and rescan.
    pub fn reset(&mut self) -> io::Result<()> {
        tracing::debug!("RESET");
        self.control(b"RESET\n")
    }

    /// Emits a user-facing notification.
    pub fn message(&mut self, text: &str) -> io::Result<()> {
        self.control(format!("MESSAGE\n{text}\n").as_bytes())
    }

    /// Emits one UNWATCHEABLE block; the body may be empty.
    pub fn unwatchable(&mut self, paths: &[&Path]) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.out.write_all(b"UNWATCHEABLE\n")?;
        for path in paths {
            tracing::info!("unwatchable: {}", path.display());
            self.out.write_all(path.as_os_str().as_bytes())?;
            self.out.write_all(b"\n")?;
        }
        self.out.write_all(b"#\n")?;
        self.out.flush()
    }

    /// Fatal: the engine could not be initialized.
    pub fn give_up(&mut self) -> io::Result<()> {
        self.control(b"GIVEUP\n")
    }

    fn control(&mut self, record: &[u8]) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.out.write_all(record)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sink() -> OutputSink<Vec<u8>> {
        OutputSink::new(Vec::new())
    }

    #[test]
    fn test_change_record() {
        let mut s = sink();
        s.change(ChangeKind::Create, Path::new("/tmp/x/a")).unwrap();
        assert_eq!(s.out, b"CREATE\n/tmp/x/a\n");
    }

    #[test]
    fn test_change_record_scrubs_newline() {
        let mut s = sink();
        s.change(ChangeKind::Delete, Path::new("/tmp/a\nb")).unwrap();
        assert_eq!(s.out, b"DELETE\n/tmp/a\0b\n");
    }

    #[test]
    fn test_created_pair() {
        let mut s = sink();
        s.created(Path::new("/tmp/x")).unwrap();
        assert_eq!(s.out, b"CREATE\n/tmp/x\nCHANGE\n/tmp/x\n");
    }

    #[test]
    fn test_unwatchable_block() {
        let mut s = sink();
        let paths = [PathBuf::from("/proc"), PathBuf::from("/mnt/nfs")];
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        s.unwatchable(&refs).unwrap();
        assert_eq!(s.out, b"UNWATCHEABLE\n/proc\n/mnt/nfs\n#\n");
    }

    #[test]
    fn test_unwatchable_block_empty() {
        let mut s = sink();
        s.unwatchable(&[]).unwrap();
        assert_eq!(s.out, b"UNWATCHEABLE\n#\n");
    }

    #[test]
    fn test_message_and_reset() {
        let mut s = sink();
        s.message("hello").unwrap();
        s.reset().unwrap();
        assert_eq!(s.out, b"MESSAGE\nhello\nRESET\n");
    }

    #[test]
    fn test_quiet_suppresses_control_but_not_records() {
        let mut s = OutputSink::quiet(Vec::new());
        s.reset().unwrap();
        s.give_up().unwrap();
        s.unwatchable(&[]).unwrap();
        s.change(ChangeKind::Change, Path::new("/tmp/x")).unwrap();
        assert_eq!(s.out, b"CHANGE\n/tmp/x\n");
    }
}
