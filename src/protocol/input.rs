//! Command input: buffered line reading and command parsing.
//!
//! Lines are raw bytes; root paths are allowed to be arbitrary non-UTF-8
//! byte strings. The reader keeps its own buffer (stdin's built-in
//! buffering would hide pending commands from the poll loop), and exposes
//! [`LineReader::has_buffered_line`] so the loop can drain everything that
//! arrived in one read before blocking again.

use std::ffi::OsString;
use std::io::{self, ErrorKind, Read};
use std::os::unix::ffi::OsStringExt;

/// Input buffer size. Lines longer than this are split, not coalesced;
/// the protocol has no long-line commands, so a split line simply parses
/// as an unrecognized command.
pub const LINE_BUF_LEN: usize = 2048;

/// One parsed command from the parent.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Terminate cleanly. Also produced by end-of-stream, and by an empty
    /// line or end-of-stream inside a `ROOTS` block.
    Exit,
    /// Replace the root set. Each entry is a raw root line with the flat
    /// sentinel preserved and any trailing `/` already stripped.
    Roots(Vec<OsString>),
    /// Anything else; logged and ignored by the caller.
    Unknown(OsString),
}

/// Reads logical lines (LF-terminated, CR/LF trimmed) from a byte stream.
pub struct LineReader<R> {
    src: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            buf: Vec::with_capacity(LINE_BUF_LEN),
            eof: false,
        }
    }

    /// Reads one line, blocking until a full line is available.
    ///
    /// Returns `Ok(None)` at end-of-stream; a partial line terminated by
    /// end-of-stream is discarded. An empty line is `Ok(Some(vec![]))`,
    /// distinct from end-of-stream.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            if self.buf.len() >= LINE_BUF_LEN {
                // over-long line: hand out a buffer's worth, rest follows
                return Ok(Some(self.buf.drain(..LINE_BUF_LEN).collect()));
            }
            if self.eof {
                self.buf.clear();
                return Ok(None);
            }
            let mut chunk = [0u8; 512];
            match self.src.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether a complete line is already buffered, so the caller can
    /// consume it without waiting on the underlying descriptor.
    pub fn has_buffered_line(&self) -> bool {
        self.buf.contains(&b'\n') || self.buf.len() >= LINE_BUF_LEN
    }

    /// The underlying stream, e.g. for multiplexing on its descriptor.
    pub fn get_ref(&self) -> &R {
        &self.src
    }

    /// Reads and parses one command. A `ROOTS` block is consumed through
    /// its `#` terminator before this returns.
    pub fn read_command(&mut self) -> io::Result<Command> {
        let Some(line) = self.read_line()? else {
            tracing::info!("input closed");
            return Ok(Command::Exit);
        };
        tracing::debug!("input: {}", String::from_utf8_lossy(&line));

        if line.as_slice() == b"EXIT" {
            Ok(Command::Exit)
        } else if line.as_slice() == b"ROOTS" {
            self.read_roots_block()
        } else {
            Ok(Command::Unknown(OsString::from_vec(line)))
        }
    }

    fn read_roots_block(&mut self) -> io::Result<Command> {
        let mut roots = Vec::new();
        loop {
            let Some(mut line) = self.read_line()? else {
                return Ok(Command::Exit);
            };
            tracing::debug!("input: {}", String::from_utf8_lossy(&line));
            if line.is_empty() {
                return Ok(Command::Exit);
            }
            if line.as_slice() == b"#" {
                return Ok(Command::Roots(roots));
            }
            if line.len() > 1 && line.last() == Some(&b'/') {
                line.pop();
            }
            roots.push(OsString::from_vec(line));
        }
    }
}
