//! The main loop: multiplexes the parent's command stream and the kernel
//! event stream from a single thread.
//!
//! All blocking happens at one poll(2) call, bounded by the missing-root
//! timeout. Each iteration starts with a short fixed delay so bursts of
//! filesystem activity coalesce into one drain. Commands take priority
//! over events, and a root-set update runs to completion before any
//! further events are dispatched.

use std::env;
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use inotify::EventMask;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use thiserror::Error;

use crate::protocol::{ChangeKind, Command, LineReader, OutputSink, WATCH_LIMIT_TEXT};
use crate::watcher::{Engine, RootRegistry, UpdateError};

/// Fixed pre-wait delay per iteration, coalescing event bursts.
const LOOP_DELAY: Duration = Duration::from_millis(50);

/// Poll timeout driving the missing-root re-check.
const MISSING_ROOT_TIMEOUT_MS: u16 = 1000;

/// Unrecoverable main-loop failures; the process exits with status 3.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("poll failed: {0}")]
    Poll(#[source] Errno),

    #[error("cannot read command: {0}")]
    Input(#[source] io::Error),

    #[error("cannot read events: {0}")]
    Events(#[source] io::Error),

    #[error("cannot write to parent: {0}")]
    Output(#[source] io::Error),

    #[error(transparent)]
    Update(#[from] UpdateError),
}

enum Wait {
    Input,
    Events,
    Tick,
    Interrupted,
}

/// Owns the engine, the registry and both protocol streams.
pub struct Daemon<R, W> {
    engine: Engine,
    registry: RootRegistry,
    reader: LineReader<R>,
    out: OutputSink<W>,
}

impl<R: io::Read + AsFd, W: Write> Daemon<R, W> {
    pub fn new(engine: Engine, reader: LineReader<R>, out: OutputSink<W>) -> Self {
        Self {
            engine,
            registry: RootRegistry::new(),
            reader,
            out,
        }
    }

    /// Runs until the parent sends `EXIT`, closes its stream, or a fatal
    /// error occurs. All roots are unregistered on every exit path.
    pub fn run(&mut self) -> Result<(), LoopError> {
        let result = self.main_loop();
        self.registry.unregister_all(&mut self.engine);
        result
    }

    fn main_loop(&mut self) -> Result<(), LoopError> {
        loop {
            thread::sleep(LOOP_DELAY);

            let wait = if self.reader.has_buffered_line() {
                Wait::Input
            } else {
                self.wait()?
            };

            match wait {
                Wait::Input => {
                    if !self.handle_input()? {
                        tracing::info!("exiting");
                        return Ok(());
                    }
                }
                Wait::Events => self.handle_events()?,
                Wait::Tick => {
                    self.registry.check_missing(&mut self.engine, &mut self.out)?;
                }
                Wait::Interrupted => {}
            }
        }
    }

    /// Registers the current working directory once and exits; used by
    /// `--selftest` to verify that watches can be installed at all.
    pub fn self_test(&mut self) -> Result<(), LoopError> {
        let result = self.self_test_inner();
        self.registry.unregister_all(&mut self.engine);
        result
    }

    fn self_test_inner(&mut self) -> Result<(), LoopError> {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.registry
            .update(vec![cwd.into_os_string()], &mut self.engine, &mut self.out)?;
        self.emit_limit_notice()
    }

    fn wait(&mut self) -> Result<Wait, LoopError> {
        let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        let input_fd = self.reader.get_ref().as_fd();
        let engine_fd = self.engine.fd();
        let mut fds = [
            PollFd::new(input_fd, PollFlags::POLLIN),
            PollFd::new(engine_fd, PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::from(MISSING_ROOT_TIMEOUT_MS)) {
            Err(Errno::EINTR) => Ok(Wait::Interrupted),
            Err(e) => Err(LoopError::Poll(e)),
            Ok(0) => Ok(Wait::Tick),
            Ok(_) => {
                if fds[0].revents().is_some_and(|r| r.intersects(ready)) {
                    Ok(Wait::Input)
                } else if fds[1].revents().is_some_and(|r| r.intersects(ready)) {
                    Ok(Wait::Events)
                } else {
                    Ok(Wait::Tick)
                }
            }
        }
    }

    /// Handles one command; returns false when the daemon should exit.
    fn handle_input(&mut self) -> Result<bool, LoopError> {
        match self.reader.read_command().map_err(LoopError::Input)? {
            Command::Exit => Ok(false),
            Command::Roots(roots) => {
                self.registry.update(roots, &mut self.engine, &mut self.out)?;
                self.emit_limit_notice()?;
                Ok(true)
            }
            Command::Unknown(line) => {
                tracing::warn!("unrecognized command: {}", line.to_string_lossy());
                Ok(true)
            }
        }
    }

    fn handle_events(&mut self) -> Result<(), LoopError> {
        let mut vanished: Vec<PathBuf> = Vec::new();
        let mut write_error: Option<io::Error> = None;

        let engine = &mut self.engine;
        let out = &mut self.out;
        engine
            .process_events(&mut |path, mask| {
                if write_error.is_some() {
                    return;
                }
                if let Err(e) = dispatch(out, &mut vanished, path, mask) {
                    write_error = Some(e);
                }
            })
            .map_err(LoopError::Events)?;

        if let Some(e) = write_error {
            return Err(LoopError::Output(e));
        }
        for path in vanished {
            self.registry
                .on_root_vanished(&path, &mut self.engine, &mut self.out)?;
        }
        self.emit_limit_notice()
    }

    fn emit_limit_notice(&mut self) -> Result<(), LoopError> {
        if self.engine.take_watch_limit_notice() {
            self.out
                .message(WATCH_LIMIT_TEXT)
                .map_err(LoopError::Output)?;
        }
        Ok(())
    }
}

/// Translates one kernel event mask into parent-visible records. Self
/// events on roots are collected for the registry to process after the
/// drain.
fn dispatch<W: Write>(
    out: &mut OutputSink<W>,
    vanished: &mut Vec<PathBuf>,
    path: &Path,
    mask: EventMask,
) -> io::Result<()> {
    if mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
        out.created(path)?;
    } else if mask.contains(EventMask::MODIFY) {
        out.change(ChangeKind::Change, path)?;
    } else if mask.contains(EventMask::ATTRIB) {
        out.change(ChangeKind::Stats, path)?;
    } else if mask.intersects(EventMask::DELETE | EventMask::MOVED_FROM) {
        out.change(ChangeKind::Delete, path)?;
    }

    if mask.intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF) {
        vanished.push(path.to_path_buf());
    } else if mask.intersects(EventMask::UNMOUNT | EventMask::Q_OVERFLOW) {
        out.reset()?;
    }
    Ok(())
}
