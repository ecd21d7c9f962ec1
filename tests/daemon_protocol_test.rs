//! End-to-end protocol scenarios against the spawned daemon binary.
//!
//! A reader thread forwards the daemon's stdout line by line over a
//! channel so every expectation carries its own timeout; the harness
//! kills the child on drop to keep failed tests from leaking processes.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use tempfile::TempDir;

const LINE_TIMEOUT: Duration = Duration::from_secs(10);

struct DaemonHarness {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
}

impl DaemonHarness {
    fn start() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_fsnotifier"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");

        let (tx, lines) = unbounded();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self {
            child,
            stdin: Some(stdin),
            lines,
        }
    }

    fn send(&mut self, text: &str) {
        let stdin = self.stdin.as_mut().expect("stdin still open");
        stdin.write_all(text.as_bytes()).expect("write to daemon");
        stdin.flush().expect("flush to daemon");
    }

    /// Closes the daemon's stdin, signalling end-of-stream.
    fn close_input(&mut self) {
        self.stdin.take();
    }

    fn roots(&mut self, roots: &[&str]) {
        let mut block = String::from("ROOTS\n");
        for root in roots {
            block.push_str(root);
            block.push('\n');
        }
        block.push_str("#\n");
        self.send(&block);
    }

    fn expect(&self, expected: &str) {
        match self.lines.recv_timeout(LINE_TIMEOUT) {
            Ok(line) => assert_eq!(line, expected),
            Err(e) => panic!("timed out waiting for {expected:?}: {e}"),
        }
    }

    fn expect_record(&self, kind: &str, path: &Path) {
        self.expect(kind);
        self.expect(&path.display().to_string());
    }

    fn wait_exit(&mut self) {
        let deadline = Instant::now() + LINE_TIMEOUT;
        loop {
            match self.child.try_wait().expect("wait for daemon") {
                Some(status) => {
                    assert_eq!(status.code(), Some(0));
                    return;
                }
                None if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
                None => panic!("daemon did not exit"),
            }
        }
    }

    /// Sends EXIT and asserts a clean shutdown.
    fn expect_clean_exit(mut self) {
        self.send("EXIT\n");
        self.wait_exit();
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_empty_directory_then_create() {
    let dir = TempDir::new().unwrap();
    let mut daemon = DaemonHarness::start();

    daemon.roots(&[&dir.path().display().to_string()]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    let created = dir.path().join("a");
    fs::create_dir(&created).unwrap();
    daemon.expect_record("CREATE", &created);
    daemon.expect_record("CHANGE", &created);

    daemon.expect_clean_exit();
}

#[test]
fn test_refuses_to_watch_root_of_tree() {
    let mut daemon = DaemonHarness::start();
    daemon.roots(&["/"]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("/");
    daemon.expect("#");
    daemon.expect_clean_exit();
}

#[test]
fn test_flat_root_reports_children_only() {
    let dir = TempDir::new().unwrap();
    let mut daemon = DaemonHarness::start();

    daemon.roots(&[&format!("|{}", dir.path().display())]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    let a = dir.path().join("a");
    fs::create_dir(&a).unwrap();
    daemon.expect_record("CREATE", &a);
    daemon.expect_record("CHANGE", &a);

    // a is not watched under a flat root, so only the next event at the
    // top level shows up
    fs::create_dir(a.join("b")).unwrap();
    let c = dir.path().join("c");
    fs::create_dir(&c).unwrap();
    daemon.expect_record("CREATE", &c);
    daemon.expect_record("CHANGE", &c);

    daemon.expect_clean_exit();
}

#[test]
fn test_trailing_slash_is_stripped() {
    let dir = TempDir::new().unwrap();
    let mut daemon = DaemonHarness::start();

    daemon.roots(&[&format!("{}/", dir.path().display())]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    let created = dir.path().join("a");
    fs::create_dir(&created).unwrap();
    daemon.expect_record("CREATE", &created);
    daemon.expect_record("CHANGE", &created);

    daemon.expect_clean_exit();
}

#[test]
fn test_missing_root_appears_later() {
    let dir = TempDir::new().unwrap();
    let ghost = dir.path().join("ghost");
    let mut daemon = DaemonHarness::start();

    daemon.roots(&[&ghost.display().to_string()]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    // the missing-root tick runs once a second
    fs::create_dir(&ghost).unwrap();
    daemon.expect_record("CREATE", &ghost);
    daemon.expect_record("CHANGE", &ghost);

    daemon.expect_clean_exit();
}

#[test]
fn test_deleted_root_reported_and_recovered() {
    let parent = TempDir::new().unwrap();
    let root = parent.path().join("w");
    fs::create_dir(&root).unwrap();
    let mut daemon = DaemonHarness::start();

    daemon.roots(&[&root.display().to_string()]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    fs::remove_dir(&root).unwrap();
    daemon.expect_record("DELETE", &root);

    fs::create_dir(&root).unwrap();
    daemon.expect_record("CREATE", &root);
    daemon.expect_record("CHANGE", &root);

    daemon.expect_clean_exit();
}

#[test]
fn test_roots_update_reports_new_unwatchable_block() {
    let dir = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    let mut daemon = DaemonHarness::start();

    daemon.roots(&[&dir.path().display().to_string()]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    daemon.roots(&[&other.path().display().to_string()]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    // the first root is no longer watched
    fs::create_dir(dir.path().join("ignored")).unwrap();
    let seen = other.path().join("seen");
    fs::create_dir(&seen).unwrap();
    daemon.expect_record("CREATE", &seen);
    daemon.expect_record("CHANGE", &seen);

    daemon.expect_clean_exit();
}

#[test]
fn test_exit_on_closed_input() {
    let mut daemon = DaemonHarness::start();
    daemon.roots(&["/nonexistent-root-for-exit-test"]);
    daemon.expect("UNWATCHEABLE");
    daemon.expect("#");

    // closing the pipe is end-of-stream; the daemon exits cleanly
    daemon.close_input();
    daemon.wait_exit();
}

#[test]
fn test_version_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_fsnotifier"))
        .arg("--version")
        .output()
        .expect("run --version");
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_flag_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_fsnotifier"))
        .arg("--bogus")
        .output()
        .expect("run with bad flag");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_selftest_exits_cleanly() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_fsnotifier"))
        .arg("--selftest")
        .current_dir(dir.path())
        .output()
        .expect("run --selftest");
    assert_eq!(output.status.code(), Some(0));
}
