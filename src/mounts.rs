//! Mount-table inspection.
//!
//! The daemon must not install watches on pseudo, network, or user-space
//! filesystems: inotify either cannot deliver events there or burns
//! through the watch limit with nothing useful. This module reads the
//! kernel mount table and returns the mount points whose filesystem type
//! is unwatchable; the registry turns those into per-root exclusions.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use thiserror::Error;

const MOUNT_TABLE: &str = "/proc/mounts";

/// Mount table could not be read. The registry treats this as fatal for
/// the whole update cycle.
#[derive(Error, Debug)]
#[error("cannot read {path}: {source}")]
pub struct MountTableError {
    path: String,
    #[source]
    source: std::io::Error,
}

/// Returns the mount points of all currently mounted unwatchable
/// filesystems.
pub fn unwatchable_mounts() -> Result<Vec<PathBuf>, MountTableError> {
    let table = fs::read_to_string(MOUNT_TABLE).map_err(|source| MountTableError {
        path: MOUNT_TABLE.to_string(),
        source,
    })?;
    Ok(parse_unwatchable(&table))
}

/// Parses mount-table text (one `device point type options …` line per
/// mount) and collects the unwatchable mount points.
fn parse_unwatchable(table: &str) -> Vec<PathBuf> {
    let mut mounts = Vec::new();
    for line in table.lines() {
        let mut fields = line.split_ascii_whitespace();
        let (Some(_device), Some(point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        tracing::debug!("mount: {point} : {fs_type}");
        if fs_type != "ignore" && !is_watchable(fs_type) {
            mounts.push(PathBuf::from(OsString::from_vec(unescape_octal(point))));
        }
    }
    mounts
}

/// Whether inotify watches on the given filesystem type are worth
/// installing.
fn is_watchable(fs_type: &str) -> bool {
    !(fs_type.starts_with("dev")
        || fs_type == "proc"
        || fs_type == "sysfs"
        || fs_type == "swap"
        || fs_type == "cifs"
        || fs_type == "nfs"
        || (fs_type.starts_with("fuse") && fs_type != "fuseblk"))
}

/// Decodes the `\040`-style octal escapes getmntent(3) uses for spaces,
/// tabs, newlines and backslashes in mount points.
fn unescape_octal(field: &str) -> Vec<u8> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let octal = &bytes[i + 1..i + 4];
            if octal.iter().all(|b| (b'0'..=b'7').contains(b)) {
                out.push((octal[0] - b'0') * 64 + (octal[1] - b'0') * 8 + (octal[2] - b'0'));
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
