//! Byte-level path predicates used by the registry and the engine.
//!
//! All comparisons here operate on raw bytes: the parent protocol hands us
//! paths verbatim and the kernel reports names verbatim, so no normalization
//! (no `..` resolution, no symlink resolution, no trailing-slash folding)
//! ever happens on this layer.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Sentinel prefix marking a non-recursive ("flat") watch root.
pub const FLAT_SENTINEL: u8 = b'|';

/// Returns true iff `child` equals `parent` or starts with `parent`
/// followed by `/`.
///
/// A path is considered its own parent; callers that mean "strictly under"
/// pair this with an equality check.
pub fn is_parent_path(parent: &Path, child: &Path) -> bool {
    let parent = parent.as_os_str().as_bytes();
    let child = child.as_os_str().as_bytes();
    child.starts_with(parent) && (child.len() == parent.len() || child[parent.len()] == b'/')
}

/// Splits the flat-watch sentinel off a raw root line.
///
/// Returns `(flat, effective_path)`; the effective path is the line with
/// the leading `|` removed, or the line itself when no sentinel is present.
pub fn split_flat(raw: &OsStr) -> (bool, &Path) {
    let bytes = raw.as_bytes();
    if bytes.first() == Some(&FLAT_SENTINEL) {
        (true, Path::new(OsStr::from_bytes(&bytes[1..])))
    } else {
        (false, Path::new(raw))
    }
}

/// Replaces `\n` bytes inside a path with `\0` so the path fits on one
/// protocol line. The parent cannot parse an escape, so the reported path
/// is effectively truncated at the first newline.
pub fn scrub_newlines(path: &Path) -> Vec<u8> {
    let mut bytes = path.as_os_str().as_bytes().to_vec();
    for b in &mut bytes {
        if *b == b'\n' {
            *b = b'\0';
        }
    }
    bytes
}
