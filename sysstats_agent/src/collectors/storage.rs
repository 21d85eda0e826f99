//! Filesystem usage for the `storage` query.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::StorageInfo;

pub const DEFAULT_STORAGE_PATHS: &[&str] = &[
    "/",
    "/mnt/flash",
    "/usr/lib/persistent",
    "/var/lib",
    "/var/cache",
];
pub const DEFAULT_MOUNTS_PATH: &str = "/proc/self/mounts";
pub const MAX_STORAGE_MOUNTS: usize = 8;

/// Raw block counts from `statvfs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub frsize: u64,
    pub bsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
}

impl BlockStats {
    pub fn usage(&self) -> Usage {
        let bs = if self.frsize != 0 { self.frsize } else { self.bsize };
        let total = self.blocks.saturating_mul(bs);
        let free = self.bfree.saturating_mul(bs);
        let avail = self.bavail.saturating_mul(bs);
        Usage {
            total_kb: total / 1024,
            used_kb: total.saturating_sub(free) / 1024,
            available_kb: avail / 1024,
        }
    }
}

/// Gets filesystem block counts using libc statvfs.
pub fn statvfs(path: &Path) -> io::Result<BlockStats> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs is plain old data; zeroed is a valid initial value.
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and st is a valid out-pointer.
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(BlockStats {
        frsize: st.f_frsize as u64,
        bsize: st.f_bsize as u64,
        blocks: st.f_blocks as u64,
        bfree: st.f_bfree as u64,
        bavail: st.f_bavail as u64,
    })
}

/// Decode the octal escapes (`\040` for space etc.) used in mount tables.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = &bytes[i + 1..i + 4];
            if oct.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let v = oct.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(v) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_component_prefix(mount_point: &str, path: &str) -> bool {
    if mount_point == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(mount_point) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Filesystem type of the longest mount point containing `path`. On equal
/// mount points the later table entry wins, since it shadows earlier ones.
pub fn fs_type_for_path(mounts: &str, path: &str) -> Option<String> {
    let mut best: Option<(usize, String)> = None;
    for line in mounts.lines() {
        let mut it = line.split_whitespace();
        let (Some(_dev), Some(mnt), Some(fstype)) = (it.next(), it.next(), it.next()) else {
            continue;
        };
        let mnt = unescape_mount_field(mnt);
        if !is_component_prefix(&mnt, path) {
            continue;
        }
        if best.as_ref().map_or(true, |(len, _)| mnt.len() >= *len) {
            best = Some((mnt.len(), fstype.to_string()));
        }
    }
    best.map(|(_, fstype)| fstype)
}

/// Usage of each configured path that can be stat'ed, at most [`MAX_STORAGE_MOUNTS`].
pub fn collect_storage(paths: &[PathBuf], mounts_path: &Path) -> Vec<StorageInfo> {
    let mounts = fs::read_to_string(mounts_path).unwrap_or_else(|e| {
        debug!("failed to read {}: {e}", mounts_path.display());
        String::new()
    });

    let mut out = Vec::new();
    for path in paths {
        if out.len() >= MAX_STORAGE_MOUNTS {
            break;
        }
        let stats = match statvfs(path) {
            Ok(s) => s,
            Err(e) => {
                debug!("statvfs({}) failed: {e}", path.display());
                continue;
            }
        };
        let usage = stats.usage();
        let path_str = path.to_string_lossy().into_owned();
        let fs = fs_type_for_path(&mounts, &path_str).unwrap_or_else(|| "unknown".to_string());
        out.push(StorageInfo {
            path: path_str,
            fs,
            total_kb: usage.total_kb,
            used_kb: usage.used_kb,
            available_kb: usage.available_kb,
        });
    }
    out
}
