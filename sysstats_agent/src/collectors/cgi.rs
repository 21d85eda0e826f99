//! Executable CGI discovery for the `list_cgi` query.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CGI_DIRS: &[&str] = &[
    "/usr/html/axis-cgi",
    "/usr/html/onvif-cgi",
    "/usr/bin",
    "/usr/sbin",
];
pub const MAX_CGI_ENTRIES: usize = 64;
/// Longer paths are skipped.
const MAX_CGI_PATH_LEN: usize = 255;

fn is_owner_executable_file(path: &Path) -> bool {
    // Follows symlinks, so a link to an executable counts.
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o100 != 0,
        Err(_) => false,
    }
}

/// Full paths of visible, owner-executable regular files whose name contains
/// `.cgi`, scanning `dirs` in order. At most `max` entries.
pub fn collect_cgi_list(dirs: &[PathBuf], max: usize) -> Vec<String> {
    let mut out = Vec::new();
    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                debug!("skipping cgi dir {}: {e}", dir.display());
                continue;
            }
        };
        for entry in entries.flatten() {
            if out.len() >= max {
                return out;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !name.contains(".cgi") {
                continue;
            }
            let path = entry.path();
            let Some(path_str) = path.to_str() else {
                continue;
            };
            if path_str.len() > MAX_CGI_PATH_LEN || !is_owner_executable_file(&path) {
                continue;
            }
            out.push(path_str.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::Permissions;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str, mode: u32) {
        let p = dir.join(name);
        fs::write(&p, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&p, Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn lists_only_visible_executable_cgi_files() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "param.cgi", 0o755);
        touch(dir.path(), "io.cgi.bak", 0o700);
        touch(dir.path(), "noexec.cgi", 0o644);
        touch(dir.path(), ".hidden.cgi", 0o755);
        touch(dir.path(), "script.sh", 0o755);
        fs::create_dir(dir.path().join("dir.cgi")).unwrap();

        let mut got = collect_cgi_list(&[dir.path().to_path_buf()], MAX_CGI_ENTRIES);
        got.sort();
        let expected: Vec<String> = ["io.cgi.bak", "param.cgi"]
            .iter()
            .map(|n| dir.path().join(n).to_string_lossy().into_owned())
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn missing_dirs_are_skipped_and_cap_applies() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            touch(dir.path(), &format!("f{i}.cgi"), 0o755);
        }
        let dirs = vec![dir.path().join("absent"), dir.path().to_path_buf()];
        assert_eq!(collect_cgi_list(&dirs, 4).len(), 4);
        assert_eq!(collect_cgi_list(&dirs, 64).len(), 10);
    }
}
