//! Static system identity for the `system_info` query.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

use crate::types::SystemInfo;

pub const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub pretty_name: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uname {
    pub release: String,
    pub version: String,
    pub machine: String,
}

fn strip_quotes(v: &str) -> &str {
    let v = v.trim();
    for q in ['"', '\''] {
        if let Some(inner) = v.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    v
}

/// Pick `PRETTY_NAME`, `NAME` and `VERSION` out of an os-release file.
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut out = OsRelease::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = strip_quotes(value);
        if value.is_empty() {
            continue;
        }
        let slot = match key.trim() {
            "PRETTY_NAME" => &mut out.pretty_name,
            "NAME" => &mut out.name,
            "VERSION" => &mut out.version,
            _ => continue,
        };
        *slot = Some(value.to_string());
    }
    out
}

/// First candidate that can be read wins; later ones are fallbacks.
pub fn read_os_release(candidates: &[PathBuf]) -> OsRelease {
    for path in candidates {
        match fs::read_to_string(path) {
            Ok(content) => return parse_os_release(&content),
            Err(e) => debug!("failed to read {}: {e}", path.display()),
        }
    }
    OsRelease::default()
}

fn utsname_field(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn uname() -> io::Result<Uname> {
    // SAFETY: utsname is plain old data; zeroed is a valid initial value.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    // SAFETY: uts is a valid, writable utsname.
    if unsafe { libc::uname(&mut uts) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Uname {
        release: utsname_field(&uts.release),
        version: utsname_field(&uts.version),
        machine: utsname_field(&uts.machine),
    })
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_default()
}

/// Build the identity record. Fails only when `uname` does.
pub fn read_system_info(os_release_paths: &[PathBuf], cpu_cores: u32) -> io::Result<SystemInfo> {
    let uts = uname()?;
    Ok(build_system_info(uts, hostname(), read_os_release(os_release_paths), cpu_cores))
}

fn build_system_info(uts: Uname, hostname: String, os: OsRelease, cpu_cores: u32) -> SystemInfo {
    // PRETTY_NAME already carries name and version.
    let (os_pretty_name, os_name, os_version) = match os.pretty_name {
        Some(pretty) => (Some(pretty), None, None),
        None => (None, os.name, os.version),
    };
    SystemInfo {
        kernel_release: uts.release,
        kernel_version: uts.version,
        machine: uts.machine,
        hostname,
        os_pretty_name,
        os_name,
        os_version,
        cpu_cores,
    }
}
