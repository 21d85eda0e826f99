//! Running-process names for the `list_processes` query.

use std::collections::HashSet;

use crate::procfs::ProcFs;

/// Unique short names of user-space processes, in proc-root order, at most `max`.
/// Kernel threads (`[...]`) and empty names are skipped; the first occurrence
/// of a name wins.
pub fn collect_process_names(procfs: &ProcFs, max: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    if max == 0 {
        return names;
    }
    for pid in procfs.pids() {
        let Some(name) = procfs.comm(pid) else {
            continue;
        };
        if name.is_empty() || name.starts_with('[') || seen.contains(&name) {
            continue;
        }
        seen.insert(name.clone());
        names.push(name);
        if names.len() >= max {
            break;
        }
    }
    names
}
