//! One-shot collectors answering discovery queries.
//!
//! Nothing here is cached: every request rebuilds its list from the live
//! system, so results always reflect the moment of the query.

pub mod cgi;
pub mod processes;
pub mod storage;
pub mod system;

use std::sync::Arc;
use tracing::debug;

use crate::config::AgentConfig;
use crate::procfs::{ProcFs, CPU_CORES};
use crate::types::{StorageInfo, SystemInfo};

/// Collector entry points bound to the agent's configured paths and limits.
#[derive(Debug)]
pub struct Discovery {
    config: Arc<AgentConfig>,
    procfs: ProcFs,
}

impl Discovery {
    pub fn new(config: Arc<AgentConfig>, procfs: ProcFs) -> Self {
        Self { config, procfs }
    }

    pub fn process_names(&self) -> Vec<String> {
        processes::collect_process_names(&self.procfs, self.config.max_processes)
    }

    pub fn storage(&self) -> Vec<StorageInfo> {
        storage::collect_storage(&self.config.storage_paths, &self.config.mounts_path)
    }

    pub fn system_info(&self) -> Option<SystemInfo> {
        match system::read_system_info(&self.config.os_release_paths, *CPU_CORES) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("uname failed: {e}");
                None
            }
        }
    }

    pub fn cgi(&self) -> Vec<String> {
        cgi::collect_cgi_list(&self.config.cgi_dirs, cgi::MAX_CGI_ENTRIES)
    }
}
