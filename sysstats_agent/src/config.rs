//! Runtime configuration: defaults and validation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::collectors::cgi::DEFAULT_CGI_DIRS;
use crate::collectors::storage::{DEFAULT_MOUNTS_PATH, DEFAULT_STORAGE_PATHS};
use crate::collectors::system::OS_RELEASE_PATHS;
use crate::procfs::DEFAULT_PROC_ROOT;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_CLIENTS: u32 = 10;
/// Ceiling for one streamed stats frame.
pub const DEFAULT_MESSAGE_LIMIT: usize = 1024;
/// Ceiling for one-shot list replies.
pub const DEFAULT_LIST_LIMIT: usize = 8192;
pub const DEFAULT_MAX_PROCESSES: usize = 256;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub max_clients: u32,
    pub message_limit: usize,
    pub list_limit: usize,
    pub max_processes: usize,
    pub sample_interval: Duration,
    pub send_interval: Duration,
    pub proc_root: PathBuf,
    pub mounts_path: PathBuf,
    pub os_release_paths: Vec<PathBuf>,
    pub storage_paths: Vec<PathBuf>,
    pub cgi_dirs: Vec<PathBuf>,
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            message_limit: DEFAULT_MESSAGE_LIMIT,
            list_limit: DEFAULT_LIST_LIMIT,
            max_processes: DEFAULT_MAX_PROCESSES,
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            send_interval: Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            mounts_path: PathBuf::from(DEFAULT_MOUNTS_PATH),
            os_release_paths: paths(OS_RELEASE_PATHS),
            storage_paths: paths(DEFAULT_STORAGE_PATHS),
            cgi_dirs: paths(DEFAULT_CGI_DIRS),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("max clients", self.max_clients == 0),
            ("message limit", self.message_limit == 0),
            ("list limit", self.list_limit == 0),
            ("sample interval", self.sample_interval.is_zero()),
            ("send interval", self.send_interval.is_zero()),
        ];
        match checks.iter().find(|(_, bad)| *bad) {
            Some((what, _)) => Err(ConfigError::Zero(*what)),
            None => Ok(()),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
