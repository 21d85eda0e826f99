//! Command-line arguments for sysstats_agent.
//!
//! Every flag has a `SYSSTATS_AGENT_*` environment fallback; explicit flags win.

use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::collectors::storage::DEFAULT_MOUNTS_PATH;
use crate::config::{
    AgentConfig, ConfigError, DEFAULT_LIST_LIMIT, DEFAULT_MAX_CLIENTS, DEFAULT_MAX_PROCESSES,
    DEFAULT_MESSAGE_LIMIT, DEFAULT_PORT, DEFAULT_SAMPLE_INTERVAL_MS, DEFAULT_SEND_INTERVAL_MS,
};
use crate::procfs::DEFAULT_PROC_ROOT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "sysstats_agent",
    about = "Streams host CPU, memory, load and per-process stats as JSON over WebSocket",
    version
)]
pub struct Args {
    /// WebSocket listen port
    #[arg(short = 'p', long, env = "SYSSTATS_AGENT_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Bind to specific interface/IP
    #[arg(long, env = "SYSSTATS_AGENT_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Concurrent WebSocket clients (handshakes in progress count too)
    #[arg(long, env = "SYSSTATS_AGENT_MAX_CLIENTS", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: u32,

    /// Byte ceiling of one streamed stats frame
    #[arg(long, env = "SYSSTATS_AGENT_MESSAGE_LIMIT", default_value_t = DEFAULT_MESSAGE_LIMIT)]
    pub message_limit: usize,

    /// Byte ceiling of one-shot list replies
    #[arg(long, env = "SYSSTATS_AGENT_LIST_LIMIT", default_value_t = DEFAULT_LIST_LIMIT)]
    pub list_limit: usize,

    /// Most process names returned by `list_processes`
    #[arg(long, env = "SYSSTATS_AGENT_MAX_PROCESSES", default_value_t = DEFAULT_MAX_PROCESSES)]
    pub max_processes: usize,

    #[arg(long, env = "SYSSTATS_AGENT_SAMPLE_INTERVAL_MS", default_value_t = DEFAULT_SAMPLE_INTERVAL_MS)]
    pub sample_interval_ms: u64,

    #[arg(long, env = "SYSSTATS_AGENT_SEND_INTERVAL_MS", default_value_t = DEFAULT_SEND_INTERVAL_MS)]
    pub send_interval_ms: u64,

    /// Root of the proc filesystem
    #[arg(long, env = "SYSSTATS_AGENT_PROC_ROOT", default_value = DEFAULT_PROC_ROOT)]
    pub proc_root: PathBuf,

    /// Mount table used to resolve filesystem types
    #[arg(long, env = "SYSSTATS_AGENT_MOUNTS", default_value = DEFAULT_MOUNTS_PATH)]
    pub mounts_path: PathBuf,

    /// Path reported by `storage` (repeatable; replaces the built-in list)
    #[arg(long = "storage-path", value_name = "PATH")]
    pub storage_paths: Vec<PathBuf>,

    /// Directory scanned by `list_cgi` (repeatable; replaces the built-in list)
    #[arg(long = "cgi-dir", value_name = "DIR")]
    pub cgi_dirs: Vec<PathBuf>,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, env = "SYSSTATS_AGENT_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,
}

impl Args {
    pub fn into_config(self) -> Result<AgentConfig, ConfigError> {
        let defaults = AgentConfig::default();
        let config = AgentConfig {
            bind: self.bind,
            port: self.port,
            max_clients: self.max_clients,
            message_limit: self.message_limit,
            list_limit: self.list_limit,
            max_processes: self.max_processes,
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            send_interval: Duration::from_millis(self.send_interval_ms),
            proc_root: self.proc_root,
            mounts_path: self.mounts_path,
            os_release_paths: defaults.os_release_paths,
            storage_paths: if self.storage_paths.is_empty() {
                defaults.storage_paths
            } else {
                self.storage_paths
            },
            cgi_dirs: if self.cgi_dirs.is_empty() {
                defaults.cgi_dirs
            } else {
                self.cgi_dirs
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_into_config() {
        let c = Args::try_parse_from(["sysstats_agent"]).unwrap().into_config().unwrap();
        assert_eq!(c.max_clients, 10);
        assert_eq!(c.storage_paths.len(), 5);
        assert_eq!(c.send_interval, Duration::from_millis(500));
    }

    #[test]
    fn repeatable_paths_replace_defaults() {
        let args = Args::try_parse_from([
            "sysstats_agent",
            "--storage-path",
            "/data",
            "--storage-path",
            "/",
            "--cgi-dir",
            "/srv/cgi",
        ])
        .unwrap();
        let c = args.into_config().unwrap();
        assert_eq!(c.storage_paths, vec![PathBuf::from("/data"), PathBuf::from("/")]);
        assert_eq!(c.cgi_dirs, vec![PathBuf::from("/srv/cgi")]);
    }

    #[test]
    fn zero_interval_is_a_config_error() {
        let args = Args::try_parse_from(["sysstats_agent", "--sample-interval-ms", "0"]).unwrap();
        assert_eq!(args.into_config().unwrap_err(), ConfigError::Zero("sample interval"));
    }

    #[test]
    fn log_level_values() {
        let args = Args::try_parse_from(["sysstats_agent", "--log-level", "debug"]).unwrap();
        assert_eq!(args.log_level.as_filter(), "debug");
        assert!(Args::try_parse_from(["sysstats_agent", "--log-level", "loud"]).is_err());
    }
}
