//! CLI arguments and the immutable runtime configuration derived from them.

use clap::Parser;
use shadow_rs::formatcp;
use std::path::{Path, PathBuf};

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_LISTEN_ADDR: &str = ":80";
pub const DEFAULT_MEMORY_LIMIT: u64 = 10 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "sumdrop", version = VERSION_INFO, about = "Checksum-named file drop server")]
pub struct Args {
    #[arg(
        short = 'a',
        long,
        env = "SUMDROP_ADDR",
        default_value = DEFAULT_LISTEN_ADDR,
        help = "Address on which the server listens"
    )]
    pub addr: String,
    #[arg(short = 'l', long, env = "SUMDROP_LOG", help = "Path to log file (default: stderr)")]
    pub log: Option<PathBuf>,
    #[arg(
        short = 'o',
        long,
        env = "SUMDROP_OUT",
        help = "Output directory for uploaded files (default: working directory)"
    )]
    pub out: Option<PathBuf>,
    #[arg(
        long,
        env = "SUMDROP_MEMORY_LIMIT",
        default_value_t = DEFAULT_MEMORY_LIMIT,
        help = "Bytes of upload content kept in memory per request before spilling to temp files"
    )]
    pub memory_limit: u64,
    #[arg(
        long,
        env = "SUMDROP_MAX_BODY_SIZE",
        default_value_t = 0,
        help = "Max request body size in bytes (0 to disable)"
    )]
    pub max_body_size: u64,
}

/// Settings fixed at startup and shared read-only by every request.
#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    pub output_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub memory_limit: usize,
    pub max_body_size: u64,
}

impl Args {
    /// Resolves relative paths against `cwd` and normalizes the listen address.
    pub fn into_config(self, cwd: &Path) -> Config {
        Config {
            listen_addr: normalize_listen_addr(&self.addr),
            output_dir: self
                .out
                .map(|out| resolve_path(cwd, out))
                .unwrap_or_else(|| cwd.to_path_buf()),
            log_file: self.log.map(|log| resolve_path(cwd, log)),
            memory_limit: usize::try_from(self.memory_limit).unwrap_or(usize::MAX),
            max_body_size: self.max_body_size,
        }
    }
}

fn resolve_path(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

/// `:8080` style addresses listen on every interface, IPv6 and (dual-stack) IPv4.
pub fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("[::]{addr}")
    } else {
        addr.to_string()
    }
}
