//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML configuration file
//! - Merging CLI with file config (CLI takes precedence)

use crate::core::config::{IceConfig, IceServerConfig, TransferConfig};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_CONFIG_FILE: &str = "roomdrop.toml";
const DEFAULT_OUT_DIR: &str = "received";
const DEFAULT_ROOM: &str = "loopback";

/// Roomdrop - send files between two peers of a room over WebRTC.
#[derive(Parser, Deserialize, Clone, Debug, Default)]
#[command(author, version, about)]
#[command(propagate_version = true)]
#[serde(default, rename_all = "kebab-case")]
pub struct Args {
    /// Files to send.
    pub files: Vec<PathBuf>,

    /// Directory received files are written to. Defaults to ./received
    #[clap(short, long)]
    pub out: Option<PathBuf>,

    /// Room name used for signaling topics.
    #[clap(long)]
    pub room: Option<String>,

    /// STUN/TURN server URL. Repeatable; replaces the default STUN server.
    #[clap(long = "ice-server")]
    pub ice_servers: Vec<String>,

    /// Chunk size in bytes.
    #[clap(long)]
    pub chunk_size: Option<usize>,

    /// Seconds a request may stay unanswered.
    #[clap(long)]
    pub request_timeout: Option<u64>,

    /// Gather loopback ICE candidates (single-host setups without a usable
    /// interface, e.g. containers).
    #[clap(long)]
    pub loopback_ice: bool,

    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// TOML configuration file. Defaults to ./roomdrop.toml when present.
    #[clap(long)]
    #[serde(skip)]
    pub conf: Option<PathBuf>,
}

impl Args {
    /// Load Args from CLI + TOML file (if it exists).
    /// CLI values override those from the file.
    pub fn load() -> Self {
        let cli_args = Args::parse();

        let path = cli_args
            .conf
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if let Some(file_args) = Self::from_file(&path) {
            return Self::merge(file_args, cli_args);
        }

        cli_args
    }

    /// Load args from a TOML file.
    fn from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str::<Args>(&content) {
            Ok(args) => Some(args),
            Err(e) => {
                warn!(event = "config_parse_failure", path = %path.display(), error = %e);
                None
            }
        }
    }

    /// Merge file args with CLI args (CLI takes precedence).
    fn merge(mut file: Args, cli: Args) -> Args {
        if !cli.files.is_empty() {
            file.files = cli.files;
        }
        if cli.out.is_some() {
            file.out = cli.out;
        }
        if cli.room.is_some() {
            file.room = cli.room;
        }
        if !cli.ice_servers.is_empty() {
            file.ice_servers = cli.ice_servers;
        }
        if cli.chunk_size.is_some() {
            file.chunk_size = cli.chunk_size;
        }
        if cli.request_timeout.is_some() {
            file.request_timeout = cli.request_timeout;
        }
        if cli.loopback_ice {
            file.loopback_ice = true;
        }
        if cli.verbose > 0 {
            file.verbose = cli.verbose;
        }
        file.conf = cli.conf;
        file
    }

    pub fn out_dir(&self) -> PathBuf {
        self.out
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR))
    }

    pub fn room(&self) -> &str {
        self.room.as_deref().unwrap_or(DEFAULT_ROOM)
    }

    pub fn transfer_config(&self) -> TransferConfig {
        let mut cfg = TransferConfig::default();
        if let Some(size) = self.chunk_size.filter(|s| *s > 0) {
            cfg.chunk_size = size;
        }
        if let Some(secs) = self.request_timeout {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        cfg
    }

    pub fn ice_config(&self) -> IceConfig {
        let mut ice = IceConfig::default();
        if !self.ice_servers.is_empty() {
            ice.servers = self
                .ice_servers
                .iter()
                .map(|url| IceServerConfig::stun(url.clone()))
                .collect();
        }
        ice.include_loopback = self.loopback_ice;
        ice
    }
}
