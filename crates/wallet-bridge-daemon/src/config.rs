//! Daemon configuration: command line, environment, and an optional TOML file.
//!
//! Flags override the file; the file overrides built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use wallet_bridge_core::{BoardKind, DappOrigin, IssuerView, OriginParseError, PurseView};

#[derive(Debug, Parser)]
#[command(name = "wallet-bridge", about = "Serve the wallet bridge channel protocol over WebSocket")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "WALLET_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to accept WebSocket connections on.
    #[arg(long, env = "WALLET_BRIDGE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "WALLET_BRIDGE_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid approved dapp: {0}")]
    Origin(#[from] OriginParseError),
}

/// A board entry to seed the wallet with.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardSeed {
    pub id: String,
    pub kind: BoardKind,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// The configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<SocketAddr>,
    /// Origins approved at startup.
    pub approved_dapps: Vec<String>,
    /// Approve every dapp on its first request. Development only.
    pub auto_approve: bool,
    pub purses: Vec<PurseView>,
    pub issuers: Vec<IssuerView>,
    pub board: Vec<BoardSeed>,
    /// Brand board id to deposit facet board id.
    pub deposit_facets: BTreeMap<String, String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Everything the daemon runs with.
#[derive(Debug)]
pub struct Settings {
    pub listen: SocketAddr,
    pub log_json: bool,
    pub approved_dapps: Vec<DappOrigin>,
    pub auto_approve: bool,
    pub purses: Vec<PurseView>,
    pub issuers: Vec<IssuerView>,
    pub board: Vec<BoardSeed>,
    pub deposit_facets: BTreeMap<String, String>,
}

impl Settings {
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.or(file.listen).unwrap_or_else(default_listen);
        let approved_dapps = file
            .approved_dapps
            .iter()
            .map(|origin| origin.parse())
            .collect::<Result<_, _>>()?;
        Ok(Self {
            listen,
            log_json: cli.log_json,
            approved_dapps,
            auto_approve: file.auto_approve,
            purses: file.purses,
            issuers: file.issuers,
            board: file.board,
            deposit_facets: file.deposit_facets,
        })
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}
