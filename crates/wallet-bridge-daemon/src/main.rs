//! Wallet bridge daemon.
//!
//! Serves the legacy channel protocol over WebSocket, backed by an in-memory
//! wallet seeded from the configuration file.
//!
//!   wallet-bridge --listen 127.0.0.1:8000 --config wallet.toml

mod config;
mod server;

use clap::Parser;
use config::{Cli, Settings};
use server::ChannelRegistry;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wallet_bridge_core::{MemoryWallet, WalletPublishers, WalletService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load(Cli::parse())?;
    init_logging(settings.log_json)?;

    let publishers = WalletPublishers::new();
    let wallet = Arc::new(MemoryWallet::new(&publishers));
    seed(&wallet, &settings);

    let channels = Arc::new(ChannelRegistry::new());
    let service = WalletService::new(wallet.clone(), &publishers, channels.clone());

    tracing::info!(
        listen = %settings.listen,
        approved = settings.approved_dapps.len(),
        auto_approve = settings.auto_approve,
        "Starting wallet bridge"
    );

    tokio::select! {
        result = server::run(settings.listen, service.command_handler().clone(), channels) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("wallet_bridge=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn seed(wallet: &MemoryWallet, settings: &Settings) {
    wallet.set_auto_approve(settings.auto_approve);
    for entry in &settings.board {
        wallet.register_board(entry.id.clone(), entry.kind, entry.value.clone());
    }
    for issuer in &settings.issuers {
        wallet.add_issuer(issuer.clone());
    }
    for purse in &settings.purses {
        wallet.add_purse(purse.clone());
    }
    for (brand, deposit) in &settings.deposit_facets {
        wallet.add_deposit_facet(brand.clone(), deposit.clone());
    }
    for origin in &settings.approved_dapps {
        wallet.enable_dapp(origin);
    }
}
