use alloy_primitives::Address;
use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use nadsflip::{
    contract::DEFAULT_RECEIPT_POLL_INTERVAL,
    network::{
        DEFAULT_CONTRACT_ADDRESS,
        MONAD_TESTNET_RPC_URL,
        NetworkParams,
    },
    provider::DEFAULT_EVENT_POLL_INTERVAL,
};
use std::{
    path::PathBuf,
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod client;
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "nadsflip",
    about = "Bet on a coin flip against the NadsFlip contract on Monad Testnet",
    version
)]
struct Cli {
    /// JSON-RPC endpoint used for chain reads
    #[arg(long, env = "NADSFLIP_RPC_URL", default_value = MONAD_TESTNET_RPC_URL)]
    rpc_url: String,

    /// Address of the coin-flip contract
    #[arg(long, env = "NADSFLIP_CONTRACT", default_value = DEFAULT_CONTRACT_ADDRESS)]
    contract: String,

    /// EIP-1193 endpoint of the MetaMask/Rabby wallet bridge
    #[arg(long, env = "NADSFLIP_ETHEREUM_URL")]
    ethereum_url: Option<String>,

    /// Endpoint of the Phantom (Solana) wallet bridge
    #[arg(long, env = "NADSFLIP_SOLANA_URL")]
    solana_url: Option<String>,

    /// Endpoint of the Backpack wallet bridge
    #[arg(long, env = "NADSFLIP_BACKPACK_URL")]
    backpack_url: Option<String>,

    /// Connect to this wallet on start-up (metamask, phantom, rabby, backpack)
    #[arg(long, env = "NADSFLIP_WALLET")]
    wallet: Option<String>,

    #[arg(long, env = "NADSFLIP_LOG_DIR", default_value = "~/.nadsflip/logs")]
    log_dir: String,

    #[arg(
        long,
        default_value_t = DEFAULT_RECEIPT_POLL_INTERVAL.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    receipt_poll_ms: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_EVENT_POLL_INTERVAL.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    event_poll_ms: u64,
}

impl Cli {
    fn into_config(self) -> Result<client::AppConfig> {
        let contract: Address = self
            .contract
            .parse()
            .map_err(|e| eyre!("invalid contract address {}: {e}", self.contract))?;
        Ok(client::AppConfig {
            network: NetworkParams::monad_testnet().with_rpc_url(self.rpc_url),
            contract,
            ethereum_url: self.ethereum_url,
            solana_url: self.solana_url,
            backpack_url: self.backpack_url,
            auto_connect: self.wallet,
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_ms),
            event_poll_interval: Duration::from_millis(self.event_poll_ms),
        })
    }
}

/// The terminal belongs to the UI, so logs go to a daily file.
fn init_tracing(log_dir: &str) -> Result<WorkerGuard> {
    let dir = PathBuf::from(shellexpand::tilde(log_dir).as_ref());
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("creating log directory {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "nadsflip.log"));
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("installing tracing subscriber: {e}"))?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _log_guard = init_tracing(&cli.log_dir)?;
    tracing::info!("starting nadsflip client");
    let config = cli.into_config()?;
    client::run_app(config).await
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn cli__zero_poll_intervals_are_rejected() {
        assert!(Cli::try_parse_from(["nadsflip", "--event-poll-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["nadsflip", "--receipt-poll-ms", "0"]).is_err());
    }

    #[test]
    fn cli__poll_intervals_become_durations() {
        let cli = Cli::try_parse_from(["nadsflip", "--event-poll-ms", "250"]).unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.event_poll_interval, Duration::from_millis(250));
        assert_eq!(config.receipt_poll_interval, DEFAULT_RECEIPT_POLL_INTERVAL);
    }
}
