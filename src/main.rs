use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use vault_janitor::{
    config::{load_targets, Config},
    janitor::{ChainCollaborators, ChainRunner, Scheduler, SchedulerSettings, Target},
    ledger::{JsonlLedger, Ledger},
    rpc::{ChainRpc, FailoverRpc, HttpRpcClient, OnChainMarketData, RemoteSigner, TransactionSigner},
    utils::setup_logging,
};

const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_WALLET_HALTED: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "vault-janitor", version, about = "Harvests yield vaults when the reward pays for the gas")]
struct Args {
    /// Target and chain definitions (JSON)
    #[arg(long, default_value = "targets.json")]
    targets: PathBuf,

    /// Validate configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Run a single cycle per chain and exit
    #[arg(long)]
    once: bool,

    /// Evaluate and record decisions but never submit
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    dotenv::dotenv().ok();
    let mut config = Config::from_env();
    setup_logging(config.log_level_filter(), config.log_file.as_deref()).context("failed to initialise logging")?;
    info!("vault-janitor {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Ok(ExitCode::from(EXIT_CONFIG_ERROR));
    }
    if args.dry_run {
        config.dry_run = true;
    }
    config.log_settings();

    let targets = match load_targets(&args.targets, config.profit_multiplier) {
        Ok(targets) => targets,
        Err(e) => {
            error!("Invalid target file {}: {}", args.targets.display(), e);
            return Ok(ExitCode::from(EXIT_CONFIG_ERROR));
        }
    };
    if args.check_config {
        info!("Configuration OK");
        return Ok(ExitCode::SUCCESS);
    }

    let ledger: Arc<dyn Ledger> = Arc::new(
        JsonlLedger::open(&config.ledger_path)
            .with_context(|| format!("failed to open ledger at {}", config.ledger_path))?,
    );
    let settings = SchedulerSettings::from_config(&config);

    let mut runners = Vec::new();
    for chain in &targets.chains {
        let chain_targets: Vec<Target> = targets.targets_for(&chain.name).cloned().collect();
        if chain_targets.is_empty() {
            warn!("[{}] no targets configured, not starting a loop", chain.name);
            continue;
        }

        let mut endpoints: Vec<Arc<dyn ChainRpc>> = Vec::with_capacity(chain.rpc_urls.len());
        for url in &chain.rpc_urls {
            let client = HttpRpcClient::new(url, config.rpc_timeout())
                .with_context(|| format!("[{}] bad RPC endpoint", chain.name))?;
            endpoints.push(Arc::new(client));
        }
        let rpc: Arc<dyn ChainRpc> = Arc::new(FailoverRpc::new(
            endpoints,
            config.retry_policy(),
            config.rpc_failover_threshold,
        ));

        let signer: Option<Arc<dyn TransactionSigner>> = match &chain.signer_url {
            Some(url) => Some(Arc::new(
                RemoteSigner::new(url, config.rpc_timeout())
                    .with_context(|| format!("[{}] bad signer endpoint", chain.name))?,
            )),
            None => None,
        };
        let market = Arc::new(OnChainMarketData::new(rpc.clone(), chain.from_address.clone(), chain.native_usd));

        runners.push(ChainRunner::new(
            chain.clone(),
            chain_targets,
            ChainCollaborators { rpc, market, signer },
            ledger.clone(),
            settings.clone(),
            config.breaker_policy(),
        ));
    }

    let scheduler = Scheduler::new(runners);
    scheduler.check_wallets().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested; finishing the current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    let summaries = scheduler.run(shutdown_rx, args.once).await;
    let net: f64 = summaries.iter().map(|s| s.totals.net_profit_usd).sum();
    info!("All chain loops stopped. Net profit this run: ${:.4}", net);

    let halted: Vec<&str> = summaries
        .iter()
        .filter(|s| s.wallet_halted)
        .map(|s| s.chain.as_str())
        .collect();
    if !halted.is_empty() {
        error!("Wallet halted for insufficient balance on: {}", halted.join(", "));
        return Ok(ExitCode::from(EXIT_WALLET_HALTED));
    }
    Ok(ExitCode::SUCCESS)
}
