use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use ethers::types::{I256, U256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use flash_leverage::logging::init_tracing;
use flash_leverage::{
    Clock, FeeEstimator, FlashLeverageConfig, PriceOracle, ProtocolError,
    RiskGate, RoundData, SystemClock,
};

#[derive(Parser)]
#[command(name = "flash_leverage", about = "Flash loan leverage strategy tooling")]
struct Cli {
    /// JSON or TOML configuration file; environment overrides apply on top
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Run fee estimation and the risk gate for a prospective loan
    Preflight {
        /// Available balance of the asset, in base units
        #[arg(long)]
        balance: String,
        /// Requested loan amount, in base units
        #[arg(long)]
        amount: String,
        /// Gas price in the oracle's quoted unit (gwei by default)
        #[arg(long)]
        gas_price: u64,
    },
}

/// Oracle answering with a fixed gas price, stamped now.
struct StaticGasPrice {
    gas_price: u64,
    clock: SystemClock,
}

#[async_trait]
impl PriceOracle for StaticGasPrice {
    async fn latest_round_data(&self) -> std::result::Result<RoundData, ProtocolError> {
        let now = self.clock.now_secs();
        Ok(RoundData {
            round_id: 1,
            answer: I256::from_raw(U256::from(self.gas_price)),
            started_at: now,
            updated_at: now,
            answered_in_round: 1,
        })
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<FlashLeverageConfig> {
    let mut config = match path {
        Some(path) => FlashLeverageConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => FlashLeverageConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

fn parse_amount(name: &str, raw: &str) -> Result<U256> {
    U256::from_dec_str(raw).with_context(|| format!("Invalid {}: '{}'", name, raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info", cli.json_logs);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::CheckConfig => {
            let addresses = config.validate().context("Configuration is invalid")?;
            info!("✅ Configuration valid");
            info!("   - Asset: {:?}", addresses.asset);
            info!("   - Paired token: {:?}", addresses.paired_token);
            info!("   - Lending pool: {:?}", addresses.lending_pool);
            info!("   - Router: {:?}", addresses.router);
            info!("   - Pool: {:?}", addresses.pool);
            info!("   - Oracle: {:?}", addresses.oracle);
            info!("   - Account: {:?}", addresses.account);
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to render configuration")?
            );
        }
        Command::Preflight {
            balance,
            amount,
            gas_price,
        } => {
            let balance = parse_amount("balance", &balance)?;
            let amount = parse_amount("amount", &amount)?;
            let gate = RiskGate::new(&config.risk).context("Invalid risk configuration")?;
            config.fees.validate().context("Invalid fee configuration")?;
            let estimator = FeeEstimator::new(
                Arc::new(StaticGasPrice {
                    gas_price,
                    clock: SystemClock,
                }),
                Arc::new(SystemClock),
                &config.fees,
                config.execution.read_policy(),
            );

            let fees = estimator.estimate(amount).await?;
            info!(
                "⛽ protocol_fee={} execution_cost={} limit={}",
                fees.protocol_fee,
                fees.execution_cost,
                gate.position_limit(balance)
            );

            match gate.check(balance, amount, &fees) {
                Ok(()) => println!("PASS: loan of {} may be initiated", amount),
                Err(err) if err.is_preflight() => {
                    println!("REJECT: {}", err);
                    std::process::exit(2);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    Ok(())
}
