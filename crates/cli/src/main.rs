//! Command Line Interface for the CLMM keeper.
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clmm_keeper_domain::entities::PositionRecord;
use clmm_keeper_domain::math::tick_range::{TickLimits, compute_range};
use clmm_keeper_domain::value_objects::Percentage;
use clmm_keeper_execution::prelude::*;
use clmm_keeper_protocols::prelude::*;
use dotenv::dotenv;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clmm-keeper")]
#[command(about = "Single-position CLMM keeper for Orca Whirlpools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the keeper until Ctrl-C
    Run {
        #[command(flatten)]
        keeper: KeeperArgs,

        /// Fire on a fixed interval instead of on every slot
        #[arg(long, env = "TRIGGER_INTERVAL_SECS")]
        interval_secs: Option<u64>,

        /// Evaluate only on markers divisible by this value
        #[arg(long, env = "EVALUATE_EVERY", default_value_t = 1)]
        evaluate_every: u64,

        /// Seconds between slot feed reconnects
        #[arg(long, env = "RECONNECT_DELAY_SECS", default_value_t = 5)]
        reconnect_delay_secs: u64,

        /// Failed slot feed sessions in a row before alerting and backing off
        #[arg(long, env = "MAX_RECONNECTS", default_value_t = 10)]
        max_reconnects: u32,

        /// Longest wait between slot feed reconnects while backing off
        #[arg(long, env = "MAX_RECONNECT_DELAY_SECS", default_value_t = 60)]
        max_reconnect_delay_secs: u64,
    },
    /// Print the persisted position record
    Status {
        /// State file path
        #[arg(long, env = "STATE_FILE", default_value = DEFAULT_STATE_FILE)]
        state_file: PathBuf,
    },
    /// Adopt an owned position the local record lost track of
    Recover {
        #[command(flatten)]
        keeper: KeeperArgs,
    },
    /// Compute the range the keeper would mint around a tick
    Range {
        /// Current tick
        #[arg(long, allow_hyphen_values = true)]
        tick: i32,

        /// Pool tick spacing
        #[arg(long)]
        spacing: i32,

        /// Ticks on each side of the current tick
        #[arg(long, env = "RANGE_HALF_WIDTH", default_value_t = 2000)]
        half_width: i32,
    },
}

#[derive(Args)]
struct KeeperArgs {
    /// Solana RPC endpoint
    #[arg(long, env = "RPC_URL", default_value = "https://api.mainnet-beta.solana.com")]
    rpc_url: String,

    /// Solana websocket endpoint
    #[arg(long, env = "WS_URL", default_value = "wss://api.mainnet-beta.solana.com")]
    ws_url: String,

    /// RPC request timeout in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 30)]
    rpc_timeout_secs: u64,

    /// Owner keypair (JSON byte array)
    #[arg(long, env = "KEYPAIR_PATH")]
    keypair: PathBuf,

    /// Whirlpool address
    #[arg(long, env = "WHIRLPOOL_ADDRESS")]
    pool: String,

    /// State file path
    #[arg(long, env = "STATE_FILE", default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    /// Ticks on each side of the current tick
    #[arg(long, env = "RANGE_HALF_WIDTH", default_value_t = 2000)]
    half_width: i32,

    /// Smallest deviation, in token B units, worth a swap
    #[arg(long, env = "MIN_SWAP_VALUE", default_value = "2")]
    min_swap_value: Decimal,

    /// Swap slippage tolerance in basis points
    #[arg(long, env = "SWAP_SLIPPAGE_BPS", default_value_t = 50)]
    swap_slippage_bps: u32,

    /// Mint slippage tolerance in basis points
    #[arg(long, env = "MINT_SLIPPAGE_BPS", default_value_t = 50)]
    mint_slippage_bps: u32,

    /// Attempts per ledger call
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// Base retry delay in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Settlement timeout in seconds
    #[arg(long, env = "SETTLEMENT_TIMEOUT_SECS", default_value_t = 90)]
    settlement_timeout_secs: u64,

    /// Hedge service base URL; without it the keeper never hedges
    #[arg(long, env = "HEDGE_URL")]
    hedge_url: Option<String>,

    /// Minimum seconds between hedge adjustments, 0 disables them
    #[arg(long, env = "HEDGE_INTERVAL_SECS", default_value_t = 300)]
    hedge_interval_secs: u64,

    /// Webhook receiving operator alerts
    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    webhook_url: Option<String>,
}

impl KeeperArgs {
    fn harness(&self) -> Harness {
        Harness::new(
            RetryPolicy {
                max_attempts: self.retry_attempts,
                base_delay: Duration::from_millis(self.retry_delay_ms),
            },
            Duration::from_secs(self.settlement_timeout_secs),
        )
    }

    fn keeper_config(&self, evaluate_every: u64) -> KeeperConfig {
        KeeperConfig {
            hedge_interval: (self.hedge_url.is_some() && self.hedge_interval_secs > 0)
                .then(|| Duration::from_secs(self.hedge_interval_secs)),
            evaluate_every,
            rebalance: RebalanceConfig {
                half_width: self.half_width,
                tick_limits: TickLimits::default(),
                min_swap_value: self.min_swap_value,
                swap_slippage: Percentage::from_bps(self.swap_slippage_bps),
                mint_slippage: Percentage::from_bps(self.mint_slippage_bps),
            },
        }
    }

    fn build_context(&self) -> Result<Arc<KeeperContext>> {
        let wallet = read_keypair(&self.keypair)
            .with_context(|| format!("loading keypair {}", self.keypair.display()))?;
        let whirlpool = Pubkey::from_str(&self.pool)
            .with_context(|| format!("invalid whirlpool address {}", self.pool))?;

        let provider = Arc::new(RpcProvider::new(RpcConfig {
            url: self.rpc_url.clone(),
            ws_url: self.ws_url.clone(),
            timeout_secs: self.rpc_timeout_secs,
        }));
        let ledger = Arc::new(WhirlpoolLedger::new(
            provider,
            Arc::new(wallet),
            WhirlpoolLedgerConfig::new(whirlpool),
        ));
        let account = ledger.owner().to_string();

        let mut notifier = MultiNotifier::new().with(Arc::new(ConsoleNotifier));
        if let Some(url) = &self.webhook_url {
            let webhook = WebhookNotifier::new(url, Duration::from_secs(10))
                .context("building webhook client")?;
            notifier = notifier.with(Arc::new(webhook));
        }

        let hedge: Arc<dyn HedgeService> = match &self.hedge_url {
            Some(url) => Arc::new(
                HttpHedgeService::new(url, Duration::from_secs(10))
                    .context("building hedge client")?,
            ),
            None => {
                warn!("No hedge service configured, health checks always pass");
                Arc::new(DisabledHedge)
            }
        };

        info!(
            account = %account,
            pool = %whirlpool,
            state_file = %self.state_file.display(),
            "Keeper context ready"
        );

        Ok(Arc::new(KeeperContext {
            reader: ledger.clone(),
            writer: ledger,
            store: StateStore::new(&self.state_file),
            notifier: Arc::new(notifier),
            hedge,
            account,
            harness: self.harness(),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            keeper,
            interval_secs,
            evaluate_every,
            reconnect_delay_secs,
            max_reconnects,
            max_reconnect_delay_secs,
        } => {
            let ctx = keeper.build_context()?;
            let notifier = ctx.notifier.clone();
            let keeper_config = keeper.keeper_config(evaluate_every);
            let keeper_engine = Arc::new(Keeper::new(ctx, keeper_config));

            let (tx, rx) = mpsc::channel(16);
            let keeper_task = tokio::spawn(keeper_engine.clone().run(rx));

            let mut trigger_task = match interval_secs {
                Some(secs) => {
                    println!("⏱️  Evaluating every {secs}s");
                    tokio::spawn(async move {
                        IntervalTrigger::new(Duration::from_secs(secs)).run(tx).await
                    })
                }
                None => {
                    println!("📡 Following slots from {}", keeper.ws_url);
                    let listener = TriggerListener::new(
                        Arc::new(SlotFeed::new(keeper.ws_url.clone())),
                        TriggerListenerConfig {
                            reconnect_delay: Duration::from_secs(reconnect_delay_secs),
                            max_reconnect_attempts: max_reconnects,
                            max_reconnect_delay: Duration::from_secs(max_reconnect_delay_secs),
                        },
                        notifier,
                    );
                    tokio::spawn(async move { listener.run(tx).await })
                }
            };

            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("listening for Ctrl-C")?;
                    info!("Shutdown requested");
                }
                finished = &mut trigger_task => match finished {
                    Ok(()) => warn!("Trigger source stopped"),
                    Err(e) => error!(error = %e, "Trigger task panicked"),
                },
            }

            // Dropping the sender lets the keeper finish its current evaluation.
            trigger_task.abort();
            keeper_task.await.context("keeper task panicked")?;

            let stats = keeper_engine.breaker().stats().await;
            println!("🛑 Keeper stopped in {} mode", keeper_engine.mode());
            if let (Some(at), Some(reason)) = (stats.tripped_at, stats.reason) {
                println!("   Safe mode since {}: {}", at.format("%Y-%m-%d %H:%M:%S"), reason);
            }
        }
        Commands::Status { state_file } => {
            let record = StateStore::new(&state_file).load();
            print_record(&state_file, &record);
        }
        Commands::Recover { keeper } => {
            let ctx = keeper.build_context()?;
            println!("🔍 Enumerating positions owned by {}...", ctx.account);

            let outcome = Reconciler::new(ctx.clone())
                .find_owned_position(&ctx.account)
                .await?;

            match outcome.recovered {
                Some(position) => println!("✅ Tracking {position}"),
                None => println!("❌ No owned positions in this pool"),
            }
            for position in outcome.untracked {
                println!("⚠️  Not managed: {position}");
            }
        }
        Commands::Range {
            tick,
            spacing,
            half_width,
        } => {
            let range = compute_range(tick, spacing, half_width, TickLimits::default())?;
            println!("{:<12} | {:<10} | {:<10}", "Tick", "Lower", "Upper");
            println!("{}", "-".repeat(38));
            println!("{:<12} | {:<10} | {:<10}", tick, range.lower, range.upper);
        }
    }

    Ok(())
}

fn print_record(path: &std::path::Path, record: &PositionRecord) {
    println!("📄 {}", path.display());
    match &record.position_id {
        Some(position) => println!("   Position:     {position}"),
        None => println!("   Position:     none"),
    }
    let checked = i64::try_from(record.last_checked_at)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis);
    match checked {
        Some(at) if record.last_checked_at > 0 => {
            println!("   Last checked: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))
        }
        _ => println!("   Last checked: never"),
    }
}
