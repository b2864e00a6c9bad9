use anyhow::{bail, Context};
use barrierbot::backtest::{BacktestRunner, MarketScenario, PaperVenue, SyntheticDataGenerator};
use barrierbot::execution::StrategyDriver;
use barrierbot::persistence::StateStore;
use barrierbot::EngineConfig;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser)]
#[command(name = "barrierbot", version, about = "Trend-following engine with OCO bracket exits")]
struct Cli {
    /// TOML config file; BARRIERBOT__* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Engine state snapshot, reloaded on start and rewritten after every tick
    #[arg(long, global = true, default_value = "state/engine.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduled tick loop against a simulated market
    Paper(PaperArgs),
    /// Replay synthetic bars and print a performance summary
    Backtest(BacktestArgs),
}

#[derive(Args)]
struct MarketArgs {
    /// uptrend, downtrend, sideways, volatile, reversal or gaps
    #[arg(long, default_value = "reversal")]
    scenario: String,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Starting quoted balance
    #[arg(long, default_value_t = 1_000.0)]
    balance: f64,
}

#[derive(Args)]
struct PaperArgs {
    #[command(flatten)]
    market: MarketArgs,

    /// Seconds between ticks; defaults to the configured bar interval
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Stop after this many ticks
    #[arg(long, default_value_t = 500)]
    ticks: usize,
}

#[derive(Args)]
struct BacktestArgs {
    #[command(flatten)]
    market: MarketArgs,

    /// Bars generated per instrument
    #[arg(long, default_value_t = 500)]
    bars: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Backtest(args) => run_backtest(config, args),
        Command::Paper(args) => run_paper(config, &cli.state, args).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("barrierbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_scenario(name: &str) -> anyhow::Result<MarketScenario> {
    match MarketScenario::parse(name) {
        Some(scenario) => Ok(scenario),
        None => bail!("unknown scenario '{}'", name),
    }
}

fn run_backtest(config: EngineConfig, args: BacktestArgs) -> anyhow::Result<()> {
    let scenario = parse_scenario(&args.market.scenario)?;
    let interval = config.interval_duration()?;

    let bars = config
        .instruments
        .iter()
        .enumerate()
        .flat_map(|(i, instrument)| {
            SyntheticDataGenerator::new(args.market.seed + i as u64).generate(
                instrument,
                scenario,
                args.bars,
                interval,
            )
        })
        .collect();

    let metrics = BacktestRunner::new(config, args.market.balance)
        .run(bars)
        .context("backtest failed")?;
    metrics.print_report();

    Ok(())
}

async fn run_paper(config: EngineConfig, state_path: &Path, args: PaperArgs) -> anyhow::Result<()> {
    let scenario = parse_scenario(&args.market.scenario)?;
    let bar_interval = config.interval_duration()?;
    let warmup = config.strategy.required_lookback() + 1;

    // Simulated market: warm-up history ending now, then one bar per tick
    let start = Utc::now() - bar_interval * warmup as i32;
    let mut series: Vec<std::vec::IntoIter<barrierbot::Bar>> = config
        .instruments
        .iter()
        .enumerate()
        .map(|(i, instrument)| {
            SyntheticDataGenerator::new(args.market.seed + i as u64)
                .with_start(start)
                .generate(instrument, scenario, warmup + args.ticks, bar_interval)
                .into_iter()
        })
        .collect();

    let mut venue = PaperVenue::new(args.market.balance, config.fee_rate);
    for bars in series.iter_mut() {
        for bar in bars.by_ref().take(warmup) {
            venue.push_bar(bar);
        }
    }

    let store = StateStore::new(state_path);
    let mut state = store.load().context("loading engine state")?;
    let driver = StrategyDriver::from_config(&config);

    let period = match args.tick_secs {
        Some(secs) => Duration::from_secs(secs.max(1)),
        None => bar_interval
            .to_std()
            .context("bar interval does not fit a timer")?,
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        strategy = driver.strategy_name(),
        instruments = driver.instruments().len(),
        tick_secs = period.as_secs(),
        state = %store.path().display(),
        "paper trading started"
    );

    for tick in 0..args.ticks {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl+C, shutting down");
                break;
            }
        }

        if tick > 0 {
            for bars in series.iter_mut() {
                if let Some(bar) = bars.next() {
                    venue.push_bar(bar);
                }
            }
        }

        let (next, _) = driver.run_tick(&mut venue, state, Utc::now());
        state = next;

        if let Err(e) = store.save(&state) {
            tracing::error!(error = %e, "failed to save engine state");
        }
    }

    tracing::info!(
        balance = venue.quoted_balance(),
        equity = venue.equity(),
        trades = venue.trades().len(),
        "paper trading stopped"
    );
    Ok(())
}
