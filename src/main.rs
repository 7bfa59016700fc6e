use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use healthpulse::alerts::{AlertEvent, AlertSink, ChannelAlertSink, LogAlertSink};
use healthpulse::clock::{Clock, SystemClock};
use healthpulse::config::AppConfig;
use healthpulse::ledger::{ConversionOutcome, ScoreLedger};
use healthpulse::logging::{init_logging, LogLevel};
use healthpulse::models::{MetricKind, ScoreCategory, ScoreComponents};
use healthpulse::monitor::HealthMonitor;
use healthpulse::remote::{InMemoryBalanceStore, RemoteBalanceStore};
use healthpulse::scheduler::Shutdown;
use healthpulse::sources::{SimulatedMetricSource, SimulatedMotionSource};
use healthpulse::store::SqliteStore;

/// HealthPulse - Health metric monitoring CLI
///
/// Polls wearable metrics, raises heart-rate zone and inactivity alerts,
/// and keeps a daily point ledger that converts into a remote balance.
#[derive(Parser)]
#[command(name = "healthpulse")]
#[command(author = "HealthPulse Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Health metric monitoring CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor against simulated sensors
    Run {
        /// Stop after this many seconds (runs until Ctrl-C if omitted)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Poll at the fast debug cadence
        #[arg(long)]
        debug: bool,

        /// Seed for the simulated sensors
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Fraction of simulated fetches that fail
        #[arg(long, default_value = "0.05")]
        failure_rate: f64,
    },

    /// Show today's points
    Score {
        /// Print the components as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add points to a category (negative values subtract)
    Add {
        /// Category: steps, calories, distance, water, task
        category: ScoreCategory,

        /// Points to add
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },

    /// Convert today's points into the remote balance
    Convert {
        /// Starting remote balance for the in-memory account
        #[arg(short, long, default_value = "0")]
        balance: i64,
    },

    /// Show or write the configuration file
    Config {
        /// Print the effective configuration
        #[arg(short, long)]
        show: bool,

        /// Write the effective configuration to the config path
        #[arg(short, long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AppConfig::default_config_path);
    let mut config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // -v overrides the configured level
    if cli.verbose > 0 {
        config.logging.level = LogLevel::from_verbosity(cli.verbose);
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Run {
            duration,
            debug,
            seed,
            failure_rate,
        } => {
            if debug {
                config.poller.debug = true;
            }
            run_monitor(config, duration, seed, failure_rate).await?;
        }
        Commands::Score { json } => {
            let ledger = open_ledger(&config, Arc::new(InMemoryBalanceStore::new()))?;
            ledger.reset_if_new_day();
            ledger.reset_task_score_if_new_day();
            if json {
                println!("{}", serde_json::to_string_pretty(&ledger.snapshot())?);
                return Ok(());
            }
            print_score(&ledger.snapshot());
            if let Some(date) = ledger.last_conversion_date() {
                println!("Last conversion: {}", date.as_str().dimmed());
            }
        }
        Commands::Add { category, delta } => {
            let ledger = open_ledger(&config, Arc::new(InMemoryBalanceStore::new()))?;
            let value = ledger.add_points(category, delta);
            println!(
                "{} {} is now {}",
                "✓".green(),
                category.to_string().bold(),
                value
            );
            print_score(&ledger.snapshot());
        }
        Commands::Convert { balance } => {
            let user_id = config.ledger.user_id.clone();
            let remote = Arc::new(InMemoryBalanceStore::with_balance(&user_id, balance));
            let ledger = open_ledger(&config, remote.clone())?;

            match ledger.convert_to_remote_balance(&user_id).await {
                Ok(ConversionOutcome::Converted {
                    previous,
                    added,
                    new_balance,
                    date,
                }) => {
                    println!("{}", "✓ Points converted".green().bold());
                    println!("  Date:        {}", date);
                    println!("  Previous:    {}", previous);
                    println!("  Added:       {}", added.to_string().green());
                    println!("  New balance: {}", new_balance.to_string().bold());
                }
                Ok(ConversionOutcome::AlreadyConverted { date }) => {
                    println!(
                        "{}",
                        format!("Points were already converted on {}", date).yellow()
                    );
                }
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), e.user_message());
                    return Err(e.into());
                }
            }
            let remaining = remote.get_balance(&user_id).await?;
            info!(user_id = %user_id, balance = remaining, "Remote balance after conversion");
        }
        Commands::Config { show, write } => {
            if write {
                config.save_to_file(&config_path)?;
                println!(
                    "{} Wrote {}",
                    "✓".green(),
                    config_path.display().to_string().bold()
                );
            }
            if show || !write {
                let rendered = toml::to_string_pretty(&config)
                    .context("Failed to serialize configuration")?;
                println!("{}", "Effective configuration".white().bold());
                println!("{}", rendered);
            }
        }
    }

    Ok(())
}

fn open_ledger(config: &AppConfig, remote: Arc<dyn RemoteBalanceStore>) -> Result<ScoreLedger> {
    let path = &config.ledger.store_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    let store = SqliteStore::open(path)
        .with_context(|| format!("Failed to open ledger store: {}", path.display()))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Ok(ScoreLedger::open(
        Box::new(store),
        remote,
        clock,
        config.ledger.rates,
    )?)
}

async fn run_monitor(
    config: AppConfig,
    duration: Option<u64>,
    seed: u64,
    failure_rate: f64,
) -> Result<()> {
    println!("{}", "Starting HealthPulse monitor...".green().bold());
    println!(
        "  Polling every {}s",
        config.poller.effective_period().as_secs()
    );

    let ledger = open_ledger(&config, Arc::new(InMemoryBalanceStore::new()))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (channel_sink, mut alerts) = ChannelAlertSink::new();
    let sink: Arc<dyn AlertSink> = Arc::new(FanOutSink {
        log: LogAlertSink,
        channel: channel_sink,
    });
    let source = Arc::new(SimulatedMetricSource::new(seed, failure_rate));

    let mut monitor = HealthMonitor::new(config, source, ledger, clock, sink)?;

    let motion_shutdown = Shutdown::new();
    let motion = SimulatedMotionSource {
        cadence: Duration::from_secs(1),
        movement_probability: 0.05,
        seed,
    }
    .spawn(motion_shutdown.clone());
    monitor.start(motion);

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = alerts.recv() => {
                print_alert(&event);
                if matches!(event, AlertEvent::InactivityAlert { .. }) {
                    monitor.dismiss_inactivity();
                }
            }
        }
    }

    motion_shutdown.trigger();
    monitor.stop().await;

    println!("{}", "Latest readings".cyan().bold());
    let latest = monitor.latest_readings();
    for kind in MetricKind::ALL {
        if let Some(reading) = latest.get(kind) {
            let descriptor = reading.descriptor();
            let value = format!("{:.0} {}", reading.value, descriptor.unit);
            let value = if reading.source_ok {
                value.normal()
            } else {
                value.dimmed()
            };
            println!("  {} {:<12} {}", descriptor.icon, descriptor.label, value);
        }
    }
    print_score(&monitor.score());

    Ok(())
}

/// Logs every alert and forwards it to the terminal printer
struct FanOutSink {
    log: LogAlertSink,
    channel: ChannelAlertSink,
}

impl AlertSink for FanOutSink {
    fn emit(&self, event: AlertEvent) {
        self.log.emit(event.clone());
        self.channel.emit(event);
    }
}

fn print_alert(event: &AlertEvent) {
    match event {
        AlertEvent::ZoneAlert {
            zone, severity, bpm, ..
        } => {
            let line = format!("♥ {} ({:.0} bpm) [{}]", zone, bpm, severity);
            println!("{}", line.red().bold());
        }
        AlertEvent::InactivityAlert { idle_seconds, .. } => {
            let line = format!("⏸ No movement for {}s, time to stand up", idle_seconds);
            println!("{}", line.yellow().bold());
        }
        AlertEvent::AlarmStarted { until, .. } => {
            println!("{}", format!("🔔 Alarm on until {}", until.format("%H:%M:%S")).red());
        }
        AlertEvent::AlarmStopped { .. } => {
            println!("{}", "🔕 Alarm off".dimmed());
        }
    }
}

fn print_score(score: &ScoreComponents) {
    println!("{}", "Today's points".blue().bold());
    for category in ScoreCategory::ALL {
        println!("  {:<10} {:>6}", category.to_string(), score.get(category));
    }
    println!("  {:<10} {:>6}", "total".bold(), score.total().to_string().bold());
}
