//! CLI tool to run individual watcher operations by hand.
//!
//! - `balance`: fetch and print a target's balance
//! - `tick`: run one scheduler tick and wait for its notifications
//! - `remind`: set, update or (with threshold 0) disable a reminder
//! - `disable`: turn a reminder off
//! - `status`: show a subscriber's reminder

use clap::{Parser, Subcommand};
use tracing::info;
use watcher::{config::Config, message, App, ReminderOutcome};

#[derive(Parser)]
#[command(name = "step")]
#[command(about = "Run individual watcher operations for testing")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Primary explorer API key
    #[arg(long, env = "EXPLORER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Fallback explorer API key
    #[arg(long, env = "EXPLORER_API_KEY_SECONDARY", hide_env_values = true)]
    secondary_api_key: Option<String>,

    /// Telegram bot token; notifications are only logged without one
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Keep subscriptions in memory instead of the database
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and print a target's balance
    Balance {
        /// Target name, the default target when omitted
        #[arg(short, long)]
        target: Option<String>,

        /// Bypass the balance cache
        #[arg(long)]
        refresh: bool,
    },

    /// Run one scheduler tick
    Tick,

    /// Set a balance reminder; threshold 0 disables it
    Remind {
        /// Subscriber id (Telegram chat id)
        subscriber: String,

        /// Alert when the balance drops below this amount
        threshold: String,

        /// Minutes between checks
        #[arg(short, long, default_value_t = 30)]
        interval: u32,

        #[arg(short, long)]
        target: Option<String>,
    },

    /// Disable a balance reminder
    Disable {
        subscriber: String,

        #[arg(short, long)]
        target: Option<String>,
    },

    /// Show a subscriber's reminder
    Status {
        subscriber: String,

        #[arg(short, long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_file(&cli.config)?;
    config.apply_overrides(cli.api_key, cli.secondary_api_key, cli.bot_token);
    watcher::init_tracing(config.log_format);

    let app = App::build(config, cli.memory).await?;
    let service = app.service();

    match cli.command {
        Command::Balance { target, refresh } => {
            info!("Running: balance");
            let (target, snapshot) = service.balance_report(target.as_deref(), refresh).await?;
            println!("{}", message::balance_report(&target, &snapshot).text());
        }
        Command::Tick => {
            info!("Running: tick");
            let report = app.scheduler().tick().await;
            let (skipped, fetched, failed) = (report.skipped, report.fetched, report.failed);
            let evaluations = report.settle().await;
            let alerts: usize = evaluations.iter().map(|e| e.alerts_sent).sum();
            info!(skipped, fetched, failed, alerts, "Step completed: tick");
        }
        Command::Remind {
            subscriber,
            threshold,
            interval,
            target,
        } => {
            info!("Running: remind");
            match service
                .set_reminder(&subscriber, &threshold, interval, target.as_deref())
                .await?
            {
                ReminderOutcome::Enabled(sub) => {
                    info!(key = %sub.key(), threshold = %sub.threshold, interval = sub.check_interval_minutes, "Reminder enabled");
                }
                ReminderOutcome::Disabled => info!("Reminder disabled"),
                ReminderOutcome::NothingToDisable => info!("No active reminder to disable"),
            }
        }
        Command::Disable { subscriber, target } => {
            info!("Running: disable");
            if service.disable_reminder(&subscriber, target.as_deref()).await? {
                info!("Reminder disabled");
            } else {
                info!("No active reminder to disable");
            }
        }
        Command::Status { subscriber, target } => {
            let (target, sub) = service.reminder_status(&subscriber, target.as_deref()).await?;
            println!("{}", message::reminder_status(&target, sub.as_ref()));
        }
    }

    Ok(())
}
