use clap::Parser;
use tracing::{error, info};
use watcher::{
    config::Config,
    metrics::install_prometheus_exporter,
    App,
};

#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Watch partner balances and alert subscribers")]
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

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Keep subscriptions in memory instead of the database
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_file(&cli.config)?;
    config.apply_overrides(cli.api_key, cli.secondary_api_key, cli.bot_token);

    watcher::init_tracing(config.log_format);
    info!("Starting watcher");
    info!(
        config = %cli.config,
        targets = config.targets.len(),
        default_target = %config.default_target,
        policy = ?config.scheduler.policy,
        tick_secs = config.scheduler.tick_secs,
        "Loaded config"
    );

    if let Some(port) = config.metrics_port {
        install_prometheus_exporter(port)?;
        info!(port, "Prometheus exporter listening");
    }

    let app = App::build(config, cli.memory).await?;
    let scheduler = app.scheduler();

    info!("Starting monitoring loop...");
    scheduler
        .run(app.config.scheduler.tick(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    Ok(())
}
