//! spread-bot: spread-capture market maker for binary-outcome markets.
//!
//! Usage:
//!   spread-bot [OPTIONS]
//!
//! Configuration comes from environment variables (see `config`); a `.env`
//! file in the working directory is honored. Options:
//!   --dry-run              Force dry-run regardless of DRY_RUN
//!   --max-markets <N>      Override MAX_MARKETS

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use spread_bot::config::BotConfig;
use spread_bot::maker::MarketMaker;
use spread_bot::selector::{MarketSelector, SelectorConfig};
use spread_bot::venue::{DryRunVenue, LiveVenue, UnwiredSigner, Venue};
use spread_market::{
    ApiCredentials, ClobClient, ClobClientConfig, DirectoryClient, DirectoryConfig, FeedConfig,
    MarketFeed, UserFeed, UserFeedConfig,
};

/// CLI arguments for spread-bot.
#[derive(Parser, Debug)]
#[command(name = "spread-bot")]
#[command(about = "Spread-capture market maker for binary-outcome markets")]
#[command(version)]
struct Args {
    /// Force dry-run mode (no venue writes) regardless of DRY_RUN
    #[arg(long)]
    dry_run: bool,

    /// Override the maximum number of active markets
    #[arg(long)]
    max_markets: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = BotConfig::from_env().context("configuration error")?;
    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(max_markets) = args.max_markets {
        config.max_markets = max_markets;
        config.validate().context("configuration error")?;
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!(dry_run = config.dry_run, max_markets = config.max_markets, "starting spread-bot");

    let creds = ApiCredentials {
        api_key: config.clob_api_key.clone(),
        api_secret: config.clob_api_secret.clone(),
        passphrase: config.clob_passphrase.clone(),
        address: config.poly_proxy_address.clone(),
    };

    // One shutdown broadcast fans out to both feeds and the engine.
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let (feed_event_tx, feed_event_rx) = mpsc::channel(1024);
    let feed_config = FeedConfig {
        ws_url: config.wss_url.clone(),
        ..FeedConfig::default()
    };
    let (feed, _feed_handle) =
        MarketFeed::start(feed_config, feed_event_tx, shutdown_tx.subscribe());

    let (user_event_tx, user_event_rx) = mpsc::channel(1024);
    let user_config = UserFeedConfig {
        ws_url: config.wss_user_url.clone(),
        ..UserFeedConfig::default()
    };
    let _user_handle = UserFeed::start(
        user_config,
        creds.clone(),
        user_event_tx,
        shutdown_tx.subscribe(),
    );

    let venue: Box<dyn Venue> = if config.dry_run {
        Box::new(DryRunVenue::new())
    } else {
        let client = ClobClient::new(ClobClientConfig::default(), creds.clone());
        let signer = UnwiredSigner::new(config.poly_proxy_address.clone());
        Box::new(LiveVenue::new(client, Box::new(signer)))
    };

    // Market selection before the engine starts.
    let directory = DirectoryClient::new(DirectoryConfig::default());
    let selector_clob = ClobClient::new(ClobClientConfig::default(), creds.clone());
    let selector = MarketSelector::new(SelectorConfig::from_bot_config(&config));
    let chosen = selector
        .select(&directory, &feed, &selector_clob)
        .await
        .context("market selection failed")?;

    // Selection ran against directory data that may be minutes old; drop
    // anything the venue now reports as closed.
    let mut confirmed = Vec::new();
    for candidate in chosen {
        match selector_clob.get_market_metadata(&candidate.condition_id).await {
            Ok(meta) if meta.closed || !meta.accepting_orders => {
                info!(slug = %candidate.slug, "market no longer accepting orders, skipping");
            }
            Ok(_) => confirmed.push(candidate),
            Err(e) => {
                warn!(slug = %candidate.slug, error = %e,
                      "metadata check failed, keeping market");
                confirmed.push(candidate);
            }
        }
    }
    if confirmed.is_empty() {
        info!("no eligible markets; exiting");
        return Ok(());
    }

    // Signal handling: SIGINT / SIGTERM request a graceful stop.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            error!("shutdown signal handler error: {}", e);
        }
        info!("requesting shutdown");
        let _ = signal_tx.send(());
    });

    let mut maker = MarketMaker::new(
        config,
        feed,
        feed_event_rx,
        user_event_rx,
        venue,
        shutdown_tx.subscribe(),
    );
    maker.run(confirmed).await
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["spread-bot"]).unwrap();
        assert!(!args.dry_run);
        assert!(args.max_markets.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let args =
            Args::try_parse_from(["spread-bot", "--dry-run", "--max-markets", "3"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.max_markets, Some(3));
    }
}
