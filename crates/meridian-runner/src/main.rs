//! # meridian-runner
//!
//! Command-line entry point for the Meridian client.
//!
//! Loads a JSON configuration file, initializes logging, and runs one of the
//! client surfaces from a terminal.
//!
//! # Usage
//!
//! ```bash
//! meridian-runner config.json stream --symbols AAPL,MSFT --kinds trades,quotes
//! meridian-runner config.json bars --symbol AAPL --days 5
//! meridian-runner config.json adv --symbol AAPL --days 20
//! meridian-runner config.json account
//! meridian-runner config.json orders --status open
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{info, warn};

use meridian_core::config::AppConfig;
use meridian_md::historical::{BarsRequest, HistoricalClient, Timeframe};
use meridian_md::stream::MarketDataStream;
use meridian_td::client::{ListOrdersRequest, TradingClient};

/// Meridian Market Data & Trading Client Runner.
#[derive(Parser)]
#[command(name = "meridian-runner", about = "Meridian Market Data & Trading Client Runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream live market data until Ctrl+C.
    Stream {
        /// Symbols to subscribe (comma-separated).
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Channels to subscribe: trades, quotes, bars.
        #[arg(long, value_delimiter = ',', default_value = "trades")]
        kinds: Vec<String>,
    },

    /// Print daily bars for a symbol.
    Bars {
        #[arg(long)]
        symbol: String,

        /// Lookback window in days.
        #[arg(long, default_value_t = 5)]
        days: u32,
    },

    /// Compute the average daily volume for a symbol.
    Adv {
        #[arg(long)]
        symbol: String,

        /// Averaging window in days.
        #[arg(long, default_value_t = 20)]
        days: u32,
    },

    /// Print the account snapshot and open positions.
    Account,

    /// List orders.
    Orders {
        /// Filter: open or closed.
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    meridian_core::logging::init_logging(&cli.log_level, cli.log_dir.as_deref(), "meridian-runner");

    let config = meridian_core::config::load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    info!("config loaded — rest endpoint {}", config.endpoints.rest_url);

    match cli.command {
        Command::Stream { symbols, kinds } => run_stream(&config, symbols, kinds).await,
        Command::Bars { symbol, days } => run_bars(&config, &symbol, days).await,
        Command::Adv { symbol, days } => run_adv(&config, &symbol, days).await,
        Command::Account => run_account(&config).await,
        Command::Orders { status } => run_orders(&config, status).await,
    }
}

async fn run_stream(config: &AppConfig, symbols: Vec<String>, kinds: Vec<String>) -> Result<()> {
    let (mut stream, mut events) = MarketDataStream::new(config)?;

    let mut handles = Vec::new();
    for kind in &kinds {
        match kind.as_str() {
            "trades" => handles.push(stream.subscribe_trades(&symbols, |trade| {
                println!("{} trade {} x{} @ {}", trade.timestamp, trade.symbol, trade.size, trade.price);
            })?),
            "quotes" => handles.push(stream.subscribe_quotes(&symbols, |quote| {
                println!(
                    "{} quote {} {}x{} / {}x{}",
                    quote.timestamp, quote.symbol, quote.bid_size, quote.bid_price, quote.ask_size, quote.ask_price,
                );
            })?),
            "bars" => handles.push(stream.subscribe_bars(&symbols, |bar| {
                println!("{} bar {} c={} v={}", bar.timestamp, bar.symbol, bar.close, bar.volume);
            })?),
            other => warn!("unknown channel kind `{other}` ignored"),
        }
    }

    let status = stream.connect().await?;
    info!("stream connected: {}", status.message);

    // Surface lifecycle events alongside the data until Ctrl+C.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => info!("session event: {event:?}"),
                None => break,
            },
        }
    }

    info!("shutting down stream");
    for handle in handles {
        stream.unsubscribe(handle);
    }
    stream.disconnect().await;
    Ok(())
}

async fn run_bars(config: &AppConfig, symbol: &str, days: u32) -> Result<()> {
    let client = HistoricalClient::new(config)?;
    let end = Utc::now();
    let start = end - chrono::Duration::days(days as i64);
    let request = BarsRequest::new(symbol, Timeframe::Day, start, end);

    let mut bars = client.bars(&request);
    let mut count = 0u32;
    while let Some(bar) = bars.next().await {
        let bar = bar?;
        println!(
            "{}  o={} h={} l={} c={} v={}",
            bar.timestamp, bar.open, bar.high, bar.low, bar.close, bar.volume,
        );
        count += 1;
    }
    info!("{count} bar(s) for {symbol}");
    Ok(())
}

async fn run_adv(config: &AppConfig, symbol: &str, days: u32) -> Result<()> {
    let client = HistoricalClient::new(config)?;
    let stats = meridian_md::aggregates::average_daily_volume(&client, symbol, days, Utc::now()).await?;
    println!(
        "{symbol}: average daily volume {:.2} over {} bar(s)",
        stats.average_volume, stats.count,
    );
    Ok(())
}

async fn run_account(config: &AppConfig) -> Result<()> {
    let client = TradingClient::new(config)?;

    let account = client.account().await?;
    println!(
        "account {} [{}]  cash={} equity={} buying_power={}",
        account.id, account.status, account.cash, account.equity, account.buying_power,
    );

    let positions = client.positions().await?;
    for position in &positions {
        println!(
            "  {} qty={} avg_entry={} value={} upl={}",
            position.symbol, position.qty, position.avg_entry_price, position.market_value, position.unrealized_pl,
        );
    }
    info!("{} position(s)", positions.len());
    Ok(())
}

async fn run_orders(config: &AppConfig, status: Option<String>) -> Result<()> {
    let client = TradingClient::new(config)?;
    let request = ListOrdersRequest {
        status,
        ..ListOrdersRequest::default()
    };

    let mut orders = client.orders(&request);
    let mut count = 0u32;
    while let Some(order) = orders.next().await {
        let order = order?;
        println!(
            "{}  {} {:?} qty={} filled={} [{:?}]",
            order.id, order.symbol, order.side, order.qty, order.filled_qty, order.status,
        );
        count += 1;
    }
    info!("{count} order(s)");
    Ok(())
}
