//! Rebuilds signal statistics from the trade journal and prints a summary
//!
//! Usage: cargo run --bin aitrader-stats

use aitrader::config::{AppConfig, RuntimeConfig};
use aitrader::persistence::{JsonFileStore, TradeJournal, TradeLog};
use aitrader::strategy::{ConfidenceStore, SideEnablement, SignalStatsBook};
use aitrader::types::Signal;
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::load()?;
    let layout = config.data_layout();
    info!("📂 Data directory: {}", layout.data_dir().display());

    let journal = TradeJournal::open(layout.trades_file());
    let trades = journal.load_trades()?;
    let settled = trades.iter().filter(|t| t.pnl.is_some()).count();
    info!("Loaded {} trades ({} settled)", trades.len(), settled);

    let book = SignalStatsBook::from_trades(config.stats.to_runtime(), &trades);
    book.save(&JsonFileStore::new(layout.signal_stats_file()))?;

    println!("{:<20} {:>6} {:>6} {:>8} {:>12} {:>8}", "KEY", "COUNT", "WINS", "WINRATE", "EXPECTANCY", "ENABLED");
    for (key, stats) in book.entries() {
        let enabled = match key.split_once('|') {
            Some((symbol, side)) => side
                .parse::<Signal>()
                .map(|signal| book.is_signal_enabled(symbol, signal))
                .unwrap_or(true),
            None => true,
        };
        println!(
            "{:<20} {:>6} {:>6} {:>7.1}% {:>12.4} {:>8}",
            key,
            stats.count,
            stats.wins,
            stats.winrate * 100.0,
            stats.expectancy,
            if enabled { "yes" } else { "NO" }
        );
    }

    let confidence = ConfidenceStore::open(Box::new(JsonFileStore::new(layout.confidence_file())))?;
    let state = confidence.state();
    println!();
    for signal in Signal::ALL {
        println!("confidence {:<5} {:.2}", signal.to_string(), confidence.get(signal));
    }
    println!(
        "trades {} | wins {} | losses {} | winrate {:.1}%",
        state.total_trades,
        state.win_trades,
        state.loss_trades,
        state.win_rate() * 100.0
    );

    Ok(())
}
