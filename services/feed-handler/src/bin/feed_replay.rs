use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use feed_handler::config::{FeedHandlerConfig, LogFormat};
use feed_handler::{FeedHandler, FeedReplayer, RecoverySnapshot};

#[derive(Parser)]
#[command(name = "feed-replay", about = "Replay a JSON-lines order feed through the feed handler")]
struct Cli {
    /// JSON-lines file of wire order updates
    input: PathBuf,

    #[arg(short, long, default_value = "feed-handler.json")]
    config_path: PathBuf,

    /// Restore this snapshot before replaying
    #[arg(long)]
    snapshot_in: Option<PathBuf>,

    /// Write a snapshot of the final state here
    #[arg(long)]
    snapshot_out: Option<PathBuf>,

    /// Fail unless the final state checksum matches
    #[arg(long)]
    expected_checksum: Option<String>,
}

fn init_logging(cfg: &FeedHandlerConfig) {
    match cfg.logger.format {
        LogFormat::JSON => {
            tracing_subscriber::fmt()
                .json()
                .with_max_level(cfg.logger.level)
                .with_current_span(true)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::COMPACT => {
            tracing_subscriber::fmt()
                .compact()
                .with_max_level(cfg.logger.level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let config = FeedHandlerConfig::load(&cli.config_path).context("could not load config")?;

    init_logging(&config);

    let handler = FeedHandler::new(config);

    if let Some(path) = &cli.snapshot_in {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read snapshot {}", path.display()))?;
        let snapshot = RecoverySnapshot::from_json(&raw).context("could not parse snapshot")?;
        handler.restore(&snapshot).context("could not restore snapshot")?;
        tracing::info!(next_expected = snapshot.next_expected, "Snapshot restored");
    }

    let input = File::open(&cli.input)
        .with_context(|| format!("could not open input {}", cli.input.display()))?;

    let mut replayer = FeedReplayer::new();
    if let Some(checksum) = cli.expected_checksum {
        replayer = replayer.with_expected_checksum(checksum);
    }
    let report = replayer.replay_reader(&handler, BufReader::new(input))?;

    if let Some(path) = &cli.snapshot_out {
        let snapshot = handler.snapshot()?;
        std::fs::write(path, snapshot.to_json()?)
            .with_context(|| format!("could not write snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "Snapshot written");
    }

    for alert in handler.check_alerts() {
        tracing::warn!(metric = %alert.metric, level = ?alert.level, "{}", alert.message);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
