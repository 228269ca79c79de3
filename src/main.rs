//! Syncguard - operator tool for the anti-ransomware kill switch
//!
//! # Usage
//!
//! ```bash
//! # Probe a file's entropy
//! syncguard check suspicious.bin
//!
//! # Show logged threats from the last week
//! syncguard threats --days 7
//!
//! # Export the threat log for analysis
//! syncguard export threats.csv
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use syncguard::detector::entropy;
use syncguard::{Config, ThreatLog};
use tracing::info;

#[derive(Parser)]
#[command(name = "syncguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "syncguard.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure a file's entropy and classify it
    Check {
        /// File to analyze
        path: PathBuf,
    },

    /// Show logged threats
    Threats {
        /// Only show threats from the last N days
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Export the threat log as CSV
    Export {
        /// Destination CSV file
        path: PathBuf,
    },

    /// Clear the threat log
    Clear,

    /// Show effective configuration
    Config,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            if cli.config.exists() {
                anyhow::bail!("failed to load config {:?}: {e}", cli.config);
            }
            info!("using default configuration");
            Config::default()
        }
    };

    match cli.command {
        Commands::Check { path } => {
            let value = entropy::measure_file(&path, 8.1).map_err(|source| {
                syncguard::KillSwitchError::PathUnreadable {
                    path: path.clone(),
                    source,
                }
            })?;
            let class = entropy::classify(value);
            let (lo, hi) = entropy::expected_range(&path.to_string_lossy());

            println!("File:            {}", path.display());
            println!("Entropy:         {value:.3} bits/byte");
            println!("Classification:  {class:?}");
            println!("Expected range:  {lo:.1} - {hi:.1}");
            if entropy::is_normally_high_entropy(&path.to_string_lossy()) {
                println!("Note:            high entropy is normal for this file type");
            } else if value > hi {
                println!("Note:            entropy exceeds the expected range");
            }
        }

        Commands::Threats { days } => {
            let log = ThreatLog::open(config.threat_log_path())?;
            let threats = match days {
                Some(days) => log.load_last_days(days)?,
                None => log.load_all()?,
            };

            if threats.is_empty() {
                println!("No threats recorded");
                return Ok(());
            }

            for threat in &threats {
                println!(
                    "{}  [{:<8}] {:<18} {}",
                    threat.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    threat.level.as_str(),
                    threat.detector,
                    threat.description
                );
            }

            let stats = log.statistics()?;
            println!(
                "\n{} total ({} critical, {} high, {} medium, {} low)",
                stats.total, stats.critical, stats.high, stats.medium, stats.low
            );
        }

        Commands::Export { path } => {
            let log = ThreatLog::open(config.threat_log_path())?;
            log.export_csv(&path)?;
            println!("Exported to {}", path.display());
        }

        Commands::Clear => {
            let log = ThreatLog::open(config.threat_log_path())?;
            log.clear()?;
            println!("Threat log cleared");
        }

        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
