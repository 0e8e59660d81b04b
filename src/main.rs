use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use batchlink::accel::manager::AccelerationManager;
use batchlink::config::{BackendPreference, BatchlinkConfig, LoggingConfig};
use batchlink::peer::PeerServer;

#[derive(Parser)]
#[command(
    name = "batchlink",
    about = "Distributed batch evaluation over a two-channel line protocol",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $BATCHLINK_CONFIG, then ./batchlink.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter the input, run one batch against the peer and write the report
    Run {
        /// Input JSON with a top-level "player" array
        #[arg(long, default_value = "data/case4_mixed.json")]
        input: PathBuf,

        /// Report output path
        #[arg(long, default_value = "out/result.txt")]
        output: PathBuf,

        /// Accelerator mixing rounds per record
        #[arg(long, env = "BATCHLINK_ROUNDS")]
        rounds: Option<u32>,

        /// Accelerator backend
        #[arg(long, value_enum, env = "BATCHLINK_BACKEND")]
        backend: Option<BackendPreference>,

        /// Compute only the first N records on the accelerator (0 = all)
        #[arg(long, env = "BATCHLINK_MAX_ITEMS")]
        max_items: Option<usize>,

        /// Also print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Serve exactly one batch as the remote peer
    Peer {
        /// Concurrent hashing workers (0 = CPU count - 1)
        #[arg(long, env = "BATCHLINK_PEER_WORKERS")]
        workers: Option<usize>,

        /// SHA-256 rounds per task
        #[arg(long, env = "BATCHLINK_PEER_ROUNDS")]
        rounds: Option<u32>,
    },

    /// Show which accelerator backend would be used
    Devices {
        /// Backend preference to resolve
        #[arg(long, value_enum)]
        backend: Option<BackendPreference>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("FATAL: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BatchlinkConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run {
            input,
            output,
            rounds,
            backend,
            max_items,
            json,
        } => {
            if let Some(rounds) = rounds {
                config.accel.rounds = rounds;
            }
            if let Some(backend) = backend {
                config.accel.backend = backend;
            }
            if let Some(max_items) = max_items {
                config.accel.max_items = max_items;
            }

            let records = batchlink::input::load_records(&input)?;

            let report = batchlink::run_batch(&config, &records).await?;
            batchlink::report::write_report(&output, &report, &records)?;

            println!(
                "Wrote {} rows to {} (accelerator: {}, {:.3} s; remote: {:.3} s)",
                report.rows.len(),
                output.display(),
                report.accel_device,
                report.accel_seconds,
                report.remote_seconds
            );
            if report.dropped > 0 {
                println!(
                    "WARNING: dropped {} rows due to missing results",
                    report.dropped
                );
            }
            if json {
                let json_output = serde_json::to_string_pretty(&report)?;
                println!("{}", json_output);
            }
        }
        Commands::Peer { workers, rounds } => {
            if let Some(workers) = workers {
                config.peer.workers = workers;
            }
            if let Some(rounds) = rounds {
                config.peer.rounds = rounds;
            }

            let server = PeerServer::bind(&config.network, &config.peer).await?;
            let summary = server.serve_once().await?;
            println!(
                "Served {} of {} results{}",
                summary.sent,
                summary.declared,
                if summary.completed { "" } else { " (incomplete)" }
            );
        }
        Commands::Devices { backend } => {
            if let Some(backend) = backend {
                config.accel.backend = backend;
            }
            let preference = config.accel.backend;
            let manager = AccelerationManager::new(config.accel);

            // Device discovery blocks on the adapter request.
            let selected = tokio::task::spawn_blocking(move || {
                manager
                    .select_device()
                    .map(|device| (device.backend(), device.identity()))
            })
            .await
            .context("device discovery panicked")?;

            match selected {
                Ok((backend, identity)) => {
                    println!("{:<12} | {:<10} | Device", "Preference", "Backend");
                    println!("{:-<12}-|-{:-<10}-|-{:-<40}", "", "", "");
                    println!(
                        "{:<12} | {:<10} | {}",
                        format!("{:?}", preference),
                        format!("{:?}", backend),
                        identity
                    );
                }
                Err(e) => {
                    println!("{:?}: {}", preference, e);
                }
            }
        }
    }

    Ok(())
}
