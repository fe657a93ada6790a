use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use sigwarden::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "sigwarden",
    about = "Signal integrity and rate-anomaly engine for AI-agent telemetry",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service (HTTP listener + eviction sweep)
    Serve {
        /// Path to the TOML configuration file
        #[arg(long, default_value = "sigwarden.toml")]
        config: PathBuf,

        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,

        /// Override the configured database path
        #[arg(long)]
        db: Option<String>,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Path to the TOML configuration file
        #[arg(long, default_value = "sigwarden.toml")]
        config: PathBuf,
    },

    /// List recent anomalies for one user, newest first
    Anomalies {
        /// User identifier to query
        #[arg(long)]
        user_id: String,

        /// Maximum number of records to print
        #[arg(long, default_value = "100")]
        limit: u32,

        /// Path to the TOML configuration file
        #[arg(long, default_value = "sigwarden.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind, db } => {
            let mut app_config = AppConfig::load(&config)?;
            if let Some(bind) = bind {
                app_config.bind = bind.parse()?;
            }
            if let Some(db) = db {
                app_config.db_path = db;
            }
            tracing::info!(config = %config.display(), "starting sigwarden");
            sigwarden::serve(app_config).await?;
        }
        Commands::CheckConfig { config } => {
            let app_config = AppConfig::load(&config)?;
            println!("Configuration OK ({})", config.display());
            println!();
            println!(
                "{:<12} | {:>10} | {:>9} | {:>10} | {:>15}",
                "Signal", "Window (s)", "Threshold", "Multiplier", "Idle expiry (s)"
            );
            println!(
                "{:-<12}-|-{:-<10}-|-{:-<9}-|-{:-<10}-|-{:-<15}",
                "", "", "", "", ""
            );
            for (signal, policy) in app_config.policies.iter() {
                println!(
                    "{:<12} | {:>10} | {:>9} | {:>10} | {:>15}",
                    signal.to_string(),
                    policy.window_secs,
                    policy.threshold,
                    policy.severity_multiplier,
                    policy.idle_expiry_secs
                );
            }
            println!();
            println!("bind:        {}", app_config.bind);
            println!("db_path:     {}", app_config.db_path);
            println!("max payload: {} bytes", app_config.max_payload_bytes);
            println!("webhook:     {}", app_config.alerts.webhook_url);
        }
        Commands::Anomalies {
            user_id,
            limit,
            config,
        } => {
            let app_config = AppConfig::load(&config)?;
            let pool = sigwarden::storage::open_pool(&app_config.db_path)?;
            let store = sigwarden::storage::EventStore::new(pool);

            let records = store.anomalies_for_user(&user_id, limit).await?;
            if records.is_empty() {
                println!("No anomalies recorded for '{user_id}'.");
            } else {
                println!(
                    "{:<20} | {:<10} | {:<8} | {:>5} | {:>9} | Detected at",
                    "User", "Signal", "Severity", "Count", "Threshold"
                );
                println!(
                    "{:-<20}-|-{:-<10}-|-{:-<8}-|-{:-<5}-|-{:-<9}-|-{:-<25}",
                    "", "", "", "", "", ""
                );
                for record in &records {
                    let a = &record.anomaly;
                    println!(
                        "{:<20} | {:<10} | {:<8} | {:>5} | {:>9} | {}",
                        a.user_id,
                        a.signal_type.to_string(),
                        a.severity.to_string(),
                        a.window_count,
                        a.threshold,
                        a.detected_at.to_rfc3339()
                    );
                }
            }
        }
    }

    Ok(())
}
