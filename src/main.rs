use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use stickyroute::config::Config;
use stickyroute::core::{Endpoint, Value};
use stickyroute::error::ConfigError;
use stickyroute::memory::{replica_host, MemoryCluster, PRIMARY_HOST};
use stickyroute::{Router, RouterConfig};

#[derive(Parser)]
#[command(name = "stickyroute")]
#[command(about = "A session-scoped master/slave database router with sticky-master consistency")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "stickyroute team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration files
    Config {
        /// Deployment layout (primary-only or replicated)
        #[arg(short, long)]
        layout: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Walk through a routing session against an in-memory cluster
    Demo {
        /// Number of in-memory replicas
        #[arg(short, long, default_value_t = 2)]
        replicas: usize,
        /// Log level (error, warn, info, debug, trace)
        #[arg(long, default_value = "info")]
        log_level: String,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { layout, output } => generate_config(layout, output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Demo {
            replicas,
            log_level,
        } => {
            init_logging(&log_level);
            run_demo(replicas).await?;
        }
        Commands::Version => show_version(),
    }

    Ok(())
}

fn generate_config(layout: String, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", layout, output);

    Config::create_example_config(&output, &layout).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and validate it with:");
    println!("  stickyroute validate --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            init_logging(&config.logging.level);
            println!("✓ Configuration file is valid");
            println!("  Primary: {}", config.primary_endpoint());
            println!("  Fetch mode: {:?}", config.router.fetch_mode);
            println!("  Connect timeout: {}ms", config.router.connect_timeout_ms);

            let replicas = config.replica_endpoints();
            if replicas.is_empty() {
                println!("  No replicas: all reads go to the primary");
            } else {
                println!("  Replicas: {} candidates, one picked per session", replicas.len());
                for (i, replica) in replicas.iter().enumerate() {
                    println!("    {}: {}", i + 1, replica);
                }
            }
            info!("Validated configuration {:?}", config_path);
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
                ConfigError::NoReplicas => eprintln!("  {}", e),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

async fn run_demo(replica_count: usize) -> anyhow::Result<()> {
    let cluster = MemoryCluster::new(replica_count);
    cluster
        .primary()
        .execute("CREATE TABLE items (id INT, col1 INT)", &[])?;
    cluster
        .primary()
        .execute("INSERT INTO items (col1) VALUES (1)", &[])?;
    cluster.replicate();

    // Diverge every replica so the routing decision is visible
    for i in 0..cluster.replica_count() {
        if let Some(replica) = cluster.replica(i) {
            replica.execute("UPDATE items SET col1 = 100", &[])?;
        }
    }

    let primary = Endpoint::primary(PRIMARY_HOST, 3306, "demo", "demo", "");
    let replicas = (0..replica_count)
        .map(|i| Endpoint::replica_of(&primary, &replica_host(i)))
        .collect();
    let config = Arc::new(RouterConfig::new(primary, replicas)?);
    let mut router = Router::new(config, Arc::new(cluster.connector()));

    let before = router.get_one("SELECT col1 FROM items", &[]).await?;
    println!("Read before any write:  col1 = {}", display(before));
    if let Some(replica) = router.selected_replica() {
        println!("  served by {}", replica);
    }

    let affected = router
        .execute("UPDATE items SET col1 = ? WHERE id = 1", &[Value::Int(2)])
        .await?;
    println!("Write on primary:       {} row(s) affected", affected);

    let after = router.get_one("SELECT col1 FROM items", &[]).await?;
    println!("Read after the write:   col1 = {}", display(after));

    let stats = router.stats();
    println!(
        "Stats: {} replica read(s), {} primary read(s), {} write(s), {} connection(s)",
        stats.replica_reads, stats.primary_reads, stats.writes, stats.connections_opened
    );

    router.close_connection().await;
    Ok(())
}

fn display(value: Option<Value>) -> String {
    value.map_or_else(|| "(none)".to_string(), |v| v.to_string())
}

fn show_version() {
    println!("stickyroute v{}", env!("CARGO_PKG_VERSION"));
    println!("A session-scoped master/slave database router");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Reads on a per-session replica until the first write");
    println!("  • Sticky master after any write or transaction");
    println!("  • Lazy per-role connections with connect timeouts");
    println!("  • Role-tagged errors for primary and replica failures");
}

fn init_logging(level: &str) {
    let log_level = match level {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    // A second init (validate after demo, tests) is harmless
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .try_init();

    info!("Logging initialized at level: {:?}", log_level);
}
