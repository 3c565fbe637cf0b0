use std::sync::Arc;

use clap::Parser;
use pulse_core::{create_store, Engine, PulseConfig, SystemClock};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use pulse_server::http::{start_http_server, HttpState};
use pulse_server::server;
use pulse_server::subsystems::directory::{AgentDirectory, PgAgentDirectory, StaticDirectory};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "pulse.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match PulseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.as_str()));
    fmt().with_env_filter(filter).init();

    // Open the store
    let store = match create_store(&config, Arc::new(SystemClock)).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open {:?} store: {}", config.store.backend, e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.ping().await {
            Ok(v) => println!("✅ Store ({}) reachable: {}", store.name(), v),
            Err(e) => {
                println!("❌ Store ({}) check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }

        println!("✅ Pulse health check passed");
        return Ok(());
    }

    let engine = Arc::new(Engine::new(store.clone(), Arc::new(SystemClock), &config));

    // Agent ownership: the relational catalogue when a database is configured,
    // otherwise the static [directory] table.
    let directory: Arc<dyn AgentDirectory> = match &config.database {
        Some(db) => match pulse_core::db::create_pool(db).await {
            Ok(pool) => Arc::new(PgAgentDirectory::new(pool)),
            Err(e) => {
                eprintln!("Failed to connect to agent directory database: {}", e);
                std::process::exit(1);
            }
        },
        None => Arc::new(StaticDirectory::new(config.directory.owners.clone())),
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Expired-key sweeper
    tokio::spawn(pulse_server::subsystems::sweeper::run_sweeper_loop(
        store,
        config.store.clone(),
        tx.subscribe(),
    ));

    // HTTP reporting API, if enabled
    if config.http.enabled {
        let state = Arc::new(HttpState {
            engine: engine.clone(),
            directory,
            config: config.clone(),
        });
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.expanded_socket_path();
    server::run_unix_server(&socket_path, engine, config, tx.subscribe()).await?;

    Ok(())
}
