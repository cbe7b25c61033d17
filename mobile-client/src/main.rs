//! Command-line front end for the offline order client.
//!
//! - `run` keeps the mirror and queue in sync, probing the server for connectivity
//! - `sync` catches up once and exits
//! - `queue`, `retry`, `discard` inspect and repair the action queue
//! - `order` places an order, queuing it when the server is out of reach

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use clap::{Parser, Subcommand};
use mobile_client::{
    ClientConfig, HttpTransport, LocalDatabase, OrderingClient, PlacedOrder, SyncCoordinator, SyncTransport,
};
use shared::{CreateOrderRequest, OrderItemInput};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mobile-client")]
#[command(about = "Offline-capable restaurant order client", long_about = None)]
struct Cli {
    #[arg(global = true, long, env = "API_BASE_URL", default_value = "http://localhost:3001")]
    api_base_url: String,

    #[arg(global = true, long, env = "LOCAL_DB_PATH", default_value = "restaurant.db")]
    local_db_path: PathBuf,

    #[arg(global = true, long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    http_timeout_secs: u64,

    /// Failed replays before a queued write is parked
    #[arg(global = true, long, env = "MAX_ATTEMPTS", default_value = "10")]
    max_attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay running and sync whenever the server becomes reachable
    Run {
        #[arg(long, env = "PROBE_INTERVAL_SECS", default_value = "5")]
        probe_interval_secs: u64,
    },

    /// Refresh tables and menu, then replay queued writes
    Sync,

    /// List queued writes
    Queue,

    /// Reset a failed write so the next sync sends it again
    Retry { id: i64 },

    /// Drop a queued write without sending it
    Discard { id: i64 },

    /// Place an order
    Order {
        #[arg(long)]
        table: i32,

        #[arg(long)]
        user: i32,

        /// dish:quantity:price[:notes], repeatable
        #[arg(long = "item", required = true, value_parser = parse_item)]
        items: Vec<OrderItemInput>,
    },
}

fn parse_item(value: &str) -> Result<OrderItemInput, String> {
    let mut parts = value.splitn(4, ':');
    let mut next = |name: &str| parts.next().filter(|part| !part.is_empty()).ok_or(format!("missing {}", name));

    let id = next("dish id")?.parse::<i32>().map_err(|e| format!("dish id: {}", e))?;
    let quantity = next("quantity")?.parse::<i32>().map_err(|e| format!("quantity: {}", e))?;
    let price = next("price")?.parse::<BigDecimal>().map_err(|e| format!("price: {}", e))?;
    let notes = parts.next().map(String::from);

    Ok(OrderItemInput { id, quantity, price, notes })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let config = ClientConfig::new(cli.api_base_url)
        .with_timeout(cli.http_timeout_secs)
        .with_db_path(cli.local_db_path)
        .with_max_attempts(cli.max_attempts);

    let db = Arc::new(
        LocalDatabase::open(&config.db_path)
            .with_context(|| format!("Failed to open {}", config.db_path.display()))?,
    );
    let transport: Arc<dyn SyncTransport> = Arc::new(HttpTransport::new(&config)?);
    let coordinator = Arc::new(SyncCoordinator::new(db, transport.clone(), &config));

    match cli.command {
        Commands::Run { probe_interval_secs } => {
            let online = transport.is_reachable().await;
            coordinator.start(online).await?;

            let (online_tx, online_rx) = watch::channel(online);
            let runner = {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.run(online_rx).await })
            };

            let mut probe = tokio::time::interval(Duration::from_secs(probe_interval_secs.max(1)));
            info!(base_url = %config.base_url, "Watching server connectivity");
            loop {
                tokio::select! {
                    _ = probe.tick() => {
                        let reachable = transport.is_reachable().await;
                        online_tx.send_if_modified(|current| {
                            let changed = *current != reachable;
                            *current = reachable;
                            changed
                        });
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutting down");
                        break;
                    }
                }
            }

            drop(online_tx);
            runner.await?;
        }
        Commands::Sync => {
            let online = transport.is_reachable().await;
            match coordinator.start(online).await? {
                Some(report) => println!(
                    "replayed {} retried {} failed {} skipped {}",
                    report.replayed, report.retried, report.failed, report.skipped
                ),
                None if online => println!("queue was not drained, see log"),
                None => println!("server unreachable at {}", config.base_url),
            }
        }
        Commands::Queue => {
            coordinator.start(false).await?;
            for action in coordinator.queue().all()? {
                println!(
                    "#{} {} {} {} [{}] attempts={} {}",
                    action.id,
                    action.entity_key,
                    action.method,
                    action.endpoint,
                    action.status,
                    action.attempts,
                    action.last_error.unwrap_or_default()
                );
            }
        }
        Commands::Retry { id } => {
            coordinator.start(false).await?;
            if coordinator.queue().retry(id)? {
                println!("write #{} will be sent on the next sync", id);
            } else {
                println!("no failed write #{}", id);
            }
        }
        Commands::Discard { id } => {
            coordinator.start(false).await?;
            if coordinator.queue().discard(id)? {
                println!("write #{} discarded", id);
            } else {
                println!("no queued write #{}", id);
            }
        }
        Commands::Order { table, user, items } => {
            coordinator.start(false).await?;
            let (_online_tx, online_rx) = watch::channel(transport.is_reachable().await);
            let client = OrderingClient::new(&coordinator).with_connectivity(online_rx);

            let request = CreateOrderRequest { table_id: table, user_id: user, items };
            match client.place_order(request).await? {
                PlacedOrder::Confirmed { order_id } => println!("order {} confirmed", order_id),
                PlacedOrder::Queued { temp_id, action_id } => {
                    println!("order {} queued as write #{}", temp_id, action_id)
                }
            }
        }
    }

    Ok(())
}
