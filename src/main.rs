use clap::Parser;
use simgate_core::events::GatewayEvent;
use simgate_server::ServerConfig;
use tokio::sync::broadcast;

/// Ticket-authenticated WebSocket pub/sub gateway for simulation events.
#[derive(Parser)]
#[command(name = "simgate", version)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 9090)]
    port: u16,

    /// Sliding ticket lifetime in minutes
    #[arg(long, default_value_t = 10)]
    ticket_lifetime_minutes: i64,

    /// Per-connection outbound queue capacity
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!("Starting Simgate server");

    // Publisher broadcast channel. In-process publishers clone `event_tx`
    // and send GatewayEvents; the server fans them out to subscribers.
    let (event_tx, _) = broadcast::channel::<GatewayEvent>(1024);

    let config = ServerConfig {
        port: args.port,
        max_send_queue: args.max_send_queue,
        ticket_lifetime_minutes: args.ticket_lifetime_minutes,
    };
    let port = config.port;
    let _handle = simgate_server::start(config, event_tx)
        .await
        .expect("Failed to start server");

    tracing::info!(port = port, "Simgate server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
