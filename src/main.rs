use clap::Parser;
use confab_server::ServerConfig;

/// WebSocket conversation relay server.
#[derive(Parser)]
#[command(name = "confab")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8081)]
    port: u16,

    /// Shared secret used to verify admin tokens.
    #[arg(long, env = "CONFAB_TOKEN_SECRET")]
    token_secret: String,

    /// Per-connection outbound queue capacity.
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,

    /// Upper bound (ms) of the random delay before each command runs.
    #[arg(long, default_value_t = 400)]
    dispatch_jitter_ms: u64,
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

    let cli = Cli::parse();

    let mut config = ServerConfig::new(cli.port, cli.token_secret);
    config.max_send_queue = cli.max_send_queue;
    config.dispatch_jitter_ms = cli.dispatch_jitter_ms;

    let handle = confab_server::start(config)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "Confab server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
