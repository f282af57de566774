use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::ArenaServer;
use shared::{DEFAULT_GRID_ROWS, DEFAULT_KEY_BITS, DEFAULT_PORT, DEFAULT_SNACK_COUNT, DEFAULT_TICK_MS};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server host or IP address to bind to
    #[clap(short = 'H', long, default_value = shared::DEFAULT_HOST)]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Milliseconds between simulation ticks
    #[clap(short, long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,
    /// Rows (and columns) of the square grid
    #[clap(short, long, default_value_t = DEFAULT_GRID_ROWS)]
    rows: u16,
    /// Snacks kept on the grid
    #[clap(short, long, default_value_t = DEFAULT_SNACK_COUNT)]
    snacks: usize,
    /// Maximum concurrent players
    #[clap(short, long, default_value_t = 32)]
    max_sessions: usize,
    /// Server RSA key size in bits
    #[clap(short, long, default_value_t = DEFAULT_KEY_BITS)]
    key_bits: usize,
    /// Seconds a client may take to send its public key
    #[clap(long, default_value_t = 10)]
    handshake_timeout_secs: u64,
    /// Milliseconds a stalled client may block a write before it is dropped
    #[clap(long, default_value_t = 5000)]
    write_timeout_ms: u64,
    /// Fixed world seed for reproducible runs
    #[clap(long)]
    seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            tick_period: Duration::from_millis(self.tick_ms),
            grid_rows: self.rows,
            snack_count: self.snacks,
            max_sessions: self.max_sessions,
            key_bits: self.key_bits,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            world_seed: self.seed,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let server = ArenaServer::bind(config).await?;
    let shutdown = server.shutdown_handle();
    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down server...");
            shutdown.trigger();
        }
    }

    match server_handle.await {
        Ok(Ok(())) => info!("Server stopped"),
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }
    Ok(())
}
