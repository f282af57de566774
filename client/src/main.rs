use clap::Parser;
use client::input::{parse_line, HELP};
use client::network::{ArenaClient, Incoming};
use client::rendering::Renderer;
use log::{error, info, warn};
use shared::crypto::KeyPair;
use shared::{Command, DEFAULT_HOST, DEFAULT_KEY_BITS, DEFAULT_PORT};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT))]
    server: String,

    /// Client RSA key size in bits
    #[arg(short = 'k', long, default_value_t = DEFAULT_KEY_BITS)]
    key_bits: usize,

    /// Milliseconds between automatic state requests (0 disables)
    #[arg(short = 'r', long, default_value_t = 200)]
    refresh_ms: u64,

    /// Disable ANSI colors
    #[arg(long)]
    no_color: bool,
}

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Generating {}-bit client key", args.key_bits);
    let keys = KeyPair::generate(args.key_bits)?;
    let client = ArenaClient::connect(&args.server, keys).await?;
    let (identity, mut writer, mut reader) = client.into_split();
    println!("{}", HELP);

    let renderer = Renderer::new(!args.no_color);
    let display = tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Ok(Some(Incoming::State(snapshot))) => {
                    print!("{}{}", CLEAR_SCREEN, renderer.render(&snapshot, Some(&identity)));
                }
                Ok(Some(Incoming::Broadcast { message, .. })) => println!(">> {}", message),
                Ok(None) => {
                    info!("Server closed the connection");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!("Connection error: {}", e);
                    break;
                }
                Err(e) => warn!("Dropped server push: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut refresh = interval(Duration::from_millis(args.refresh_ms.max(1)));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    writer.send(&Command::Quit).await?;
                    break;
                };
                match parse_line(&line) {
                    Ok(Some(command)) => {
                        let quit = command == Command::Quit;
                        writer.send_or_warn(&command).await?;
                        if quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{} ({})", e, HELP),
                }
            }
            _ = refresh.tick(), if args.refresh_ms > 0 => {
                writer.send_or_warn(&Command::Get).await?;
            }
        }
    }

    if tokio::time::timeout(Duration::from_secs(1), display).await.is_err() {
        warn!("Server did not close the connection after quit");
    }
    Ok(())
}
