use clap::Parser;
use client::network;
use log::{error, info};
use shared::DEFAULT_PORT;
use std::io::Write;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server port to connect to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Username to chat with (prompted for when omitted)
    #[arg(short, long)]
    username: Option<String>,
}

fn prompt_username() -> std::io::Result<String> {
    print!("Enter username: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let username = match args.username {
        Some(name) => name,
        None => prompt_username()?,
    };
    let username = username.trim();
    if username.is_empty() {
        eprintln!("Username is required");
        std::process::exit(1);
    }

    info!("Connecting to server {}:{} as {}...", args.host, args.port, username);
    println!("Type your messages and press Enter to send. Type 'quit' to exit.");

    let client = network::Client::new(&args.host, args.port, username)?;
    if let Err(e) = client.run().await {
        error!("Failed to run client: {}", e);
        std::process::exit(1);
    }

    // The blocking stdin reader would otherwise hold up runtime shutdown.
    std::process::exit(0);
}
