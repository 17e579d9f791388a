use clap::Parser;
use log::info;
use server::config::{DEFAULT_MAILBOX_CAPACITY, DEFAULT_WRITE_WAIT};
use server::gateway::Server;
use server::hub::Hub;
use server::{RelayConfig, RelayError};
use shared::{DEFAULT_PORT, MAX_MESSAGE_SIZE};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time WebSocket broadcast relay", long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Outbound messages buffered per connection before it is dropped
    #[arg(long, default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    mailbox_capacity: usize,

    /// Seconds a connection may go without answering a ping
    #[arg(long, default_value_t = 60)]
    pong_wait_secs: u64,

    /// Seconds allowed for a single write to a peer
    #[arg(long, default_value_t = DEFAULT_WRITE_WAIT.as_secs())]
    write_wait_secs: u64,

    /// Largest inbound frame accepted from a peer, in bytes
    #[arg(long, default_value_t = MAX_MESSAGE_SIZE)]
    max_message_size: usize,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        RelayConfig {
            host: self.host,
            port: self.port,
            write_wait: Duration::from_secs(self.write_wait_secs),
            max_message_size: self.max_message_size,
            mailbox_capacity: self.mailbox_capacity,
            ..RelayConfig::default()
        }
        .with_pong_wait(Duration::from_secs(self.pong_wait_secs))
    }
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Arc::new(Args::parse().into_config());
    config.validate()?;

    let (hub, handle) = Hub::new(&config);
    tokio::spawn(hub.run());

    // Failing to bind is the one fatal error.
    let server = Server::bind(&config.bind_addr(), Arc::clone(&config), handle).await?;
    info!("Press Ctrl+C to exit");

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, shutting down");
        }
    }

    Ok(())
}
