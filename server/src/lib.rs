//! # Broadcast Relay Server Library
//!
//! This library implements a real-time fan-out relay: every text message a
//! connected client sends is broadcast to every connected client, with bounded
//! memory per connection and no single slow client able to stall the rest.
//!
//! ## Core Responsibilities
//!
//! ### Membership Authority
//! The [`hub`] is the only component that knows who is connected. Joins,
//! leaves and member counts are announced from there, in the order the hub
//! applied them.
//!
//! ### Fan-out With Backpressure
//! Each connection owns a bounded mailbox. The hub pushes into mailboxes
//! without ever waiting; a full mailbox gets its connection dropped rather
//! than delaying everyone else.
//!
//! ### Liveness
//! Sessions ping their peers on a fixed period and expect a pong within the
//! read deadline. A silent peer is torn down by its own inbound pump.
//!
//! ## Architecture Design
//!
//! ### Actor-Style Hub
//! One task consumes three bounded queues (register, unregister, broadcast)
//! in a single select loop. Membership is owned by that task alone, so no
//! locks exist anywhere in the relay.
//!
//! ### Two Pumps Per Connection
//! For N live connections there are 2N + 1 tasks: an inbound and an outbound
//! pump per connection plus the hub. They talk only through channels.
//!
//! ## Module Organization
//!
//! ### Hub Module (`hub`)
//! - Membership map and the control loop
//! - Non-blocking fan-out and eviction of overloaded peers
//! - Join / leave / member-count announcements
//!
//! ### Session Module (`session`)
//! - Inbound decode, restamp and forward
//! - Outbound coalescing writes and periodic pings
//! - Frame-size guard and read deadline
//!
//! ### Gateway Module (`gateway`)
//! - TCP accept loop and WebSocket upgrade
//! - Display-name extraction from the upgrade request
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::RelayConfig;
//! use server::gateway::Server;
//! use server::hub::Hub;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(RelayConfig::default());
//!     config.validate()?;
//!
//!     // One hub for the whole process, handed to the gateway explicitly
//!     let (hub, handle) = Hub::new(&config);
//!     tokio::spawn(hub.run());
//!
//!     let server = Server::bind(&config.bind_addr(), Arc::clone(&config), handle).await?;
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod session;

pub use config::RelayConfig;
pub use error::RelayError;
