//! Membership authority and broadcast fan-out
//!
//! The hub is an actor: one task owns the membership map and consumes three
//! bounded input queues (register, unregister, broadcast). Nothing else ever
//! touches membership, so no locks are involved.
//!
//! Delivery to a member is a non-blocking push onto its bounded mailbox. A
//! member whose mailbox is full (or whose writer is gone) is evicted on the
//! spot instead of slowing the fan-out for everyone else.

use crate::config::RelayConfig;
use crate::error::RelayError;
use log::{debug, error, info, warn};
use shared::{encode, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Identifier assigned by the gateway to each accepted connection
pub type ConnectionId = u64;

/// Encoded message text, shared between every mailbox it is delivered to
pub type Payload = Arc<str>;

/// Broadcasts applied back to back before a waiting unregister gets a turn
pub const BROADCAST_BURST: usize = 32;

/// Request to add a connection to the membership set
///
/// The hub keeps the only sender of `mailbox`; dropping it is what closes
/// the mailbox and stops the connection's writer.
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    pub name: String,
    pub mailbox: mpsc::Sender<Payload>,
}

#[derive(Debug)]
struct Member {
    name: String,
    mailbox: mpsc::Sender<Payload>,
}

/// Cloneable sending side of the hub's input queues
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Payload>,
}

impl HubHandle {
    pub async fn register(&self, registration: Registration) -> Result<(), RelayError> {
        self.register_tx
            .send(registration)
            .await
            .map_err(|_| RelayError::HubClosed)
    }

    /// Removing a connection that is not a member is a no-op.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), RelayError> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|_| RelayError::HubClosed)
    }

    pub async fn broadcast(&self, payload: Payload) -> Result<(), RelayError> {
        self.broadcast_tx
            .send(payload)
            .await
            .map_err(|_| RelayError::HubClosed)
    }
}

pub struct Hub {
    members: HashMap<ConnectionId, Member>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<Payload>,
}

impl Hub {
    pub fn new(config: &RelayConfig) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(config.hub_queue_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.hub_queue_capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.hub_queue_capacity);

        let hub = Hub {
            members: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
        };

        (hub, handle)
    }

    /// Control loop. Runs until every [`HubHandle`] has been dropped.
    ///
    /// Queues are polled in a fixed order: a connection always registers
    /// before it can broadcast, and its broadcasts are queued before its
    /// unregister, so this order keeps each connection's events causal.
    /// After [`BROADCAST_BURST`] consecutive broadcasts a pending unregister
    /// is applied first, so chat load cannot hold departures back.
    pub async fn run(mut self) {
        info!("Hub started");

        let mut burst = 0;
        loop {
            if burst >= BROADCAST_BURST {
                burst = 0;
                if let Ok(id) = self.unregister_rx.try_recv() {
                    self.handle_unregister(id);
                    continue;
                }
            }

            tokio::select! {
                biased;

                Some(registration) = self.register_rx.recv() => {
                    self.handle_register(registration);
                }
                Some(payload) = self.broadcast_rx.recv() => {
                    burst += 1;
                    self.fan_out(payload);
                }
                Some(id) = self.unregister_rx.recv() => {
                    burst = 0;
                    self.handle_unregister(id);
                }
                else => break,
            }
        }

        info!("Hub stopped with {} members", self.members.len());
    }

    fn handle_register(&mut self, registration: Registration) {
        let Registration { id, name, mailbox } = registration;

        self.members.insert(
            id,
            Member {
                name: name.clone(),
                mailbox,
            },
        );
        info!("Client connected: {} (Total: {})", name, self.members.len());

        self.announce(&Message::join(name));
        self.announce_member_count();
    }

    fn handle_unregister(&mut self, id: ConnectionId) {
        // Dropping the member drops the mailbox sender, which closes it.
        let Some(member) = self.members.remove(&id) else {
            debug!("Ignoring unregister for non-member {}", id);
            return;
        };
        info!(
            "Client disconnected: {} (Total: {})",
            member.name,
            self.members.len()
        );

        self.announce(&Message::leave(member.name));
        self.announce_member_count();
    }

    fn announce(&mut self, message: &Message) {
        if let Some(payload) = encode_payload(message) {
            self.fan_out(payload);
        }
    }

    fn announce_member_count(&mut self) {
        let count = Message::member_count(self.members.len());
        self.announce(&count);
    }

    /// Delivers `payload` to every member. Members evicted along the way are
    /// announced with a `leave` each and one updated count once the pass that
    /// evicted them has finished.
    fn fan_out(&mut self, payload: Payload) {
        let mut pending = VecDeque::from([payload]);

        while let Some(payload) = pending.pop_front() {
            let evicted = self.deliver(&payload);
            if evicted.is_empty() {
                continue;
            }

            for name in evicted {
                pending.extend(encode_payload(&Message::leave(name)));
            }
            pending.extend(encode_payload(&Message::member_count(self.members.len())));
        }
    }

    fn deliver(&mut self, payload: &Payload) -> Vec<String> {
        let mut evicted = Vec::new();

        self.members
            .retain(|id, member| match member.mailbox.try_send(Arc::clone(payload)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Mailbox full for {} (connection {}), dropping connection",
                        member.name, id
                    );
                    evicted.push(std::mem::take(&mut member.name));
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Writer gone for {} (connection {})", member.name, id);
                    evicted.push(std::mem::take(&mut member.name));
                    false
                }
            });

        if !evicted.is_empty() {
            info!(
                "Evicted {} member(s) (Total: {})",
                evicted.len(),
                self.members.len()
            );
        }

        evicted
    }
}

fn encode_payload(message: &Message) -> Option<Payload> {
    match encode(message) {
        Ok(text) => Some(Payload::from(text)),
        Err(e) => {
            error!("Failed to encode {} message: {}", message.kind(), e);
            None
        }
    }
}
