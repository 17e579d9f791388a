//! Per-connection pumps bridging one WebSocket to the hub
//!
//! Each session runs two tasks:
//! - the **inbound pump** reads frames, splits and decodes them, restamps
//!   every chat message with the session's own name and the current time, and
//!   forwards it to the hub. It enforces the frame-size limit and the read
//!   deadline, which only a pong from the peer can extend.
//! - the **outbound pump** drains the mailbox into the socket, coalescing
//!   whatever is already queued into a single frame, and sends periodic pings.
//!   It stops when the hub closes the mailbox.
//!
//! Whichever pump fails first ends the session; the inbound pump then asks the
//! hub to unregister the connection.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::hub::{ConnectionId, HubHandle, Payload, Registration};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode_batch, encode, Message, BATCH_DELIMITER};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// What the inbound pump does after handling a frame
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct Session {
    id: ConnectionId,
    name: String,
    hub: HubHandle,
    config: Arc<RelayConfig>,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        name: impl Into<String>,
        hub: HubHandle,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            hub,
            config,
        }
    }

    pub fn registration(&self, mailbox: mpsc::Sender<Payload>) -> Registration {
        Registration {
            id: self.id,
            name: self.name.clone(),
            mailbox,
        }
    }

    /// Starts both pumps on `ws`. The returned handle finishes once the
    /// inbound pump has torn the session down.
    pub fn spawn<S>(self, ws: WebSocketStream<S>, mailbox: mpsc::Receiver<Payload>) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let writer = tokio::spawn(write_pump(
            sink,
            mailbox,
            Arc::clone(&self.config),
            self.name.clone(),
        ));
        tokio::spawn(self.read_pump(stream, writer))
    }

    async fn read_pump<S>(self, mut stream: SplitStream<WebSocketStream<S>>, mut writer: JoinHandle<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let frame = tokio::select! {
                frame = timeout_at(deadline, stream.next()) => frame,
                _ = &mut writer => {
                    debug!("Writer for {} finished, stopping reader", self.name);
                    break;
                }
            };

            let message = match frame {
                Err(_) => {
                    info!(
                        "No pong from {} within {:?}, closing connection",
                        self.name, self.config.pong_wait
                    );
                    break;
                }
                Ok(None) => {
                    debug!("Stream from {} ended", self.name);
                    break;
                }
                Ok(Some(Err(e))) => {
                    debug!("Read from {} failed: {}", self.name, e);
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match self.handle_frame(message, &mut deadline).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    error!("Session for {} failed: {}", self.name, e);
                    break;
                }
            }
        }

        if let Err(e) = self.hub.unregister(self.id).await {
            error!("Failed to unregister {}: {}", self.name, e);
        }
    }

    async fn handle_frame(
        &self,
        message: WsMessage,
        deadline: &mut Instant,
    ) -> Result<Flow, RelayError> {
        match message {
            WsMessage::Text(text) => self.relay(text.as_bytes()).await,
            WsMessage::Binary(data) => self.relay(data.as_ref()).await,
            WsMessage::Pong(_) => {
                *deadline = Instant::now() + self.config.pong_wait;
                Ok(Flow::Continue)
            }
            WsMessage::Close(frame) => {
                debug!("{} sent close: {:?}", self.name, frame);
                Ok(Flow::Stop)
            }
            // Pings are answered by the protocol layer.
            WsMessage::Ping(_) | WsMessage::Frame(_) => Ok(Flow::Continue),
        }
    }

    /// Decodes every object in `data` and forwards the chat messages.
    async fn relay(&self, data: &[u8]) -> Result<Flow, RelayError> {
        if data.len() > self.config.max_message_size {
            warn!(
                "Frame of {} bytes from {} exceeds limit of {}, closing connection",
                data.len(),
                self.name,
                self.config.max_message_size
            );
            return Ok(Flow::Stop);
        }

        for decoded in decode_batch(data) {
            let content = match decoded {
                Ok(Message::Chat { content, .. }) => content,
                Ok(other) => {
                    debug!("Ignoring {} message from {}", other.kind(), self.name);
                    continue;
                }
                Err(e) => {
                    warn!("Dropping malformed message from {}: {}", self.name, e);
                    continue;
                }
            };

            // Sender and timestamp always come from the session, never the peer.
            let restamped = Message::chat(self.name.as_str(), content);
            let payload = match encode(&restamped) {
                Ok(text) => Payload::from(text),
                Err(e) => {
                    error!("Failed to encode chat from {}: {}", self.name, e);
                    continue;
                }
            };
            self.hub.broadcast(payload).await?;
        }

        Ok(Flow::Continue)
    }
}

async fn write_pump<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut mailbox: mpsc::Receiver<Payload>,
    config: Arc<RelayConfig>,
    name: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            queued = mailbox.recv() => {
                let Some(first) = queued else {
                    debug!("Mailbox for {} closed, sending close frame", name);
                    let _ = send_within(&mut sink, WsMessage::Close(None), config.write_wait).await;
                    break;
                };

                let frame = coalesce(first, &mut mailbox, config.mailbox_capacity);
                if let Err(e) = send_within(&mut sink, WsMessage::text(frame), config.write_wait).await {
                    debug!("Write to {} failed: {}", name, e);
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = send_within(&mut sink, WsMessage::Ping(Vec::new().into()), config.write_wait).await {
                    debug!("Ping to {} failed: {}", name, e);
                    break;
                }
            }
        }
    }
}

/// Joins `first` with up to `limit - 1` payloads that are already queued.
fn coalesce(first: Payload, mailbox: &mut mpsc::Receiver<Payload>, limit: usize) -> String {
    let mut frame = String::from(&*first);

    for _ in 1..limit {
        match mailbox.try_recv() {
            Ok(next) => {
                frame.push(char::from(BATCH_DELIMITER));
                frame.push_str(&next);
            }
            Err(_) => break,
        }
    }

    frame
}

async fn send_within<S>(
    sink: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    message: WsMessage,
    wait: Duration,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(wait, sink.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(RelayError::WriteTimeout(wait)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use shared::{decode, split_objects};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    const WAIT: Duration = Duration::from_secs(2);

    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    async fn next_message(rx: &mut mpsc::Receiver<Payload>) -> Message {
        let payload = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for hub output")
            .expect("mailbox closed");
        decode(payload.as_bytes()).unwrap()
    }

    /// Starts a hub with an observer member, then a session called `name`
    /// whose peer end is returned.
    async fn start_session(
        name: &str,
        config: RelayConfig,
    ) -> (mpsc::Receiver<Payload>, WebSocketStream<DuplexStream>) {
        let (server_ws, client_ws) = ws_pair().await;
        let (observer_rx, _handle) = start_session_on(name, config, server_ws).await;
        (observer_rx, client_ws)
    }

    async fn start_session_on(
        name: &str,
        config: RelayConfig,
        server_ws: WebSocketStream<DuplexStream>,
    ) -> (mpsc::Receiver<Payload>, HubHandle) {
        let config = Arc::new(config);
        let (hub, handle) = Hub::new(&config);
        tokio::spawn(hub.run());

        let (observer_tx, mut observer_rx) = mpsc::channel(64);
        handle
            .register(Registration {
                id: 0,
                name: "observer".to_string(),
                mailbox: observer_tx,
            })
            .await
            .unwrap();

        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
        let session = Session::new(1, name, handle.clone(), Arc::clone(&config));
        handle.register(session.registration(mailbox_tx)).await.unwrap();
        session.spawn(server_ws, mailbox_rx);

        // join(observer), count=1, join(name), count=2
        for _ in 0..4 {
            next_message(&mut observer_rx).await;
        }

        (observer_rx, handle)
    }

    #[tokio::test]
    async fn test_chat_is_restamped_with_session_identity() {
        let (mut observer_rx, mut client) = start_session("alice", RelayConfig::default()).await;
        let before = Message::member_count(0).created_at();

        client
            .send(WsMessage::text(
                r#"{"kind":"chat","sender":"mallory","content":"hi","created_at":"1999-01-01T00:00:00Z"}"#,
            ))
            .await
            .unwrap();

        match next_message(&mut observer_rx).await {
            Message::Chat {
                sender,
                content,
                created_at,
            } => {
                assert_eq!(sender, "alice");
                assert_eq!(content, "hi");
                assert!(created_at >= before);
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_coalesced_inbound_frame_relays_each_chat() {
        let (mut observer_rx, mut client) = start_session("alice", RelayConfig::default()).await;
        let frame = format!(
            "{}\n{}",
            r#"{"kind":"chat","content":"one"}"#, r#"{"kind":"chat","content":"two {}"}"#
        );

        client.send(WsMessage::text(frame)).await.unwrap();

        for expected in ["one", "two {}"] {
            match next_message(&mut observer_rx).await {
                Message::Chat { content, .. } => assert_eq!(content, expected),
                other => panic!("expected chat, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_connection_alive() {
        let (mut observer_rx, mut client) = start_session("alice", RelayConfig::default()).await;

        client.send(WsMessage::text("definitely not json")).await.unwrap();
        client
            .send(WsMessage::text(r#"{"kind":"join","sender":"eve","created_at":"2024-01-01T00:00:00Z"}"#))
            .await
            .unwrap();
        client
            .send(WsMessage::text(r#"{"kind":"chat","content":"still here"}"#))
            .await
            .unwrap();

        match next_message(&mut observer_rx).await {
            Message::Chat { sender, content, .. } => {
                assert_eq!(sender, "alice");
                assert_eq!(content, "still here");
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_tears_down_connection() {
        let (mut observer_rx, mut client) = start_session("alice", RelayConfig::default()).await;
        let oversized = format!(r#"{{"kind":"chat","content":"{}"}}"#, "x".repeat(600));

        client.send(WsMessage::text(oversized)).await.unwrap();

        assert_eq!(next_message(&mut observer_rx).await.kind(), shared::MessageKind::Leave);
        match next_message(&mut observer_rx).await {
            Message::MemberCount { count, .. } => assert_eq!(count, 1),
            other => panic!("expected member count, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_frame_unregisters() {
        let (mut observer_rx, mut client) = start_session("alice", RelayConfig::default()).await;

        client.send(WsMessage::Close(None)).await.unwrap();

        let leave = next_message(&mut observer_rx).await;
        assert_eq!(leave.kind(), shared::MessageKind::Leave);
        assert_eq!(leave.sender(), "alice");
    }

    #[tokio::test]
    async fn test_silent_peer_hits_read_deadline() {
        let config = RelayConfig::default().with_pong_wait(Duration::from_millis(200));
        // The peer end is never polled, so it never answers pings.
        let (mut observer_rx, _client) = start_session("alice", config).await;

        let leave = next_message(&mut observer_rx).await;
        assert_eq!(leave.kind(), shared::MessageKind::Leave);
    }

    #[tokio::test]
    async fn test_pongs_extend_read_deadline() {
        let config = RelayConfig {
            pong_wait: Duration::from_millis(400),
            ping_period: Duration::from_millis(100),
            ..RelayConfig::default()
        };
        let (mut observer_rx, client) = start_session("alice", config).await;
        let (mut client_tx, mut client_rx) = client.split();
        // Reading lets the protocol layer answer each ping with a pong.
        tokio::spawn(async move { while let Some(Ok(_)) = client_rx.next().await {} });

        tokio::time::sleep(Duration::from_millis(1000)).await;
        client_tx
            .send(WsMessage::text(r#"{"kind":"chat","content":"alive"}"#))
            .await
            .unwrap();

        assert_eq!(next_message(&mut observer_rx).await.kind(), shared::MessageKind::Chat);
    }

    #[test]
    fn test_coalesce_drains_queued_payloads() {
        let (tx, mut rx) = mpsc::channel(8);
        for text in ["a", "b", "c"] {
            tx.try_send(Payload::from(text)).unwrap();
        }

        let first = rx.try_recv().unwrap();
        assert_eq!(coalesce(first, &mut rx, 8), "a\nb\nc");

        for text in ["d", "e", "f"] {
            tx.try_send(Payload::from(text)).unwrap();
        }
        let first = rx.try_recv().unwrap();
        assert_eq!(coalesce(first, &mut rx, 2), "d\ne");
        assert_eq!(rx.try_recv().unwrap(), Payload::from("f"));
    }

    #[tokio::test]
    async fn test_write_pump_batches_and_closes() {
        let (server_ws, mut client) = ws_pair().await;
        let (sink, _stream) = server_ws.split();
        let (tx, rx) = mpsc::channel(16);
        let messages = [
            Message::join("alice"),
            Message::member_count(1),
            Message::chat("alice", "}{"),
        ];
        for message in &messages {
            tx.try_send(Payload::from(encode(message).unwrap())).unwrap();
        }

        let config = Arc::new(RelayConfig::default());
        let writer = tokio::spawn(write_pump(sink, rx, config, "alice".to_string()));

        let frame = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        let text = match frame {
            WsMessage::Text(text) => text,
            other => panic!("expected a text frame, got {:?}", other),
        };
        let parts = split_objects(text.as_bytes());
        assert_eq!(parts.len(), messages.len());
        for (part, expected) in parts.iter().zip(&messages) {
            assert_eq!(&decode(part).unwrap(), expected);
        }

        drop(tx);
        let closing = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(closing, WsMessage::Close(_)));
        timeout(WAIT, writer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_pump_gives_up_on_stalled_peer() {
        // The peer end is kept open but never read, so a large frame cannot
        // be flushed through the small pipe.
        let (server_io, _client_io) = tokio::io::duplex(64);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let (sink, _stream) = server_ws.split();
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Payload::from("x".repeat(4096))).unwrap();

        let config = Arc::new(RelayConfig {
            write_wait: Duration::from_millis(200),
            ..RelayConfig::default()
        });
        let writer = tokio::spawn(write_pump(sink, rx, config, "alice".to_string()));

        timeout(WAIT, writer).await.unwrap().unwrap();
        // Still held, so the mailbox never closed and only the write
        // deadline can have stopped the pump.
        drop(tx);
    }

    #[tokio::test]
    async fn test_stalled_peer_is_unregistered() {
        let (server_io, _client_io) = tokio::io::duplex(64);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let config = RelayConfig {
            write_wait: Duration::from_millis(200),
            ..RelayConfig::default()
        };
        let (mut observer_rx, handle) = start_session_on("alice", config, server_ws).await;

        let chat = encode(&Message::chat("observer", "y".repeat(4096))).unwrap();
        handle.broadcast(Payload::from(chat)).await.unwrap();

        // The chat may or may not reach the observer before alice is dropped.
        let leave = loop {
            let message = next_message(&mut observer_rx).await;
            if message.kind() != shared::MessageKind::Chat {
                break message;
            }
        };
        assert_eq!(leave.kind(), shared::MessageKind::Leave);
        assert_eq!(leave.sender(), "alice");
        match next_message(&mut observer_rx).await {
            Message::MemberCount { count, .. } => assert_eq!(count, 1),
            other => panic!("expected member count, got {:?}", other),
        }
    }

    #[test]
    fn test_registration_carries_session_identity() {
        let (_hub, handle) = Hub::new(&RelayConfig::default());
        let session = Session::new(7, "alice", handle, Arc::new(RelayConfig::default()));
        let (tx, _rx) = mpsc::channel(1);

        let registration = session.registration(tx);

        assert_eq!(registration.id, 7);
        assert_eq!(registration.name, "alice");
    }
}
