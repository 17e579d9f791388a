//! TCP accept loop and WebSocket upgrade
//!
//! The gateway only accepts upgrades on [`WS_PATH`] carrying a non-empty
//! `username` query parameter. Everything after the handshake belongs to the
//! session and the hub.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::hub::{ConnectionId, HubHandle};
use crate::session::Session;
use log::{debug, error, info, warn};
use shared::{USERNAME_PARAM, WS_PATH};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Why an upgrade request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRejection {
    UnknownPath,
    MissingUsername,
}

impl HandshakeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeRejection::UnknownPath => StatusCode::NOT_FOUND,
            HandshakeRejection::MissingUsername => StatusCode::BAD_REQUEST,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeRejection::UnknownPath => "Not found",
            HandshakeRejection::MissingUsername => "Username is required",
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.reason().to_string()));
        *response.status_mut() = self.status();
        response
    }
}

/// Extracts the display name from an upgrade request target such as
/// `/ws?username=alice`. The value is percent-decoded and trimmed.
pub fn display_name_from_uri(uri: &Uri) -> Result<String, HandshakeRejection> {
    if uri.path() != WS_PATH {
        return Err(HandshakeRejection::UnknownPath);
    }

    let query = uri.query().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| *key == USERNAME_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or(HandshakeRejection::MissingUsername)
}

pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    config: Arc<RelayConfig>,
    next_connection_id: ConnectionId,
}

impl Server {
    pub async fn bind(
        addr: &str,
        config: Arc<RelayConfig>,
        hub: HubHandle,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            hub,
            config,
            next_connection_id: 1,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Each connection is upgraded in its own task so a slow
    /// handshake never holds up the next accept.
    pub async fn run(mut self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("WebSocket endpoint: ws://{}{}", addr, WS_PATH);
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let id = self.next_connection_id;
            self.next_connection_id += 1;

            let hub = self.hub.clone();
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, id, hub, config).await {
                    warn!("Connection {} from {} failed during setup: {}", id, peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    hub: HubHandle,
    config: Arc<RelayConfig>,
) -> Result<(), RelayError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
    }

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    let mut display_name = None;
    let handshake = accept_hdr_async_with_config(
        stream,
        |request: &Request, response: Response| match display_name_from_uri(request.uri()) {
            Ok(name) => {
                display_name = Some(name);
                Ok(response)
            }
            Err(rejection) => {
                info!(
                    "Rejected upgrade from {} for {}: {}",
                    peer,
                    request.uri(),
                    rejection.reason()
                );
                Err(rejection.into_response())
            }
        },
        Some(ws_config),
    )
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) if display_name.is_none() => {
            debug!("Handshake with {} refused: {}", peer, e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let Some(name) = display_name else {
        return Ok(());
    };

    debug!("Connection {} from {} joined as {}", id, peer, name);

    let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
    let session = Session::new(id, name, hub.clone(), config);
    hub.register(session.registration(mailbox_tx)).await?;
    session.spawn(ws, mailbox_rx);

    Ok(())
}
