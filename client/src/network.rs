use crate::input::{parse_line, InputCommand};
use crate::rendering::render_frame;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use shared::{encode, Message, USERNAME_PARAM, WS_PATH};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

/// How long to wait for the server to acknowledge our close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, PartialEq, Eq)]
enum Disconnect {
    ByUser,
    ByServer,
}

#[derive(Debug)]
pub struct Client {
    url: Url,
    username: String,
}

impl Client {
    pub fn new(host: &str, port: u16, username: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut url = Url::parse(&format!("ws://{}:{}{}", host, port, WS_PATH))?;
        url.query_pairs_mut().append_pair(USERNAME_PARAM, username);

        Ok(Client {
            url,
            username: username.to_string(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Connects and chats from stdin until the user quits or presses Ctrl+C.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| format!("failed to connect to WebSocket: {}", e))?;
        info!("Connected to {}", self.url);

        self.chat(ws, BufReader::new(tokio::io::stdin()), tokio::signal::ctrl_c())
            .await
    }

    /// Drives an open connection until the user quits, `input` ends, the
    /// server goes away or `shutdown` completes.
    pub async fn chat<S, R, F>(
        &self,
        ws: WebSocketStream<S>,
        input: R,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        R: AsyncBufRead + Unpin,
        F: Future,
    {
        // Created once so a signal arriving mid-iteration is not lost.
        tokio::pin!(shutdown);

        let (mut sink, mut stream) = ws.split();
        let mut lines = input.lines();
        prompt();

        let reason = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        for line in render_frame(text.as_bytes(), &self.username) {
                            print!("\r{}\n> ", line);
                        }
                        flush_stdout();
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!("Server closed the connection: {:?}", frame);
                        break Disconnect::ByServer;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break Disconnect::ByServer;
                    }
                    None => break Disconnect::ByServer,
                },

                line = lines.next_line() => match line? {
                    None => break Disconnect::ByUser,
                    Some(line) => match parse_line(&line) {
                        InputCommand::Empty => prompt(),
                        InputCommand::Quit => break Disconnect::ByUser,
                        InputCommand::Send(content) => {
                            let payload = encode(&Message::chat(self.username.as_str(), content))?;
                            if let Err(e) = sink.send(WsMessage::text(payload)).await {
                                error!("Error sending message: {}", e);
                                break Disconnect::ByServer;
                            }
                            prompt();
                        }
                    },
                },

                _ = &mut shutdown => {
                    println!("\nDisconnecting...");
                    break Disconnect::ByUser;
                }
            }
        };

        if reason == Disconnect::ByUser {
            let close = WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }));
            if sink.send(close).await.is_ok() {
                // Let the server acknowledge before the socket is dropped.
                let _ = timeout(CLOSE_GRACE, async {
                    while let Some(Ok(_)) = stream.next().await {}
                })
                .await;
            }
        } else {
            println!("\nDisconnected from server");
        }
        debug!("Session ended: {:?}", reason);

        Ok(())
    }
}

fn prompt() {
    print!("> ");
    flush_stdout();
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
