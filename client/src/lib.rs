//! # Broadcast Relay Client Library
//!
//! A line-oriented chat client for the broadcast relay. It connects with a
//! display name, sends each typed line as a chat message and prints what the
//! relay broadcasts back.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Interprets typed lines: blank lines are ignored, `quit` and `exit` end the
//! session, anything else is sent.
//!
//! ### Network Module (`network`)
//! Owns the WebSocket connection: builds the upgrade URL, multiplexes socket
//! frames, stdin and Ctrl+C, and closes the connection politely on the way out.
//!
//! ### Rendering Module (`rendering`)
//! The relay may pack several messages into one frame, so every frame is split
//! into objects before decoding. The user's own chat echoes are filtered out.

pub mod input;
pub mod network;
pub mod rendering;
