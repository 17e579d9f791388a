//! Turns frames received from the relay into printable lines

use log::warn;
use shared::{decode_batch, Message};

/// Decodes every message in `frame` and renders the ones worth showing.
///
/// The relay echoes a user's own chat back to them; those are skipped since
/// the user already sees what they typed.
pub fn render_frame(frame: &[u8], own_name: &str) -> Vec<String> {
    decode_batch(frame)
        .into_iter()
        .filter_map(|decoded| match decoded {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Error parsing message: {}", e);
                None
            }
        })
        .filter(|message| !is_own_chat(message, own_name))
        .map(|message| message.to_string())
        .collect()
}

fn is_own_chat(message: &Message, own_name: &str) -> bool {
    matches!(message, Message::Chat { sender, .. } if sender == own_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::encode;

    fn frame(messages: &[Message]) -> Vec<u8> {
        messages
            .iter()
            .map(|m| encode(m).unwrap())
            .collect::<Vec<_>>()
            .join("\n")
            .into_bytes()
    }

    #[test]
    fn test_renders_every_message_in_frame() {
        let data = frame(&[Message::join("bob"), Message::member_count(2)]);

        let lines = render_frame(&data, "alice");

        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("bob joined the chat"));
        assert_eq!(lines[1], "Users online: 2");
    }

    #[test]
    fn test_own_chat_is_not_echoed() {
        let data = frame(&[
            Message::chat("alice", "mine"),
            Message::chat("bob", "theirs"),
        ]);

        let lines = render_frame(&data, "alice");

        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("bob: theirs"));
    }

    #[test]
    fn test_own_join_is_still_shown() {
        let lines = render_frame(&frame(&[Message::join("alice")]), "alice");
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_garbage_is_skipped() {
        let mut data = b"{oops}\n".to_vec();
        data.extend(frame(&[Message::leave("bob")]));

        let lines = render_frame(&data, "alice");

        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("bob left the chat"));
    }
}
