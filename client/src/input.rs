//! Interpretation of lines typed by the user

/// What a line of user input asks the client to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// Blank line, nothing to send
    Empty,
    /// Leave the chat
    Quit,
    /// Broadcast the trimmed text as a chat message
    Send(String),
}

pub fn parse_line(line: &str) -> InputCommand {
    let text = line.trim();
    match text {
        "" => InputCommand::Empty,
        "quit" | "exit" => InputCommand::Quit,
        _ => InputCommand::Send(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_lines_are_empty() {
        assert_eq!(parse_line(""), InputCommand::Empty);
        assert_eq!(parse_line("   \t"), InputCommand::Empty);
    }

    #[test]
    fn test_quit_words() {
        assert_eq!(parse_line("quit"), InputCommand::Quit);
        assert_eq!(parse_line("  exit \n"), InputCommand::Quit);
    }

    #[test]
    fn test_text_is_trimmed() {
        assert_eq!(
            parse_line("  hello world \r\n"),
            InputCommand::Send("hello world".to_string())
        );
    }

    #[test]
    fn test_quit_inside_sentence_is_sent() {
        assert_eq!(
            parse_line("I quit"),
            InputCommand::Send("I quit".to_string())
        );
    }
}
