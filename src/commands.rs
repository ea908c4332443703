//! Slash command parsing for the interactive chat.
//!
//! Input starting with `/` controls the session list and settings; it is never sent to the
//! service.

use crate::session::SessionId;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a new session.
    New,

    /// List sessions.
    List,

    /// Switch to another session.
    Select(SessionId),

    /// Change the model, or show it when no name is given.
    Model(Option<String>),

    /// List the models the service offers.
    Models,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it should be treated as
/// a regular message.
///
/// # Examples
///
/// ```
/// # use colloquy::commands::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert!(parse_command("/select 20240501140300").is_some());
/// assert!(parse_command("Hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New,
        "list" | "sessions" => ChatCommand::List,
        "select" | "open" => match argument {
            Some(id) => ChatCommand::Select(SessionId::new(id)),
            None => ChatCommand::Invalid("/select requires a chat id (see /list)".to_string()),
        },
        "model" => ChatCommand::Model(argument.map(String::from)),
        "models" => ChatCommand::Models,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "" => ChatCommand::Invalid("empty command; try /help".to_string()),
        other => ChatCommand::Invalid(format!("unknown command /{other}; try /help")),
    };
    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new chat
  /list                  List saved chats
  /select <id>           Switch to a saved chat
  /model [name]          Show or change the model (e.g., /model gpt-4o)
  /models                List the models the service offers
  /help                  Show this help message
  /quit                  Exit the chat
Press Ctrl-C while a reply is streaming to stop it."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /QUIT  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_session_commands() {
        assert_eq!(parse_command("/new"), Some(ChatCommand::New));
        assert_eq!(parse_command("/list"), Some(ChatCommand::List));
        assert_eq!(parse_command("/sessions"), Some(ChatCommand::List));
        assert_eq!(
            parse_command("/select 20240501140300"),
            Some(ChatCommand::Select(SessionId::new("20240501140300")))
        );
        assert_eq!(
            parse_command("/open  20240501140300-2 "),
            Some(ChatCommand::Select(SessionId::new("20240501140300-2")))
        );
        assert!(matches!(
            parse_command("/select"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_model() {
        assert_eq!(
            parse_command("/model gpt-4o"),
            Some(ChatCommand::Model(Some("gpt-4o".to_string())))
        );
        assert_eq!(parse_command("/model"), Some(ChatCommand::Model(None)));
        assert_eq!(parse_command("/models"), Some(ChatCommand::Models));
    }

    #[test]
    fn parse_unknown_command() {
        match parse_command("/frobnicate now") {
            Some(ChatCommand::Invalid(message)) => assert!(message.contains("/frobnicate")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse_command("/"), Some(ChatCommand::Invalid(_))));
    }

    #[test]
    fn non_commands() {
        assert_eq!(parse_command("Hello there"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command("what does a/b mean?"), None);
    }

    #[test]
    fn help_text_not_empty() {
        let help = help_text();
        assert!(help.contains("/new"));
        assert!(help.contains("/select"));
        assert!(help.contains("/model"));
        assert!(help.contains("/quit"));
    }
}
