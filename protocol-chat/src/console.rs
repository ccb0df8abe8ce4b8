//! Parsing for lines typed at the chat prompt.
//!
//! Anything that does not start with `/` is chat text. Slash commands are
//! case-insensitive:
//!
//! - `/use <protocol>` (alias `/u`) switches the active handler
//! - `/protocols` (alias `/p`) lists the configured handlers
//! - `/quit` (alias `/q`) cleans up and exits

use anyhow::{Result, anyhow};

use crate::config::ProtocolKind;

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Say(String),
    Use(ProtocolKind),
    Protocols,
    Quit,
}

impl ConsoleCommand {
    /// Returns `Ok(None)` for blank input.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            return Ok(Some(ConsoleCommand::Say(trimmed.to_string())));
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));

        match name.to_lowercase().as_str() {
            "quit" | "q" | "exit" => Ok(Some(ConsoleCommand::Quit)),
            "protocols" | "p" => Ok(Some(ConsoleCommand::Protocols)),
            "use" | "u" => {
                if rest.is_empty() {
                    return Err(anyhow!("usage: /use <master|client|uart>"));
                }
                Ok(Some(ConsoleCommand::Use(rest.parse()?)))
            }
            other => Err(anyhow!("unknown command '/{other}'")),
        }
    }
}
