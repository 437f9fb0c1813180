//! Terminal front end: name prompt, stdin reader and coloured event output.

use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

use crate::common::{ChatEvent, LocalCommand};

pub const PURPLE_CLR: &str = "\x1b[35m";
pub const CYAN_CLR: &str = "\x1b[36m";
pub const BLACK_CLR: &str = "\x1b[1;30m";
pub const YELLOW_CLR: &str = "\x1b[33m";
pub const GREEN_CLR: &str = "\x1b[32m";
pub const RESET_CLR: &str = "\x1b[0m";

pub struct Terminal {
    lines: Lines<BufReader<Stdin>>,
}

impl Terminal {
    pub fn stdin() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Asks for a display name until a non-empty one is entered.
    pub async fn prompt_name(&mut self) -> io::Result<String> {
        loop {
            print!("{GREEN_CLR}Enter name: {RESET_CLR}");
            io::stdout().flush()?;
            match self.lines.next_line().await? {
                Some(name) if !name.trim().is_empty() => return Ok(name.trim().to_string()),
                Some(_) => continue,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stdin closed before a name was entered",
                    ));
                }
            }
        }
    }

    /// Forwards every non-blank line as a chat message. End of input asks
    /// the node to shut down.
    pub async fn read_input(mut self, commands: mpsc::Sender<LocalCommand>) {
        loop {
            let command = match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => LocalCommand::SendMessage(line),
                Ok(None) => LocalCommand::Shutdown,
                Err(err) => {
                    log::error!("Failed to read stdin: {err}");
                    LocalCommand::Shutdown
                }
            };
            let stop = matches!(command, LocalCommand::Shutdown);
            if commands.send(command).await.is_err() || stop {
                break;
            }
        }
    }
}

/// Prints events until the network layer goes away.
pub async fn print_events(mut events: mpsc::UnboundedReceiver<ChatEvent>) {
    while let Some(event) = events.recv().await {
        print!("{}", format_event(&event));
        if let Err(err) = io::stdout().flush() {
            log::warn!("Failed to flush stdout: {err}");
        }
    }
}

pub fn format_event(event: &ChatEvent) -> String {
    match event {
        ChatEvent::Listening(address) => {
            format!("{PURPLE_CLR}listening on {address}{RESET_CLR}\n")
        }
        ChatEvent::MessageReceived(line) => colorize_chat_line(line),
        ChatEvent::HistorySynced(entries) => {
            entries.iter().map(|line| colorize_chat_line(line)).collect()
        }
        ChatEvent::HistoryRejected { from, reason } => {
            format!("{YELLOW_CLR}could not load chat history from {from}: {reason}{RESET_CLR}\n")
        }
        ChatEvent::PeerJoined(name) => format!("{CYAN_CLR}{name} has joined the chat{RESET_CLR}\n"),
        ChatEvent::PeerLeft(name) => format!("{PURPLE_CLR}{name} has left the chat{RESET_CLR}\n"),
        ChatEvent::DialFailed { address, reason } => {
            format!("{YELLOW_CLR}could not reach {address}: {reason}{RESET_CLR}\n")
        }
    }
}

/// `<time> - <author>:` dimmed, the text in green.
fn colorize_chat_line(line: &str) -> String {
    match line.split_once(": ") {
        Some((head, body)) => format!("{BLACK_CLR}{head}:{GREEN_CLR} {body}{RESET_CLR}"),
        None => line.to_string(),
    }
}
