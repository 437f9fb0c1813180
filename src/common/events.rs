use std::net::SocketAddr;

/// Events from the network layer to the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Listening(SocketAddr),
    /// A rendered chat line, already appended to the chat log.
    MessageReceived(String),
    /// The chat log was replaced by the history sent from a peer.
    HistorySynced(Vec<String>),
    /// A `/chatR` payload could not be decoded; the log was left unchanged.
    HistoryRejected { from: String, reason: String },
    PeerJoined(String),
    PeerLeft(String),
    DialFailed { address: String, reason: String },
}
