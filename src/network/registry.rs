//! The chat room: connected peers and the chat log of one process.
//!
//! Membership and log share a single lock, so a history install can never
//! interleave with a broadcast snapshot. Peer queues are written only after
//! the lock is released.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};

use crate::common::commands::CMD_PREFIX;
use crate::common::{ChatEvent, ChatMessage};
use crate::config::NodeSettings;
use crate::error::{ChatError, Result};

use super::peer::PeerHandle;

/// Instruction for the node to connect to a peer announced by `/dial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRequest {
    pub address: SocketAddr,
    pub name: String,
}

/// Receiving ends of the queues a chat room feeds.
///
/// Both are unbounded: the dispatcher must never wait on the display or on
/// the node loop.
pub struct RoomChannels {
    pub events: mpsc::UnboundedReceiver<ChatEvent>,
    pub dials: mpsc::UnboundedReceiver<DialRequest>,
}

struct PeerEntry {
    handle: PeerHandle,
    name: String,
    listen_addr: Option<SocketAddr>,
}

impl PeerEntry {
    fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.handle.key().to_string()
        } else {
            self.name.clone()
        }
    }

    fn reachable_at(&self, address: SocketAddr) -> bool {
        self.handle.remote_addr() == address || self.listen_addr == Some(address)
    }
}

#[derive(Default)]
struct RoomState {
    peers: HashMap<String, PeerEntry>,
    pending_dials: HashSet<SocketAddr>,
    log: Vec<String>,
}

impl RoomState {
    fn connected_to(&self, address: SocketAddr) -> bool {
        self.peers.values().any(|entry| entry.reachable_at(address))
    }
}

pub struct ChatRoom {
    local_name: String,
    listen_addr: SocketAddr,
    outbound_capacity: usize,
    dial_timeout: Duration,
    state: Mutex<RoomState>,
    events: mpsc::UnboundedSender<ChatEvent>,
    dials: mpsc::UnboundedSender<DialRequest>,
}

impl ChatRoom {
    pub fn new(settings: &NodeSettings, listen_addr: SocketAddr) -> (Arc<Self>, RoomChannels) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (dials, dials_rx) = mpsc::unbounded_channel();
        let room = Self {
            local_name: settings.display_name.trim().to_string(),
            listen_addr,
            outbound_capacity: settings.outbound_capacity.max(1),
            dial_timeout: settings.dial_timeout,
            state: Mutex::new(RoomState::default()),
            events,
            dials,
        };
        let channels = RoomChannels {
            events: events_rx,
            dials: dials_rx,
        };
        (Arc::new(room), channels)
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_addr.port()
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Event receiver dropped; discarding event");
        }
    }

    /// Registers a peer. Returns `false` if its key is already taken.
    pub async fn insert(&self, handle: PeerHandle) -> bool {
        let mut state = self.state.lock().await;
        if state.peers.contains_key(handle.key()) {
            return false;
        }
        state.peers.insert(
            handle.key().to_string(),
            PeerEntry {
                handle,
                name: String::new(),
                listen_addr: None,
            },
        );
        true
    }

    /// Unregisters a peer, returning the name to announce its departure with.
    pub async fn remove(&self, key: &str) -> Option<String> {
        let entry = self.state.lock().await.peers.remove(key)?;
        Some(entry.display_name())
    }

    pub async fn set_name(&self, key: &str, name: String) {
        if let Some(entry) = self.state.lock().await.peers.get_mut(key) {
            entry.name = name;
        }
    }

    /// Display name of a peer; empty until it has sent `/init`.
    pub async fn peer_name(&self, key: &str) -> String {
        self.state
            .lock()
            .await
            .peers
            .get(key)
            .map(|entry| entry.name.clone())
            .unwrap_or_default()
    }

    pub async fn set_listen_addr(&self, key: &str, address: SocketAddr) {
        if let Some(entry) = self.state.lock().await.peers.get_mut(key) {
            entry.listen_addr = Some(address);
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }

    pub async fn peer_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().await.peers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn snapshot(&self) -> Vec<PeerHandle> {
        self.state
            .lock()
            .await
            .peers
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// True if a registered peer is connected from, or listens on, `address`.
    pub async fn is_connected_to(&self, address: SocketAddr) -> bool {
        self.state.lock().await.connected_to(address)
    }

    /// A peer other than `key` that is connected from, or listens on, `address`.
    pub async fn other_peer_at(&self, key: &str, address: SocketAddr) -> Option<PeerHandle> {
        self.state
            .lock()
            .await
            .peers
            .values()
            .find(|entry| entry.handle.key() != key && entry.reachable_at(address))
            .map(|entry| entry.handle.clone())
    }

    /// Finds the peer whose key ends with `suffix`, trying `preferred` first.
    pub async fn find_by_suffix(&self, suffix: &str, preferred: &str) -> Option<PeerHandle> {
        let state = self.state.lock().await;
        if preferred.ends_with(suffix) {
            if let Some(entry) = state.peers.get(preferred) {
                return Some(entry.handle.clone());
            }
        }
        state
            .peers
            .values()
            .find(|entry| entry.handle.key().ends_with(suffix))
            .map(|entry| entry.handle.clone())
    }

    /// Queues a dial unless the address is already connected or being dialed.
    pub async fn request_dial(&self, request: DialRequest) -> bool {
        let mut state = self.state.lock().await;
        if state.pending_dials.contains(&request.address) || state.connected_to(request.address) {
            return false;
        }
        state.pending_dials.insert(request.address);
        if let Err(err) = self.dials.send(request) {
            log::warn!("Dial queue closed; dropping dial to {}", err.0.address);
            state.pending_dials.remove(&err.0.address);
            return false;
        }
        true
    }

    pub async fn finish_dial(&self, address: SocketAddr) {
        self.state.lock().await.pending_dials.remove(&address);
    }

    pub async fn append_log(&self, line: String) {
        self.state.lock().await.log.push(line);
    }

    pub async fn history(&self) -> Vec<String> {
        self.state.lock().await.log.clone()
    }

    /// Serializes the chat log as a JSON array of rendered lines.
    pub async fn encode_history(&self) -> Result<String> {
        let state = self.state.lock().await;
        serde_json::to_string(&state.log).map_err(ChatError::HistoryEncode)
    }

    /// Replaces the chat log with a payload produced by [`encode_history`].
    /// On a decode error the log is left untouched.
    ///
    /// [`encode_history`]: Self::encode_history
    pub async fn install_history(&self, payload: &str) -> Result<Vec<String>> {
        let entries: Vec<String> =
            serde_json::from_str(payload).map_err(ChatError::HistoryDecode)?;
        self.state.lock().await.log = entries.clone();
        Ok(entries)
    }

    /// Logs a locally typed line under our own name and sends it to every peer.
    ///
    /// Leading `/` characters are stripped so typed text is never taken for a
    /// control command by the receivers.
    pub async fn post_local(&self, text: &str) -> String {
        let text = text.trim_start_matches(CMD_PREFIX);
        let rendered = ChatMessage::now(self.local_name.as_str(), text).render();
        self.append_log(rendered.clone()).await;
        self.broadcast(text).await;
        rendered
    }

    /// Enqueues `line` on every registered peer, returning how many accepted it.
    pub async fn broadcast(&self, line: &str) -> usize {
        let peers = self.snapshot().await;
        let results = join_all(peers.iter().map(|peer| peer.send(line))).await;

        let mut delivered = 0;
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(_) => log::debug!("Skipping closed peer {}", peer.key()),
            }
        }
        delivered
    }
}
