//! Interprets the lines a peer sends us.
//!
//! Each line is parsed once into a [`Command`] and fully handled before the
//! next one is taken from the inbound queue, so commands from one peer are
//! applied in order. Nothing here dials or waits on the network beyond
//! queue admission: dials are handed to the node as [`DialRequest`]s.

use std::net::{IpAddr, SocketAddr};

use tokio::sync::mpsc;

use crate::common::{ChatEvent, ChatMessage, Command};
use crate::config::parse_port;
use crate::error::{ChatError, Result};

use super::peer::{Inbound, PeerHandle};
use super::registry::{ChatRoom, DialRequest};

pub async fn dispatch_inbound(
    room: &ChatRoom,
    origin: &PeerHandle,
    mut inbound: mpsc::Receiver<Inbound>,
) {
    while let Some(item) = inbound.recv().await {
        dispatch(room, origin, item).await;
    }
}

pub async fn dispatch(room: &ChatRoom, origin: &PeerHandle, inbound: Inbound) {
    let command = match Command::parse(&inbound.line) {
        Ok(command) => command,
        Err(err) => {
            log::warn!("Dropping malformed command from {}: {err}", origin.key());
            return;
        }
    };

    match command {
        Command::Init { name } => {
            log::debug!("Peer {} is {name}", origin.key());
            room.set_name(origin.key(), name).await;
        }
        Command::ChatSend { address } => send_history(room, origin, &address).await,
        Command::ChatReceive { payload } => install_history(room, origin, &payload).await,
        Command::Join { port, name } => relay_join(room, origin, &port, name).await,
        Command::Dial { address, name } => request_dial(room, origin, &address, name).await,
        Command::Listen { port } => record_listen_port(room, origin, &port).await,
        Command::Chat(text) => {
            let author = room.peer_name(origin.key()).await;
            let rendered = ChatMessage::create(inbound.received_at, author, text).render();
            room.append_log(rendered.clone()).await;
            room.emit(ChatEvent::MessageReceived(rendered));
        }
    }
}

async fn send_history(room: &ChatRoom, origin: &PeerHandle, suffix: &str) {
    let Some(target) = room.find_by_suffix(suffix, origin.key()).await else {
        log::warn!("History requested for unknown peer `{suffix}`");
        return;
    };
    let payload = match room.encode_history().await {
        Ok(payload) => payload,
        Err(err) => {
            log::warn!("{err}");
            return;
        }
    };
    if target.send(Command::ChatReceive { payload }.encode()).await.is_err() {
        log::warn!("Peer {} left before its history could be sent", target.key());
    }
}

async fn install_history(room: &ChatRoom, origin: &PeerHandle, payload: &str) {
    match room.install_history(payload).await {
        Ok(entries) => {
            log::info!("Installed {} history lines from {}", entries.len(), origin.key());
            room.emit(ChatEvent::HistorySynced(entries));
        }
        Err(err) => {
            log::warn!("Ignoring chat history from {}: {err}", origin.key());
            room.emit(ChatEvent::HistoryRejected {
                from: origin.key().to_string(),
                reason: err.to_string(),
            });
        }
    }
}

/// A newcomer announced itself: tell every peer we know to dial it.
async fn relay_join(room: &ChatRoom, origin: &PeerHandle, port: &str, name: String) {
    let port = match parse_port(port) {
        Ok(port) => port,
        Err(err) => {
            log::warn!("Ignoring /join from {}: {err}", origin.key());
            return;
        }
    };
    let listen_addr = SocketAddr::new(origin.remote_addr().ip(), port);
    room.set_listen_addr(origin.key(), listen_addr).await;
    if room.peer_name(origin.key()).await.is_empty() {
        room.set_name(origin.key(), name.clone()).await;
    }
    room.emit(ChatEvent::PeerJoined(name.clone()));

    let dial = Command::Dial {
        address: listen_addr.to_string(),
        name,
    };
    let reached = room.broadcast(&dial.encode()).await;
    log::debug!("Relayed join of {listen_addr} to {reached} peers");
}

async fn request_dial(room: &ChatRoom, origin: &PeerHandle, address: &str, name: String) {
    let target = match resolve_dial_target(address, origin.remote_addr().ip()) {
        Ok(target) => target,
        Err(err) => {
            log::warn!("Ignoring /dial from {}: {err}", origin.key());
            return;
        }
    };
    if is_own_address(room, origin, target) {
        log::debug!("Ignoring /dial for our own listener {target}");
        return;
    }
    let request = DialRequest {
        address: target,
        name,
    };
    if !room.request_dial(request).await {
        log::debug!("Already connected to {target}");
    }
}

/// A peer that dialed us on a `/dial` told us where it listens. If we dialed
/// it as well, both ends keep the connection with the lower accepting end and
/// drop the other one without announcing a departure.
async fn record_listen_port(room: &ChatRoom, origin: &PeerHandle, port: &str) {
    let port = match parse_port(port) {
        Ok(port) => port,
        Err(err) => {
            log::warn!("Ignoring /listen from {}: {err}", origin.key());
            return;
        }
    };
    let listen_addr = SocketAddr::new(origin.remote_addr().ip(), port);
    room.set_listen_addr(origin.key(), listen_addr).await;

    let Some(twin) = room.other_peer_at(origin.key(), listen_addr).await else {
        return;
    };
    let redundant = if origin.accepting_end() < twin.accepting_end() {
        twin
    } else {
        origin.clone()
    };
    log::info!("Closing duplicate connection {} to {listen_addr}", redundant.key());
    room.remove(redundant.key()).await;
    redundant.close();
}

/// Accepts `ip:port`, or a bare `port`/`:port` on the relaying peer's host.
pub fn resolve_dial_target(address: &str, relay_ip: IpAddr) -> Result<SocketAddr> {
    if let Ok(target) = address.parse::<SocketAddr>() {
        return Ok(target);
    }
    parse_port(address)
        .map(|port| SocketAddr::new(relay_ip, port))
        .map_err(|_| ChatError::InvalidAddress(address.to_string()))
}

fn is_own_address(room: &ChatRoom, origin: &PeerHandle, target: SocketAddr) -> bool {
    if target.port() != room.listen_port() {
        return false;
    }
    let ip = target.ip();
    ip == origin.local_addr().ip()
        || ip == room.listen_addr().ip()
        || ip.is_loopback()
        || ip.is_unspecified()
}
