//! Joining a mesh and connecting to newcomers announced by it.
//!
//! A joining node dials one contact and sends `/join` and `/chatS`. The
//! contact relays the join as `/dial` to everyone it knows (see the
//! dispatcher), each of them dials the newcomer and tells it our listen port
//! with `/listen`, and the contact answers `/chatS` with the chat log.
//! Nothing is acknowledged or retried.

use std::sync::Arc;

use crate::common::{ChatEvent, Command};
use crate::config::normalize_peer_address;
use crate::error::{ChatError, Result};

use super::peer::{self, PeerHandle};
use super::registry::{ChatRoom, DialRequest};

/// Dials `contact`, announces our listen port and asks for the chat log.
pub async fn join_mesh(room: &Arc<ChatRoom>, contact: &str) -> Result<PeerHandle> {
    let address = normalize_peer_address(contact);
    let contact = peer::dial(room, &address).await?;

    let join = Command::Join {
        port: room.listen_port().to_string(),
        name: room.local_name().to_string(),
    };
    let history = Command::ChatSend {
        address: contact.local_addr().to_string(),
    };
    for command in [join, history] {
        contact
            .send(command.encode())
            .await
            .map_err(|_| ChatError::PeerClosed(contact.key().to_string()))?;
    }
    log::info!("Announced ourselves to {}", contact.key());
    Ok(contact)
}

/// Connects to a newcomer on behalf of a `/dial` the dispatcher accepted.
pub async fn fan_out_dial(room: Arc<ChatRoom>, request: DialRequest) {
    let address = request.address.to_string();
    let result = peer::dial(&room, &address).await;
    room.finish_dial(request.address).await;

    match result {
        Ok(peer) => {
            let listen = Command::Listen {
                port: room.listen_port().to_string(),
            };
            if peer.send(listen.encode()).await.is_err() {
                log::warn!("Could not queue /listen for {}", peer.key());
            }
            room.set_name(peer.key(), request.name.clone()).await;
            room.emit(ChatEvent::PeerJoined(request.name));
        }
        Err(err) => {
            log::warn!("Could not reach {address}: {err}");
            room.emit(ChatEvent::DialFailed {
                address,
                reason: err.to_string(),
            });
        }
    }
}
