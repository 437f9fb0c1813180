use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::common::{ChatEvent, LocalCommand};
use crate::config::NodeSettings;
use crate::error::{ChatError, Result};

use super::bootstrap;
use super::peer::{self, PeerHandle};
use super::registry::{ChatRoom, DialRequest};

/// One chat participant: the listener, the chat room and the loop serving
/// local commands and dial requests.
pub struct MeshNode {
    room: Arc<ChatRoom>,
    listener: TcpListener,
    command_receiver: mpsc::Receiver<LocalCommand>,
    dial_receiver: mpsc::UnboundedReceiver<DialRequest>,
}

impl MeshNode {
    /// Binds the listener and creates the chat room. The returned receiver
    /// carries everything that should be shown to the user.
    pub async fn bind(
        settings: &NodeSettings,
        command_receiver: mpsc::Receiver<LocalCommand>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatEvent>)> {
        let address = format!("{}:{}", settings.listen_host, settings.listen_port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ChatError::Bind {
                address: address.clone(),
                source,
            })?;
        let listen_addr = listener.local_addr()?;

        let (room, channels) = ChatRoom::new(settings, listen_addr);
        log::info!("Listening on {listen_addr}");
        room.emit(ChatEvent::Listening(listen_addr));

        let node = Self {
            room,
            listener,
            command_receiver,
            dial_receiver: channels.dials,
        };
        Ok((node, channels.events))
    }

    pub fn room(&self) -> Arc<ChatRoom> {
        Arc::clone(&self.room)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.room.listen_addr()
    }

    /// Joins the mesh `contact` belongs to.
    pub async fn join(&self, contact: &str) -> Result<PeerHandle> {
        bootstrap::join_mesh(&self.room, contact).await
    }

    /// Serves connections until [`LocalCommand::Shutdown`] arrives or the
    /// command sender is dropped, then closes every peer once its queued lines
    /// are flushed.
    pub async fn run(mut self) {
        log::info!("Mesh event loop started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => match peer::accept(&self.room, stream).await {
                        Ok(_) => log::info!("Accepted connection from {address}"),
                        Err(err) => log::warn!("Dropping connection from {address}: {err}"),
                    },
                    Err(err) => log::warn!("Error accepting connection: {err}"),
                },
                command = self.command_receiver.recv() => match command {
                    Some(LocalCommand::SendMessage(text)) => {
                        self.room.post_local(&text).await;
                    }
                    Some(LocalCommand::Shutdown) | None => break,
                },
                Some(request) = self.dial_receiver.recv() => {
                    tokio::spawn(bootstrap::fan_out_dial(Arc::clone(&self.room), request));
                }
            }
        }

        let peers = self.room.snapshot().await;
        for handle in &peers {
            handle.close();
        }
        let flushed = join_all(peers.iter().map(|handle| handle.closed()));
        if timeout(peer::FLUSH_TIMEOUT, flushed).await.is_err() {
            log::warn!("Some connections did not finish flushing");
        }
        for handle in &peers {
            peer::teardown(&self.room, handle).await;
        }
        log::info!("Mesh event loop stopped");
    }
}
