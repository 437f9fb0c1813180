//! One mesh edge: a TCP stream plus the reader, dispatcher and writer paths
//! that serve it.
//!
//! ```text
//!  socket ──lines──> reader ──inbound(1)──> dispatcher ──> chat room / other peers
//!  socket <──────── writer <──outbound(N)── PeerHandle::send
//! ```
//!
//! The three paths run concurrently inside one task. When the remote stops
//! sending, the dispatcher still handles every line already read, and the
//! writer flushes what was queued before the stream is dropped. A local close
//! refuses new lines and flushes the queue. A write error ends the connection
//! at once. In every case only this peer is torn down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::timeout;

use crate::common::{ChatEvent, Command};
use crate::error::{ChatError, Result};

use super::dispatcher;
use super::registry::ChatRoom;

/// The reader waits for the dispatcher after every line it hands over.
pub const INBOUND_CAPACITY: usize = 1;

/// Upper bound for flushing queued lines once a connection is closing.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// A line taken off the wire, stamped with its arrival time.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub received_at: DateTime<Local>,
    pub line: String,
}

impl Inbound {
    pub fn now(line: impl Into<String>) -> Self {
        Self {
            received_at: Local::now(),
            line: line.into(),
        }
    }
}

/// Cheap, cloneable reference to a live peer connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    key: String,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    dialed: bool,
    outbound: mpsc::Sender<String>,
    shutdown: Arc<Notify>,
    finished: Arc<watch::Sender<bool>>,
}

impl PeerHandle {
    pub(crate) fn new(
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        dialed: bool,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<String>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            key: remote_addr.to_string(),
            remote_addr,
            local_addr,
            dialed,
            outbound,
            shutdown: Arc::new(Notify::new()),
            finished: Arc::new(watch::Sender::new(false)),
        };
        (handle, outbound_rx)
    }

    /// Registry key: the remote address of the connection.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True if we opened this connection.
    pub fn is_dialed(&self) -> bool {
        self.dialed
    }

    /// The listening side of the connection, as both ends see it.
    pub fn accepting_end(&self) -> SocketAddr {
        if self.dialed {
            self.remote_addr
        } else {
            self.local_addr
        }
    }

    /// Queues a line (without terminator) for the writer. Waits only while
    /// the outbound queue is full; fails once the connection is closing.
    pub async fn send(
        &self,
        line: impl Into<String>,
    ) -> std::result::Result<(), SendError<String>> {
        self.outbound.send(line.into()).await
    }

    /// Asks the connection to stop. Lines already queued are still flushed.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once the connection task has flushed its queue and exited.
    pub async fn closed(&self) {
        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }
}

#[derive(Debug)]
enum Closed {
    EndOfStream,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    FlushTimedOut,
    DispatcherStopped,
    Local,
}

/// Connects to `address` and starts a peer connection on the new stream.
pub async fn dial(room: &Arc<ChatRoom>, address: &str) -> Result<PeerHandle> {
    let stream = match timeout(room.dial_timeout(), TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(ChatError::Connect {
                address: address.to_string(),
                source,
            });
        }
        Err(_) => {
            return Err(ChatError::ConnectTimeout {
                address: address.to_string(),
            });
        }
    };
    log::info!("Connected to {address}");
    start(room, stream, true).await
}

/// Registers an accepted `stream` as a peer, introduces ourselves with `/init`
/// and starts the connection task.
pub async fn accept(room: &Arc<ChatRoom>, stream: TcpStream) -> Result<PeerHandle> {
    start(room, stream, false).await
}

async fn start(room: &Arc<ChatRoom>, stream: TcpStream, dialed: bool) -> Result<PeerHandle> {
    let remote_addr = stream.peer_addr()?;
    let local_addr = stream.local_addr()?;
    stream.set_nodelay(true)?;

    let (handle, outbound_rx) =
        PeerHandle::new(remote_addr, local_addr, dialed, room.outbound_capacity());
    if !room.insert(handle.clone()).await {
        return Err(ChatError::DuplicatePeer(handle.key().to_string()));
    }

    let init = Command::Init {
        name: room.local_name().to_string(),
    };
    if handle.send(init.encode()).await.is_err() {
        log::warn!("Could not queue /init for {}", handle.key());
    }

    tokio::spawn(run_connection(
        Arc::clone(room),
        handle.clone(),
        stream,
        outbound_rx,
    ));
    Ok(handle)
}

/// Removes the peer from the room and asks its connection to stop. Only the
/// first call for a peer announces the departure.
pub async fn teardown(room: &ChatRoom, handle: &PeerHandle) {
    handle.close();
    if let Some(name) = room.remove(handle.key()).await {
        log::info!("Peer {} ({name}) disconnected", handle.key());
        room.emit(ChatEvent::PeerLeft(name));
    }
}

async fn run_connection(
    room: Arc<ChatRoom>,
    handle: PeerHandle,
    stream: TcpStream,
    outbound_rx: mpsc::Receiver<String>,
) {
    let (reader, writer) = stream.into_split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    // The reader drops `inbound_tx` when it stops, which lets the dispatcher
    // drain the queue and return.
    let receive = async {
        let (closed, ()) = tokio::join!(
            read_inbound(reader, inbound_tx),
            dispatcher::dispatch_inbound(&room, &handle, inbound_rx),
        );
        closed
    };
    let send = write_outbound(writer, outbound_rx, &handle.shutdown);
    tokio::pin!(send);

    let (closed, flush) = tokio::select! {
        closed = receive => (closed, true),
        closed = &mut send => (closed, false),
    };
    if flush {
        handle.close();
        match send.await {
            Closed::WriteFailed(err) => log::warn!("Flushing {} failed: {err}", handle.key()),
            Closed::FlushTimedOut => log::warn!("Gave up flushing {}", handle.key()),
            _ => {}
        }
    }

    match &closed {
        Closed::WriteFailed(err) => log::warn!("Write to {} failed: {err}", handle.key()),
        Closed::ReadFailed(err) => log::warn!("Read from {} failed: {err}", handle.key()),
        Closed::FlushTimedOut => log::warn!("Gave up flushing {}", handle.key()),
        other => log::debug!("Connection to {} ended: {other:?}", handle.key()),
    }
    teardown(&room, &handle).await;
    handle.finished.send_replace(true);
}

async fn read_inbound(reader: OwnedReadHalf, inbound: mpsc::Sender<Inbound>) -> Closed {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if inbound.send(Inbound::now(line)).await.is_err() {
                    return Closed::DispatcherStopped;
                }
            }
            Ok(None) => return Closed::EndOfStream,
            Err(err) => return Closed::ReadFailed(err),
        }
    }
}

/// Writes queued lines until `shutdown` fires, then refuses new lines and
/// flushes the ones already queued.
async fn write_outbound(
    writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<String>,
    shutdown: &Notify,
) -> Closed {
    let mut writer = BufWriter::new(writer);
    loop {
        tokio::select! {
            line = outbound.recv() => match line {
                Some(line) => {
                    if let Err(err) = write_line(&mut writer, line).await {
                        return Closed::WriteFailed(err);
                    }
                }
                None => break,
            },
            () = shutdown.notified() => break,
        }
    }

    outbound.close();
    let drain = async {
        while let Some(line) = outbound.recv().await {
            write_line(&mut writer, line).await?;
        }
        writer.shutdown().await
    };
    match timeout(FLUSH_TIMEOUT, drain).await {
        Ok(Ok(())) => Closed::Local,
        Ok(Err(err)) => Closed::WriteFailed(err),
        Err(_) => Closed::FlushTimedOut,
    }
}

async fn write_line(writer: &mut BufWriter<OwnedWriteHalf>, mut line: String) -> io::Result<()> {
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::NodeSettings;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (client, accepted) =
            tokio::join!(TcpStream::connect(address), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn handle_key_is_the_remote_address() {
        let remote: SocketAddr = "10.0.0.7:40000".parse().unwrap();
        let (handle, _rx) = PeerHandle::new(remote, "10.0.0.1:9001".parse().unwrap(), false, 4);
        assert_eq!(handle.key(), "10.0.0.7:40000");
        assert_eq!(handle.remote_addr(), remote);
    }

    #[tokio::test]
    async fn accepted_peer_introduces_itself_and_leaves_on_eof() {
        let settings = NodeSettings::new("alice");
        let (room, mut channels) = ChatRoom::new(&settings, "127.0.0.1:9001".parse().unwrap());
        let (remote, local) = loopback_pair().await;

        let handle = accept(&room, local).await.unwrap();
        assert_eq!(room.peer_count().await, 1);

        let mut remote_lines = BufReader::new(remote).lines();
        assert_eq!(remote_lines.next_line().await.unwrap().unwrap(), "/init alice");

        drop(remote_lines);
        let event = channels.events.recv().await.unwrap();
        assert_eq!(event, ChatEvent::PeerLeft(handle.key().to_string()));
        assert_eq!(room.peer_count().await, 0);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let settings = NodeSettings::new("alice");
        let (room, mut channels) = ChatRoom::new(&settings, "127.0.0.1:9001".parse().unwrap());
        let (_remote, local) = loopback_pair().await;
        let handle = accept(&room, local).await.unwrap();

        teardown(&room, &handle).await;
        teardown(&room, &handle).await;

        assert_eq!(
            channels.events.recv().await.unwrap(),
            ChatEvent::PeerLeft(handle.key().to_string())
        );
        // The connection task runs teardown once more on its way out.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channels.events.try_recv().is_err());
        assert_eq!(room.peer_count().await, 0);
    }

    #[tokio::test]
    async fn close_flushes_lines_already_queued() {
        let settings = NodeSettings::new("alice");
        let (room, _channels) = ChatRoom::new(&settings, "127.0.0.1:9001".parse().unwrap());
        let (remote, local) = loopback_pair().await;
        let handle = accept(&room, local).await.unwrap();

        handle.send("one").await.unwrap();
        handle.send("two").await.unwrap();
        handle.close();

        let mut remote_lines = BufReader::new(remote).lines();
        for expected in ["/init alice", "one", "two"] {
            assert_eq!(remote_lines.next_line().await.unwrap().unwrap(), expected);
        }
        assert!(remote_lines.next_line().await.unwrap().is_none());

        timeout(Duration::from_secs(5), handle.closed()).await.unwrap();
        assert!(handle.send("late").await.is_err());
        assert_eq!(room.peer_count().await, 0);
    }

    #[tokio::test]
    async fn writer_reports_a_reset_connection() {
        let (remote, local) = loopback_pair().await;
        #[allow(deprecated)]
        remote.set_linger(Some(Duration::ZERO)).unwrap();
        drop(remote);

        let (_reader, writer) = local.into_split();
        let (lines, outbound) = mpsc::channel(4);
        let feeder = tokio::spawn(async move {
            while lines.send("ping".to_string()).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let shutdown = Notify::new();
        let writing = write_outbound(writer, outbound, &shutdown);
        let closed = timeout(Duration::from_secs(5), writing).await.unwrap();

        assert!(matches!(closed, Closed::WriteFailed(_)));
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn both_ends_agree_on_the_accepting_side() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let settings = NodeSettings::new("alice");
        let (room, _channels) = ChatRoom::new(&settings, "127.0.0.1:9001".parse().unwrap());

        let listen_addr_str = listen_addr.to_string();
        let (dialed, accepted) = tokio::join!(
            dial(&room, &listen_addr_str),
            listener.accept()
        );
        let dialed = dialed.unwrap();
        let accepted = accept(&room, accepted.unwrap().0).await.unwrap();

        assert!(dialed.is_dialed());
        assert!(!accepted.is_dialed());
        assert_eq!(dialed.accepting_end(), listen_addr);
        assert_eq!(accepted.accepting_end(), listen_addr);
    }
}
