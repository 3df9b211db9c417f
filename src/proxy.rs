use crate::chunk;
use crate::config::ProxyConfig;
use crate::error::{AbortReason, TransferError};
use crate::receive_session::ReceiveSession;
use crate::send_session::SendSession;
use crate::transfer_id::TransferId;
use crate::transport::{FrameTransport, PeerAddr, TransferEvents};
use crate::wire::WireFrame;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

/// Everything a proxy reacts to goes through its single event queue: application requests,
///  frames from the wire, and expired deadlines re-injected by timer tasks. That makes all
///  session handling strictly serial, so the session tables need no locking.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ProxyEvent {
    Deliver {
        transfer_id: TransferId,
        to: PeerAddr,
        payload: Bytes,
    },
    Cancel {
        transfer_id: TransferId,
    },
    Frame {
        from: PeerAddr,
        frame: WireFrame,
    },
    SendDeadline {
        transfer_id: TransferId,
        epoch: u64,
    },
    ReceiveIdle {
        from: PeerAddr,
        transfer_id: TransferId,
        epoch: u64,
    },
}

/// Schedules deadline events back into the owning proxy's queue. Sessions compare the epoch
///  against their current one, so a timer that was overtaken by progress is a no-op.
#[derive(Clone)]
pub(crate) struct DeadlineTimers {
    queue: mpsc::Sender<ProxyEvent>,
}

impl DeadlineTimers {
    pub(crate) fn new(queue: mpsc::Sender<ProxyEvent>) -> DeadlineTimers {
        DeadlineTimers { queue }
    }

    pub(crate) fn arm_send_deadline(
        &self,
        transfer_id: TransferId,
        epoch: u64,
        delay: Duration,
    ) -> JoinHandle<()> {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = queue.send(ProxyEvent::SendDeadline { transfer_id, epoch }).await;
        })
    }

    pub(crate) fn arm_receive_idle(
        &self,
        from: PeerAddr,
        transfer_id: TransferId,
        epoch: u64,
        delay: Duration,
    ) -> JoinHandle<()> {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = queue.send(ProxyEvent::ReceiveIdle { from, transfer_id, epoch }).await;
        })
    }
}

/// The addressable endpoint each peer runs: accepts deliver requests from its local
///  application actor, speaks the wire protocol to peer proxies, and reports completed and
///  failed transfers back through [`TransferEvents`].
///
/// A proxy hosts any number of concurrently active transfers; sessions are fully independent
///  of each other, so transfers between different peers (or several between the same pair)
///  never block one another.
///
/// Must be created inside a tokio runtime - the event loop is spawned on construction and
///  runs until the proxy is dropped.
pub struct Proxy {
    transport: Arc<dyn FrameTransport>,
    next_transfer_id: AtomicU64,
    event_queue: mpsc::Sender<ProxyEvent>,
    loop_handle: JoinHandle<()>,
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.loop_handle.abort();
    }
}

impl Proxy {
    pub fn new(
        config: ProxyConfig,
        transport: Arc<dyn FrameTransport>,
        events: Arc<dyn TransferEvents>,
    ) -> anyhow::Result<Proxy> {
        config.validate()?;

        let (queue, queue_rx) = mpsc::channel(1024);
        let proxy_loop = ProxyLoop {
            timers: DeadlineTimers::new(queue.clone()),
            config: Arc::new(config),
            transport: transport.clone(),
            events,
            send_sessions: FxHashMap::default(),
            receive_sessions: FxHashMap::default(),
        };
        let loop_handle = tokio::spawn(proxy_loop.run(queue_rx));

        info!("proxy {} up", transport.self_addr());
        Ok(Proxy {
            transport,
            next_transfer_id: AtomicU64::new(0),
            event_queue: queue,
            loop_handle,
        })
    }

    pub fn self_addr(&self) -> PeerAddr {
        self.transport.self_addr()
    }

    /// Registers a payload for delivery to the application actor behind `destination` and
    ///  returns the transfer's id right away; completion and failure are reported
    ///  asynchronously through [`TransferEvents`]. The only synchronous failures are an empty
    ///  payload and an unresolvable destination.
    pub async fn deliver(
        &self,
        payload: Bytes,
        destination: &str,
    ) -> Result<TransferId, TransferError> {
        if payload.is_empty() {
            return Err(TransferError::EmptyPayload);
        }
        let to = match self.transport.resolve(destination) {
            Some(addr) => addr,
            None => return Err(TransferError::PeerUnreachable(destination.to_string())),
        };

        let transfer_id = TransferId::from_raw(self.next_transfer_id.fetch_add(1, Ordering::Relaxed));
        debug!("registering transfer {} of {} bytes to {}", transfer_id, payload.len(), to);

        self.event_queue
            .send(ProxyEvent::Deliver { transfer_id, to, payload })
            .await
            .map_err(|_| TransferError::ProxyClosed)?;
        Ok(transfer_id)
    }

    /// Cancels a transfer this proxy initiated. Retransmission stops, the peer is notified on
    ///  a best-effort basis, and the initiator sees the transfer fail as cancelled. Cancelling
    ///  a transfer that is already retired is a no-op.
    pub async fn cancel(&self, transfer_id: TransferId) -> Result<(), TransferError> {
        self.event_queue
            .send(ProxyEvent::Cancel { transfer_id })
            .await
            .map_err(|_| TransferError::ProxyClosed)
    }

    /// Entry point for the transport: hands a raw inbound frame to the proxy. Unparsable
    ///  frames are logged and dropped; nothing arriving over the wire can bring the proxy
    ///  down.
    pub async fn on_wire_frame(&self, from: PeerAddr, frame: &[u8]) {
        let frame = match WireFrame::deser(&mut &frame[..]) {
            Ok(frame) => frame,
            Err(_) => {
                warn!("unparsable frame from {} - dropping", from);
                return;
            }
        };

        if self.event_queue.send(ProxyEvent::Frame { from, frame }).await.is_err() {
            debug!("proxy loop is gone - dropping frame");
        }
    }
}

/// The serial heart of a proxy: owns the session tables and processes one event at a time.
struct ProxyLoop {
    timers: DeadlineTimers,
    config: Arc<ProxyConfig>,
    transport: Arc<dyn FrameTransport>,
    events: Arc<dyn TransferEvents>,
    send_sessions: FxHashMap<TransferId, SendSession>,
    /// keyed by sender as well: transfer ids are only unique per initiating peer
    receive_sessions: FxHashMap<(PeerAddr, TransferId), ReceiveSession>,
}

impl ProxyLoop {
    async fn run(mut self, mut queue: mpsc::Receiver<ProxyEvent>) {
        while let Some(event) = queue.recv().await {
            self.on_event(event).await;
        }
        debug!("event queue closed - proxy loop shutting down");
    }

    async fn on_event(&mut self, event: ProxyEvent) {
        match event {
            ProxyEvent::Deliver { transfer_id, to, payload } => {
                self.on_deliver(transfer_id, to, payload).await
            }
            ProxyEvent::Cancel { transfer_id } => self.on_cancel(transfer_id).await,
            ProxyEvent::Frame { from, frame } => self.on_frame(from, frame).await,
            ProxyEvent::SendDeadline { transfer_id, epoch } => {
                if let Some(session) = self.send_sessions.get_mut(&transfer_id) {
                    session.on_deadline(epoch).await;
                    if session.is_terminal() {
                        self.send_sessions.remove(&transfer_id);
                    }
                }
            }
            ProxyEvent::ReceiveIdle { from, transfer_id, epoch } => {
                let key = (from, transfer_id);
                if let Some(session) = self.receive_sessions.get_mut(&key) {
                    session.on_idle_deadline(epoch).await;
                    if session.is_terminal() {
                        self.receive_sessions.remove(&key);
                    }
                }
            }
        }
    }

    async fn on_deliver(&mut self, transfer_id: TransferId, to: PeerAddr, payload: Bytes) {
        let total_bytes = payload.len() as u64;
        let chunks = match chunk::split(transfer_id, &payload, self.config.max_chunk_size) {
            Ok(chunks) => chunks,
            Err(error) => {
                // deliver() validates its input, so this only fires on configuration defects
                warn!("cannot split payload for transfer {}: {}", transfer_id, error);
                self.events.on_transfer_failed(transfer_id, error).await;
                return;
            }
        };

        let mut session = SendSession::new(
            transfer_id,
            to,
            chunks,
            total_bytes,
            self.config.clone(),
            self.transport.clone(),
            self.events.clone(),
            self.timers.clone(),
        );
        session.start().await;
        self.send_sessions.insert(transfer_id, session);
    }

    async fn on_cancel(&mut self, transfer_id: TransferId) {
        match self.send_sessions.get_mut(&transfer_id) {
            Some(session) => {
                session.cancel().await;
                if session.is_terminal() {
                    self.send_sessions.remove(&transfer_id);
                }
            }
            None => debug!("cancel for unknown transfer {} - already retired?", transfer_id),
        }
    }

    async fn on_frame(&mut self, from: PeerAddr, frame: WireFrame) {
        trace!("frame from {}: {:?}", from, frame);
        match frame {
            WireFrame::Connect { transfer_id, total_chunks, total_bytes } => {
                self.on_connect(from, transfer_id, total_chunks, total_bytes).await
            }
            WireFrame::ConnectAck { transfer_id } => {
                if let Some(session) = self.sender_session(&from, transfer_id) {
                    session.on_connect_ack().await;
                }
                self.retire_sender_if_terminal(transfer_id);
            }
            WireFrame::Chunk(chunk) => {
                let key = (from, chunk.transfer_id);
                match self.receive_sessions.get_mut(&key) {
                    Some(session) => {
                        session.on_chunk(chunk).await;
                        if session.is_terminal() {
                            self.receive_sessions.remove(&key);
                        }
                    }
                    None => debug!(
                        "chunk for unknown transfer {} from {} - dropping",
                        chunk.transfer_id, key.0
                    ),
                }
            }
            WireFrame::ChunkAck { transfer_id, highest_contiguous_sequence } => {
                if let Some(session) = self.sender_session(&from, transfer_id) {
                    session.on_chunk_ack(highest_contiguous_sequence).await;
                }
                self.retire_sender_if_terminal(transfer_id);
            }
            WireFrame::Complete { transfer_id } => {
                if let Some(session) = self.sender_session(&from, transfer_id) {
                    session.on_complete().await;
                }
                self.retire_sender_if_terminal(transfer_id);
            }
            WireFrame::Abort { transfer_id, reason } => {
                self.on_abort(from, transfer_id, reason).await
            }
        }
    }

    /// Sets up a receiver-side session on first sight of a transfer. A Connect for an already
    ///  known transfer means the peer did not see our ConnectAck, so the session answers it
    ///  again.
    async fn on_connect(
        &mut self,
        from: PeerAddr,
        transfer_id: TransferId,
        total_chunks: u32,
        total_bytes: u64,
    ) {
        let key = (from, transfer_id);
        if let Some(session) = self.receive_sessions.get_mut(&key) {
            session.on_connect().await;
            return;
        }
        let from = key.0;

        if total_chunks == 0 || total_bytes == 0 {
            warn!(
                "Connect for transfer {} from {} announces an empty transfer - dropping",
                transfer_id, from
            );
            return;
        }
        if total_bytes > self.config.max_payload_size {
            warn!(
                "Connect for transfer {} from {} announces {} bytes, more than the configured maximum of {} - rejecting",
                transfer_id, from, total_bytes, self.config.max_payload_size
            );
            let frame = WireFrame::Abort { transfer_id, reason: AbortReason::ProtocolError };
            self.transport.send_frame(from, frame.encode()).await;
            return;
        }

        debug!(
            "incoming transfer {} from {}: {} chunks, {} bytes",
            transfer_id, from, total_chunks, total_bytes
        );
        let mut session = ReceiveSession::new(
            transfer_id,
            from.clone(),
            total_chunks,
            total_bytes,
            self.config.clone(),
            self.transport.clone(),
            self.events.clone(),
            self.timers.clone(),
        );
        session.start().await;
        self.receive_sessions.insert((from, transfer_id), session);
    }

    async fn on_abort(&mut self, from: PeerAddr, transfer_id: TransferId, reason: AbortReason) {
        let key = (from, transfer_id);
        if let Some(session) = self.receive_sessions.get_mut(&key) {
            session.on_peer_abort(reason).await;
            if session.is_terminal() {
                self.receive_sessions.remove(&key);
            }
            return;
        }
        let from = key.0;

        match self.send_sessions.get_mut(&transfer_id) {
            Some(session) if session.peer() == &from => {
                session.on_peer_abort(reason).await;
                if session.is_terminal() {
                    self.send_sessions.remove(&transfer_id);
                }
            }
            _ => debug!("Abort for unknown transfer {} from {} - dropping", transfer_id, from),
        }
    }

    /// Looks up the sender-side session for a response frame. Responses for unknown transfers
    ///  are stale retransmissions after retirement (or protocol violations) and are dropped
    ///  without further ado.
    fn sender_session(
        &mut self,
        from: &PeerAddr,
        transfer_id: TransferId,
    ) -> Option<&mut SendSession> {
        match self.send_sessions.get_mut(&transfer_id) {
            Some(session) if session.peer() == from => Some(session),
            Some(_) => {
                warn!(
                    "response for transfer {} from unexpected peer {} - dropping",
                    transfer_id, from
                );
                None
            }
            None => {
                debug!("response for unknown transfer {} from {} - dropping", transfer_id, from);
                None
            }
        }
    }

    fn retire_sender_if_terminal(&mut self, transfer_id: TransferId) {
        if let Some(session) = self.send_sessions.get(&transfer_id) {
            if session.is_terminal() {
                self.send_sessions.remove(&transfer_id);
            }
        }
    }
}
