use crate::chunk::{self, Chunk};
use crate::config::ProxyConfig;
use crate::error::{AbortReason, TransferError};
use crate::proxy::DeadlineTimers;
use crate::transfer_id::TransferId;
use crate::transport::{FrameTransport, PeerAddr, TransferEvents};
use crate::wire::WireFrame;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum ReceiveState {
    /// buffering chunks until the announced run is complete
    Streaming,
    Completed,
    Aborted,
}

/// Receiver-side state machine for one transfer.
///
/// Chunks may arrive in any order and any number of times; everything at or above
///  `next_expected` is buffered, everything below it is a duplicate and only triggers a
///  repeated cumulative acknowledgement so a sender whose acks got lost does not stall.
///  The idle deadline discards the session's buffers if the sender falls silent, whether
///  because it crashed, gave up, or its Abort never arrived.
pub(crate) struct ReceiveSession {
    transfer_id: TransferId,
    peer: PeerAddr,
    total_chunks: u32,
    total_bytes: u64,
    next_expected: u32,
    buffered_bytes: u64,
    buffer: BTreeMap<u32, Chunk>,
    state: ReceiveState,
    idle_epoch: u64,
    idle_handle: Option<JoinHandle<()>>,
    config: Arc<ProxyConfig>,
    transport: Arc<dyn FrameTransport>,
    events: Arc<dyn TransferEvents>,
    timers: DeadlineTimers,
}

impl Drop for ReceiveSession {
    fn drop(&mut self) {
        if let Some(handle) = self.idle_handle.take() {
            handle.abort();
        }
    }
}

impl ReceiveSession {
    pub(crate) fn new(
        transfer_id: TransferId,
        peer: PeerAddr,
        total_chunks: u32,
        total_bytes: u64,
        config: Arc<ProxyConfig>,
        transport: Arc<dyn FrameTransport>,
        events: Arc<dyn TransferEvents>,
        timers: DeadlineTimers,
    ) -> ReceiveSession {
        ReceiveSession {
            transfer_id,
            peer,
            total_chunks,
            total_bytes,
            next_expected: 0,
            buffered_bytes: 0,
            buffer: BTreeMap::default(),
            state: ReceiveState::Streaming,
            idle_epoch: 0,
            idle_handle: None,
            config,
            transport,
            events,
            timers,
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self.state, ReceiveState::Completed | ReceiveState::Aborted)
    }

    pub(crate) async fn start(&mut self) {
        self.send(WireFrame::ConnectAck { transfer_id: self.transfer_id }).await;
        self.touch_idle();
    }

    /// a repeated Connect - the first ConnectAck got lost, so answer it again
    pub(crate) async fn on_connect(&mut self) {
        trace!(
            "repeated Connect for transfer {} from {} - acknowledging again",
            self.transfer_id,
            self.peer
        );
        self.send(WireFrame::ConnectAck { transfer_id: self.transfer_id }).await;
        self.touch_idle();
    }

    pub(crate) async fn on_chunk(&mut self, chunk: Chunk) {
        self.touch_idle();

        if chunk.sequence_number >= self.total_chunks || chunk.total_chunks != self.total_chunks {
            warn!(
                "chunk #{} of transfer {} from {} contradicts the announced {} chunks - dropping",
                chunk.sequence_number, self.transfer_id, self.peer, self.total_chunks
            );
            return;
        }
        if chunk.is_final != (chunk.sequence_number == self.total_chunks - 1) {
            warn!(
                "chunk #{} of transfer {} from {} carries a misplaced final flag - dropping",
                chunk.sequence_number, self.transfer_id, self.peer
            );
            return;
        }

        if chunk.sequence_number < self.next_expected {
            trace!(
                "duplicate chunk #{} of transfer {} - acknowledging again",
                chunk.sequence_number,
                self.transfer_id
            );
            self.send_ack().await;
            return;
        }
        if self.buffer.contains_key(&chunk.sequence_number) {
            trace!(
                "chunk #{} of transfer {} is already buffered - dropping",
                chunk.sequence_number,
                self.transfer_id
            );
            return;
        }

        self.buffered_bytes += chunk.bytes.len() as u64;
        if self.buffered_bytes > self.total_bytes {
            warn!(
                "transfer {} from {} exceeds its announced size of {} bytes - aborting",
                self.transfer_id, self.peer, self.total_bytes
            );
            self.abort_with(
                AbortReason::ProtocolError,
                TransferError::Reassembly(format!(
                    "transfer exceeds its announced size of {} bytes",
                    self.total_bytes
                )),
            )
            .await;
            return;
        }

        trace!(
            "buffering chunk #{} of transfer {} ({} bytes)",
            chunk.sequence_number,
            self.transfer_id,
            chunk.bytes.len()
        );
        self.buffer.insert(chunk.sequence_number, chunk);

        let mut advanced = false;
        while self.buffer.contains_key(&self.next_expected) {
            self.next_expected += 1;
            advanced = true;
        }
        if advanced {
            self.send_ack().await;
        }

        if self.next_expected == self.total_chunks {
            self.finish().await;
        }
    }

    pub(crate) async fn on_peer_abort(&mut self, reason: AbortReason) {
        if self.is_terminal() {
            return;
        }

        debug!(
            "peer {} aborted transfer {}: {:?} - discarding {} buffered bytes",
            self.peer, self.transfer_id, reason, self.buffered_bytes
        );
        self.state = ReceiveState::Aborted;
        self.clear_idle();
        self.buffer.clear();
        self.events
            .on_transfer_failed(self.transfer_id, TransferError::PeerAborted(reason))
            .await;
    }

    pub(crate) async fn on_idle_deadline(&mut self, epoch: u64) {
        if epoch != self.idle_epoch || self.is_terminal() {
            trace!("stale idle deadline for transfer {} - ignoring", self.transfer_id);
            return;
        }

        debug!(
            "transfer {} from {} saw no traffic for {:?} - discarding {} buffered bytes",
            self.transfer_id, self.peer, self.config.receive_idle_timeout, self.buffered_bytes
        );
        self.state = ReceiveState::Aborted;
        self.buffer.clear();
        self.events
            .on_transfer_failed(self.transfer_id, TransferError::Timeout { attempts: 0 })
            .await;
    }

    /// the contiguous run 0..total_chunks is in the buffer: reassemble, deliver, complete
    async fn finish(&mut self) {
        let chunks = std::mem::take(&mut self.buffer).into_values().collect::<Vec<_>>();
        let payload = match chunk::reassemble(&chunks) {
            Ok(payload) => payload,
            Err(error) => {
                warn!("transfer {} from {}: {} - aborting", self.transfer_id, self.peer, error);
                self.abort_with(AbortReason::ProtocolError, error).await;
                return;
            }
        };
        if payload.len() as u64 != self.total_bytes {
            warn!(
                "transfer {} from {} reassembled to {} bytes, {} were announced - aborting",
                self.transfer_id,
                self.peer,
                payload.len(),
                self.total_bytes
            );
            self.abort_with(
                AbortReason::ProtocolError,
                TransferError::Reassembly(format!(
                    "reassembled {} bytes, {} were announced",
                    payload.len(),
                    self.total_bytes
                )),
            )
            .await;
            return;
        }

        debug!(
            "transfer {} from {} complete: {} bytes",
            self.transfer_id, self.peer, self.total_bytes
        );
        self.events
            .on_payload(self.transfer_id, self.peer.clone(), Bytes::from(payload))
            .await;
        self.send(WireFrame::Complete { transfer_id: self.transfer_id }).await;
        self.state = ReceiveState::Completed;
        self.clear_idle();
    }

    async fn abort_with(&mut self, reason: AbortReason, error: TransferError) {
        self.send(WireFrame::Abort { transfer_id: self.transfer_id, reason }).await;
        self.state = ReceiveState::Aborted;
        self.clear_idle();
        self.buffer.clear();
        self.events.on_transfer_failed(self.transfer_id, error).await;
    }

    async fn send_ack(&self) {
        // next_expected is positive whenever an ack goes out
        self.send(WireFrame::ChunkAck {
            transfer_id: self.transfer_id,
            highest_contiguous_sequence: self.next_expected - 1,
        })
        .await;
    }

    async fn send(&self, frame: WireFrame) {
        self.transport.send_frame(self.peer.clone(), frame.encode()).await;
    }

    fn touch_idle(&mut self) {
        self.idle_epoch += 1;
        if let Some(handle) = self.idle_handle.take() {
            handle.abort();
        }
        self.idle_handle = Some(self.timers.arm_receive_idle(
            self.peer.clone(),
            self.transfer_id,
            self.idle_epoch,
            self.config.receive_idle_timeout,
        ));
    }

    fn clear_idle(&mut self) {
        if let Some(handle) = self.idle_handle.take() {
            handle.abort();
        }
    }
}
