use crate::backoff::RetryBackoff;
use crate::chunk::Chunk;
use crate::config::ProxyConfig;
use crate::error::{AbortReason, TransferError};
use crate::flow_control::CreditWindow;
use crate::proxy::DeadlineTimers;
use crate::transfer_id::TransferId;
use crate::transport::{FrameTransport, PeerAddr, TransferEvents};
use crate::wire::WireFrame;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum SendState {
    /// Connect sent, waiting for the peer to set up its session
    Connecting,
    /// emitting chunks as credit allows
    Streaming,
    /// every chunk acknowledged, waiting for the peer's Complete
    AwaitingCompletion,
    Completed,
    Aborted,
}

/// Sender-side state machine for one transfer.
///
/// The owning proxy drives this strictly serially, so there is no internal locking. Response
///  deadlines are re-injected into the proxy's event queue as [`SendDeadline`] events carrying
///  an epoch; the session bumps its epoch whenever the peer makes progress, which turns stale
///  timer events into no-ops.
///
/// [`SendDeadline`]: crate::proxy::ProxyEvent::SendDeadline
pub(crate) struct SendSession {
    transfer_id: TransferId,
    peer: PeerAddr,
    chunks: Vec<Chunk>,
    total_bytes: u64,
    window: CreditWindow,
    state: SendState,
    retry_count: u32,
    backoff: RetryBackoff,
    deadline_epoch: u64,
    deadline_handle: Option<JoinHandle<()>>,
    config: Arc<ProxyConfig>,
    transport: Arc<dyn FrameTransport>,
    events: Arc<dyn TransferEvents>,
    timers: DeadlineTimers,
}

impl Drop for SendSession {
    fn drop(&mut self) {
        if let Some(handle) = self.deadline_handle.take() {
            handle.abort();
        }
    }
}

impl SendSession {
    pub(crate) fn new(
        transfer_id: TransferId,
        peer: PeerAddr,
        chunks: Vec<Chunk>,
        total_bytes: u64,
        config: Arc<ProxyConfig>,
        transport: Arc<dyn FrameTransport>,
        events: Arc<dyn TransferEvents>,
        timers: DeadlineTimers,
    ) -> SendSession {
        let backoff = RetryBackoff::new(config.ack_timeout, config.backoff_growth_eighths);
        let window = CreditWindow::new(config.credit_window);
        SendSession {
            transfer_id,
            peer,
            chunks,
            total_bytes,
            window,
            state: SendState::Connecting,
            retry_count: 0,
            backoff,
            deadline_epoch: 0,
            deadline_handle: None,
            config,
            transport,
            events,
            timers,
        }
    }

    pub(crate) fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self.state, SendState::Completed | SendState::Aborted)
    }

    pub(crate) async fn start(&mut self) {
        debug!(
            "starting transfer {} to {}: {} chunks, {} bytes",
            self.transfer_id,
            self.peer,
            self.chunks.len(),
            self.total_bytes
        );
        self.send_connect().await;
        self.arm_deadline();
    }

    pub(crate) async fn on_connect_ack(&mut self) {
        if self.state != SendState::Connecting {
            trace!(
                "ConnectAck for transfer {} in state {:?} - ignoring",
                self.transfer_id,
                self.state
            );
            return;
        }

        trace!("transfer {} accepted by {}", self.transfer_id, self.peer);
        self.state = SendState::Streaming;
        self.retry_count = 0;
        self.pump_chunks().await;
        self.arm_deadline();
    }

    pub(crate) async fn on_chunk_ack(&mut self, sequence: u32) {
        if self.state != SendState::Streaming {
            trace!(
                "ChunkAck for transfer {} in state {:?} - ignoring",
                self.transfer_id,
                self.state
            );
            return;
        }
        if !self.window.on_cumulative_ack(sequence) {
            trace!(
                "stale ChunkAck #{} for transfer {} - ignoring",
                sequence,
                self.transfer_id
            );
            return;
        }

        self.retry_count = 0;
        self.pump_chunks().await;
        if self.all_chunks_acknowledged() {
            trace!(
                "every chunk of transfer {} acknowledged, waiting for completion",
                self.transfer_id
            );
            self.state = SendState::AwaitingCompletion;
        }
        self.arm_deadline();
    }

    pub(crate) async fn on_complete(&mut self) {
        if self.is_terminal() {
            trace!("Complete for retired transfer {} - ignoring", self.transfer_id);
            return;
        }

        debug!("transfer {} to {} complete", self.transfer_id, self.peer);
        self.state = SendState::Completed;
        self.clear_deadline();
        self.events.on_transfer_complete(self.transfer_id).await;
    }

    pub(crate) async fn on_peer_abort(&mut self, reason: AbortReason) {
        if self.is_terminal() {
            return;
        }

        debug!(
            "peer {} aborted transfer {}: {:?}",
            self.peer, self.transfer_id, reason
        );
        self.state = SendState::Aborted;
        self.clear_deadline();
        self.events
            .on_transfer_failed(self.transfer_id, TransferError::PeerAborted(reason))
            .await;
    }

    pub(crate) async fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }

        debug!("cancelling transfer {} to {}", self.transfer_id, self.peer);
        self.send(WireFrame::Abort {
            transfer_id: self.transfer_id,
            reason: AbortReason::Cancelled,
        })
        .await;
        self.state = SendState::Aborted;
        self.clear_deadline();
        self.events
            .on_transfer_failed(self.transfer_id, TransferError::Cancelled)
            .await;
    }

    pub(crate) async fn on_deadline(&mut self, epoch: u64) {
        if epoch != self.deadline_epoch || self.is_terminal() {
            trace!("stale deadline for transfer {} - ignoring", self.transfer_id);
            return;
        }

        if self.retry_count >= self.config.max_retries {
            debug!(
                "no response from {} for transfer {} after {} attempts - giving up",
                self.peer, self.transfer_id, self.retry_count
            );
            self.send(WireFrame::Abort {
                transfer_id: self.transfer_id,
                reason: AbortReason::Timeout,
            })
            .await;
            self.state = SendState::Aborted;
            self.clear_deadline();
            self.events
                .on_transfer_failed(
                    self.transfer_id,
                    TransferError::Timeout { attempts: self.retry_count },
                )
                .await;
            return;
        }

        self.retry_count += 1;
        match self.state {
            SendState::Connecting => {
                debug!(
                    "transfer {}: Connect unanswered, retransmitting (attempt {})",
                    self.transfer_id, self.retry_count
                );
                self.send_connect().await;
            }
            SendState::Streaming => {
                debug!(
                    "transfer {}: resending chunks {:?} (attempt {})",
                    self.transfer_id,
                    self.window.unacknowledged(),
                    self.retry_count
                );
                for sequence in self.window.unacknowledged() {
                    if let Some(chunk) = self.chunks.get(sequence as usize) {
                        let frame = WireFrame::Chunk(chunk.clone());
                        self.transport.send_frame(self.peer.clone(), frame.encode()).await;
                    }
                }
            }
            SendState::AwaitingCompletion => {
                // Complete got lost or the receiver is slow. The final chunk is the only frame
                //  a live receiver still reacts to.
                debug!(
                    "transfer {}: Complete outstanding, probing with the final chunk (attempt {})",
                    self.transfer_id, self.retry_count
                );
                if let Some(chunk) = self.chunks.last() {
                    let frame = WireFrame::Chunk(chunk.clone());
                    self.transport.send_frame(self.peer.clone(), frame.encode()).await;
                }
            }
            SendState::Completed | SendState::Aborted => {}
        }
        self.arm_deadline();
    }

    async fn send_connect(&self) {
        self.send(WireFrame::Connect {
            transfer_id: self.transfer_id,
            total_chunks: self.chunks.len() as u32,
            total_bytes: self.total_bytes,
        })
        .await;
    }

    /// emit chunks until credit or chunks run out
    async fn pump_chunks(&mut self) {
        while self.window.has_credit() {
            let sequence = self.window.next_sequence();
            let chunk = match self.chunks.get(sequence as usize) {
                Some(chunk) => chunk.clone(),
                None => break,
            };
            trace!(
                "sending chunk #{} of transfer {} ({} bytes)",
                sequence,
                self.transfer_id,
                chunk.bytes.len()
            );
            self.transport
                .send_frame(self.peer.clone(), WireFrame::Chunk(chunk).encode())
                .await;
            self.window.on_chunk_sent();
        }
    }

    fn all_chunks_acknowledged(&self) -> bool {
        self.window.next_sequence() as usize == self.chunks.len() && self.window.all_acknowledged()
    }

    async fn send(&self, frame: WireFrame) {
        self.transport.send_frame(self.peer.clone(), frame.encode()).await;
    }

    fn arm_deadline(&mut self) {
        self.deadline_epoch += 1;
        let delay = self.backoff.delay_for_attempt(self.retry_count);
        if let Some(handle) = self.deadline_handle.take() {
            handle.abort();
        }
        self.deadline_handle =
            Some(self.timers.arm_send_deadline(self.transfer_id, self.deadline_epoch, delay));
    }

    fn clear_deadline(&mut self) {
        if let Some(handle) = self.deadline_handle.take() {
            handle.abort();
        }
    }
}
