//! Shared fakes for unit tests: a transport that records decoded frames instead of sending
//!  them, and an event sink that records callbacks.

use crate::error::TransferError;
use crate::transfer_id::TransferId;
use crate::transport::{FrameTransport, PeerAddr, TransferEvents};
use crate::wire::WireFrame;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub(crate) struct RecordingTransport {
    self_addr: PeerAddr,
    peers: Vec<PeerAddr>,
    sent: Mutex<Vec<(PeerAddr, WireFrame)>>,
}

impl RecordingTransport {
    pub(crate) fn new(self_addr: &str, peers: &[&str]) -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            self_addr: PeerAddr::new(self_addr),
            peers: peers.iter().map(|peer| PeerAddr::new(*peer)).collect(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) async fn take_sent(&self) -> Vec<(PeerAddr, WireFrame)> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl FrameTransport for RecordingTransport {
    fn self_addr(&self) -> PeerAddr {
        self.self_addr.clone()
    }

    fn resolve(&self, destination: &str) -> Option<PeerAddr> {
        self.peers.iter().find(|peer| peer.as_str() == destination).cloned()
    }

    async fn send_frame(&self, to: PeerAddr, frame: Bytes) {
        let frame = WireFrame::deser(&mut frame.as_ref()).expect("sent an unparsable frame");
        self.sent.lock().await.push((to, frame));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RecordedEvent {
    Payload {
        transfer_id: TransferId,
        from: PeerAddr,
        payload: Bytes,
    },
    Completed {
        transfer_id: TransferId,
    },
    Failed {
        transfer_id: TransferId,
        error: TransferError,
    },
}

pub(crate) struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub(crate) fn new() -> Arc<RecordingEvents> {
        Arc::new(RecordingEvents { events: Mutex::new(Vec::new()) })
    }

    pub(crate) async fn take(&self) -> Vec<RecordedEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }

    /// polls until at least `count` events were recorded; paused-clock tests auto-advance
    ///  through the sleeps
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<RecordedEvent> {
        loop {
            {
                let events = self.events.lock().await;
                if events.len() >= count {
                    return events.clone();
                }
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl TransferEvents for RecordingEvents {
    async fn on_payload(&self, transfer_id: TransferId, from: PeerAddr, payload: Bytes) {
        self.events.lock().await.push(RecordedEvent::Payload { transfer_id, from, payload });
    }

    async fn on_transfer_complete(&self, transfer_id: TransferId) {
        self.events.lock().await.push(RecordedEvent::Completed { transfer_id });
    }

    async fn on_transfer_failed(&self, transfer_id: TransferId, error: TransferError) {
        self.events.lock().await.push(RecordedEvent::Failed { transfer_id, error });
    }
}
