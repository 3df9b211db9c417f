use crate::error::TransferError;
use crate::transfer_id::TransferId;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Stable addressable handle for a peer's proxy instance. How the name maps onto actual
///  network endpoints is the transport's business; the proxy only compares and forwards it.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PeerAddr(Arc<str>);

impl PeerAddr {
    pub fn new(addr: impl Into<Arc<str>>) -> PeerAddr {
        PeerAddr(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The message-passing substrate a proxy runs on: at most one frame per send, best effort,
///  no ordering between frames. Everything beyond that - retransmission, ordering, flow
///  control - is layered on top by the proxy.
///
/// Peer discovery and registration live with the hosting application; the proxy only asks for
///  resolution of destinations it was handed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameTransport: Send + Sync + 'static {
    fn self_addr(&self) -> PeerAddr;

    /// resolves a logical destination name to an addressable peer, if that peer is known
    fn resolve(&self, destination: &str) -> Option<PeerAddr>;

    /// Best-effort single-frame send. Loss is handled by the caller's retry machinery, so
    ///  there is no error to report back.
    async fn send_frame(&self, to: PeerAddr, frame: Bytes);
}

/// Callbacks toward the application actor that owns a proxy. All completion and failure
///  reporting is asynchronous through this trait; the only synchronous failures are the
///  validation errors of [`Proxy::deliver`](crate::Proxy::deliver) itself.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransferEvents: Send + Sync + 'static {
    /// A complete payload arrived from `from`. Ownership of the bytes passes to the callee.
    async fn on_payload(&self, transfer_id: TransferId, from: PeerAddr, payload: Bytes);

    /// a transfer initiated locally was confirmed complete by the peer
    async fn on_transfer_complete(&self, transfer_id: TransferId);

    /// a transfer, in either direction, was given up on
    async fn on_transfer_failed(&self, transfer_id: TransferId, error: TransferError);
}
