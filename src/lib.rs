//! Reliable transfer of arbitrarily large byte payloads between peers whose underlying
//!  message-passing substrate only offers at-most-one-frame, best-effort delivery with no
//!  ordering guarantees between frames.
//!
//! Each peer runs a [`Proxy`]: the local application actor hands it a payload and a
//!  destination, the proxy splits the payload into bounded chunks, streams them under a credit
//!  window, and the peer proxy buffers, reorders and reassembles them before handing the
//!  reconstructed payload to its own application actor. Completion is confirmed back to the
//!  sender, so both actors see exactly one completion (or one failure) per transfer.
//!
//! ## Design goals
//!
//! * The protocol is peer-to-peer - every proxy can initiate and accept transfers, and a
//!   single proxy handles any number of concurrent transfers in both directions
//! * No assumptions about the substrate beyond "a frame either arrives intact or not at all":
//!   frames may be lost, duplicated, or overtake each other, and the protocol compensates with
//!   retransmission, idempotent handling and explicit sequence numbers
//! * No head-of-line blocking between transfers: every transfer has its own session and its
//!   own credit window, so a stalled peer delays only its own transfer
//! * Bounded memory on both sides: the sender keeps at most a window's worth of chunks in
//!   flight, the receiver bounds buffering via the announced transfer size and discards the
//!   buffers of transfers that fall silent
//! * Protocol overhead beyond the data chunks is two exchanges: Connect/ConnectAck up front
//!   and a single unacknowledged Complete at the end
//!
//! ## Frames
//!
//! All frames start with a kind byte and the varint-encoded transfer id; remaining integers
//! are varint-encoded as well:
//!
//! ```ascii
//! CONNECT     1 | transfer id | total chunks | total bytes
//! CONNECT_ACK 2 | transfer id
//! CHUNK       3 | transfer id | sequence number | total chunks | final flag (u8) | length | bytes
//! CHUNK_ACK   4 | transfer id | highest contiguous sequence
//! COMPLETE    5 | transfer id
//! ABORT       6 | transfer id | reason (u8)
//! ```
//!
//! A transfer runs Connect -> ConnectAck -> Chunk*/ChunkAck* -> Complete. ChunkAcks are
//!  cumulative: acknowledging sequence `k` covers everything up to and including `k`, which
//!  both replenishes the sender's credit window and survives lost or reordered acks. Abort
//!  can be sent by either side at any time; it is best-effort, and the receiving side
//!  additionally discards sessions that see no traffic for a configurable idle timeout, so a
//!  lost Abort cannot leak buffered state.
//!
//! ## Collaborators
//!
//! The proxy stays out of everything that is not payload transfer. The substrate is injected
//!  as a [`FrameTransport`], which also resolves logical destination names to peer handles
//!  (peer discovery and registration live with the hosting application). Completions,
//!  deliveries and failures are reported through [`TransferEvents`]. Configuration arrives as
//!  a plain [`ProxyConfig`] and is validated once at startup.

mod backoff;
mod chunk;
mod config;
mod error;
mod flow_control;
mod proxy;
mod receive_session;
mod send_session;
mod transfer_id;
mod transport;
mod wire;

#[cfg(test)]
mod test_util;

pub use chunk::{reassemble, split, Chunk};
pub use config::ProxyConfig;
pub use error::{AbortReason, TransferError};
pub use proxy::Proxy;
pub use transfer_id::TransferId;
pub use transport::{FrameTransport, PeerAddr, TransferEvents};
pub use wire::WireFrame;
