use crate::chunk::Chunk;
use crate::error::AbortReason;
use crate::transfer_id::TransferId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use num_enum::TryFromPrimitive;

/// Discriminant byte at the start of every frame.
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive)]
#[repr(u8)]
enum FrameKind {
    Connect = 1,
    ConnectAck = 2,
    Chunk = 3,
    ChunkAck = 4,
    Complete = 5,
    Abort = 6,
}

/// The frames two proxies exchange. Every frame fits into a single message of the underlying
///  transport and starts with a kind byte followed by the varint-encoded transfer id; all other
///  integers are varint-encoded as well, and chunk payloads are length-prefixed.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum WireFrame {
    /// announces a transfer to the receiving proxy and asks it to set up a session
    Connect {
        transfer_id: TransferId,
        total_chunks: u32,
        total_bytes: u64,
    },
    ConnectAck {
        transfer_id: TransferId,
    },
    Chunk(Chunk),
    /// cumulative: acknowledges every chunk up to and including the given sequence number
    ChunkAck {
        transfer_id: TransferId,
        highest_contiguous_sequence: u32,
    },
    /// sent by the receiver once the payload is reassembled and handed over; not acknowledged
    ///  itself, to bound the protocol overhead at two exchanges beyond the data chunks
    Complete {
        transfer_id: TransferId,
    },
    Abort {
        transfer_id: TransferId,
        reason: AbortReason,
    },
}

impl WireFrame {
    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            WireFrame::Connect { transfer_id, total_chunks, total_bytes } => {
                buf.put_u8(FrameKind::Connect as u8);
                buf.put_u64_varint(transfer_id.to_raw());
                buf.put_u32_varint(*total_chunks);
                buf.put_u64_varint(*total_bytes);
            }
            WireFrame::ConnectAck { transfer_id } => {
                buf.put_u8(FrameKind::ConnectAck as u8);
                buf.put_u64_varint(transfer_id.to_raw());
            }
            WireFrame::Chunk(chunk) => {
                buf.put_u8(FrameKind::Chunk as u8);
                buf.put_u64_varint(chunk.transfer_id.to_raw());
                buf.put_u32_varint(chunk.sequence_number);
                buf.put_u32_varint(chunk.total_chunks);
                buf.put_u8(chunk.is_final as u8);
                buf.put_usize_varint(chunk.bytes.len());
                buf.put_slice(&chunk.bytes);
            }
            WireFrame::ChunkAck { transfer_id, highest_contiguous_sequence } => {
                buf.put_u8(FrameKind::ChunkAck as u8);
                buf.put_u64_varint(transfer_id.to_raw());
                buf.put_u32_varint(*highest_contiguous_sequence);
            }
            WireFrame::Complete { transfer_id } => {
                buf.put_u8(FrameKind::Complete as u8);
                buf.put_u64_varint(transfer_id.to_raw());
            }
            WireFrame::Abort { transfer_id, reason } => {
                buf.put_u8(FrameKind::Abort as u8);
                buf.put_u64_varint(transfer_id.to_raw());
                buf.put_u8(u8::from(*reason));
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<WireFrame> {
        let kind = FrameKind::try_from(buf.try_get_u8()?)?;
        let transfer_id = TransferId::from_raw(buf.try_get_u64_varint()?);

        let frame = match kind {
            FrameKind::Connect => WireFrame::Connect {
                transfer_id,
                total_chunks: buf.try_get_u32_varint()?,
                total_bytes: buf.try_get_u64_varint()?,
            },
            FrameKind::ConnectAck => WireFrame::ConnectAck { transfer_id },
            FrameKind::Chunk => {
                let sequence_number = buf.try_get_u32_varint()?;
                let total_chunks = buf.try_get_u32_varint()?;
                let is_final = match buf.try_get_u8()? {
                    0 => false,
                    1 => true,
                    flag => anyhow::bail!("invalid final flag {}", flag),
                };
                let len = buf.try_get_usize_varint()?;
                if len > buf.remaining() {
                    anyhow::bail!(
                        "chunk announces {} payload bytes, frame has {} left",
                        len,
                        buf.remaining()
                    );
                }
                WireFrame::Chunk(Chunk {
                    transfer_id,
                    sequence_number,
                    total_chunks,
                    is_final,
                    bytes: buf.copy_to_bytes(len),
                })
            }
            FrameKind::ChunkAck => WireFrame::ChunkAck {
                transfer_id,
                highest_contiguous_sequence: buf.try_get_u32_varint()?,
            },
            FrameKind::Complete => WireFrame::Complete { transfer_id },
            FrameKind::Abort => WireFrame::Abort {
                transfer_id,
                reason: AbortReason::try_from(buf.try_get_u8()?)?,
            },
        };
        Ok(frame)
    }

    pub fn transfer_id(&self) -> TransferId {
        match self {
            WireFrame::Connect { transfer_id, .. } => *transfer_id,
            WireFrame::ConnectAck { transfer_id } => *transfer_id,
            WireFrame::Chunk(chunk) => chunk.transfer_id,
            WireFrame::ChunkAck { transfer_id, .. } => *transfer_id,
            WireFrame::Complete { transfer_id } => *transfer_id,
            WireFrame::Abort { transfer_id, .. } => *transfer_id,
        }
    }
}
