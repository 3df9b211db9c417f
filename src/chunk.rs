use crate::error::TransferError;
use crate::transfer_id::TransferId;
use bytes::Bytes;

/// One bounded slice of a payload in flight. Immutable once created; the `bytes` handle shares
///  the original payload's allocation, so splitting does not copy.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Chunk {
    pub transfer_id: TransferId,
    /// zero-based, strictly increasing per transfer
    pub sequence_number: u32,
    pub total_chunks: u32,
    pub is_final: bool,
    pub bytes: Bytes,
}

/// Splits a payload into `ceil(len / max_chunk_size)` chunks with zero-based, strictly
///  increasing sequence numbers. The last chunk is flagged as final. Deterministic: the same
///  payload and chunk size always produce the same sequence of chunks.
pub fn split(
    transfer_id: TransferId,
    payload: &Bytes,
    max_chunk_size: usize,
) -> Result<Vec<Chunk>, TransferError> {
    if max_chunk_size == 0 {
        return Err(TransferError::InvalidConfiguration(
            "chunk size must be positive".to_string(),
        ));
    }
    if payload.is_empty() {
        return Err(TransferError::EmptyPayload);
    }

    let num_chunks = payload.len().div_ceil(max_chunk_size);
    if num_chunks > u32::MAX as usize {
        return Err(TransferError::InvalidConfiguration(format!(
            "payload of {} bytes does not fit into {} chunks of {} bytes",
            payload.len(),
            u32::MAX,
            max_chunk_size
        )));
    }

    let mut chunks = Vec::with_capacity(num_chunks);
    for (index, offset) in (0..payload.len()).step_by(max_chunk_size).enumerate() {
        let end = usize::min(offset + max_chunk_size, payload.len());
        chunks.push(Chunk {
            transfer_id,
            sequence_number: index as u32,
            total_chunks: num_chunks as u32,
            is_final: end == payload.len(),
            bytes: payload.slice(offset..end),
        });
    }
    Ok(chunks)
}

/// Rebuilds the original payload from a contiguous run of chunks `0..total_chunks`.
///
/// Callers confirm contiguity before invoking this, so a failure here means the run was
///  mis-assembled or a sender announced inconsistent chunk metadata. It fails the one transfer
///  it belongs to, never the process.
pub fn reassemble(chunks: &[Chunk]) -> Result<Vec<u8>, TransferError> {
    if chunks.is_empty() {
        return Err(TransferError::Reassembly("no chunks to reassemble".to_string()));
    }

    let num_chunks = chunks.len();
    for (index, chunk) in chunks.iter().enumerate() {
        if chunk.sequence_number as usize != index {
            return Err(TransferError::Reassembly(format!(
                "expected chunk #{}, found #{}",
                index, chunk.sequence_number
            )));
        }
        if chunk.total_chunks as usize != num_chunks {
            return Err(TransferError::Reassembly(format!(
                "chunk #{} announces {} chunks in total, the run has {}",
                index, chunk.total_chunks, num_chunks
            )));
        }
        if chunk.is_final != (index == num_chunks - 1) {
            return Err(TransferError::Reassembly(format!(
                "final flag out of place on chunk #{} of {}",
                index, num_chunks
            )));
        }
    }

    let total_len = chunks.iter().map(|chunk| chunk.bytes.len()).sum();
    let mut payload = Vec::with_capacity(total_len);
    for chunk in chunks {
        payload.extend_from_slice(&chunk.bytes);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::shorter_than_chunk(b"AB".to_vec(), 4, vec![b"AB".to_vec()])]
    #[case::exactly_one_chunk(b"ABCD".to_vec(), 4, vec![b"ABCD".to_vec()])]
    #[case::partial_last_chunk(b"ABCDEFGHI".to_vec(), 4, vec![b"ABCD".to_vec(), b"EFGH".to_vec(), b"I".to_vec()])]
    #[case::exact_multiple(b"ABCDEFGH".to_vec(), 4, vec![b"ABCD".to_vec(), b"EFGH".to_vec()])]
    #[case::single_byte_chunks(b"ABC".to_vec(), 1, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()])]
    fn test_split(
        #[case] payload: Vec<u8>,
        #[case] max_chunk_size: usize,
        #[case] expected: Vec<Vec<u8>>,
    ) {
        let payload = Bytes::from(payload);
        let chunks = split(TransferId::from_raw(7), &payload, max_chunk_size).unwrap();

        assert_eq!(chunks.len(), expected.len());
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.transfer_id, TransferId::from_raw(7));
            assert_eq!(chunk.sequence_number, index as u32);
            assert_eq!(chunk.total_chunks, expected.len() as u32);
            assert_eq!(chunk.is_final, index == expected.len() - 1);
            assert_eq!(chunk.bytes.as_ref(), expected[index].as_slice());
        }

        assert_eq!(reassemble(&chunks).unwrap(), payload.as_ref());
    }

    #[rstest]
    fn test_split_zero_chunk_size() {
        let result = split(TransferId::ZERO, &Bytes::from_static(b"ABC"), 0);
        assert!(matches!(result, Err(TransferError::InvalidConfiguration(_))));
    }

    #[rstest]
    fn test_split_empty_payload() {
        let result = split(TransferId::ZERO, &Bytes::new(), 4);
        assert!(matches!(result, Err(TransferError::EmptyPayload)));
    }

    #[rstest]
    #[case::empty_run(vec![])]
    #[case::missing_first(vec![1])]
    #[case::gap_in_the_middle(vec![0, 2])]
    #[case::out_of_order(vec![1, 0, 2])]
    fn test_reassemble_broken_sequence(#[case] kept_sequences: Vec<u32>) {
        let all = split(TransferId::ZERO, &Bytes::from_static(b"ABCDEFGHI"), 4).unwrap();
        let run = kept_sequences
            .iter()
            .map(|&sequence| all[sequence as usize].clone())
            .collect::<Vec<_>>();

        assert!(matches!(reassemble(&run), Err(TransferError::Reassembly(_))));
    }

    #[rstest]
    fn test_reassemble_inconsistent_total() {
        let mut chunks = split(TransferId::ZERO, &Bytes::from_static(b"ABCDEFGHI"), 4).unwrap();
        chunks[1].total_chunks = 4;

        assert!(matches!(reassemble(&chunks), Err(TransferError::Reassembly(_))));
    }

    #[rstest]
    fn test_reassemble_misplaced_final_flag() {
        let mut chunks = split(TransferId::ZERO, &Bytes::from_static(b"ABCDEFGHI"), 4).unwrap();
        chunks[0].is_final = true;

        assert!(matches!(reassemble(&chunks), Err(TransferError::Reassembly(_))));
    }
}
