//! Log record framing.
//!
//! ```text
//! | payload_len (4, LE) | crc32 (4, LE) | payload (CBOR, payload_len bytes) |
//! ```
//!
//! The checksum covers the payload only. A frame that runs past the end of
//! the log is torn (crash during append) and is dropped on open; a bad
//! checksum anywhere else is corruption.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::version::{DocumentId, Revision, StoredVersion};
use serde::{Deserialize, Serialize};

/// Size of the length + checksum header.
pub(crate) const FRAME_HEADER: u64 = 8;

/// One entry of the append-only store log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum LogRecord {
    /// A version was written (or rewritten with a closed range).
    Put {
        collection: String,
        id: DocumentId,
        version: StoredVersion,
    },
    /// A version was physically removed.
    Delete {
        collection: String,
        id: DocumentId,
        valid_from: Revision,
    },
}

/// Result of reading the frame at some offset.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A complete, checksummed record and the frame's total length.
    Record(LogRecord, u64),
    /// The log ends inside this frame.
    Torn,
}

impl LogRecord {
    /// Serializes the record into a complete frame.
    pub(crate) fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload).map_err(|e| StorageError::Encoding(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::Encoding(format!("record of {} bytes is too large", payload.len())))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER as usize + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    fn decode(payload: &[u8]) -> StorageResult<Self> {
        ciborium::from_reader(payload).map_err(|e| StorageError::Decoding(e.to_string()))
    }
}

/// Reads the frame starting at `offset` in a log of `size` bytes.
pub(crate) fn read_frame(backend: &dyn StorageBackend, offset: u64, size: u64) -> StorageResult<Frame> {
    if offset + FRAME_HEADER > size {
        return Ok(Frame::Torn);
    }
    let header = backend.read_at(offset, FRAME_HEADER as usize)?;
    let len = u64::from(u32::from_le_bytes([header[0], header[1], header[2], header[3]]));
    let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let end = offset + FRAME_HEADER + len;
    if end > size {
        return Ok(Frame::Torn);
    }

    let payload = backend.read_at(offset + FRAME_HEADER, len as usize)?;
    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != stored_crc {
        if end == size {
            return Ok(Frame::Torn);
        }
        return Err(StorageError::corrupted(format!(
            "checksum mismatch at offset {offset}: expected {stored_crc:08x}, got {actual_crc:08x}"
        )));
    }

    Ok(Frame::Record(LogRecord::decode(&payload)?, FRAME_HEADER + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::version::VersionRange;
    use proptest::prelude::*;
    use serde_json::json;

    fn put_record() -> LogRecord {
        LogRecord::Put {
            collection: "docs".into(),
            id: DocumentId::from("7"),
            version: StoredVersion::live(
                VersionRange::open(Revision::new(3)),
                3,
                "main",
                json!({ "name": "widget", "tags": ["a", "b"], "count": 2 }),
            ),
        }
    }

    #[test]
    fn frame_reads_back_with_its_length() {
        let record = put_record();
        let frame = record.encode().unwrap();
        let mut backend = InMemoryBackend::new();
        backend.append(&frame).unwrap();

        match read_frame(&backend, 0, frame.len() as u64).unwrap() {
            Frame::Record(decoded, len) => {
                assert_eq!(decoded, record);
                assert_eq!(len, frame.len() as u64);
            }
            Frame::Torn => panic!("complete frame reported as torn"),
        }
    }

    #[test]
    fn short_tail_is_torn() {
        let frame = put_record().encode().unwrap();
        let cut = &frame[..frame.len() - 3];
        let backend = InMemoryBackend::with_data(cut.to_vec());
        assert!(matches!(read_frame(&backend, 0, cut.len() as u64).unwrap(), Frame::Torn));
    }

    #[test]
    fn bad_checksum_in_the_middle_is_corruption() {
        let mut first = put_record().encode().unwrap();
        let second = put_record().encode().unwrap();
        let last = first.len() - 1;
        first[last] ^= 0xFF;
        first.extend_from_slice(&second);
        let size = first.len() as u64;
        let backend = InMemoryBackend::with_data(first);

        assert!(matches!(
            read_frame(&backend, 0, size),
            Err(StorageError::Corrupted(_))
        ));
    }

    proptest! {
        #[test]
        fn every_strict_prefix_is_torn(cut in 0usize..64, doc in "[a-z]{0,40}") {
            let record = LogRecord::Put {
                collection: "docs".into(),
                id: DocumentId::from("p"),
                version: StoredVersion::live(VersionRange::open(Revision::new(1)), 1, "main", json!(doc)),
            };
            let frame = record.encode().unwrap();
            let cut = cut % frame.len();
            let backend = InMemoryBackend::with_data(frame[..cut].to_vec());
            prop_assert!(matches!(read_frame(&backend, 0, cut as u64).unwrap(), Frame::Torn));
        }
    }
}
