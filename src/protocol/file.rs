//! Binary file accumulation.
//!
//! The application brackets a transfer with [`FileAccumulator::start`] and
//! [`FileAccumulator::finish`]; every marked chunk received in between is
//! appended to the session buffer. There is no length prefix or checksum at
//! this layer.

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::utils::hex_preview;

/// What to do with a file chunk that arrives while no transfer is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OrphanChunkPolicy {
    /// Append under the empty file name and report it like any other chunk.
    #[default]
    Buffer,
    /// Drop the chunk.
    Discard,
}

/// One file chunk as reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Name of the active transfer, empty if none was started.
    pub name: String,
    /// Payload of this chunk, marker byte removed.
    pub data: Bytes,
    /// Bytes accumulated so far, this chunk included.
    pub total_length: usize,
}

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceivedFile {
    /// File name given to `start`.
    pub name: String,
    /// Accumulated payload.
    pub data: Bytes,
}

impl ReceivedFile {
    /// Size of the payload in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Progress of the current transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileReceiveStatus {
    /// Whether a transfer is active.
    pub is_receiving: bool,
    /// Name of the active transfer.
    pub file_name: String,
    /// Bytes accumulated so far.
    pub bytes_received: usize,
}

/// Outcome of pushing a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk was appended.
    Appended(FileChunk),
    /// The chunk arrived with no active transfer and was dropped.
    Discarded {
        /// Length of the dropped payload.
        len: usize,
    },
}

/// File transfer session state.
#[derive(Debug, Default)]
pub struct FileAccumulator {
    name: String,
    buffer: BytesMut,
    active: bool,
    orphan_policy: OrphanChunkPolicy,
}

impl FileAccumulator {
    /// Create an idle accumulator.
    pub fn new(orphan_policy: OrphanChunkPolicy) -> Self {
        Self {
            orphan_policy,
            ..Self::default()
        }
    }

    /// Begin a transfer, discarding anything buffered before.
    pub fn start(&mut self, name: &str) {
        info!("Starting file receive: {}", name);
        self.name = name.to_string();
        self.buffer.clear();
        self.active = true;
    }

    /// Append the payload of one file chunk.
    pub fn push(&mut self, data: &[u8]) -> ChunkOutcome {
        if !self.active {
            match self.orphan_policy {
                OrphanChunkPolicy::Buffer => {
                    warn!(
                        "File chunk of {} bytes with no active transfer, buffering under {:?}",
                        data.len(),
                        self.name
                    );
                }
                OrphanChunkPolicy::Discard => {
                    warn!(
                        "File chunk of {} bytes with no active transfer, discarding",
                        data.len()
                    );
                    return ChunkOutcome::Discarded { len: data.len() };
                }
            }
        }

        self.buffer.extend_from_slice(data);

        debug!(
            "File chunk: {} bytes [{}], total {} ({:?})",
            data.len(),
            hex_preview(data, 32),
            self.buffer.len(),
            self.name
        );

        ChunkOutcome::Appended(FileChunk {
            name: self.name.clone(),
            data: Bytes::copy_from_slice(data),
            total_length: self.buffer.len(),
        })
    }

    /// End the transfer and hand back everything accumulated.
    pub fn finish(&mut self) -> ReceivedFile {
        let file = ReceivedFile {
            name: std::mem::take(&mut self.name),
            data: self.buffer.split().freeze(),
        };
        self.active = false;

        info!("Finished file receive: {} ({} bytes)", file.name, file.size());
        file
    }

    /// Deactivate and drop any buffered data.
    pub fn reset(&mut self) {
        self.name.clear();
        self.buffer.clear();
        self.active = false;
    }

    /// Whether a transfer is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Progress of the current transfer.
    pub fn status(&self) -> FileReceiveStatus {
        FileReceiveStatus {
            is_receiving: self.active,
            file_name: self.name.clone(),
            bytes_received: self.buffer.len(),
        }
    }
}
