//! Outbound message framing.
//!
//! A message goes out as its UTF-8 bytes plus one `\n`, cut into
//! consecutive writes of at most `max_chunk_size` bytes. Chunk order is the
//! only guarantee; there is no per-chunk acknowledgment or retry.

/// Terminator appended to every outbound message.
pub const MESSAGE_TERMINATOR: u8 = b'\n';

/// The wire bytes of one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    bytes: Vec<u8>,
}

impl OutboundFrame {
    /// Frame a message.
    pub fn new(message: &str) -> Self {
        let mut bytes = Vec::with_capacity(message.len() + 1);
        bytes.extend_from_slice(message.as_bytes());
        bytes.push(MESSAGE_TERMINATOR);
        Self { bytes }
    }

    /// All wire bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes, terminator included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: a frame carries at least its terminator.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Iterate over the chunks, in write order.
    ///
    /// A `max_chunk_size` of zero is treated as one.
    pub fn chunks(&self, max_chunk_size: usize) -> std::slice::Chunks<'_, u8> {
        self.bytes.chunks(max_chunk_size.max(1))
    }

    /// Number of writes needed at the given chunk size.
    pub fn chunk_count(&self, max_chunk_size: usize) -> usize {
        self.len().div_ceil(max_chunk_size.max(1))
    }
}
