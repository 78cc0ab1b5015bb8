//! Inbound demultiplexing.
//!
//! Every notification is classified on its own: a leading `0x00` marks a
//! file chunk, anything else is UTF-8 text. Text and file payloads may
//! interleave freely on the same characteristic.

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use crate::data::stats::ReceiveStats;
use crate::error::Error;
use crate::events::LinkEvent;
use crate::protocol::file::{ChunkOutcome, FileAccumulator, FileReceiveStatus, OrphanChunkPolicy, ReceivedFile};
use crate::protocol::lines::LineReassembler;
use crate::utils::{escape_line_endings, hex_preview};

/// Leading byte of a file chunk.
pub const FILE_MARKER: u8 = 0x00;

/// A classified notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// File data with the marker byte stripped.
    File(&'a [u8]),
    /// Text bytes, untouched.
    Text(&'a [u8]),
}

/// Classify one notification payload.
pub fn classify(payload: &[u8]) -> Payload<'_> {
    match payload.split_first() {
        Some((&FILE_MARKER, rest)) => Payload::File(rest),
        _ => Payload::Text(payload),
    }
}

/// Result of decoding one text payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decoded {
    /// Decoded text, malformed sequences replaced with U+FFFD.
    pub text: String,
    /// Number of malformed sequences replaced.
    pub invalid_sequences: usize,
}

/// Streaming UTF-8 decoder.
///
/// A character split across two notifications is held back until the rest
/// of it arrives.
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a decoder with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next slice of the stream.
    pub fn decode(&mut self, bytes: &[u8]) -> Decoded {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut decoded = Decoded::default();
        let mut rest = &input[..];

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    decoded.text.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    decoded.text.push_str(&String::from_utf8_lossy(valid));

                    match e.error_len() {
                        Some(len) => {
                            decoded.text.push(char::REPLACEMENT_CHARACTER);
                            decoded.invalid_sequences += 1;
                            rest = &tail[len..];
                        }
                        None => {
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        decoded
    }

    /// Bytes of an incomplete character held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any held-back bytes.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Routes notifications to the line reassembler or the file accumulator.
#[derive(Debug)]
pub struct InboundDemultiplexer {
    decoder: Utf8Decoder,
    lines: LineReassembler,
    file: FileAccumulator,
    stats: ReceiveStats,
}

impl InboundDemultiplexer {
    /// Create an idle demultiplexer.
    pub fn new(orphan_policy: OrphanChunkPolicy) -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            lines: LineReassembler::new(),
            file: FileAccumulator::new(orphan_policy),
            stats: ReceiveStats::default(),
        }
    }

    /// Process one notification payload and return the events it produced.
    pub fn process(&mut self, payload: &[u8], at: DateTime<Utc>) -> Vec<LinkEvent> {
        self.stats.record(payload.len(), at);

        trace!(
            "Notification #{}: {} bytes [{}]",
            self.stats.receive_count,
            payload.len(),
            hex_preview(payload, 32)
        );

        match classify(payload) {
            Payload::File(data) => match self.file.push(data) {
                ChunkOutcome::Appended(chunk) => vec![LinkEvent::FileChunk(chunk)],
                ChunkOutcome::Discarded { len } => vec![LinkEvent::Error {
                    context: format!("discarded {} byte file chunk: no active transfer", len),
                }],
            },
            Payload::Text(bytes) => self.process_text(bytes),
        }
    }

    fn process_text(&mut self, bytes: &[u8]) -> Vec<LinkEvent> {
        let decoded = self.decoder.decode(bytes);
        let mut events = Vec::new();

        if decoded.invalid_sequences > 0 {
            let error = Error::Decode {
                context: format!(
                    "{} malformed UTF-8 sequence(s) in {} byte payload",
                    decoded.invalid_sequences,
                    bytes.len()
                ),
            };
            warn!("{}", error);
            events.push(LinkEvent::Error {
                context: error.to_string(),
            });
        }

        let messages = self.lines.feed(&decoded.text);

        trace!(
            "Text buffer after chunk: {} bytes \"{}\"",
            self.lines.len(),
            escape_line_endings(self.lines.pending())
        );

        events.extend(messages.into_iter().map(LinkEvent::Message));
        events
    }

    /// Begin a file transfer.
    pub fn start_file(&mut self, name: &str) {
        self.file.start(name);
    }

    /// End the file transfer.
    pub fn finish_file(&mut self) -> ReceivedFile {
        self.file.finish()
    }

    /// Progress of the file transfer.
    pub fn file_status(&self) -> FileReceiveStatus {
        self.file.status()
    }

    /// Bytes of text waiting for a terminator.
    pub fn pending_text_len(&self) -> usize {
        self.lines.len()
    }

    /// Inbound traffic counters.
    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    /// Drop pending text and zero the counters. The file transfer is kept.
    pub fn clear_text(&mut self) {
        self.lines.clear();
        self.decoder.reset();
        self.stats.reset();
    }

    /// Drop everything, including any active file transfer.
    pub fn reset(&mut self) {
        self.clear_text();
        self.file.reset();
    }
}
