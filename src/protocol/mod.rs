//! Protocol module: framing and reassembly.
//!
//! Nothing in here performs I/O. The link feeds these types with payloads
//! and writes what they produce, which keeps every rule testable without a
//! radio.
//!
//! - [`mtu`]: MTU negotiation and chunk-size derivation
//! - [`chunker`]: outbound message framing
//! - [`demux`]: per-notification text/file classification
//! - [`lines`]: line reassembly
//! - [`file`]: file transfer accumulation

pub mod chunker;
pub mod demux;
pub mod file;
pub mod lines;
pub mod mtu;

pub use chunker::OutboundFrame;
pub use demux::{classify, InboundDemultiplexer, Payload, Utf8Decoder, FILE_MARKER};
pub use file::{FileAccumulator, FileChunk, FileReceiveStatus, OrphanChunkPolicy, ReceivedFile};
pub use lines::LineReassembler;
pub use mtu::{chunk_size_for_mtu, MtuInfo, DEFAULT_CHUNK_SIZE_FLOOR, DEFAULT_MTU};
