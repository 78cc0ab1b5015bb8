//! Snapshot types reported to the application.
//!
//! Everything here is a plain copy of link state taken under the link's
//! lock; holding one never blocks the link.

pub mod stats;
pub mod status;

pub use crate::protocol::file::FileReceiveStatus;
pub use stats::ReceiveStats;
pub use status::{CharacteristicsInfo, ConnectionStatus, DebugStats};
