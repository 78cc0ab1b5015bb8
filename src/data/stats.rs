//! Inbound traffic counters.

use chrono::{DateTime, Utc};

/// Counters over every notification received on the current connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReceiveStats {
    /// Number of notifications, text and file alike.
    pub receive_count: u64,
    /// Sum of notification payload lengths.
    pub total_bytes: u64,
    /// When the last notification arrived.
    pub last_receive_time: Option<DateTime<Utc>>,
}

impl ReceiveStats {
    /// Count one notification.
    pub fn record(&mut self, len: usize, at: DateTime<Utc>) {
        self.receive_count += 1;
        self.total_bytes += len as u64;
        self.last_receive_time = Some(at);
    }

    /// Zero all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
