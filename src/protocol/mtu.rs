//! MTU negotiation and chunk-size derivation.
//!
//! The ATT header takes 3 bytes of every write, so the usable payload of a
//! link with MTU `n` is `n - 3`. The derived chunk size is clamped *upward*
//! to a floor (240 by default), which matches what DYJ firmware has been
//! tested with: for any MTU at or below 243 the floor wins.

use tracing::{debug, warn};

use crate::ble::transport::{DeviceInfo, Transport};

/// ATT MTU guaranteed by the Bluetooth core spec.
pub const DEFAULT_MTU: u16 = 23;

/// Bytes of ATT header in every write.
pub const ATT_HEADER_SIZE: usize = 3;

/// Default lower clamp for the derived chunk size.
pub const DEFAULT_CHUNK_SIZE_FLOOR: usize = 240;

/// Chunk size used before any negotiation has happened.
pub const UNNEGOTIATED_CHUNK_SIZE: usize = DEFAULT_MTU as usize - ATT_HEADER_SIZE;

/// Negotiated link parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MtuInfo {
    /// ATT MTU of the link.
    pub mtu: u16,
    /// Largest payload written in one outbound chunk.
    pub max_chunk_size: usize,
    /// Whether negotiation ran on the current connection.
    pub negotiated: bool,
}

impl Default for MtuInfo {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            max_chunk_size: UNNEGOTIATED_CHUNK_SIZE,
            negotiated: false,
        }
    }
}

impl MtuInfo {
    /// Derive link parameters from an MTU value.
    pub fn from_mtu(mtu: u16, chunk_size_floor: usize) -> Self {
        Self {
            mtu,
            max_chunk_size: chunk_size_for_mtu(mtu, chunk_size_floor),
            negotiated: true,
        }
    }
}

/// `max(mtu - 3, floor)`.
pub fn chunk_size_for_mtu(mtu: u16, chunk_size_floor: usize) -> usize {
    (mtu as usize)
        .saturating_sub(ATT_HEADER_SIZE)
        .max(chunk_size_floor)
}

/// Query the transport for the MTU and derive the chunk size.
///
/// A failed or unsupported query falls back to [`DEFAULT_MTU`]; negotiation
/// itself never fails.
pub async fn negotiate<T>(transport: &T, device: &DeviceInfo, chunk_size_floor: usize) -> MtuInfo
where
    T: Transport + Sync + ?Sized,
{
    let mtu = match transport.mtu(device).await {
        Ok(Some(mtu)) => {
            debug!("Platform reported MTU {}", mtu);
            mtu
        }
        Ok(None) => {
            debug!("MTU query unsupported, using default {}", DEFAULT_MTU);
            DEFAULT_MTU
        }
        Err(e) => {
            warn!("MTU query failed ({}), using default {}", e, DEFAULT_MTU);
            DEFAULT_MTU
        }
    };

    let info = MtuInfo::from_mtu(mtu, chunk_size_floor);
    debug!(
        "MTU negotiation complete: mtu={}, max_chunk_size={}",
        info.mtu, info.max_chunk_size
    );
    info
}
