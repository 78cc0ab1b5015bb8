//! Utility functions for the dyj-rust-ble crate.

use std::fmt::Write as _;

/// Format up to `max` bytes as space-separated hex, with `...` if truncated.
///
/// # Example
///
/// ```
/// use dyj_rust_ble::utils::hex_preview;
///
/// assert_eq!(hex_preview(&[0x00, 0xab, 0x10], 2), "00 ab...");
/// ```
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(data.len().min(max) * 3 + 3);

    for (i, byte) in data.iter().take(max).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }

    if data.len() > max {
        out.push_str("...");
    }

    out
}

/// Escape CR and LF so buffered text logs on one line.
pub fn escape_line_endings(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}
