//! Utilities
//!
//! Colour parsing and clipboard access shared by the QR screens.

use image::Rgba;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("failed to write clipboard: {0}")]
    Write(String),
}

/// Parse a CSS-style hex colour (`#1f2937`, `1f2937`, `#1f2937ff`)
pub fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let digits = value.trim().trim_start_matches('#');
    let bytes = hex::decode(digits).ok()?;
    match bytes.as_slice() {
        [r, g, b] => Some(Rgba([*r, *g, *b, 0xFF])),
        [r, g, b, a] => Some(Rgba([*r, *g, *b, *a])),
        _ => None,
    }
}

/// Copy text to the system clipboard
pub fn copy_to_clipboard(text: &str) -> Result<(), ClipboardError> {
    let mut clipboard = arboard::Clipboard::new().map_err(|e| {
        warn!("Clipboard not available: {}", e);
        ClipboardError::Unavailable(e.to_string())
    })?;

    clipboard
        .set_text(text.to_string())
        .map_err(|e| ClipboardError::Write(e.to_string()))?;

    info!("Copied {} bytes to clipboard", text.len());
    Ok(())
}
