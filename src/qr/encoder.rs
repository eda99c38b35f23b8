//! QR Code Encoder
//!
//! Renders deep links (reward validation, profile) as QR images onto an
//! in-memory surface that can be exported as PNG or copied as text.

use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use image::{ImageFormat, Rgba, RgbaImage};
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::utils::parse_hex_color;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("QR payload is empty")]
    EmptyPayload,
    #[error("payload cannot be encoded as a QR code: {0}")]
    Capacity(QrError),
    #[error("invalid colour: {0}")]
    InvalidColor(String),
    #[error("unsupported QR layout: size {size}px, margin {margin} modules")]
    Layout { size: u32, margin: u32 },
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Largest quiet zone accepted, in modules
pub const MAX_MARGIN: u32 = 64;
/// Largest requested image side, in pixels
pub const MAX_SIZE: u32 = 4096;

/// Rendering parameters for a QR surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Target width/height in pixels
    pub size: u32,
    /// Quiet zone in modules
    pub margin: u32,
    /// Foreground colour (hex)
    pub dark: String,
    /// Background colour (hex)
    pub light: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::reward()
    }
}

impl RenderOptions {
    /// Defaults used for reward redemption codes
    pub fn reward() -> Self {
        Self {
            size: 256,
            margin: 2,
            dark: "#1f2937".to_string(),
            light: "#ffffff".to_string(),
        }
    }

    /// Defaults used for the profile / digital ticket code
    pub fn profile() -> Self {
        Self {
            size: 200,
            ..Self::reward()
        }
    }

    fn palette(&self) -> Result<(Rgba<u8>, Rgba<u8>), EncodeError> {
        let dark = parse_hex_color(&self.dark)
            .ok_or_else(|| EncodeError::InvalidColor(self.dark.clone()))?;
        let light = parse_hex_color(&self.light)
            .ok_or_else(|| EncodeError::InvalidColor(self.light.clone()))?;
        Ok((dark, light))
    }
}

/// Encode a payload into a square RGBA image.
///
/// The module scale is the largest integer that fits `modules + 2 * margin`
/// into `options.size`; the symbol is centred. When even a scale of one does
/// not fit, the image grows to the minimum size that does.
pub fn encode(payload: &str, options: &RenderOptions) -> Result<RgbaImage, EncodeError> {
    if payload.is_empty() {
        return Err(EncodeError::EmptyPayload);
    }

    let layout_error = || EncodeError::Layout {
        size: options.size,
        margin: options.margin,
    };
    if options.margin > MAX_MARGIN || options.size > MAX_SIZE {
        return Err(layout_error());
    }

    let (dark, light) = options.palette()?;
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .map_err(EncodeError::Capacity)?;

    let modules = code.width() as u32;
    let total = options
        .margin
        .checked_mul(2)
        .and_then(|quiet| quiet.checked_add(modules))
        .ok_or_else(layout_error)?;
    let scale = (options.size / total).max(1);
    let drawn = total.checked_mul(scale).ok_or_else(layout_error)?;
    let canvas = options.size.max(drawn);
    let offset = (canvas - drawn) / 2 + options.margin * scale;

    debug!(
        "Encoding {} byte payload: {} modules, scale {}, canvas {}px",
        payload.len(),
        modules,
        scale,
        canvas
    );

    let mut img = RgbaImage::from_pixel(canvas, canvas, light);
    for (i, color) in code.to_colors().iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let x0 = offset + (i as u32 % modules) * scale;
        let y0 = offset + (i as u32 / modules) * scale;
        for y in y0..y0 + scale {
            for x in x0..x0 + scale {
                img.put_pixel(x, y, dark);
            }
        }
    }

    Ok(img)
}

/// Drawable surface holding the last successfully rendered QR code
pub struct QrSurface {
    image: RgbaImage,
    payload: Option<String>,
}

impl QrSurface {
    pub fn new() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            payload: None,
        }
    }

    /// Render `payload` onto the surface.
    /// On failure the previous contents are kept.
    pub fn render(&mut self, payload: &str, options: &RenderOptions) -> Result<(), EncodeError> {
        match encode(payload, options) {
            Ok(img) => {
                self.image = img;
                self.payload = Some(payload.to_string());
                Ok(())
            }
            Err(e) => {
                error!("Error generating QR: {}", e);
                Err(e)
            }
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Encode surface pixels as PNG
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    /// `data:` URL of the PNG export, as a browser canvas would produce
    pub fn to_data_url(&self) -> Result<String, EncodeError> {
        let png = self.to_png_bytes()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }

    /// Write the PNG export to disk
    pub fn save_png(&self, path: &Path) -> Result<(), EncodeError> {
        let png = self.to_png_bytes()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, png)?;
        info!("Saved QR image to {}", path.display());
        Ok(())
    }
}

impl Default for QrSurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Suggested download name for a reward QR
pub fn reward_file_name(code: &str) -> String {
    format!("qr-recompensa-{}.png", code)
}

/// Suggested download name for a profile QR
pub fn profile_file_name(label: &str) -> String {
    let label = if label.is_empty() { "usuari" } else { label };
    format!("qr-perfil-{}.png", label)
}
