//! QR Code Scanner
//!
//! Decodes QR payloads from camera frames or uploaded images. Frames are
//! copied into a luma buffer that is reused between decode passes.

use std::path::Path;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use rqrr::PreparedImage;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to load image: {0}")]
    Image(#[from] image::ImageError),
}

/// A decoded payload and the frame it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub text: String,
    /// Index of the decode pass that produced this result
    pub frame: u64,
    pub scanned_at: DateTime<Utc>,
}

/// Off-screen 8-bit luma buffer
#[derive(Debug, Default)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn reset(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width as usize * height as usize, 0);
    }

    /// Copy a Y plane with explicit stride (bytes per row, may exceed width).
    /// Returns false and leaves the buffer empty if the plane is too small.
    pub fn fill_luma(&mut self, y_plane: &[u8], width: u32, height: u32, stride: u32) -> bool {
        let expected_size = stride as usize * height as usize;
        if stride < width || y_plane.len() < expected_size {
            debug!("Y plane too small: {} < {}", y_plane.len(), expected_size);
            self.reset(0, 0);
            return false;
        }

        self.reset(width, height);
        if stride == width {
            self.data.copy_from_slice(&y_plane[..width as usize * height as usize]);
        } else {
            // Copy row by row, skipping stride padding
            for row in 0..height as usize {
                let src = row * stride as usize;
                let dst = row * width as usize;
                self.data[dst..dst + width as usize]
                    .copy_from_slice(&y_plane[src..src + width as usize]);
            }
        }
        true
    }

    /// Copy tightly packed RGBA pixels (as read back from a canvas)
    pub fn fill_rgba(&mut self, rgba: &[u8], width: u32, height: u32) -> bool {
        let expected_size = width as usize * height as usize * 4;
        if rgba.len() < expected_size {
            debug!("RGBA frame too small: {} < {}", rgba.len(), expected_size);
            self.reset(0, 0);
            return false;
        }

        self.reset(width, height);
        for (luma, px) in self.data.iter_mut().zip(rgba.chunks_exact(4)) {
            *luma = to_luma(px[0], px[1], px[2]);
        }
        true
    }

    /// Draw a decoded image into the buffer
    pub fn fill_image(&mut self, img: &DynamicImage) {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        self.fill_rgba(rgba.as_raw(), width, height);
    }
}

fn to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8) as u8
}

/// QR code scanner for video frames and still images
pub struct QrScanner {
    /// Last detected QR code content
    last_detected: Option<String>,
    /// Decode passes run so far
    frame_count: u64,
    buffer: PixelBuffer,
}

impl QrScanner {
    pub fn new() -> Self {
        Self {
            last_detected: None,
            frame_count: 0,
            buffer: PixelBuffer::new(),
        }
    }

    /// Forget previous detections before a new live session
    pub fn reset(&mut self) {
        debug!("QR scanner reset");
        self.last_detected = None;
        self.frame_count = 0;
    }

    pub fn last_detected(&self) -> Option<&str> {
        self.last_detected.as_deref()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Buffer frame sources copy into before [`QrScanner::decode_buffer`]
    pub fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.buffer
    }

    /// Decode a single still image
    pub fn scan_image(&mut self, img: &DynamicImage) -> Option<ScanResult> {
        self.buffer.fill_image(img);
        self.decode_buffer()
    }

    /// Decode an uploaded image file, calling `on_detected` at most once
    pub fn scan_upload<F>(&mut self, path: &Path, on_detected: F) -> Result<bool, ScanError>
    where
        F: FnOnce(ScanResult),
    {
        let img = image::open(path)?;
        info!(
            "Scanning uploaded image {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        match self.scan_image(&img) {
            Some(result) => {
                on_detected(result);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run one decode pass over the current buffer contents.
    /// A zero-sized buffer is skipped.
    pub fn decode_buffer(&mut self) -> Option<ScanResult> {
        let (width, height) = self.buffer.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        self.frame_count += 1;
        debug!("Scanning frame {} for QR code ({}x{})", self.frame_count, width, height);

        let content = self.detect_qr()?;
        info!("QR code detected: {}", content);
        self.last_detected = Some(content.clone());
        Some(ScanResult {
            text: content,
            frame: self.frame_count,
            scanned_at: Utc::now(),
        })
    }

    fn detect_qr(&self) -> Option<String> {
        let (width, height) = self.buffer.dimensions();
        let stride = width as usize;
        let data = self.buffer.as_slice();

        let mut prepared =
            PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                data[y * stride + x]
            });

        let grids = prepared.detect_grids();
        debug!("Found {} potential QR grids", grids.len());

        for grid in grids {
            match grid.decode() {
                Ok((_, content)) => return Some(content),
                Err(e) => debug!("Grid decode failed: {:?}", e),
            }
        }
        None
    }
}

impl Default for QrScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr::encoder::{encode, RenderOptions};

    fn rendered(payload: &str) -> DynamicImage {
        DynamicImage::ImageRgba8(encode(payload, &RenderOptions::reward()).unwrap())
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let payloads = [
            "https://mercatmediterrani.com/validate-reward/3F9A0C21B7D4E615",
            "https://mercatmediterrani.com/send-ticket/6f1c2a9e-0b7d-4c1e-9a55-2d3e4f5a6b7c",
            "ABCDEFGH12",
            "Recompensa: cafè gratuït",
        ];

        let mut scanner = QrScanner::new();
        for payload in payloads {
            let result = scanner.scan_image(&rendered(payload)).expect("decoded");
            assert_eq!(result.text, payload);
        }
        assert_eq!(scanner.frame_count(), payloads.len() as u64);
    }

    /// Payload of exactly `len` bytes mixing ASCII with two and three byte
    /// characters, never splitting a character. Byte pairs that read as
    /// Shift JIS are avoided so no segment is encoded in kanji mode.
    fn generated(seed: usize, len: usize) -> String {
        const ALPHABET: &[&str] = &[
            "a", "Z", "7", "/", "-", " ", "%", "é", "ç", "·", "ñ", "à", "ü", "ò", "ｱ",
        ];
        let mut out = String::new();
        let mut i = seed;
        while out.len() < len {
            let next = ALPHABET[i % ALPHABET.len()];
            if out.len() + next.len() > len {
                out.push('x');
            } else {
                out.push_str(next);
            }
            i = i.wrapping_mul(31).wrapping_add(17);
        }
        out
    }

    #[test]
    fn test_generated_payloads_round_trip() {
        let options = RenderOptions {
            size: 800,
            ..RenderOptions::reward()
        };
        let mut scanner = QrScanner::new();

        for (seed, len) in [1, 2, 9, 33, 78, 150, 400, 900, 1500].into_iter().enumerate() {
            let payload = generated(seed, len);
            assert_eq!(payload.len(), len);
            let img = DynamicImage::ImageRgba8(encode(&payload, &options).unwrap());
            let result = scanner.scan_image(&img).expect("decoded");
            assert_eq!(result.text, payload, "payload of {} bytes", len);
        }

        // Close to the version 40 byte capacity at medium error correction
        let near_limit = "mercat".repeat(400)[..2300].to_string();
        let img = DynamicImage::ImageRgba8(encode(&near_limit, &options).unwrap());
        assert_eq!(scanner.scan_image(&img).expect("decoded").text, near_limit);
    }

    #[test]
    fn test_blank_image_is_silent_miss() {
        let mut scanner = QrScanner::new();
        let blank = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            120,
            120,
            image::Luma([255]),
        ));
        assert!(scanner.scan_image(&blank).is_none());
        assert!(scanner.last_detected().is_none());
    }

    #[test]
    fn test_zero_sized_frame_is_noop() {
        let mut scanner = QrScanner::new();
        assert!(!scanner.buffer_mut().fill_rgba(&[], 0, 0));
        assert!(scanner.decode_buffer().is_none());
        assert_eq!(scanner.frame_count(), 0);
    }

    #[test]
    fn test_strided_luma_frame() {
        let luma = rendered("ABCDEFGH12").to_luma8();
        let (w, h) = luma.dimensions();
        let stride = w + 32;
        let mut plane = vec![0u8; (stride * h) as usize];
        for row in 0..h as usize {
            let src = &luma.as_raw()[row * w as usize..(row + 1) * w as usize];
            plane[row * stride as usize..row * stride as usize + w as usize].copy_from_slice(src);
        }

        let mut scanner = QrScanner::new();
        assert!(scanner.buffer_mut().fill_luma(&plane, w, h, stride));
        let result = scanner.decode_buffer().unwrap();
        assert_eq!(result.text, "ABCDEFGH12");
        assert_eq!(scanner.last_detected(), Some("ABCDEFGH12"));

        scanner.reset();
        assert_eq!(scanner.last_detected(), None);
        assert_eq!(scanner.frame_count(), 0);
    }

    #[test]
    fn test_short_plane_rejected() {
        let mut buffer = PixelBuffer::new();
        assert!(!buffer.fill_luma(&[0; 10], 4, 4, 4));
        assert_eq!(buffer.dimensions(), (0, 0));
    }

    #[test]
    fn test_buffer_reused_between_frames() {
        let mut buffer = PixelBuffer::new();
        buffer.fill_rgba(&vec![255; 64 * 64 * 4], 64, 64);
        let capacity = buffer.data.capacity();
        buffer.fill_rgba(&vec![0; 32 * 32 * 4], 32, 32);
        assert_eq!(buffer.dimensions(), (32, 32));
        assert_eq!(buffer.data.capacity(), capacity);
    }

    #[test]
    fn test_upload_invokes_handler_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        rendered("https://host/validate-reward/ABC123").save(&path).unwrap();

        let mut scanner = QrScanner::new();
        let mut seen = Vec::new();
        let found = scanner
            .scan_upload(&path, |result| seen.push(result.text))
            .unwrap();
        assert!(found);
        assert_eq!(seen, vec!["https://host/validate-reward/ABC123".to_string()]);
    }

    #[test]
    fn test_upload_missing_file_errors() {
        let mut scanner = QrScanner::new();
        let result = scanner.scan_upload(Path::new("/nonexistent/upload.png"), |_| {
            panic!("handler must not run")
        });
        assert!(result.is_err());
    }
}
