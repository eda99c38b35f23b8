//! Camera Feeds
//!
//! Frame source abstraction used by the live scanner, plus a file-backed
//! feed that re-reads a snapshot image written by an external capture tool.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::scanner::PixelBuffer;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Which camera to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear-facing
    Environment,
    /// Front-facing
    User,
    Any,
}

/// Requested capture parameters; implementations treat these as ideals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: FacingMode,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing: FacingMode::Environment,
        }
    }
}

impl CameraConstraints {
    /// Same resolution, any camera
    pub fn relaxed(&self) -> Self {
        Self {
            facing: FacingMode::Any,
            ..self.clone()
        }
    }
}

/// An acquired video feed
pub trait FrameSource: Send {
    /// Current frame size; (0, 0) while the feed is not ready
    fn dimensions(&self) -> (u32, u32);

    /// Copy the current frame into `buffer`
    fn read_frame(&mut self, buffer: &mut PixelBuffer) -> Result<(), CaptureError>;

    /// Release the underlying device. Must be idempotent.
    fn release(&mut self);
}

/// Something that can hand out a [`FrameSource`]
pub trait Camera: Send + Sync + 'static {
    type Source: FrameSource + 'static;

    fn open(
        &self,
        constraints: &CameraConstraints,
    ) -> impl Future<Output = Result<Self::Source, CaptureError>> + Send;
}

/// Camera backed by an image file that is overwritten with each new frame
#[derive(Debug, Clone)]
pub struct SnapshotCamera {
    path: PathBuf,
}

impl SnapshotCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Camera for SnapshotCamera {
    type Source = SnapshotFeed;

    async fn open(&self, constraints: &CameraConstraints) -> Result<SnapshotFeed, CaptureError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        match std::fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CaptureError::Unavailable(format!(
                    "{} is not a directory",
                    dir.display()
                )))
            }
            Err(e) => return Err(open_error(dir, e)),
        }

        info!(
            "Opened snapshot feed {} (ideal {}x{}, facing {:?})",
            self.path.display(),
            constraints.ideal_width,
            constraints.ideal_height,
            constraints.facing
        );
        Ok(SnapshotFeed {
            path: self.path.clone(),
            released: false,
        })
    }
}

fn open_error(dir: &Path, e: std::io::Error) -> CaptureError {
    match e.kind() {
        ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
        _ => CaptureError::Unavailable(format!(
            "snapshot directory {} is not accessible: {}",
            dir.display(),
            e
        )),
    }
}

pub struct SnapshotFeed {
    path: PathBuf,
    released: bool,
}

impl FrameSource for SnapshotFeed {
    fn dimensions(&self) -> (u32, u32) {
        if self.released {
            return (0, 0);
        }
        // Header-only read; a missing or half-written file reads as not ready
        image::image_dimensions(&self.path).unwrap_or((0, 0))
    }

    fn read_frame(&mut self, buffer: &mut PixelBuffer) -> Result<(), CaptureError> {
        let frame = image::open(&self.path)?.into_luma8();
        let (width, height) = frame.dimensions();
        if !buffer.fill_luma(frame.as_raw(), width, height, width) {
            return Err(CaptureError::Unavailable(format!(
                "short frame in {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            debug!("Released snapshot feed {}", self.path.display());
            self.released = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_feed_waits_for_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let camera = SnapshotCamera::new(&path);

        let mut feed = camera.open(&CameraConstraints::default()).await.unwrap();
        assert_eq!(feed.dimensions(), (0, 0));

        image::GrayImage::from_pixel(40, 30, image::Luma([200]))
            .save(&path)
            .unwrap();
        assert_eq!(feed.dimensions(), (40, 30));

        let mut buffer = PixelBuffer::new();
        feed.read_frame(&mut buffer).unwrap();
        assert_eq!(buffer.dimensions(), (40, 30));

        feed.release();
        assert_eq!(feed.dimensions(), (0, 0));
    }

    #[tokio::test]
    async fn test_snapshot_camera_missing_directory() {
        let camera = SnapshotCamera::new("/nonexistent/dir/frame.png");
        let result = camera.open(&CameraConstraints::default()).await;
        assert!(matches!(result, Err(CaptureError::Unavailable(_))));
    }

    #[test]
    fn test_open_error_kinds() {
        let dir = Path::new("/srv/frames");
        assert!(matches!(
            open_error(dir, ErrorKind::PermissionDenied.into()),
            CaptureError::PermissionDenied
        ));
        assert!(matches!(
            open_error(dir, ErrorKind::NotFound.into()),
            CaptureError::Unavailable(_)
        ));
    }

    #[test]
    fn test_relaxed_constraints_keep_resolution() {
        let relaxed = CameraConstraints::default().relaxed();
        assert_eq!(relaxed.facing, FacingMode::Any);
        assert_eq!((relaxed.ideal_width, relaxed.ideal_height), (1280, 720));
    }
}
