//! QR Module
//!
//! Rendering of redemption/profile codes and scanning of QR payloads from
//! camera feeds or uploaded images.

pub mod camera;
pub mod encoder;
pub mod live;
pub mod scanner;

pub use camera::{CameraConstraints, SnapshotCamera};
pub use encoder::{EncodeError, QrSurface, RenderOptions};
pub use live::{LiveScan, ScanState};
pub use scanner::QrScanner;
