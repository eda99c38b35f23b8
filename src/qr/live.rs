//! Live QR Scanning
//!
//! Polls a camera feed on a fixed interval and hands every decoded payload
//! to a caller-supplied handler. One task owns the feed, the scanner and the
//! ticker, so decode passes never overlap.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::camera::{Camera, CameraConstraints, CaptureError, FrameSource};
use super::scanner::{QrScanner, ScanResult};

/// Reference cadence: two decode passes per second
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    /// Waiting for the camera
    Acquiring,
    Scanning,
    /// Camera could not be opened; static upload is still available
    Failed(String),
    Stopped,
}

/// Handle to a running live scan.
/// Dropping the handle cancels the scan and releases the camera.
pub struct LiveScan {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<ScanState>,
}

impl LiveScan {
    /// Acquire `camera` and start polling it every `interval`
    pub fn start<C, H>(
        camera: C,
        constraints: CameraConstraints,
        interval: Duration,
        handler: H,
    ) -> Self
    where
        C: Camera,
        H: FnMut(ScanResult) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ScanState::Acquiring);

        let task = tokio::spawn(run(
            camera,
            constraints,
            interval,
            handler,
            cancel.clone(),
            state_tx,
        ));

        Self {
            cancel,
            task: Some(task),
            state: state_rx,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.clone()
    }

    /// Cancel polling, release the camera and wait for the task to finish.
    /// A decode pass already underway completes first.
    pub async fn stop(mut self) -> ScanState {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Live scan task ended abnormally: {}", e);
            }
        }
        self.state()
    }
}

impl Drop for LiveScan {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn acquire<C: Camera>(
    camera: &C,
    constraints: &CameraConstraints,
) -> Result<C::Source, CaptureError> {
    match camera.open(constraints).await {
        Err(CaptureError::Unavailable(reason)) => {
            info!("Preferred camera unavailable ({}), trying any camera", reason);
            camera.open(&constraints.relaxed()).await
        }
        other => other,
    }
}

async fn run<C, H>(
    camera: C,
    constraints: CameraConstraints,
    interval: Duration,
    mut handler: H,
    cancel: CancellationToken,
    state: watch::Sender<ScanState>,
) where
    C: Camera,
    H: FnMut(ScanResult) + Send + 'static,
{
    let acquired = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Live scan cancelled before camera was acquired");
            state.send_replace(ScanState::Stopped);
            return;
        }
        result = acquire(&camera, &constraints) => result,
    };

    let mut source = match acquired {
        Ok(source) => source,
        Err(e) => {
            warn!("Camera failed to start: {}", e);
            state.send_replace(ScanState::Failed(e.to_string()));
            return;
        }
    };

    if cancel.is_cancelled() {
        info!("Live scan torn down during acquisition, releasing camera");
        source.release();
        state.send_replace(ScanState::Stopped);
        return;
    }

    let mut scanner = QrScanner::new();
    scanner.reset();
    state.send_replace(ScanState::Scanning);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        scan_tick(&mut scanner, &mut source, &mut handler);
    }

    source.release();
    state.send_replace(ScanState::Stopped);
    info!(
        "Live scan stopped after {} decode passes (last payload: {:?})",
        scanner.frame_count(),
        scanner.last_detected()
    );
}

/// One synchronous frame copy + decode pass
fn scan_tick<S, H>(scanner: &mut QrScanner, source: &mut S, handler: &mut H)
where
    S: FrameSource,
    H: FnMut(ScanResult),
{
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        debug!("Video source not ready, skipping tick");
        return;
    }

    if let Err(e) = source.read_frame(scanner.buffer_mut()) {
        debug!("Frame read failed: {}", e);
        return;
    }

    if let Some(result) = scanner.decode_buffer() {
        handler(result);
    }
}
