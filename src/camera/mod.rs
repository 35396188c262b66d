//! Camera capture.
//!
//! Acquires a live camera stream through nokhwa on a dedicated thread with
//! a strictly ordered three-tier fallback (rear camera required, rear
//! camera preferred, any camera), and hands frames to the render thread
//! through a triple buffer. Acquisition outcomes are reported over a
//! channel tagged with a generation counter so a result arriving after the
//! manager was superseded is never committed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;
use thiserror::Error;

/// Why camera acquisition or playback failed.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// Every fallback tier was rejected: permission denied, no device, or
    /// the device is held by another application.
    #[error("camera unavailable: {reason}")]
    Unavailable { reason: String },
    /// The platform has no usable capture backend at all.
    #[error("camera capture is not supported on this system")]
    Unsupported,
    /// A device was acquired but its stream failed to start. Distinct from
    /// acquisition failure; the two can fail independently.
    #[error("camera stream failed to start: {reason}")]
    StreamStart { reason: String },
}

impl CaptureError {
    /// Whether an explicit user retry can plausibly help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CaptureError::Unsupported)
    }

    /// Remediation guidance shown in the blocking error view.
    pub fn remediation(&self) -> &'static str {
        match self {
            CaptureError::Unavailable { .. } => {
                "Check that camera access is allowed in your system privacy \
                 settings, that a camera is connected, and that no other \
                 application is using it, then retry."
            }
            CaptureError::Unsupported => {
                "This system exposes no camera capture backend. The overlay \
                 tool needs a camera to be useful."
            }
            CaptureError::StreamStart { .. } => {
                "The camera was found but refused to start streaming. \
                 Unplugging and reconnecting the device, or closing other \
                 capture software, usually clears this."
            }
        }
    }
}

/// Fallback tiers, tried strictly in order. The desktop mapping of the
/// rear-exact / rear-preferred / any-camera request ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintTier {
    /// A rear-facing device is required; fails when none is named as such.
    RearExact,
    /// Prefer the rear-facing device, accept the default, relaxed format.
    RearPreferred,
    /// Any enumerable device with whatever format the driver picks.
    Any,
}

impl ConstraintTier {
    pub fn label(&self) -> &'static str {
        match self {
            ConstraintTier::RearExact => "rear camera (required)",
            ConstraintTier::RearPreferred => "rear camera (preferred)",
            ConstraintTier::Any => "any camera",
        }
    }
}

/// The full ladder in request order.
pub const FALLBACK_TIERS: [ConstraintTier; 3] = [
    ConstraintTier::RearExact,
    ConstraintTier::RearPreferred,
    ConstraintTier::Any,
];

/// Run the fallback ladder over an injected opener. Attempts are strictly
/// sequential; the first success wins and no later tier is tried. Only
/// when every tier has been rejected does acquisition fail.
pub fn open_with<C, F>(
    tiers: &[ConstraintTier],
    mut open: F,
) -> Result<(C, ConstraintTier), CaptureError>
where
    F: FnMut(ConstraintTier) -> Result<C, String>,
{
    let mut last_reason = String::from("no fallback tiers configured");
    for &tier in tiers {
        match open(tier) {
            Ok(stream) => {
                log::info!("Camera acquired via tier: {}", tier.label());
                return Ok((stream, tier));
            }
            Err(reason) => {
                log::warn!("Tier {} rejected: {}", tier.label(), reason);
                last_reason = reason;
            }
        }
    }
    Err(CaptureError::Unavailable {
        reason: last_reason,
    })
}

/// Outcome of a background acquisition attempt.
pub enum CaptureEvent {
    Ready {
        generation: u64,
        tier: ConstraintTier,
        name: String,
        width: u32,
        height: u32,
    },
    Failed {
        generation: u64,
        error: CaptureError,
    },
}

/// One decoded RGBA frame.
#[derive(Clone)]
pub struct CameraFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
    pub timestamp: Instant,
}

/// Owns the capture thread and the frame triple buffer. The live stream
/// belongs exclusively to this manager for its lifetime.
pub struct CaptureManager {
    frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
    latest_frame_idx: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    frame_count: Arc<AtomicU64>,
}

impl CaptureManager {
    /// Start acquiring a camera. The attempt runs on the capture thread;
    /// its outcome arrives on `events` as a [`CaptureEvent`] carrying
    /// `generation`, which the receiver checks before committing.
    pub fn acquire(generation: u64, events: Sender<CaptureEvent>) -> Self {
        let frames: [Arc<Mutex<Option<CameraFrame>>>; 3] = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));

        let thread_frames = frames.clone();
        let thread_latest = latest_frame_idx.clone();
        let thread_running = running.clone();
        let thread_count = frame_count.clone();

        let spawn_events = events.clone();
        let thread_handle = match std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    generation,
                    events,
                    thread_frames,
                    thread_latest,
                    thread_running,
                    thread_count,
                );
            }) {
            Ok(handle) => Some(handle),
            Err(e) => {
                let _ = spawn_events.send(CaptureEvent::Failed {
                    generation,
                    error: CaptureError::Unavailable {
                        reason: format!("failed to spawn capture thread: {}", e),
                    },
                });
                None
            }
        };

        Self {
            frames,
            latest_frame_idx,
            running,
            thread_handle,
            frame_count,
        }
    }

    /// Enumerate devices and return the index of the first whose name
    /// marks it as rear-facing, if any.
    fn find_rear(names: &[String]) -> Option<u32> {
        names
            .iter()
            .position(|name| {
                let lower = name.to_lowercase();
                lower.contains("back") || lower.contains("rear") || lower.contains("environment")
            })
            .map(|i| i as u32)
    }

    fn capture_thread(
        generation: u64,
        events: Sender<CaptureEvent>,
        frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
        latest_frame_idx: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        log::info!("Starting camera capture thread (generation {})", generation);

        let device_names: Vec<String> = match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(list) => list.iter().map(|info| info.human_name().to_string()).collect(),
            Err(e) => {
                log::error!("No capture backend: {:?}", e);
                let _ = events.send(CaptureEvent::Failed {
                    generation,
                    error: CaptureError::Unsupported,
                });
                return;
            }
        };

        if device_names.is_empty() {
            let _ = events.send(CaptureEvent::Failed {
                generation,
                error: CaptureError::Unavailable {
                    reason: "no camera devices found".to_string(),
                },
            });
            return;
        }

        let rear = Self::find_rear(&device_names);

        let opened = open_with(&FALLBACK_TIERS, |tier| {
            let (index, format) = match tier {
                ConstraintTier::RearExact => {
                    let Some(idx) = rear else {
                        return Err("no rear-facing device present".to_string());
                    };
                    (
                        idx,
                        RequestedFormat::new::<RgbAFormat>(
                            RequestedFormatType::AbsoluteHighestResolution,
                        ),
                    )
                }
                ConstraintTier::RearPreferred => (
                    rear.unwrap_or(0),
                    RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
                        Resolution::new(640, 480),
                    )),
                ),
                ConstraintTier::Any => (
                    0,
                    RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None),
                ),
            };
            Camera::new(CameraIndex::Index(index), format).map_err(|e| e.to_string())
        });

        let (mut camera, tier) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                let _ = events.send(CaptureEvent::Failed { generation, error });
                return;
            }
        };

        // Acquisition succeeded; stream start can still fail independently.
        if let Err(e) = camera.open_stream() {
            let _ = events.send(CaptureEvent::Failed {
                generation,
                error: CaptureError::StreamStart {
                    reason: e.to_string(),
                },
            });
            return;
        }

        let name = camera.info().human_name().to_string();
        let resolution = camera.resolution();
        log::info!(
            "Camera streaming: {} ({}x{}) via {}",
            name,
            resolution.width(),
            resolution.height(),
            tier.label()
        );

        let _ = events.send(CaptureEvent::Ready {
            generation,
            tier,
            name,
            width: resolution.width(),
            height: resolution.height(),
        });

        let mut write_idx: u64 = 0;
        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(decoded) => {
                        let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);
                        let camera_frame = CameraFrame {
                            data: decoded.into_raw(),
                            width: frame.resolution().width(),
                            height: frame.resolution().height(),
                            frame_number: frame_num,
                            timestamp: Instant::now(),
                        };

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(camera_frame);
                        latest_frame_idx.store(write_idx, Ordering::Release);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => log::warn!("Failed to decode frame: {:?}", e),
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }

        log::info!("Camera capture thread stopped");
    }

    /// Latest complete frame, if any has arrived yet.
    pub fn latest_frame(&self) -> Option<CameraFrame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop the capture thread and drop the stream. Idempotent.
    pub fn release(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_stops_at_first_success() {
        let mut attempts = Vec::new();
        let result = open_with(&FALLBACK_TIERS, |tier| {
            attempts.push(tier);
            match tier {
                ConstraintTier::RearExact => Err("no rear-facing device".to_string()),
                ConstraintTier::RearPreferred => Ok(42u32),
                ConstraintTier::Any => panic!("third tier must not be attempted"),
            }
        });

        let (stream, tier) = result.unwrap();
        assert_eq!(stream, 42);
        assert_eq!(tier, ConstraintTier::RearPreferred);
        assert_eq!(
            attempts,
            vec![ConstraintTier::RearExact, ConstraintTier::RearPreferred]
        );
    }

    #[test]
    fn test_first_tier_success_skips_the_rest() {
        let mut calls = 0;
        let result = open_with(&FALLBACK_TIERS, |_| {
            calls += 1;
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(calls, 1);
        assert_eq!(result.unwrap().1, ConstraintTier::RearExact);
    }

    #[test]
    fn test_all_tiers_rejected_is_unavailable() {
        let result: Result<((), ConstraintTier), CaptureError> =
            open_with(&FALLBACK_TIERS, |tier| {
                Err(format!("{} rejected", tier.label()))
            });
        match result {
            Err(CaptureError::Unavailable { reason }) => {
                // The surfaced reason comes from the last attempt.
                assert!(reason.contains("any camera"));
            }
            other => panic!("expected Unavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unsupported_is_not_retryable() {
        assert!(!CaptureError::Unsupported.is_retryable());
        assert!(CaptureError::Unavailable {
            reason: "denied".to_string()
        }
        .is_retryable());
        assert!(CaptureError::StreamStart {
            reason: "busy".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_rear_device_detection() {
        let names = vec![
            "FaceTime HD Camera".to_string(),
            "USB Back Camera".to_string(),
        ];
        assert_eq!(CaptureManager::find_rear(&names), Some(1));
        assert_eq!(
            CaptureManager::find_rear(&["Integrated Webcam".to_string()]),
            None
        );
    }
}
