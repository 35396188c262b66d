//! Overlay state: the reference image, its transform, and the camera
//! viewport transform.
//!
//! All UI-visible state lives in [`OverlayState`] and changes only through
//! [`OverlayState::apply`], so transitions like gesture-target mutual
//! exclusion stay unit-testable.

use std::path::PathBuf;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::prefs::{self, PrefStore};

/// Minimum uniform scale a layer can be pinched down to.
pub const MIN_SCALE: f32 = 0.5;
/// Maximum uniform scale a layer can be pinched up to.
pub const MAX_SCALE: f32 = 3.0;

/// Minimum overlay opacity; fully invisible overlays are not useful.
pub const MIN_OPACITY: f32 = 0.1;
/// Default overlay opacity.
pub const DEFAULT_OPACITY: f32 = 0.5;

/// Translation plus uniform scale applied to a visual layer.
///
/// `x`/`y` are in logical pixels relative to the viewport center and are
/// deliberately unbounded; content may be dragged fully off-screen and
/// recovered only by the clear-image reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
        }
    }

    /// Shift by a frame-to-frame delta. Translation is never clamped.
    pub fn translate_by(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }

    /// Multiply the scale by a pinch ratio, clamped to the legal range.
    pub fn zoom_by(&mut self, ratio: f32) {
        self.scale = (self.scale * ratio).clamp(MIN_SCALE, MAX_SCALE);
    }

    pub fn is_identity(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.scale == 1.0
    }
}

/// A decoded reference image, RGBA8.
#[derive(Clone)]
pub struct OverlayImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Which layer currently receives gesture input. At most one of the two
/// layers is ever active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureTarget {
    #[default]
    None,
    Overlay,
    Viewport,
}

/// Events the state reducer understands, one per user action.
#[derive(Debug, Clone)]
pub enum StateEvent {
    ConsentGranted,
    /// Select a gesture target; selecting the already-active target
    /// deselects it, selecting the other target switches.
    SelectTarget(GestureTarget),
    ImageLoaded(u32, u32),
    ClearImage,
    SetOpacity(f32),
    ToggleChrome,
}

/// Single state object for everything the UI renders and the gesture
/// controller mutates.
pub struct OverlayState {
    pub consented: bool,
    pub target: GestureTarget,
    pub image: Option<OverlayImage>,
    pub opacity: f32,
    pub overlay_transform: Transform,
    pub viewport_transform: Transform,
    pub chrome_hidden: bool,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            consented: false,
            target: GestureTarget::None,
            image: None,
            opacity: DEFAULT_OPACITY,
            overlay_transform: Transform::identity(),
            viewport_transform: Transform::identity(),
            chrome_hidden: false,
        }
    }
}

impl OverlayState {
    /// Restore persisted preferences. Missing or unparseable entries fall
    /// back to defaults; the image payload is never persisted.
    pub fn restore(prefs: &PrefStore) -> Self {
        Self {
            consented: prefs.load(prefs::KEY_CONSENT).unwrap_or(false),
            opacity: prefs
                .load::<f32>(prefs::KEY_OPACITY)
                .unwrap_or(DEFAULT_OPACITY)
                .clamp(MIN_OPACITY, 1.0),
            overlay_transform: prefs
                .load(prefs::KEY_OVERLAY_TRANSFORM)
                .unwrap_or_default(),
            viewport_transform: prefs
                .load(prefs::KEY_VIEWPORT_TRANSFORM)
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Apply a state event. Pure in-memory transition; persistence happens
    /// at the call sites that own the [`PrefStore`].
    pub fn apply(&mut self, event: StateEvent) {
        match event {
            StateEvent::ConsentGranted => {
                self.consented = true;
            }
            StateEvent::SelectTarget(target) => {
                self.target = if self.target == target {
                    GestureTarget::None
                } else {
                    target
                };
            }
            StateEvent::ImageLoaded(width, height) => {
                // Payload is attached separately; the event records the
                // dimensions in the state-transition log.
                log::info!("Overlay image attached: {}x{}", width, height);
            }
            StateEvent::ClearImage => {
                self.image = None;
                self.overlay_transform = Transform::identity();
                self.viewport_transform = Transform::identity();
                self.target = GestureTarget::None;
            }
            StateEvent::SetOpacity(value) => {
                self.opacity = value.clamp(MIN_OPACITY, 1.0);
            }
            StateEvent::ToggleChrome => {
                self.chrome_hidden = !self.chrome_hidden;
            }
        }
    }

    /// The transform currently receiving gestures, if any target is active.
    pub fn active_transform_mut(&mut self) -> Option<&mut Transform> {
        match self.target {
            GestureTarget::None => None,
            GestureTarget::Overlay => Some(&mut self.overlay_transform),
            GestureTarget::Viewport => Some(&mut self.viewport_transform),
        }
    }

    /// Persist the active target's transform. Called at gesture end, not on
    /// every move, to keep write volume down.
    pub fn persist_active_transform(&self, prefs: &mut PrefStore) {
        match self.target {
            GestureTarget::None => {}
            GestureTarget::Overlay => {
                prefs.save(prefs::KEY_OVERLAY_TRANSFORM, &self.overlay_transform)
            }
            GestureTarget::Viewport => {
                prefs.save(prefs::KEY_VIEWPORT_TRANSFORM, &self.viewport_transform)
            }
        }
    }

    /// Clear the loaded image, reset both transforms, and drop their
    /// persisted entries.
    pub fn clear_image(&mut self, prefs: &mut PrefStore) {
        self.apply(StateEvent::ClearImage);
        prefs.remove(prefs::KEY_OVERLAY_TRANSFORM);
        prefs.remove(prefs::KEY_VIEWPORT_TRANSFORM);
    }
}

/// Result of a background image decode, tagged with the generation it was
/// requested under so superseded picks are dropped instead of committed.
pub enum ImageEvent {
    Loaded {
        generation: u64,
        image: OverlayImage,
    },
    Failed {
        generation: u64,
        reason: String,
    },
}

/// Decode an image file on a background thread. The result arrives on the
/// channel; the caller checks the generation before attaching it.
pub fn load_image(path: PathBuf, generation: u64, tx: Sender<ImageEvent>) {
    std::thread::Builder::new()
        .name("image-decode".to_string())
        .spawn(move || {
            log::info!("Decoding overlay image: {}", path.display());
            let event = match image::open(&path) {
                Ok(decoded) => {
                    let rgba = decoded.to_rgba8();
                    let (width, height) = rgba.dimensions();
                    log::info!("Overlay image decoded: {}x{}", width, height);
                    ImageEvent::Loaded {
                        generation,
                        image: OverlayImage {
                            data: rgba.into_raw(),
                            width,
                            height,
                        },
                    }
                }
                Err(e) => {
                    log::warn!("Failed to decode {}: {}", path.display(), e);
                    ImageEvent::Failed {
                        generation,
                        reason: e.to_string(),
                    }
                }
            };
            let _ = tx.send(event);
        })
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::{self, PrefStore};

    fn temp_store(name: &str) -> PrefStore {
        let mut path = std::env::temp_dir();
        path.push(format!("camera-overlay-test-{}-{}.json", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        PrefStore::open(path)
    }

    #[test]
    fn test_transform_identity() {
        let t = Transform::default();
        assert!(t.is_identity());
        assert_eq!(t, Transform::identity());
    }

    #[test]
    fn test_zoom_clamps_scale() {
        let mut t = Transform::identity();
        t.zoom_by(100.0);
        assert_eq!(t.scale, MAX_SCALE);
        t.zoom_by(0.0001);
        assert_eq!(t.scale, MIN_SCALE);
    }

    #[test]
    fn test_translation_is_unbounded() {
        let mut t = Transform::identity();
        t.translate_by(1.0e6, -1.0e6);
        assert_eq!(t.x, 1.0e6);
        assert_eq!(t.y, -1.0e6);
    }

    #[test]
    fn test_consent_granted_sticks() {
        let mut state = OverlayState::default();
        assert!(!state.consented);
        state.apply(StateEvent::ConsentGranted);
        assert!(state.consented);
        // Granting again is a no-op; there is no revoke event.
        state.apply(StateEvent::ConsentGranted);
        assert!(state.consented);
    }

    #[test]
    fn test_chrome_toggle_round_trips() {
        let mut state = OverlayState::default();
        assert!(!state.chrome_hidden);
        state.apply(StateEvent::ToggleChrome);
        assert!(state.chrome_hidden);
        state.apply(StateEvent::ToggleChrome);
        assert!(!state.chrome_hidden);
    }

    #[test]
    fn test_no_active_target_ignores_pointer_input() {
        use crate::gesture::GestureController;

        let mut state = OverlayState::default();
        let mut ctrl = GestureController::new();
        assert!(state.active_transform_mut().is_none());

        // Route a drag sequence the way the app does: the controller only
        // runs when a target supplies its transform, so with no target the
        // whole sequence falls through.
        let sequence: [&[(f32, f32)]; 3] = [&[(10.0, 10.0)], &[(50.0, 80.0)], &[(90.0, 20.0)]];
        for points in sequence {
            if let Some(transform) = state.active_transform_mut() {
                ctrl.update(points, transform);
            }
        }

        assert!(!ctrl.is_tracking());
        assert!(state.overlay_transform.is_identity());
        assert!(state.viewport_transform.is_identity());
    }

    #[test]
    fn test_target_mutual_exclusion() {
        let mut state = OverlayState::default();
        state.apply(StateEvent::SelectTarget(GestureTarget::Overlay));
        assert_eq!(state.target, GestureTarget::Overlay);

        // Selecting the other target switches, never leaves both active.
        state.apply(StateEvent::SelectTarget(GestureTarget::Viewport));
        assert_eq!(state.target, GestureTarget::Viewport);

        // Re-selecting the active target deselects it.
        state.apply(StateEvent::SelectTarget(GestureTarget::Viewport));
        assert_eq!(state.target, GestureTarget::None);
    }

    #[test]
    fn test_opacity_clamped() {
        let mut state = OverlayState::default();
        state.apply(StateEvent::SetOpacity(0.0));
        assert_eq!(state.opacity, MIN_OPACITY);
        state.apply(StateEvent::SetOpacity(2.0));
        assert_eq!(state.opacity, 1.0);
    }

    #[test]
    fn test_clear_image_resets_and_unpersists() {
        let mut store = temp_store("clear");
        let mut state = OverlayState::default();
        state.image = Some(OverlayImage {
            data: vec![0; 4],
            width: 1,
            height: 1,
        });
        state.overlay_transform = Transform {
            x: 40.0,
            y: -12.0,
            scale: 2.0,
        };
        state.viewport_transform = Transform {
            x: -3.0,
            y: 9.0,
            scale: 0.75,
        };
        store.save(prefs::KEY_OVERLAY_TRANSFORM, &state.overlay_transform);
        store.save(prefs::KEY_VIEWPORT_TRANSFORM, &state.viewport_transform);

        state.clear_image(&mut store);

        assert!(state.image.is_none());
        assert!(state.overlay_transform.is_identity());
        assert!(state.viewport_transform.is_identity());
        assert!(store.load::<Transform>(prefs::KEY_OVERLAY_TRANSFORM).is_none());
        assert!(store.load::<Transform>(prefs::KEY_VIEWPORT_TRANSFORM).is_none());
    }

    #[test]
    fn test_restore_defaults_when_empty() {
        let store = temp_store("restore");
        let state = OverlayState::restore(&store);
        assert!(!state.consented);
        assert_eq!(state.opacity, DEFAULT_OPACITY);
        assert!(state.overlay_transform.is_identity());
        assert!(state.viewport_transform.is_identity());
    }

    #[test]
    fn test_restore_clamps_persisted_opacity() {
        let mut store = temp_store("opacity");
        store.save(prefs::KEY_OPACITY, &0.01f32);
        let state = OverlayState::restore(&store);
        assert_eq!(state.opacity, MIN_OPACITY);
    }
}
