//! Drag and pinch gesture tracking.
//!
//! Translates raw contact-point sequences (mouse button or touch) into
//! incremental updates of a [`Transform`]. Drag deltas are frame-to-frame,
//! so translation accumulates without drift; pinch scaling is multiplicative
//! against the last known inter-point distance, so it is
//! resolution-independent. No smoothing is applied to either.

use crate::overlay::Transform;

/// A contact point in logical pixels.
pub type Point = (f32, f32);

fn distance(a: Point, b: Point) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Internal tracking mode.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Tracking {
    Idle,
    /// Single-point drag; holds the last observed position.
    Drag(Point),
    /// Two-point pinch; holds the last observed inter-point distance.
    Pinch(f32),
}

/// Stateful interpreter for one in-flight gesture.
///
/// The caller feeds it the full current contact set on every pointer event
/// and hands it the transform of whichever target is active. With no active
/// target the controller is simply not called, so events fall through.
pub struct GestureController {
    tracking: Tracking,
}

impl Default for GestureController {
    fn default() -> Self {
        Self::new()
    }
}

impl GestureController {
    pub fn new() -> Self {
        Self {
            tracking: Tracking::Idle,
        }
    }

    /// Whether a gesture is currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.tracking != Tracking::Idle
    }

    /// A contact went down. One point arms drag tracking from its position;
    /// two points record the pinch baseline and disable drag tracking.
    pub fn begin(&mut self, points: &[Point]) {
        self.tracking = match points {
            [p] => Tracking::Drag(*p),
            [a, b] => Tracking::Pinch(distance(*a, *b)),
            _ => Tracking::Idle,
        };
    }

    /// Contacts moved. Applies the frame-to-frame delta (drag) or distance
    /// ratio (pinch) to `transform` and re-records the baseline.
    pub fn update(&mut self, points: &[Point], transform: &mut Transform) {
        match (self.tracking, points) {
            (Tracking::Drag(last), [p]) => {
                transform.translate_by(p.0 - last.0, p.1 - last.1);
                self.tracking = Tracking::Drag(*p);
            }
            (Tracking::Pinch(last_dist), [a, b]) => {
                let dist = distance(*a, *b);
                if last_dist > 0.0 {
                    transform.zoom_by(dist / last_dist);
                }
                self.tracking = Tracking::Pinch(dist);
            }
            // A second contact arrived mid-drag: re-baseline as a pinch with
            // no transform change this frame.
            (Tracking::Drag(_), [a, b]) => {
                self.tracking = Tracking::Pinch(distance(*a, *b));
            }
            // A contact lifted mid-pinch: continue as a drag anchored at the
            // surviving point, with no scale or position change this frame.
            (Tracking::Pinch(_), [p]) => {
                self.tracking = Tracking::Drag(*p);
            }
            (Tracking::Idle, [p]) => {
                self.tracking = Tracking::Drag(*p);
            }
            (Tracking::Idle, [a, b]) => {
                self.tracking = Tracking::Pinch(distance(*a, *b));
            }
            // Zero or 3+ contacts: no transform change, drop tracking so a
            // later contact set starts from a fresh baseline.
            _ => {
                self.tracking = Tracking::Idle;
            }
        }
    }

    /// A contact lifted. Returns true when the gesture fully ended (the
    /// caller persists the transform then). Dropping from two contacts to
    /// one transitions to drag mode anchored at the surviving point.
    pub fn finish(&mut self, points: &[Point]) -> bool {
        match points {
            [] => {
                self.tracking = Tracking::Idle;
                true
            }
            [p] => {
                self.tracking = Tracking::Drag(*p);
                false
            }
            [a, b] => {
                self.tracking = Tracking::Pinch(distance(*a, *b));
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{MAX_SCALE, MIN_SCALE};

    #[test]
    fn test_drag_accumulates_deltas() {
        let mut ctrl = GestureController::new();
        let mut t = Transform {
            x: 10.0,
            y: 20.0,
            scale: 1.0,
        };

        ctrl.begin(&[(100.0, 100.0)]);
        let deltas = [(3.0, -2.0), (7.5, 0.5), (-1.0, 4.0), (0.0, -9.5)];
        let mut pos = (100.0, 100.0);
        for (dx, dy) in deltas {
            pos = (pos.0 + dx, pos.1 + dy);
            ctrl.update(&[pos], &mut t);
        }
        assert!(ctrl.finish(&[]));

        let sum: (f32, f32) = deltas
            .iter()
            .fold((0.0, 0.0), |acc, d| (acc.0 + d.0, acc.1 + d.1));
        assert_eq!(t.x, 10.0 + sum.0);
        assert_eq!(t.y, 20.0 + sum.1);
        assert_eq!(t.scale, 1.0);
    }

    #[test]
    fn test_pinch_scales_by_distance_ratio() {
        let mut ctrl = GestureController::new();
        let mut t = Transform::identity();

        ctrl.begin(&[(0.0, 0.0), (100.0, 0.0)]);
        ctrl.update(&[(0.0, 0.0), (150.0, 0.0)], &mut t);
        assert!((t.scale - 1.5).abs() < 1e-5);

        // Ratio is relative to the last distance, not the original baseline.
        ctrl.update(&[(0.0, 0.0), (300.0, 0.0)], &mut t);
        assert!((t.scale - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_scale_stays_clamped_under_extreme_ratios() {
        let mut ctrl = GestureController::new();
        let mut t = Transform::identity();

        ctrl.begin(&[(0.0, 0.0), (10.0, 0.0)]);
        // Wild distance swings, as from dropped frames.
        for dist in [5000.0, 0.01, 800.0, 0.5, 12000.0, 2.0] {
            ctrl.update(&[(0.0, 0.0), (dist, 0.0)], &mut t);
            assert!(t.scale >= MIN_SCALE && t.scale <= MAX_SCALE);
        }
    }

    #[test]
    fn test_pinch_to_drag_transition_has_no_jump() {
        let mut ctrl = GestureController::new();
        let mut t = Transform::identity();

        ctrl.begin(&[(0.0, 0.0), (100.0, 0.0)]);
        ctrl.update(&[(0.0, 0.0), (200.0, 0.0)], &mut t);
        let scale_at_transition = t.scale;

        // Second finger lifts; gesture is not finished yet.
        assert!(!ctrl.finish(&[(200.0, 0.0)]));
        assert_eq!(t.x, 0.0);
        assert_eq!(t.y, 0.0);
        assert_eq!(t.scale, scale_at_transition);

        // Subsequent drag is relative to the surviving point's position at
        // the transition, not the original two-point baseline.
        ctrl.update(&[(205.0, -3.0)], &mut t);
        assert_eq!(t.x, 5.0);
        assert_eq!(t.y, -3.0);
        assert_eq!(t.scale, scale_at_transition);
    }

    #[test]
    fn test_second_finger_rebaselines_without_scaling() {
        let mut ctrl = GestureController::new();
        let mut t = Transform::identity();

        ctrl.begin(&[(50.0, 50.0)]);
        ctrl.update(&[(60.0, 50.0)], &mut t);
        assert_eq!(t.x, 10.0);

        // A second contact arrives: the frame only records the baseline.
        ctrl.update(&[(60.0, 50.0), (160.0, 50.0)], &mut t);
        assert_eq!(t.scale, 1.0);
        assert_eq!(t.x, 10.0);

        // The next pinch frame scales against that baseline.
        ctrl.update(&[(60.0, 50.0), (260.0, 50.0)], &mut t);
        assert!((t.scale - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_idle_drag_arms_from_first_move_without_a_jump() {
        let mut ctrl = GestureController::new();
        let mut t = Transform::identity();

        // A button press with no known cursor position leaves the
        // controller idle; the first move then only records the origin.
        ctrl.update(&[(400.0, 300.0)], &mut t);
        assert!(ctrl.is_tracking());
        assert!(t.is_identity());

        // Subsequent deltas are relative to that recorded origin.
        ctrl.update(&[(410.0, 295.0)], &mut t);
        assert_eq!(t.x, 10.0);
        assert_eq!(t.y, -5.0);
    }

    #[test]
    fn test_zero_contacts_is_a_no_op_for_the_transform() {
        let mut ctrl = GestureController::new();
        let mut t = Transform {
            x: 1.0,
            y: 2.0,
            scale: 1.5,
        };
        ctrl.begin(&[(0.0, 0.0)]);
        ctrl.update(&[], &mut t);
        assert_eq!(t.x, 1.0);
        assert_eq!(t.y, 2.0);
        assert_eq!(t.scale, 1.5);
        assert!(!ctrl.is_tracking());
    }
}
