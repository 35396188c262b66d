//! Camera overlay tool.
//!
//! Shows a live camera feed with a user-supplied reference image overlaid
//! at adjustable opacity, position, and scale, for tracing and alignment
//! work. Preferences persist to the platform config directory.

pub mod app;
pub mod camera;
pub mod gesture;
pub mod overlay;
pub mod prefs;

pub use app::App;
