//! Best-effort preference persistence.
//!
//! Small scalar and transform values are mirrored to a single JSON file in
//! the platform config directory. Persistence is never load-bearing: every
//! failure is logged and swallowed, and anything missing or unparseable
//! reads back as absent. The overlay image payload is deliberately never
//! stored here.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Namespaced preference keys.
pub const KEY_CONSENT: &str = "camera-overlay.consent";
pub const KEY_OPACITY: &str = "camera-overlay.opacity";
pub const KEY_OVERLAY_TRANSFORM: &str = "camera-overlay.overlay-transform";
pub const KEY_VIEWPORT_TRANSFORM: &str = "camera-overlay.viewport-transform";

/// Key-value preference store backed by one JSON object file.
pub struct PrefStore {
    path: Option<PathBuf>,
    values: HashMap<String, serde_json::Value>,
}

impl PrefStore {
    /// Open the store at the platform config location. A missing config
    /// directory degrades to an in-memory store.
    pub fn open_default() -> Self {
        let path = dirs::config_dir().map(|mut p| {
            p.push("CameraOverlay");
            p.push("preferences.json");
            p
        });
        match path {
            Some(path) => Self::open(path),
            None => {
                log::warn!("No config directory; preferences will not persist");
                Self {
                    path: None,
                    values: HashMap::new(),
                }
            }
        }
    }

    /// Open a store at an explicit path, reading any existing contents.
    /// An unreadable or unparseable file is treated as empty.
    pub fn open(path: PathBuf) -> Self {
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt preference file {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            values,
        }
    }

    /// Serialize a value under a key and write the file. Failures are
    /// logged, never returned; the app must stay usable without them.
    pub fn save<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.values.insert(key.to_string(), json);
                self.flush();
            }
            Err(e) => log::warn!("Failed to serialize preference {}: {}", key, e),
        }
    }

    /// Load the last saved value for a key. Missing keys and parse
    /// failures both read as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.values.get(key)?;
        match serde_json::from_value(json.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring unparseable preference {}: {}", key, e);
                None
            }
        }
    }

    /// Remove a key and rewrite the file.
    pub fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.flush();
        }
    }

    fn flush(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("Failed to create {}: {}", parent.display(), e);
                return;
            }
        }
        match serde_json::to_string_pretty(&self.values) {
            Ok(contents) => {
                if let Err(e) = fs::write(path, contents) {
                    log::warn!("Failed to write {}: {}", path.display(), e);
                }
            }
            Err(e) => log::warn!("Failed to serialize preferences: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::Transform;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "camera-overlay-prefs-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_transform_round_trip_through_fresh_store() {
        let path = temp_path("roundtrip");
        let saved = Transform {
            x: 12.5,
            y: -3.0,
            scale: 1.75,
        };

        let mut store = PrefStore::open(path.clone());
        store.save(KEY_OVERLAY_TRANSFORM, &saved);
        drop(store);

        let fresh = PrefStore::open(path);
        let loaded: Transform = fresh.load(KEY_OVERLAY_TRANSFORM).unwrap();
        assert!((loaded.x - saved.x).abs() < 1e-6);
        assert!((loaded.y - saved.y).abs() < 1e-6);
        assert!((loaded.scale - saved.scale).abs() < 1e-6);
    }

    #[test]
    fn test_absent_key_loads_as_none() {
        let store = PrefStore::open(temp_path("absent"));
        assert!(store.load::<f32>(KEY_OPACITY).is_none());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let path = temp_path("corrupt");
        fs::write(&path, "not json {{{").unwrap();
        let store = PrefStore::open(path);
        assert!(store.load::<bool>(KEY_CONSENT).is_none());
    }

    #[test]
    fn test_wrong_type_reads_as_absent() {
        let path = temp_path("wrongtype");
        let mut store = PrefStore::open(path.clone());
        store.save(KEY_OPACITY, &"not a float");
        let fresh = PrefStore::open(path);
        assert!(fresh.load::<f32>(KEY_OPACITY).is_none());
    }

    #[test]
    fn test_remove_then_load_is_none() {
        let mut store = PrefStore::open(temp_path("remove"));
        store.save(KEY_CONSENT, &true);
        assert_eq!(store.load::<bool>(KEY_CONSENT), Some(true));
        store.remove(KEY_CONSENT);
        assert!(store.load::<bool>(KEY_CONSENT).is_none());
    }
}
