//! Cabinet settings
//!
//! Persisted as JSON next to the binary, separately from cabinet saves.
//! Missing fields take their defaults, so older files keep loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::PoolCapacities;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cabinet configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seed of the cabinet random stream
    pub seed: u64,

    // === Pools ===
    /// Slots per variant of each object kind
    pub pools: PoolCapacities,
    pub coin_friction: f32,
    pub coin_density: f32,

    // === Game ===
    /// Coins credited to the player at power-on
    pub starting_coins: u64,
    /// Gate wins pay a fixed pusher bonus and coins rain every pusher cycle
    pub autoplay: bool,

    // === Headless runner ===
    /// Ticks to simulate
    pub ticks: u64,
    /// Where to write the final save, if anywhere
    pub save_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            seed: 42,

            pools: PoolCapacities::default(),
            coin_friction: 0.2,
            coin_density: 1.0,

            starting_coins: 20,
            autoplay: false,

            ticks: 60 * 60,
            save_path: None,
        }
    }
}

impl Settings {
    /// Load from `path`, falling back to defaults when unreadable
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let loaded = fs::read_to_string(path)
            .map_err(SettingsError::from)
            .and_then(|json| serde_json::from_str(&json).map_err(SettingsError::from));
        match loaded {
            Ok(settings) => {
                log::info!("Loaded settings from {}", path.display());
                settings
            }
            Err(err) => {
                log::warn!("Using default settings ({}: {})", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        log::info!("Settings saved to {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("coin-pusher-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.pools.coins, 1024);
        assert_eq!(settings.pools.tokens, 16);
        assert_eq!(settings.pools.cards, 8);
        assert_eq!(settings.pools.ingots, 8);
        assert!(!settings.autoplay);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"seed": 7, "autoplay": true}"#).unwrap();
        assert_eq!(settings.seed, 7);
        assert!(settings.autoplay);
        assert_eq!(settings.starting_coins, 20);
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch("settings");
        let settings = Settings {
            seed: 9,
            ticks: 120,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_falls_back() {
        assert_eq!(Settings::load_from(scratch("missing")), Settings::default());
    }
}
