//! Save/load of the whole cabinet
//!
//! A save is a versioned JSON tree: every state machine by state name, every
//! pool slot with its body handle, the router's pair-set, and the physics
//! world as an opaque snapshot (gzip, then base64). Loading rebuilds everything against a fresh
//! world and only swaps it in once every handle and state name resolved.
//!
//! On disk the file is written to a temporary sibling first, the previous
//! save is rotated to `.bak`, then the temporary file is renamed into place.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Clock;
use crate::cabinet::{Cabinet, MechanismsSave, ScoreState};
use crate::floor_lock::FloorLock;
use crate::mechanisms::MechanismId;
use crate::physics::{PhysicsError, PhysicsWorld};
use crate::pool::PoolsSave;
use crate::rng::RngState;
use crate::runs::{Runs, RunsSave};
use crate::sensors::{RouterSave, SensorRouter};

/// Bumped whenever the save layout changes incompatibly
pub const FORMAT_VERSION: u32 = 1;

/// Fatal load failures; the live cabinet is untouched when one is returned
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("save is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("save i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported save version {0}")]
    Version(u32),
    #[error("world snapshot rejected: {0}")]
    World(#[from] PhysicsError),
    #[error("world blob is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("world blob is not gzip: {0}")]
    Gzip(#[source] std::io::Error),
    #[error("{machine}: unknown state '{name}'")]
    UnknownState { machine: &'static str, name: String },
    #[error("{what} handle {handle} not found in restored world")]
    UnresolvedHandle { what: &'static str, handle: u32 },
    #[error("{kind} pool layout mismatch: expected {expected}, found {found}")]
    PoolLayout {
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{machine}: expected {expected} parts, found {found}")]
    PartCount {
        machine: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),
    #[error("unknown mechanism '{0}'")]
    UnknownMechanism(String),
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("world snapshot failed: {0}")]
    World(#[from] PhysicsError),
    #[error("save encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("save i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Complete cabinet save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CabinetSave {
    pub version: u32,
    pub clock: Clock,
    pub rng: RngState,
    pub score: ScoreState,
    /// Mechanism holding the floor lock, by name
    pub floor_lock: Option<String>,
    pub router: RouterSave,
    pub pools: PoolsSave,
    pub mechanisms: MechanismsSave,
    pub runs: RunsSave,
    pub action_button: bool,
    pub last_pusher_phase: f64,
    /// Physics world snapshot, gzipped and base64 encoded
    pub world: String,
}

impl CabinetSave {
    pub fn to_json(&self) -> Result<String, SaveError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        let save: CabinetSave = serde_json::from_str(json)?;
        if save.version != FORMAT_VERSION {
            return Err(LoadError::Version(save.version));
        }
        Ok(save)
    }

    /// Write to `path` through a temporary file, keeping the previous save as a backup
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), SaveError> {
        let path = path.as_ref();
        let tmp = sibling(path, "tmp");
        fs::write(&tmp, self.to_json()?)?;
        if path.exists() {
            fs::rename(path, sibling(path, "bak"))?;
        }
        fs::rename(&tmp, path)?;
        log::info!("Saved cabinet to {}", path.display());
        Ok(())
    }

    /// Read `path`, falling back to its backup when the primary is unreadable
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let primary = fs::read_to_string(path)
            .map_err(LoadError::from)
            .and_then(|json| Self::from_json(&json));
        match primary {
            Ok(save) => Ok(save),
            Err(err) => {
                let backup = sibling(path, "bak");
                if !backup.exists() {
                    return Err(err);
                }
                log::warn!(
                    "Save {} unreadable ({}), trying {}",
                    path.display(),
                    err,
                    backup.display()
                );
                Self::from_json(&fs::read_to_string(&backup)?)
            }
        }
    }
}

/// Compress a world snapshot into its save-file text form
pub fn encode_world(snapshot: &[u8]) -> Result<String, SaveError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(snapshot)?;
    Ok(STANDARD.encode(encoder.finish()?))
}

/// Inverse of [`encode_world`]
pub fn decode_world(blob: &str) -> Result<Vec<u8>, LoadError> {
    let compressed = STANDARD.decode(blob)?;
    let mut snapshot = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut snapshot)
        .map_err(LoadError::Gzip)?;
    Ok(snapshot)
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

impl<W: PhysicsWorld> Cabinet<W> {
    /// Capture the whole cabinet between two ticks
    pub fn save(&mut self) -> Result<CabinetSave, SaveError> {
        let was_stopped = self.stopped;
        self.stopped = true;
        let save = self.capture();
        self.stopped = was_stopped;
        let save = save?;
        log::info!("Cabinet saved at tick {}", save.clock.tick);
        Ok(save)
    }

    fn capture(&self) -> Result<CabinetSave, SaveError> {
        let shared = &self.shared;
        Ok(CabinetSave {
            version: FORMAT_VERSION,
            clock: shared.clock,
            rng: shared.rng.clone(),
            score: self.score,
            floor_lock: shared
                .floor_lock
                .holder()
                .map(|id| id.as_str().to_string()),
            router: self.router.save(),
            pools: shared.pools.save(),
            mechanisms: self.mechanisms.save(),
            runs: self.runs.save(),
            action_button: self.action_button,
            last_pusher_phase: self.last_pusher_phase,
            world: encode_world(&shared.world.snapshot()?)?,
        })
    }

    /// Replace the live cabinet with `save`
    ///
    /// Every part is rebuilt first; on error nothing live has changed.
    pub fn load(&mut self, save: &CabinetSave) -> Result<(), LoadError> {
        let was_stopped = self.stopped;
        self.stopped = true;
        let result = self.restore(save);
        self.stopped = was_stopped;
        match &result {
            Ok(()) => log::info!("Cabinet loaded at tick {}", save.clock.tick),
            Err(err) => log::warn!("Load rejected: {}", err),
        }
        result
    }

    fn restore(&mut self, save: &CabinetSave) -> Result<(), LoadError> {
        if save.version != FORMAT_VERSION {
            return Err(LoadError::Version(save.version));
        }
        let mut world = W::from_snapshot(&decode_world(&save.world)?)?;
        let router = SensorRouter::restored(&save.router, &mut world)?;
        let pools = self.shared.pools.restored(&save.pools, &mut world)?;
        let mechanisms = self.mechanisms.restored(&save.mechanisms, &world)?;
        let runs = Runs::restored(&save.runs)?;
        let holder = save
            .floor_lock
            .as_deref()
            .map(|name| {
                MechanismId::from_str(name)
                    .ok_or_else(|| LoadError::UnknownMechanism(name.to_string()))
            })
            .transpose()?;

        let shared = &mut self.shared;
        shared.world = world;
        shared.pools = pools;
        shared.floor_lock = FloorLock::restore(holder);
        shared.events.drain();
        shared.rng = save.rng.clone();
        shared.clock = save.clock;
        self.mechanisms = mechanisms;
        self.router = router;
        self.runs = runs;
        self.score = save.score;
        self.action_button = save.action_button;
        self.last_pusher_phase = save.last_pusher_phase;
        self.accumulator = 0.0;
        self.resolved.clear();
        Ok(())
    }
}
