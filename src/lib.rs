//! Coin Pusher - a physically simulated arcade cabinet
//!
//! Core modules:
//! - `physics`: Narrow rigid-body world abstraction over rapier3d
//! - `pool`: Fixed-capacity registries of coins, tokens, cards and ingots
//! - `sensors`: Edge-triggered sensor intersection router
//! - `floor_lock`: Cooperative lock for mechanisms crossing the cabinet floor
//! - `mechanisms`: Per-feature state machines (pusher, excavator, stackers, ...)
//! - `runs`: Scored game rounds
//! - `cabinet`: Orchestrator wiring everything together
//! - `persistence`: Save/load of the whole cabinet

pub mod cabinet;
pub mod floor_lock;
#[macro_use]
pub mod mechanisms;
pub mod persistence;
pub mod physics;
pub mod pool;
pub mod rng;
pub mod runs;
pub mod sensors;
pub mod settings;

pub use cabinet::{Cabinet, Control, TickInput};
pub use settings::Settings;

/// Simulation configuration constants
pub mod consts {
    /// Fixed simulation timestep (one physics step per rendered frame)
    pub const SIM_DT: f32 = 1.0 / 60.0;
    /// Milliseconds covered by one tick
    pub const TICK_MS: f64 = 1000.0 / 60.0;
    /// Maximum substeps per frame to prevent spiral of death
    pub const MAX_SUBSTEPS: u32 = 8;

    /// World gravity (m/s²)
    pub const GRAVITY: f32 = -9.81;
    /// Pooled objects falling below this height are force-recycled
    pub const MIN_POSITION_Y_OBJECTS: f32 = -1.0;
}

/// Tick-based simulation clock
///
/// Every timed behaviour in the cabinet reads this instead of a wall clock so
/// that a replay from the same seed and inputs is bit-identical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Clock {
    pub tick: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self { tick: 0 }
    }

    /// Elapsed simulated time in milliseconds
    #[inline]
    pub fn now_ms(&self) -> f64 {
        self.tick as f64 * consts::TICK_MS
    }

    /// Advance by one tick
    #[inline]
    pub fn advance(&mut self) {
        self.tick += 1;
    }

    /// Milliseconds elapsed since `tick`
    #[inline]
    pub fn elapsed_ms(&self, tick: u64) -> f64 {
        self.tick.saturating_sub(tick) as f64 * consts::TICK_MS
    }
}

/// Number of ticks needed to cover a duration in milliseconds (rounded up)
#[inline]
pub fn ms_to_ticks(ms: f64) -> u64 {
    (ms / consts::TICK_MS).ceil() as u64
}

/// Move `value` toward `target` by at most `step`, returning the new value
#[inline]
pub fn approach(value: f32, target: f32, step: f32) -> f32 {
    if value < target {
        (value + step).min(target)
    } else {
        (value - step).max(target)
    }
}
