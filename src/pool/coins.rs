//! Coin pool: drop queue and settle detection on top of [`Pool`]

use std::collections::VecDeque;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{COIN_RADIUS, InstanceSave, ObjectId, ObjectSpec, Pool, PooledInstance};
use crate::persistence::LoadError;
use crate::physics::{PhysicsWorld, euler};
use crate::rng::RngState;

/// X of the three drop slots above the playfield
pub const DROP_SLOTS_X: [f32; 3] = [-0.15, 0.0, 0.15];
/// Largest random offset from a drop slot's x; together the slots span the
/// whole sensor gate
const DROP_JITTER_X: f32 = 0.075;
const DROP_HEIGHT: f32 = 0.9;
const DROP_Z: f32 = -0.32 + 0.005 / 2.0;
const SPAWN_IMPULSE: Vec3 = Vec3::new(0.0, -0.000025, 0.0);
/// Ticks between two queued drops
const SPAWN_INTERVAL: u32 = 8;

/// Row layout used by bulk deposits
const GRID_MIN_X: f32 = -0.3;
const GRID_MAX_X: f32 = 0.3;

// Settle heuristic
const SETTLE_MAX_SPEED: f32 = 0.02;
const SETTLE_MAX_TILT: f32 = 0.15;
const SETTLE_MAX_OSCILLATION: f32 = 0.6;
const SETTLE_QUIET_ANGVEL: f32 = 0.02;
const SETTLE_MIN_SIGN_CHANGES: usize = 2;
const SETTLE_TICKS: u32 = 30;
const ANGVEL_HISTORY: usize = 8;

/// A queued coin drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropRequest {
    pub slot: u8,
}

/// Per-coin settle detector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepTracker {
    pub speed: f32,
    /// Ring of the dominant angular-velocity component
    pub angvel: VecDeque<f32>,
    pub settled_ticks: u32,
}

impl SleepTracker {
    /// Feed one sample; returns true when the coin should be put to sleep
    pub fn observe(&mut self, linvel: Vec3, angvel: Vec3, rotation: Quat) -> bool {
        self.speed = linvel.length();
        let sample = dominant(angvel);
        if self.angvel.len() == ANGVEL_HISTORY {
            self.angvel.pop_front();
        }
        self.angvel.push_back(sample);

        if self.is_settled(rotation) {
            self.settled_ticks += 1;
        } else {
            self.settled_ticks = 0;
        }
        self.settled_ticks >= SETTLE_TICKS
    }

    fn is_settled(&self, rotation: Quat) -> bool {
        if self.speed >= SETTLE_MAX_SPEED || self.angvel.len() < ANGVEL_HISTORY {
            return false;
        }
        // Coins lie on a face: local y (the cylinder axis) is vertical either way up
        let normal = rotation * Vec3::Y;
        let tilt = normal.y.abs().clamp(-1.0, 1.0).acos();
        if tilt > SETTLE_MAX_TILT {
            return false;
        }
        let quiet = self.angvel.iter().all(|v| v.abs() < SETTLE_QUIET_ANGVEL);
        let bounded = self.angvel.iter().all(|v| v.abs() < SETTLE_MAX_OSCILLATION);
        let sign_changes = self
            .angvel
            .iter()
            .zip(self.angvel.iter().skip(1))
            .filter(|(a, b)| a.signum() != b.signum() && **a != 0.0 && **b != 0.0)
            .count();
        quiet || (bounded && sign_changes >= SETTLE_MIN_SIGN_CHANGES)
    }

    pub fn reset(&mut self) {
        self.speed = 0.0;
        self.angvel.clear();
        self.settled_ticks = 0;
    }
}

/// Drop x for `slot`, `offset` in [-1, 1] scaling the jitter
fn drop_x(slot: u8, offset: f32) -> f32 {
    let center = DROP_SLOTS_X[(slot as usize).min(DROP_SLOTS_X.len() - 1)];
    center + offset.clamp(-1.0, 1.0) * DROP_JITTER_X
}

/// Largest-magnitude component, keeping its sign
fn dominant(v: Vec3) -> f32 {
    let abs = v.abs();
    if abs.x >= abs.y && abs.x >= abs.z {
        v.x
    } else if abs.y >= abs.z {
        v.y
    } else {
        v.z
    }
}

/// Serialized coin pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinPoolSave {
    pub instances: Vec<InstanceSave>,
    pub queue: Vec<DropRequest>,
    pub frames_since_spawn: u32,
    pub trackers: Vec<SleepTracker>,
}

#[derive(Debug, Clone)]
pub struct CoinPool {
    pool: Pool,
    queue: VecDeque<DropRequest>,
    frames_since_spawn: u32,
    trackers: Vec<SleepTracker>,
}

impl CoinPool {
    pub fn new(world: &mut dyn PhysicsWorld, capacity: usize, friction: f32, density: f32) -> Self {
        Self {
            pool: Pool::new(world, ObjectSpec::coin(friction, density), 1, capacity),
            queue: VecDeque::new(),
            frames_since_spawn: 0,
            trackers: vec![SleepTracker::default(); capacity],
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn get(&self, id: ObjectId) -> Option<&PooledInstance> {
        self.pool.get(id)
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn used_count(&self) -> usize {
        self.pool.used_count()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn tracker(&self, id: ObjectId) -> Option<&SleepTracker> {
        self.trackers.get(id.index as usize)
    }

    pub fn deposit(
        &mut self,
        world: &mut dyn PhysicsWorld,
        position: Vec3,
        rotation: Quat,
        impulse: Option<Vec3>,
    ) -> Option<ObjectId> {
        let id = self.pool.deposit(world, 0, position, rotation, impulse)?;
        if let Some(tracker) = self.trackers.get_mut(id.index as usize) {
            tracker.reset();
        }
        Some(id)
    }

    pub fn recycle(&mut self, world: &mut dyn PhysicsWorld, id: ObjectId) -> bool {
        if let Some(tracker) = self.trackers.get_mut(id.index as usize) {
            tracker.reset();
        }
        self.pool.recycle(world, id)
    }

    /// Queue one coin through a drop slot
    pub fn drop_coin(&mut self, slot: u8) {
        self.queue.push_back(DropRequest {
            slot: slot.min(DROP_SLOTS_X.len() as u8 - 1),
        });
    }

    /// Queue `count` coins over random slots, never twice in a row in the same one
    pub fn drop_coins(&mut self, rng: &mut RngState, count: usize) {
        let mut last: Option<u8> = self.queue.back().map(|r| r.slot);
        for _ in 0..count {
            let slot = loop {
                let slot = rng.below(DROP_SLOTS_X.len() as u32) as u8;
                if Some(slot) != last {
                    break slot;
                }
            };
            last = Some(slot);
            self.queue.push_back(DropRequest { slot });
        }
    }

    /// Lay `count` coins flat on a row grid starting at `position`
    pub fn deposit_coins(
        &mut self,
        world: &mut dyn PhysicsWorld,
        position: Vec3,
        count: usize,
    ) -> Vec<ObjectId> {
        let mut at = Vec3::new(GRID_MIN_X, position.y, position.z);
        let mut deposited = Vec::with_capacity(count);
        for _ in 0..count {
            at.x += COIN_RADIUS * 2.0;
            if at.x > GRID_MAX_X {
                at.x = GRID_MIN_X;
                at.z -= COIN_RADIUS * 2.0;
            }
            if let Some(id) = self.deposit(world, at, Quat::IDENTITY, None) {
                deposited.push(id);
            }
        }
        deposited
    }

    /// Toggle continuous collision detection on a live coin
    pub fn enable_ccd(&self, world: &mut dyn PhysicsWorld, id: ObjectId, enabled: bool) {
        if let Some(instance) = self.pool.get(id) {
            world.enable_ccd(instance.body, enabled);
        }
    }

    pub fn update(&mut self, world: &mut dyn PhysicsWorld, rng: &mut RngState) {
        if !self.queue.is_empty() {
            self.frames_since_spawn += 1;
            if self.frames_since_spawn >= SPAWN_INTERVAL {
                self.release_queued(world, rng);
                self.frames_since_spawn = 0;
            }
        }
        self.pool.update(world);
        self.settle(world);
    }

    pub fn refresh(&mut self, world: &dyn PhysicsWorld) {
        self.pool.refresh(world);
    }

    /// Release the head of the queue; it stays queued while the pool is full
    fn release_queued(&mut self, world: &mut dyn PhysicsWorld, rng: &mut RngState) {
        let Some(request) = self.queue.front().copied() else {
            return;
        };
        let side = if rng.chance(0.5) { -1.0 } else { 1.0 };
        let position = Vec3::new(
            drop_x(request.slot, side * rng.next_f32()),
            DROP_HEIGHT,
            DROP_Z,
        );
        let flip = if rng.chance(0.5) { std::f32::consts::PI } else { 0.0 };
        let rotation = euler(Vec3::new(std::f32::consts::FRAC_PI_2 + flip, 0.0, 0.0));
        match self.deposit(world, position, rotation, Some(SPAWN_IMPULSE)) {
            Some(id) => {
                self.queue.pop_front();
                self.enable_ccd(world, id, true);
            }
            None => log::debug!("Coin pool full, {} drops waiting", self.queue.len()),
        }
    }

    fn settle(&mut self, world: &mut dyn PhysicsWorld) {
        for instance in self.pool.active() {
            let Some(tracker) = self.trackers.get_mut(instance.id.index as usize) else {
                continue;
            };
            if world.is_sleeping(instance.body) {
                continue;
            }
            let (Some(linvel), Some(angvel)) = (world.linvel(instance.body), world.angvel(instance.body))
            else {
                continue;
            };
            if tracker.observe(linvel, angvel, instance.rotation) {
                world.sleep(instance.body);
                tracker.settled_ticks = 0;
            }
        }
    }

    pub fn save(&self) -> CoinPoolSave {
        CoinPoolSave {
            instances: self.pool.save().into_iter().flatten().collect(),
            queue: self.queue.iter().copied().collect(),
            frames_since_spawn: self.frames_since_spawn,
            trackers: self.trackers.clone(),
        }
    }

    pub fn restored(
        &self,
        save: &CoinPoolSave,
        world: &mut dyn PhysicsWorld,
    ) -> Result<Self, LoadError> {
        let pool = self.pool.restored(std::slice::from_ref(&save.instances), world)?;
        if save.trackers.len() != self.trackers.len() {
            return Err(LoadError::PoolLayout {
                kind: "coin trackers",
                expected: self.trackers.len(),
                found: save.trackers.len(),
            });
        }
        Ok(Self {
            pool,
            queue: save.queue.iter().copied().collect(),
            frames_since_spawn: save.frames_since_spawn,
            trackers: save.trackers.clone(),
        })
    }
}
