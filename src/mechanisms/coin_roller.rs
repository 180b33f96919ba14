//! Coin roller at the back of the cabinet
//!
//! A launcher carries a coin left and right along a track. When the player
//! presses the action button the coin is released and rolls off the end of
//! the track into one of three bonus slots. Coins that miss every slot come
//! to rest on a trap plate, which slides open after a deadline and drops
//! them into the trap sensor.

use std::f32::consts::FRAC_PI_2;
use std::f64::consts::PI;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::lights::LightsSave;
use super::{Fsm, FsmSave, Lights, LightsCue, Mechanism, MechanismContext, MechanismId, resolve_body};
use crate::cabinet::events::CabinetEvent;
use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, CollisionGroups, GROUP_STRUCTURE,
    PhysicsWorld, SensorId, euler,
};
use crate::pool::{COIN_RADIUS, ObjectId};

/// Launcher rest point; the launcher travels towards +x from here
pub const ORIGIN: Vec3 = Vec3::new(-0.13, 0.6, 0.0);
const TRACK_LENGTH: f32 = 0.1;
const TRACK_WIDTH: f32 = 0.32;
const TRAP_TOP: f32 = 0.55;
const TRAP_DEPTH: f32 = 0.2;

const SPEED: f64 = 0.001;
const SPEED_TRAP: f64 = 0.002;
const DISTANCE: f32 = 0.13;
const DISTANCE_TRAP: f32 = 0.25;
const START_ANGLE: f64 = -PI / 2.0;
const LAUNCH_SPEED: f32 = 0.6;
const MAX_DELAY_MOVING_COIN_MS: f64 = 2000.0;
const MIN_LAUNCHER_POSITION: f32 = 0.0001;
const COIN_ROTATION: Vec3 = Vec3::new(FRAC_PI_2, 0.0, FRAC_PI_2);
const INIT_DROP: f32 = 0.02;
/// Slack on the coin's resting height in the launcher
const SETTLE_TOLERANCE: f32 = 0.002;
const LIGHT_COUNT: usize = 8;

/// Launcher-relative x span of each bonus slot, from slot 1 to slot 3
pub const SLOTS: [(f32, f32); 3] = [(0.17, 0.19), (0.10, 0.14), (0.0, 0.07)];

state_names! {
    pub enum CoinRollerState {
        Idle => "coin-roller-idle",
        Activating => "coin-roller-activating",
        Initializing => "coin-roller-initializing",
        InitializingCoin => "coin-roller-initializing-coin",
        MovingLauncher => "coin-roller-moving-launcher",
        TriggeringCoin => "coin-roller-triggering-coin",
        DeliveringCoin => "coin-roller-delivering-coin",
        MovingCoin => "coin-roller-moving-coin",
        OpeningTrap => "coin-roller-opening-trap",
        ClosingTrap => "coin-roller-closing-trap",
        PreparingToIdle => "coin-roller-preparing-to-idle",
    }
}

/// Bonus value of a slot: slot 3 is worth 0, slot 1 is worth 2
pub fn slot_bonus(slot: u8) -> Option<u8> {
    (1..=3).contains(&slot).then(|| 3 - slot)
}

/// Launcher position `elapsed_ms` after it started moving
pub fn launcher_position(elapsed_ms: f64) -> f32 {
    ((elapsed_ms * SPEED + START_ANGLE).sin() as f32) * DISTANCE + DISTANCE
}

fn trap_phase(elapsed_ms: f64) -> f64 {
    elapsed_ms * SPEED_TRAP
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoinRollerReadings {
    pub coin_y: Option<f32>,
    pub moving_ms: f64,
    pub trap_phase: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinRollerSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending_shots: u32,
    pub coin: Option<ObjectId>,
    pub launcher_position: f32,
    pub trap_position: f32,
    pub tick_active: Option<u64>,
    pub tick_moving_coin: Option<u64>,
    pub tick_opening_trap: Option<u64>,
    pub launcher_handle: u32,
    pub trap_handle: u32,
    pub lights: LightsSave,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinRoller {
    fsm: Fsm<CoinRollerState>,
    pending_shots: u32,
    coin: Option<ObjectId>,
    launcher_position: f32,
    trap_position: f32,
    tick_active: Option<u64>,
    tick_moving_coin: Option<u64>,
    tick_opening_trap: Option<u64>,
    launcher: BodyHandle,
    trap: BodyHandle,
    lights: Lights,
}

impl CoinRoller {
    pub fn new(world: &mut dyn PhysicsWorld) -> Self {
        let track = world.create_body(BodyDesc::fixed().at(ORIGIN));
        world.create_collider(
            ColliderDesc::new(ColliderShape::cuboid(TRACK_WIDTH, 0.01, TRACK_LENGTH))
                .offset(Vec3::new(TRACK_WIDTH / 2.0 - 0.03, -0.005, -TRACK_LENGTH / 2.0))
                .material(0.0, 0.5, 1.0),
            track,
        );
        let slots_z = -TRACK_LENGTH - TRAP_DEPTH / 2.0;
        for (index, (from, to)) in SLOTS.iter().enumerate() {
            world.create_collider(
                ColliderDesc::sensor(
                    ColliderShape::cuboid(to - from, 0.04, TRAP_DEPTH),
                    SensorId::CoinRollerSlot(index as u8 + 1),
                )
                .offset(Vec3::new((from + to) / 2.0, TRAP_TOP - ORIGIN.y + 0.021, slots_z)),
                track,
            );
        }
        world.create_collider(
            ColliderDesc::sensor(
                ColliderShape::cuboid(TRACK_WIDTH, 0.1, TRAP_DEPTH),
                SensorId::CoinRollerTrap,
            )
            .offset(Vec3::new(
                TRACK_WIDTH / 2.0 - 0.03,
                TRAP_TOP - ORIGIN.y - 0.1,
                slots_z,
            )),
            track,
        );

        let launcher = world.create_body(BodyDesc::kinematic().at(ORIGIN));
        world.create_collider(
            ColliderDesc::new(ColliderShape::cuboid(0.03, 0.04, 0.01))
                .offset(Vec3::new(0.0, 0.02, COIN_RADIUS + 0.005))
                .groups(CollisionGroups::new(GROUP_STRUCTURE, GROUP_STRUCTURE)),
            launcher,
        );
        let trap_at = Vec3::new(ORIGIN.x, TRAP_TOP, ORIGIN.z);
        let trap = world.create_body(BodyDesc::kinematic().at(trap_at));
        world.create_collider(
            ColliderDesc::new(ColliderShape::cuboid(TRACK_WIDTH, 0.01, TRAP_DEPTH))
                .offset(Vec3::new(TRACK_WIDTH / 2.0 - 0.03, -0.005, slots_z))
                .material(0.5, 0.5, 1.0),
            trap,
        );
        Self {
            fsm: Fsm::new(CoinRollerState::Idle),
            pending_shots: 0,
            coin: None,
            launcher_position: 0.0,
            trap_position: 0.0,
            tick_active: None,
            tick_moving_coin: None,
            tick_opening_trap: None,
            launcher,
            trap,
            lights: Lights::new(LIGHT_COUNT),
        }
    }

    /// Load a coin into the launcher, or queue one if busy
    pub fn shoot_coin(&mut self) {
        self.pending_shots += 1;
    }

    /// Release the coin; ignored unless the launcher is carrying one
    pub fn trigger_coin(&mut self) -> bool {
        let ready = self.can_trigger();
        if ready {
            self.fsm.request(CoinRollerState::TriggeringCoin);
        }
        ready
    }

    /// True while the action button should be lit
    pub fn can_trigger(&self) -> bool {
        self.fsm.is(CoinRollerState::MovingLauncher) && self.fsm.next().is_none()
    }

    pub fn pending_shots(&self) -> u32 {
        self.pending_shots
    }

    pub fn coin(&self) -> Option<ObjectId> {
        self.coin
    }

    pub fn launcher_position(&self) -> f32 {
        self.launcher_position
    }

    pub fn trap_position(&self) -> f32 {
        self.trap_position
    }

    pub fn lights(&self) -> &Lights {
        &self.lights
    }

    /// A coin entered bonus slot `slot` (1..=3)
    pub fn coin_in_slot(&mut self, coin: ObjectId, slot: u8, ctx: &mut MechanismContext<'_>) {
        if !self.fsm.is(CoinRollerState::MovingCoin) || self.coin != Some(coin) {
            return;
        }
        let Some(bonus) = slot_bonus(slot) else {
            return;
        };
        ctx.pools.recycle(ctx.world, coin);
        self.coin = None;
        log::info!("coin roller: slot {} (bonus {})", slot, bonus);
        ctx.events.emit(CabinetEvent::CoinRollerBonusWon { bonus });
    }

    /// A coin fell through the open trap
    pub fn coin_in_trap(&mut self, coin: ObjectId, ctx: &mut MechanismContext<'_>) {
        if self.coin != Some(coin) {
            return;
        }
        ctx.pools.recycle(ctx.world, coin);
        self.coin = None;
        ctx.events.emit(CabinetEvent::CoinRollerCoinLost);
    }

    fn launcher_moves(&self) -> bool {
        !matches!(
            self.fsm.state(),
            CoinRollerState::Idle
                | CoinRollerState::Activating
                | CoinRollerState::Initializing
                | CoinRollerState::InitializingCoin
        )
    }

    pub fn save(&self) -> CoinRollerSave {
        CoinRollerSave {
            fsm: self.fsm.save(),
            pending_shots: self.pending_shots,
            coin: self.coin,
            launcher_position: self.launcher_position,
            trap_position: self.trap_position,
            tick_active: self.tick_active,
            tick_moving_coin: self.tick_moving_coin,
            tick_opening_trap: self.tick_opening_trap,
            launcher_handle: self.launcher.0,
            trap_handle: self.trap.0,
            lights: self.lights.save(),
        }
    }

    pub fn restored(
        &self,
        save: &CoinRollerSave,
        world: &dyn PhysicsWorld,
    ) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, MechanismId::CoinRoller.as_str())?,
            pending_shots: save.pending_shots,
            coin: save.coin,
            launcher_position: save.launcher_position,
            trap_position: save.trap_position,
            tick_active: save.tick_active,
            tick_moving_coin: save.tick_moving_coin,
            tick_opening_trap: save.tick_opening_trap,
            launcher: resolve_body(world, save.launcher_handle)?,
            trap: resolve_body(world, save.trap_handle)?,
            lights: self.lights.restored(&save.lights)?,
        })
    }
}

impl Mechanism for CoinRoller {
    type State = CoinRollerState;
    type Readings = CoinRollerReadings;

    fn id(&self) -> MechanismId {
        MechanismId::CoinRoller
    }

    fn fsm(&self) -> &Fsm<CoinRollerState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<CoinRollerState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(CoinRollerState::Idle) && self.pending_shots == 0
    }

    fn is_active(&self) -> bool {
        !self.fsm.is(CoinRollerState::Idle)
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> CoinRollerReadings {
        CoinRollerReadings {
            coin_y: self
                .coin
                .and_then(|id| ctx.pools.get(id))
                .filter(|instance| instance.used)
                .map(|instance| instance.position.y),
            moving_ms: self
                .tick_moving_coin
                .map_or(0.0, |tick| ctx.clock.elapsed_ms(tick)),
            trap_phase: self
                .tick_opening_trap
                .map_or(0.0, |tick| trap_phase(ctx.clock.elapsed_ms(tick))),
        }
    }

    fn compute_next(&self, r: &CoinRollerReadings) -> Option<CoinRollerState> {
        use CoinRollerState::*;
        match self.fsm.state() {
            Idle => (self.pending_shots > 0).then_some(Activating),
            Activating => Some(Initializing),
            Initializing => Some(InitializingCoin),
            InitializingCoin => match r.coin_y {
                Some(y) => (y <= ORIGIN.y + COIN_RADIUS + SETTLE_TOLERANCE)
                    .then_some(MovingLauncher),
                // Pool exhausted or coin lost while loading
                None => Some(PreparingToIdle),
            },
            MovingLauncher => None,
            TriggeringCoin => Some(DeliveringCoin),
            DeliveringCoin => Some(MovingCoin),
            MovingCoin => {
                if r.moving_ms > MAX_DELAY_MOVING_COIN_MS {
                    Some(OpeningTrap)
                } else if r.coin_y.is_none() {
                    Some(PreparingToIdle)
                } else {
                    None
                }
            }
            OpeningTrap => (r.trap_phase >= PI / 2.0).then_some(ClosingTrap),
            ClosingTrap => (r.trap_phase >= PI).then_some(PreparingToIdle),
            PreparingToIdle => (self.launcher_position < MIN_LAUNCHER_POSITION).then_some(
                if self.pending_shots > 0 {
                    Activating
                } else {
                    Idle
                },
            ),
        }
    }

    fn enter(&mut self, _from: CoinRollerState, to: CoinRollerState, ctx: &mut MechanismContext<'_>) {
        use CoinRollerState::*;
        match to {
            Activating => {
                self.pending_shots = self.pending_shots.saturating_sub(1);
                self.launcher_position = 0.0;
                self.tick_active = None;
                self.tick_moving_coin = None;
            }
            Initializing => {
                let position = ORIGIN + Vec3::Y * (COIN_RADIUS + INIT_DROP);
                self.coin =
                    ctx.pools
                        .coins
                        .deposit(ctx.world, position, euler(COIN_ROTATION), None);
            }
            MovingLauncher => {
                self.tick_active = Some(ctx.clock.tick);
                if let Some(instance) = self.coin.and_then(|id| ctx.pools.get(id)) {
                    ctx.world.set_rotations_enabled(instance.body, false);
                }
            }
            TriggeringCoin => self.tick_moving_coin = Some(ctx.clock.tick),
            DeliveringCoin => {
                if let Some(instance) = self.coin.and_then(|id| ctx.pools.get(id)) {
                    ctx.world.set_rotations_enabled(instance.body, true);
                    ctx.world
                        .set_linvel(instance.body, Vec3::NEG_Z * LAUNCH_SPEED);
                }
            }
            OpeningTrap => self.tick_opening_trap = Some(ctx.clock.tick),
            Idle => {
                self.launcher_position = 0.0;
                self.tick_active = None;
                self.tick_moving_coin = None;
            }
            PreparingToIdle => {
                self.trap_position = 0.0;
                self.tick_opening_trap = None;
                // A coin still resting anywhere is given up
                if let Some(coin) = self.coin.take() {
                    ctx.pools.recycle(ctx.world, coin);
                }
            }
            InitializingCoin | MovingCoin | ClosingTrap => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        let state = self.fsm.state();
        self.lights.update(if state == CoinRollerState::Idle {
            LightsCue::Off
        } else {
            LightsCue::Rotate
        });

        if self.launcher_moves() {
            if let Some(tick) = self.tick_active {
                self.launcher_position = launcher_position(ctx.clock.elapsed_ms(tick));
            }
        }
        if let Some(tick) = self.tick_opening_trap {
            let phase = trap_phase(ctx.clock.elapsed_ms(tick)).min(PI);
            self.trap_position = (phase.sin() as f32).max(0.0) * DISTANCE_TRAP;
        }

        let launcher_at = ORIGIN + Vec3::X * self.launcher_position;
        ctx.world
            .set_next_kinematic_translation(self.launcher, launcher_at);
        ctx.world.set_next_kinematic_translation(
            self.trap,
            Vec3::new(ORIGIN.x, TRAP_TOP, ORIGIN.z + self.trap_position),
        );
        if state == CoinRollerState::MovingLauncher {
            if let Some(instance) = self.coin.and_then(|id| ctx.pools.get(id)) {
                ctx.world.set_next_kinematic_translation(
                    instance.body,
                    launcher_at + Vec3::Y * COIN_RADIUS,
                );
                ctx.world
                    .set_next_kinematic_rotation(instance.body, euler(COIN_ROTATION));
            }
        }
    }
}
