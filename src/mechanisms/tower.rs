//! Coin-shooting towers on either side of the floor
//!
//! A tower rises out of the floor, sweeps its turret left and right on a sine
//! while shooting a coin every 200 ms, then sinks back down. The two towers
//! mirror each other through `direction`.

use std::f32::consts::FRAC_PI_4;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{Fsm, FsmSave, Mechanism, MechanismContext, MechanismId, resolve_body};
use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, CollisionGroups, GROUP_STRUCTURE,
    PhysicsWorld,
};

const POSITION_UP_Y: f32 = 0.1;
const POSITION_DOWN_Y: f32 = 0.0;
const DELTA_POSITION_STEP: f32 = 0.001;
/// Phase advance per millisecond of shooting
const PHASE_RATE: f64 = 0.001;
const DELAY_SHOOT_MS: f64 = 200.0;
const IMPULSE_STRENGTH: f32 = 0.0001;
const IMPULSE_DIRECTION: Vec3 = Vec3::NEG_Z;
const RESTITUTION: f32 = 0.0;

/// Pivot of the turret when fully lowered, before the side offset
const BASE_POSITION: Vec3 = Vec3::new(0.0, 0.182, 0.12);
/// Height of the muzzle above the turret pivot
const MUZZLE_HEIGHT: f32 = 0.06;
pub const OFFSET_X: f32 = 0.25;

state_names! {
    pub enum TowerState {
        Idle => "tower-idle",
        Activating => "tower-activating",
        Shooting => "tower-shooting",
        MovingDown => "tower-moving-down",
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TowerReadings {
    pub floor_free: bool,
    pub height: f32,
    /// Milliseconds since shooting started
    pub shooting_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TowerSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending: u32,
    pub extra_periods: u32,
    pub height: f32,
    pub angle: f32,
    pub tick_active: Option<u64>,
    pub tick_last_shot: Option<u64>,
    pub base_handle: u32,
    pub turret_handle: u32,
}

#[derive(Debug, Clone)]
pub struct Tower {
    id: MechanismId,
    fsm: Fsm<TowerState>,
    /// Full cycles queued while idle or going down
    pending: u32,
    /// Extra sweep periods requested while already shooting
    extra_periods: u32,
    offset_x: f32,
    /// +1 or -1, mirrors the sweep
    direction: f32,
    height: f32,
    angle: f32,
    tick_active: Option<u64>,
    tick_last_shot: Option<u64>,
    base: BodyHandle,
    turret: BodyHandle,
}

impl Tower {
    pub fn left(world: &mut dyn PhysicsWorld) -> Self {
        Self::new(world, MechanismId::LeftTower, -OFFSET_X, 1.0)
    }

    pub fn right(world: &mut dyn PhysicsWorld) -> Self {
        Self::new(world, MechanismId::RightTower, OFFSET_X, -1.0)
    }

    fn new(world: &mut dyn PhysicsWorld, id: MechanismId, offset_x: f32, direction: f32) -> Self {
        let pivot = BASE_POSITION + Vec3::X * offset_x;
        let groups = CollisionGroups::new(GROUP_STRUCTURE, u32::MAX);
        let base = world.create_body(BodyDesc::fixed().at(pivot));
        world.create_collider(
            ColliderDesc::new(ColliderShape::cuboid(0.1, 0.01, 0.1))
                .offset(Vec3::new(0.0, -0.005, 0.0))
                .material(0.5, RESTITUTION, 1.0)
                .groups(groups),
            base,
        );
        let turret = world.create_body(BodyDesc::kinematic().at(pivot));
        world.create_collider(
            ColliderDesc::new(ColliderShape::Cylinder {
                half_height: MUZZLE_HEIGHT / 2.0,
                radius: 0.04,
            })
            .offset(Vec3::new(0.0, -MUZZLE_HEIGHT / 2.0, 0.0))
            .material(0.5, RESTITUTION, 1.0)
            .groups(groups),
            turret,
        );
        Self {
            id,
            fsm: Fsm::new(TowerState::Idle),
            pending: 0,
            extra_periods: 0,
            offset_x,
            direction,
            height: POSITION_DOWN_Y,
            angle: 0.0,
            tick_active: None,
            tick_last_shot: None,
            base,
            turret,
        }
    }

    /// Start a volley, or lengthen the current one by a sweep period
    pub fn shoot_coins(&mut self) {
        match self.fsm.state() {
            TowerState::Activating | TowerState::Shooting => self.extra_periods += 1,
            TowerState::Idle | TowerState::MovingDown => self.pending += 1,
        }
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    fn pivot(&self) -> Vec3 {
        BASE_POSITION + Vec3::new(self.offset_x, self.height, 0.0)
    }

    fn rotation(&self) -> Quat {
        Quat::from_rotation_y(self.angle)
    }

    fn shoot(&mut self, ctx: &mut MechanismContext<'_>) {
        let position = self.pivot() + Vec3::Y * MUZZLE_HEIGHT;
        let impulse = (self.rotation() * IMPULSE_DIRECTION).normalize() * IMPULSE_STRENGTH;
        ctx.pools
            .coins
            .deposit(ctx.world, position, self.rotation(), Some(impulse));
        self.tick_last_shot = Some(ctx.clock.tick);
    }

    pub fn save(&self) -> TowerSave {
        TowerSave {
            fsm: self.fsm.save(),
            pending: self.pending,
            extra_periods: self.extra_periods,
            height: self.height,
            angle: self.angle,
            tick_active: self.tick_active,
            tick_last_shot: self.tick_last_shot,
            base_handle: self.base.0,
            turret_handle: self.turret.0,
        }
    }

    pub fn restored(&self, save: &TowerSave, world: &dyn PhysicsWorld) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, self.id.as_str())?,
            pending: save.pending,
            extra_periods: save.extra_periods,
            height: save.height,
            angle: save.angle,
            tick_active: save.tick_active,
            tick_last_shot: save.tick_last_shot,
            base: resolve_body(world, save.base_handle)?,
            turret: resolve_body(world, save.turret_handle)?,
            ..self.clone()
        })
    }
}

impl Mechanism for Tower {
    type State = TowerState;
    type Readings = TowerReadings;

    fn id(&self) -> MechanismId {
        self.id
    }

    fn fsm(&self) -> &Fsm<TowerState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<TowerState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(TowerState::Idle) && self.pending == 0
    }

    fn is_active(&self) -> bool {
        !self.fsm.is(TowerState::Idle)
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> TowerReadings {
        TowerReadings {
            floor_free: ctx.floor_lock.can_proceed(self.id),
            height: self.height,
            shooting_ms: self.tick_active.map_or(0.0, |t| ctx.clock.elapsed_ms(t)),
        }
    }

    fn compute_next(&self, r: &TowerReadings) -> Option<TowerState> {
        match self.fsm.state() {
            TowerState::Idle => (self.pending > 0).then_some(TowerState::Activating),
            TowerState::Activating => {
                (r.floor_free && r.height >= POSITION_UP_Y).then_some(TowerState::Shooting)
            }
            TowerState::Shooting => {
                let periods = (r.shooting_ms * PHASE_RATE / std::f64::consts::TAU).floor();
                (periods >= 1.0 + self.extra_periods as f64).then_some(TowerState::MovingDown)
            }
            TowerState::MovingDown => (r.height <= POSITION_DOWN_Y).then_some(TowerState::Idle),
        }
    }

    fn drive(&mut self, r: &TowerReadings, ctx: &mut MechanismContext<'_>) {
        match self.fsm.state() {
            TowerState::Idle => {}
            TowerState::Activating => {
                if r.floor_free {
                    ctx.floor_lock.acquire(self.id);
                    self.height = (self.height + DELTA_POSITION_STEP).min(POSITION_UP_Y);
                }
            }
            TowerState::Shooting => {
                let phase = r.shooting_ms * PHASE_RATE;
                self.angle = phase.sin() as f32 * FRAC_PI_4 * self.direction;
                let due = self
                    .tick_last_shot
                    .is_none_or(|t| ctx.clock.elapsed_ms(t) > DELAY_SHOOT_MS);
                if due {
                    self.shoot(ctx);
                }
            }
            TowerState::MovingDown => {
                self.height = (self.height - DELTA_POSITION_STEP).max(POSITION_DOWN_Y);
            }
        }
    }

    fn enter(&mut self, _from: TowerState, to: TowerState, ctx: &mut MechanismContext<'_>) {
        match to {
            TowerState::Activating => {
                self.pending = self.pending.saturating_sub(1);
            }
            TowerState::Shooting => {
                self.height = POSITION_UP_Y;
                self.tick_active = Some(ctx.clock.tick);
                self.tick_last_shot = Some(ctx.clock.tick);
            }
            TowerState::MovingDown => {
                self.tick_active = None;
                self.tick_last_shot = None;
                self.extra_periods = 0;
                self.angle = 0.0;
            }
            TowerState::Idle => {
                self.height = POSITION_DOWN_Y;
                ctx.floor_lock.release(self.id);
            }
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        ctx.world
            .set_next_kinematic_translation(self.turret, self.pivot());
        ctx.world
            .set_next_kinematic_rotation(self.turret, self.rotation());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::testing::Rig;

    #[test]
    fn test_full_cycle_returns_to_idle() {
        let mut rig = Rig::new();
        let mut tower = Tower::left(&mut rig.world);
        tower.shoot_coins();
        let seen = rig.trace(&mut tower, 1000);
        assert_eq!(
            seen,
            vec![
                TowerState::Idle,
                TowerState::Activating,
                TowerState::Shooting,
                TowerState::MovingDown,
                TowerState::Idle,
            ]
        );
        assert!(tower.is_idle());
        assert!(!rig.lock.is_locked());
        assert_eq!(tower.height(), POSITION_DOWN_Y);
    }

    #[test]
    fn test_shoots_every_200ms() {
        let mut rig = Rig::new();
        let mut tower = Tower::right(&mut rig.world);
        tower.shoot_coins();
        rig.run_until(&mut tower, 500, |t| t.state() == TowerState::Shooting)
            .unwrap();
        // 60 ticks is 1000 ms, so four or five shots depending on alignment
        for _ in 0..60 {
            rig.tick(&mut tower);
        }
        let shots = rig.pools.coins.used_count();
        assert!((4..=5).contains(&shots), "shots = {}", shots);
    }

    #[test]
    fn test_towers_sweep_in_opposite_directions() {
        let mut rig = Rig::new();
        let mut left = Tower::left(&mut rig.world);
        let right = Tower::right(&mut rig.world);
        left.shoot_coins();
        rig.run_until(&mut left, 500, |t| t.state() == TowerState::Shooting)
            .unwrap();
        for _ in 0..30 {
            rig.tick(&mut left);
        }
        assert!(left.angle() > 0.0);
        let readings = left.read(&rig.ctx());
        let mut mirrored = left.clone();
        mirrored.direction = right.direction;
        left.drive(&readings, &mut rig.ctx());
        mirrored.drive(&readings, &mut rig.ctx());
        assert!(left.angle() > 0.0);
        assert!((mirrored.angle() + left.angle()).abs() < 1e-6);
    }

    #[test]
    fn test_floor_gated_activation() {
        let mut rig = Rig::new();
        let mut tower = Tower::left(&mut rig.world);
        rig.lock.acquire(MechanismId::Stacker);
        tower.shoot_coins();
        for _ in 0..50 {
            rig.tick(&mut tower);
        }
        assert_eq!(tower.state(), TowerState::Activating);
        assert_eq!(tower.height(), POSITION_DOWN_Y);
        rig.lock.release(MechanismId::Stacker);
        rig.tick(&mut tower);
        assert_eq!(rig.lock.holder(), Some(MechanismId::LeftTower));
        assert!(tower.height() > POSITION_DOWN_Y);
    }

    #[test]
    fn test_retrigger_extends_sweep() {
        let mut rig = Rig::new();
        let mut once = Tower::left(&mut rig.world);
        once.shoot_coins();
        rig.run_until(&mut once, 500, |t| t.state() == TowerState::Shooting)
            .unwrap();
        let single = rig
            .run_until(&mut once, 2000, |t| t.state() == TowerState::MovingDown)
            .unwrap();

        let mut rig = Rig::new();
        let mut twice = Tower::left(&mut rig.world);
        twice.shoot_coins();
        rig.run_until(&mut twice, 500, |t| t.state() == TowerState::Shooting)
            .unwrap();
        twice.shoot_coins();
        let double = rig
            .run_until(&mut twice, 2000, |t| t.state() == TowerState::MovingDown)
            .unwrap();
        // One period is 2π seconds
        assert!(double > single + 360 && double < single + 400);
    }

    #[test]
    fn test_queued_cycles_served_in_order() {
        let mut rig = Rig::new();
        let mut tower = Tower::left(&mut rig.world);
        tower.shoot_coins();
        rig.tick(&mut tower);
        rig.run_until(&mut tower, 1000, |t| t.state() == TowerState::MovingDown)
            .unwrap();
        tower.shoot_coins();
        tower.shoot_coins();
        let mut idles = 0;
        let mut last = tower.state();
        for _ in 0..3000 {
            rig.tick(&mut tower);
            if tower.state() != last && tower.state() == TowerState::Idle {
                idles += 1;
            }
            last = tower.state();
        }
        assert_eq!(idles, 3);
        assert!(tower.is_idle());
    }

    #[test]
    fn test_save_restore_while_shooting() {
        let mut rig = Rig::new();
        let mut tower = Tower::right(&mut rig.world);
        tower.shoot_coins();
        rig.run_until(&mut tower, 500, |t| t.state() == TowerState::Shooting)
            .unwrap();
        for _ in 0..17 {
            rig.tick(&mut tower);
        }
        let save = tower.save();
        let restored = tower.restored(&save, &rig.world).unwrap();
        assert_eq!(restored.save(), save);
        assert_eq!(restored.id(), MechanismId::RightTower);
        let mut missing = save.clone();
        missing.turret_handle = 9999;
        assert!(matches!(
            tower.restored(&missing, &rig.world),
            Err(LoadError::UnresolvedHandle { .. })
        ));
    }
}
