//! Coin stacker
//!
//! A turntable that rises out of the floor, spins a few times to shed any
//! coins lying on it, then builds stacks of coins: an arm feeds one coin at a
//! time, the base turns between the stacks of a ring and drops a coin-height
//! after each finished level. When every level is done the whole thing sinks
//! back under the floor, leaving the stacks for the pusher.

use std::collections::VecDeque;
use std::f32::consts::{FRAC_PI_2, PI, TAU};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::lights::LightsSave;
use super::{Fsm, FsmSave, Lights, LightsCue, Mechanism, MechanismContext, MechanismId, resolve_body};
use crate::approach;
use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, CollisionGroups, GROUP_STRUCTURE,
    PhysicsWorld,
};
use crate::pool::ObjectId;

const PIVOT: Vec3 = Vec3::new(0.0, 0.0, 0.36);
/// Where the arm releases a coin when at the ring
const DROP_POSITION: Vec3 = Vec3::new(0.0, 0.2, 0.29);
const ARM_PROTECTION_LID_PIVOT: Vec3 = Vec3::new(0.0, 0.21, 0.24);
/// Top of the turntable when fully lowered
const BASE_TOP: f32 = 0.18;

const COIN_HEIGHT: f32 = 0.006;
const COIN_SETTLED_POSITION_Y: f32 = 0.148;
const ARM_SPEED: f32 = 0.02;
const ARM_DOOR_SPEED: f32 = 0.0005;
const BASE_SPEED: f32 = 0.0015;
const STACKER_RAISING_SPEED: f32 = 0.003;
const STACKER_LOWERING_SPEED: f32 = 0.001;
const BASE_ROTATION_SPEED: f32 = PI / 12.0;
const BASE_ROTATION_CLEANUP_SPEED: f32 = PI / 9.0;
const ARM_PROTECTION_LID_SPEED: f32 = 0.1;
const BASE_CLEANUP_ROTATIONS: f32 = 4.0;
const ARM_RETRACTED_POSITION: f32 = 0.0;
const ARM_CIRCUMFERENCE_POSITION: f32 = 0.08;
const ARM_CENTER_POSITION: f32 = 0.15;
const ARM_DOOR_OPENED_POSITION: f32 = -0.025;
const ROTATIONS_MAX: u32 = 6;
const BASE_READY_POSITION: f32 = -0.03;
const SUPPORT_READY_POSITION: f32 = -0.01;
const STACKER_CLEANUP_POSITION: f32 = 0.15;
const STACKER_MAX_POSITION: f32 = 0.225;
const ARM_PROTECTION_LID_OPENED_ANGLE: f32 = -FRAC_PI_2;
pub const STACKS_MIN: u32 = 1;
pub const STACKS_MAX: u32 = 7;
pub const LEVELS_MIN: u32 = 5;
pub const LEVELS_MAX: u32 = 80;
const LIGHT_COUNT: usize = 8;

const BASE: usize = 0;
const SUPPORT: usize = 1;
const ARM: usize = 2;
const ARM_PROTECTION: usize = 3;
const ARM_PROTECTION_LID: usize = 4;
const ARM_DOOR: usize = 5;
const PARTS_COUNT: usize = 6;

state_names! {
    pub enum StackerState {
        Idle => "stacker-idle",
        Activating => "stacker-activating",
        RaisingStackerToCleanupPosition => "stacker-raising-stacker-to-cleanup-position",
        ClosingArmDoor => "stacker-closing-arm-door",
        RaisingArmProtectionLid => "stacker-raising-arm-protection-lid",
        LoweringArmProtectionLid => "stacker-lowering-arm-protection-lid",
        LoweringSupportToReadyPosition => "stacker-lowering-support-to-ready-position",
        LoweringBaseToReadyPosition => "stacker-lowering-base-to-ready-position",
        CleaningUpBaseLeft => "stacker-cleaning-up-base-left",
        CleaningUpBaseRight => "stacker-cleaning-up-base-right",
        RaisingStacker => "stacker-raising-stacker",
        OpeningArmDoor => "stacker-opening-arm-door",
        MovingArmToCircumferencePosition => "stacker-moving-arm-to-circumference-position",
        InitializingCoin => "stacker-initializing-coin",
        PushingCoin => "stacker-pushing-coin",
        RotatingBase => "stacker-rotating-base",
        MovingArmToCenterPosition => "stacker-moving-arm-to-center-position",
        LoweringBase => "stacker-lowering-base",
        MovingArmBackToCircumferencePosition => "stacker-retracting-arm",
        FinishingLevel => "stacker-finishing-level",
        MovingArmToInitialPosition => "stacker-moving-arm-to-initial-position",
        AligningCoins => "stacker-aligning-coins",
        LoweringStacker => "stacker-lowering-stacker",
        ResettingBaseRotation => "stacker-resetting-base-rotation",
        PreparingIdle => "stacker-preparing-idle",
    }
}

/// One requested batch of stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub stacks: u32,
    pub levels: u32,
}

impl Delivery {
    /// Clamp to the supported ranges
    pub fn new(stacks: u32, levels: u32) -> Self {
        Self {
            stacks: stacks.clamp(STACKS_MIN, STACKS_MAX),
            levels: levels.clamp(LEVELS_MIN, LEVELS_MAX),
        }
    }
}

/// Offsets and angles of the moving parts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StackerPose {
    pub position: f32,
    pub support_position: f32,
    pub base_position: f32,
    pub arm_position: f32,
    pub arm_door_position: f32,
    pub arm_protection_lid_angle: f32,
    pub base_angle: f32,
}

impl StackerPose {
    /// Kinematic targets of every part, indexed like the part bodies
    fn targets(&self) -> [(Vec3, Quat); PARTS_COUNT] {
        let turn = Quat::from_rotation_y(self.base_angle);
        let around_pivot = turn * -PIVOT + PIVOT;
        let support_y = (self.position + self.support_position).max(0.0);
        let base_y = (self.position + self.support_position + self.base_position).max(0.0);
        let lid_rotation = Quat::from_rotation_x(self.arm_protection_lid_angle);
        let lid_pivot = ARM_PROTECTION_LID_PIVOT + Vec3::Y * self.position;
        let lid_origin = Vec3::Y * self.position;
        let mut targets = [(Vec3::ZERO, Quat::IDENTITY); PARTS_COUNT];
        targets[BASE] = (Vec3::new(around_pivot.x, base_y, around_pivot.z), turn);
        targets[SUPPORT] = (Vec3::new(around_pivot.x, support_y, around_pivot.z), turn);
        targets[ARM] = (Vec3::new(0.0, self.position, self.arm_position), Quat::IDENTITY);
        targets[ARM_PROTECTION] = (lid_origin, Quat::IDENTITY);
        targets[ARM_PROTECTION_LID] = (
            lid_rotation * (lid_origin - lid_pivot) + lid_pivot,
            lid_rotation,
        );
        targets[ARM_DOOR] = (
            Vec3::new(0.0, self.position + self.arm_door_position, self.arm_position),
            Quat::IDENTITY,
        );
        targets
    }

    /// Height under which a freshly pushed coin counts as settled
    fn settled_y(&self) -> f32 {
        COIN_SETTLED_POSITION_Y + self.position
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackerSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending: Vec<Delivery>,
    pub delivery: Option<Delivery>,
    pub level: u32,
    pub rotations: u32,
    #[serde(flatten)]
    pub pose: StackerPose,
    pub coin: Option<ObjectId>,
    pub coins: Vec<ObjectId>,
    pub body_handles: Vec<u32>,
    pub lights: LightsSave,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackerReadings {
    pub floor_free: bool,
    /// Height of the coin being stacked, `None` once it left the pool
    pub coin_y: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stacker {
    fsm: Fsm<StackerState>,
    pending: VecDeque<Delivery>,
    delivery: Option<Delivery>,
    level: u32,
    rotations: u32,
    pose: StackerPose,
    coin: Option<ObjectId>,
    coins: Vec<ObjectId>,
    bodies: [BodyHandle; PARTS_COUNT],
    lights: Lights,
}

impl Stacker {
    pub fn new(world: &mut dyn PhysicsWorld) -> Self {
        // Only the turntable carries coins; the rest never touches objects
        let carries = CollisionGroups::new(GROUP_STRUCTURE, u32::MAX);
        let hidden = CollisionGroups::new(GROUP_STRUCTURE, GROUP_STRUCTURE);
        let parts: [(ColliderShape, Vec3, CollisionGroups); PARTS_COUNT] = [
            (
                ColliderShape::Cylinder {
                    half_height: 0.01,
                    radius: 0.07,
                },
                PIVOT + Vec3::Y * (BASE_TOP - 0.01),
                carries,
            ),
            (
                ColliderShape::Cylinder {
                    half_height: 0.08,
                    radius: 0.075,
                },
                PIVOT + Vec3::Y * (BASE_TOP - 0.1),
                hidden,
            ),
            (
                ColliderShape::cuboid(0.02, 0.01, 0.12),
                DROP_POSITION - Vec3::Z * 0.06,
                hidden,
            ),
            (
                ColliderShape::cuboid(0.05, 0.03, 0.14),
                ARM_PROTECTION_LID_PIVOT - Vec3::new(0.0, 0.02, 0.07),
                hidden,
            ),
            (
                ColliderShape::cuboid(0.05, 0.005, 0.14),
                ARM_PROTECTION_LID_PIVOT - Vec3::Z * 0.07,
                hidden,
            ),
            (
                ColliderShape::cuboid(0.04, 0.025, 0.005),
                DROP_POSITION + Vec3::Z * 0.005,
                hidden,
            ),
        ];
        let mut bodies = [BodyHandle(0); PARTS_COUNT];
        for (body, (shape, offset, groups)) in bodies.iter_mut().zip(parts) {
            *body = world.create_body(BodyDesc::kinematic());
            world.create_collider(
                ColliderDesc::new(shape)
                    .offset(offset)
                    .material(0.4, 0.0, 1.0)
                    .groups(groups),
                *body,
            );
        }
        Self {
            fsm: Fsm::new(StackerState::Idle),
            pending: VecDeque::new(),
            delivery: None,
            level: 0,
            rotations: 0,
            pose: StackerPose::default(),
            coin: None,
            coins: Vec::new(),
            bodies,
            lights: Lights::new(LIGHT_COUNT),
        }
    }

    /// Queue a batch of `stacks` stacks, `levels` coins high
    pub fn deliver(&mut self, stacks: u32, levels: u32) {
        self.pending.push_back(Delivery::new(stacks, levels));
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn pose(&self) -> &StackerPose {
        &self.pose
    }

    /// Coins placed during the current delivery
    pub fn coins(&self) -> &[ObjectId] {
        &self.coins
    }

    pub fn lights(&self) -> &Lights {
        &self.lights
    }

    fn stacks(&self) -> u32 {
        self.delivery.map_or(STACKS_MIN, |d| d.stacks)
    }

    /// Stack counts whose ring is turned half a slot before lowering
    fn needs_alignment(&self) -> bool {
        matches!(self.stacks(), 2 | 3 | 5)
    }

    fn rotation_step(&self) -> u32 {
        match self.stacks() {
            2 | 3 => 3,
            4 => 2,
            5 => {
                if self.rotations % 3 == 0 {
                    1
                } else {
                    2
                }
            }
            _ => 1,
        }
    }

    fn ring_angle(&self) -> f32 {
        -TAU / ROTATIONS_MAX as f32 * self.rotations as f32
    }

    fn alignment_angle(&self) -> f32 {
        let slots = if self.stacks() == 5 { 2.0 } else { 1.5 };
        -TAU / ROTATIONS_MAX as f32 * slots
    }

    fn push_coin(&mut self, ctx: &mut MechanismContext<'_>) {
        let position = DROP_POSITION
            + Vec3::new(
                0.0,
                self.pose.position,
                self.pose.arm_position - ARM_CIRCUMFERENCE_POSITION,
            );
        self.coin = ctx
            .pools
            .coins
            .deposit(ctx.world, position, Quat::IDENTITY, None);
        if let Some(coin) = self.coin {
            self.coins.push(coin);
        }
    }

    pub fn save(&self) -> StackerSave {
        StackerSave {
            fsm: self.fsm.save(),
            pending: self.pending.iter().copied().collect(),
            delivery: self.delivery,
            level: self.level,
            rotations: self.rotations,
            pose: self.pose,
            coin: self.coin,
            coins: self.coins.clone(),
            body_handles: self.bodies.iter().map(|b| b.0).collect(),
            lights: self.lights.save(),
        }
    }

    pub fn restored(&self, save: &StackerSave, world: &dyn PhysicsWorld) -> Result<Self, LoadError> {
        if save.body_handles.len() != PARTS_COUNT {
            return Err(LoadError::PartCount {
                machine: "stacker",
                expected: PARTS_COUNT,
                found: save.body_handles.len(),
            });
        }
        let mut bodies = self.bodies;
        for (body, handle) in bodies.iter_mut().zip(&save.body_handles) {
            *body = resolve_body(world, *handle)?;
        }
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "stacker")?,
            pending: save.pending.iter().copied().collect(),
            delivery: save.delivery,
            level: save.level,
            rotations: save.rotations,
            pose: save.pose,
            coin: save.coin,
            coins: save.coins.clone(),
            bodies,
            lights: self.lights.restored(&save.lights)?,
        })
    }
}

impl Mechanism for Stacker {
    type State = StackerState;
    type Readings = StackerReadings;

    fn id(&self) -> MechanismId {
        MechanismId::Stacker
    }

    fn fsm(&self) -> &Fsm<StackerState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<StackerState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(StackerState::Idle) && self.pending.is_empty()
    }

    fn is_active(&self) -> bool {
        !matches!(
            self.fsm.state(),
            StackerState::Idle | StackerState::Activating
        )
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> StackerReadings {
        StackerReadings {
            floor_free: ctx.floor_lock.can_proceed(MechanismId::Stacker),
            coin_y: self
                .coin
                .and_then(|id| ctx.pools.get(id))
                .filter(|instance| instance.used)
                .map(|instance| instance.position.y),
        }
    }

    fn compute_next(&self, r: &StackerReadings) -> Option<StackerState> {
        use StackerState::*;
        let p = &self.pose;
        let coin_below = |y: f32| r.coin_y.is_none_or(|coin_y| coin_y < y);
        match self.fsm.state() {
            Idle => (!self.pending.is_empty()).then_some(Activating),
            Activating => r.floor_free.then_some(RaisingStackerToCleanupPosition),
            RaisingStackerToCleanupPosition => {
                (p.position >= STACKER_CLEANUP_POSITION).then_some(RaisingArmProtectionLid)
            }
            RaisingArmProtectionLid => (p.arm_protection_lid_angle
                <= ARM_PROTECTION_LID_OPENED_ANGLE)
                .then_some(LoweringArmProtectionLid),
            LoweringArmProtectionLid => (p.arm_protection_lid_angle >= 0.0).then(|| {
                if p.position == STACKER_CLEANUP_POSITION {
                    CleaningUpBaseLeft
                } else {
                    OpeningArmDoor
                }
            }),
            CleaningUpBaseLeft => (p.base_angle <= -BASE_CLEANUP_ROTATIONS * TAU)
                .then_some(CleaningUpBaseRight),
            CleaningUpBaseRight => {
                (p.base_angle >= BASE_CLEANUP_ROTATIONS * TAU).then_some(RaisingStacker)
            }
            RaisingStacker => {
                (p.position >= STACKER_MAX_POSITION).then_some(LoweringSupportToReadyPosition)
            }
            LoweringSupportToReadyPosition => (p.support_position <= SUPPORT_READY_POSITION)
                .then_some(LoweringBaseToReadyPosition),
            LoweringBaseToReadyPosition => {
                (p.base_position <= BASE_READY_POSITION).then_some(RaisingArmProtectionLid)
            }
            OpeningArmDoor => (p.arm_door_position <= ARM_DOOR_OPENED_POSITION).then(|| {
                if self.stacks() == 1 {
                    MovingArmToCenterPosition
                } else {
                    MovingArmToCircumferencePosition
                }
            }),
            MovingArmToCircumferencePosition => {
                (p.arm_position >= ARM_CIRCUMFERENCE_POSITION).then_some(InitializingCoin)
            }
            InitializingCoin => Some(PushingCoin),
            PushingCoin => coin_below(p.settled_y()).then(|| {
                if self.stacks() == 1 {
                    LoweringBase
                } else if p.arm_position == ARM_CIRCUMFERENCE_POSITION {
                    RotatingBase
                } else {
                    LoweringBase
                }
            }),
            RotatingBase => (p.base_angle <= self.ring_angle()).then(|| {
                if self.rotations < ROTATIONS_MAX {
                    InitializingCoin
                } else if matches!(self.stacks(), 2 | 6) {
                    LoweringBase
                } else {
                    MovingArmToCenterPosition
                }
            }),
            MovingArmToCenterPosition => {
                (p.arm_position == ARM_CENTER_POSITION).then_some(InitializingCoin)
            }
            LoweringBase => coin_below(p.settled_y() - COIN_HEIGHT).then(|| {
                if self.stacks() == 1 {
                    FinishingLevel
                } else {
                    MovingArmBackToCircumferencePosition
                }
            }),
            MovingArmBackToCircumferencePosition => {
                (p.arm_position == ARM_CIRCUMFERENCE_POSITION).then_some(FinishingLevel)
            }
            FinishingLevel => {
                let levels = self.delivery.map_or(LEVELS_MIN, |d| d.levels);
                Some(if self.level < levels {
                    InitializingCoin
                } else {
                    MovingArmToInitialPosition
                })
            }
            MovingArmToInitialPosition => {
                (p.arm_position <= ARM_RETRACTED_POSITION).then_some(ClosingArmDoor)
            }
            ClosingArmDoor => (p.arm_door_position >= 0.0).then(|| {
                if self.needs_alignment() {
                    AligningCoins
                } else {
                    LoweringStacker
                }
            }),
            AligningCoins => (p.base_angle <= self.alignment_angle()).then_some(LoweringStacker),
            LoweringStacker => (p.position <= 0.0).then(|| {
                if self.needs_alignment() {
                    ResettingBaseRotation
                } else {
                    PreparingIdle
                }
            }),
            ResettingBaseRotation => (p.base_angle >= 0.0).then_some(PreparingIdle),
            PreparingIdle => Some(if self.pending.is_empty() {
                Idle
            } else {
                Activating
            }),
        }
    }

    fn drive(&mut self, _r: &StackerReadings, _ctx: &mut MechanismContext<'_>) {
        use StackerState::*;
        let ring_angle = self.ring_angle();
        let alignment_angle = self.alignment_angle();
        let p = &mut self.pose;
        match self.fsm.state() {
            RaisingStackerToCleanupPosition => {
                p.position = approach(p.position, STACKER_CLEANUP_POSITION, STACKER_RAISING_SPEED)
            }
            RaisingStacker => {
                p.position = approach(p.position, STACKER_MAX_POSITION, STACKER_RAISING_SPEED)
            }
            LoweringStacker => p.position = approach(p.position, 0.0, STACKER_LOWERING_SPEED),
            RaisingArmProtectionLid => {
                p.arm_protection_lid_angle = approach(
                    p.arm_protection_lid_angle,
                    ARM_PROTECTION_LID_OPENED_ANGLE,
                    ARM_PROTECTION_LID_SPEED,
                )
            }
            LoweringArmProtectionLid => {
                p.arm_protection_lid_angle =
                    approach(p.arm_protection_lid_angle, 0.0, ARM_PROTECTION_LID_SPEED)
            }
            CleaningUpBaseLeft => {
                p.base_angle = approach(
                    p.base_angle,
                    -BASE_CLEANUP_ROTATIONS * TAU,
                    BASE_ROTATION_CLEANUP_SPEED,
                )
            }
            CleaningUpBaseRight => {
                p.base_angle = approach(
                    p.base_angle,
                    BASE_CLEANUP_ROTATIONS * TAU,
                    BASE_ROTATION_CLEANUP_SPEED,
                )
            }
            LoweringSupportToReadyPosition => {
                p.support_position = approach(
                    p.support_position,
                    SUPPORT_READY_POSITION,
                    STACKER_LOWERING_SPEED,
                )
            }
            LoweringBaseToReadyPosition => {
                p.base_position = approach(p.base_position, BASE_READY_POSITION, BASE_SPEED)
            }
            LoweringBase => p.base_position -= BASE_SPEED,
            OpeningArmDoor => {
                p.arm_door_position =
                    approach(p.arm_door_position, ARM_DOOR_OPENED_POSITION, ARM_DOOR_SPEED)
            }
            ClosingArmDoor => {
                p.arm_door_position = approach(p.arm_door_position, 0.0, ARM_DOOR_SPEED)
            }
            MovingArmToCircumferencePosition | MovingArmBackToCircumferencePosition => {
                p.arm_position = approach(p.arm_position, ARM_CIRCUMFERENCE_POSITION, ARM_SPEED)
            }
            MovingArmToCenterPosition => {
                p.arm_position = approach(p.arm_position, ARM_CENTER_POSITION, ARM_SPEED)
            }
            MovingArmToInitialPosition => {
                p.arm_position = approach(p.arm_position, ARM_RETRACTED_POSITION, ARM_SPEED)
            }
            RotatingBase => {
                p.base_angle = approach(p.base_angle, ring_angle, BASE_ROTATION_SPEED)
            }
            AligningCoins => {
                p.base_angle = approach(p.base_angle, alignment_angle, BASE_ROTATION_SPEED)
            }
            ResettingBaseRotation => {
                p.base_angle = approach(p.base_angle, 0.0, BASE_ROTATION_SPEED)
            }
            Idle | Activating | InitializingCoin | PushingCoin | FinishingLevel
            | PreparingIdle => {}
        }
    }

    fn enter(&mut self, from: StackerState, to: StackerState, ctx: &mut MechanismContext<'_>) {
        use StackerState::*;
        match to {
            Activating => {
                self.delivery = self.pending.pop_front();
                self.level = 0;
            }
            RaisingStackerToCleanupPosition => ctx.floor_lock.acquire(MechanismId::Stacker),
            CleaningUpBaseRight | RaisingStacker => self.pose.base_angle = 0.0,
            InitializingCoin => self.push_coin(ctx),
            RotatingBase => self.rotations += self.rotation_step(),
            LoweringBase | MovingArmToCenterPosition if from == RotatingBase => {
                self.rotations = 0;
                self.pose.base_angle = 0.0;
            }
            FinishingLevel => {
                self.level += 1;
                self.lights.pulse();
            }
            MovingArmToInitialPosition => self.level = 0,
            PreparingIdle => {
                self.rotations = 0;
                self.pose.base_angle = 0.0;
                self.pose.base_position = 0.0;
                self.pose.support_position = 0.0;
                self.coin = None;
                self.coins.clear();
                log::debug!("stacker finished {:?}", self.delivery);
            }
            Idle => {
                self.delivery = None;
                ctx.floor_lock.release(MechanismId::Stacker);
            }
            _ => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        let cue = if self.is_active() {
            LightsCue::Rotate
        } else {
            LightsCue::Off
        };
        self.lights.update(cue);
        if self.fsm.is(StackerState::Idle) && self.pose == StackerPose::default() {
            return;
        }
        for (body, (translation, rotation)) in self.bodies.iter().zip(self.pose.targets()) {
            ctx.world.set_next_kinematic_translation(*body, translation);
            ctx.world.set_next_kinematic_rotation(*body, rotation);
        }
    }
}
