//! Single-column stackers on either side of the floor
//!
//! A reduced stacker: no ring, just one column of coins fed straight down
//! onto a turntable that drops a coin-height per level.

use std::collections::VecDeque;
use std::f32::consts::{FRAC_PI_3, PI, TAU};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::lights::LightsSave;
use super::{Fsm, FsmSave, Lights, LightsCue, Mechanism, MechanismContext, MechanismId, resolve_body};
use crate::approach;
use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, CollisionGroups, GROUP_STRUCTURE,
    PhysicsWorld, Pose,
};
use crate::pool::ObjectId;

pub const OFFSET_X: f32 = 0.4;
const PIVOT: Vec3 = Vec3::new(0.0, 0.0, 0.5);
/// Coin release point with the arm retracted
const DROP_POSITION: Vec3 = Vec3::new(0.0, 0.2, 0.42);
const ARM_PROTECTION_LID_PIVOT: Vec3 = Vec3::new(0.0, 0.21, 0.4);
const BASE_TOP: f32 = 0.17;

const COIN_HEIGHT: f32 = 0.006;
const COIN_SETTLED_POSITION_Y: f32 = 0.14;
const ARM_SPEED: f32 = 0.02;
const ARM_DOOR_SPEED: f32 = 0.0005;
const BASE_SPEED: f32 = 0.0005;
const STACKER_RAISING_SPEED: f32 = 0.003;
const STACKER_LOWERING_SPEED: f32 = 0.001;
const BASE_ROTATION_CLEANUP_SPEED: f32 = PI / 9.0;
const ARM_PROTECTION_LID_SPEED: f32 = 0.1;
const BASE_CLEANUP_ROTATIONS: f32 = 3.0;
const ARM_DROP_POSITION: f32 = 0.08;
const ARM_DOOR_OPENED_POSITION: f32 = -0.025;
const BASE_CLEANUP_POSITION: f32 = 0.005;
const BASE_READY_POSITION: f32 = -0.03;
const SUPPORT_READY_POSITION: f32 = -0.01;
const STACKER_CLEANUP_POSITION: f32 = 0.15;
const STACKER_MAX_POSITION: f32 = 0.225;
const ARM_PROTECTION_LID_OPENED_ANGLE: f32 = -FRAC_PI_3;
pub const LEVELS_MIN: u32 = 5;
pub const LEVELS_MAX: u32 = 80;
const LIGHT_COUNT: usize = 6;
const PARTS_COUNT: usize = 6;

state_names! {
    pub enum MiniStackerState {
        Idle => "mini-stacker-idle",
        Activating => "mini-stacker-activating",
        RaisingStackerToCleanupPosition => "mini-stacker-raising-stacker-to-cleanup-position",
        RaisingBaseToCleanupPosition => "mini-stacker-raising-base-to-cleanup-position",
        CleaningUpBaseLeft => "mini-stacker-cleaning-up-base-left",
        CleaningUpBaseRight => "mini-stacker-cleaning-up-base-right",
        RaisingStacker => "mini-stacker-raising-stacker",
        RaisingArmProtectionLid => "mini-stacker-raising-arm-protection-lid",
        LoweringArmProtectionLid => "mini-stacker-lowering-arm-protection-lid",
        LoweringSupportToReadyPosition => "mini-stacker-lowering-support-to-ready-position",
        LoweringBaseToReadyPosition => "mini-stacker-lowering-base-to-ready-position",
        OpeningArmDoor => "mini-stacker-opening-arm-door",
        MovingArmToDropPosition => "mini-stacker-moving-arm-to-drop-position",
        InitializingCoin => "mini-stacker-initializing-coin",
        PushingCoin => "mini-stacker-pushing-coin",
        LoweringBase => "mini-stacker-lowering-base",
        FinishingLevel => "mini-stacker-finishing-level",
        MovingArmToInitialPosition => "mini-stacker-moving-arm-to-initial-position",
        ClosingArmDoor => "mini-stacker-closing-arm-door",
        LoweringStacker => "mini-stacker-lowering-stacker",
        PreparingIdle => "mini-stacker-preparing-idle",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MiniStackerPose {
    pub position: f32,
    pub support_position: f32,
    pub base_position: f32,
    pub arm_position: f32,
    pub arm_door_position: f32,
    pub arm_protection_lid_angle: f32,
    pub base_angle: f32,
}

impl MiniStackerPose {
    fn targets(&self, pivot: Vec3, lid_pivot: Vec3) -> [(Vec3, Quat); PARTS_COUNT] {
        let turn = Quat::from_rotation_y(self.base_angle);
        let around_pivot = turn * -pivot + pivot;
        let support_y = (self.position + self.support_position).max(0.0);
        let base_y = (self.position + self.support_position + self.base_position).max(0.0);
        let lid_rotation = Quat::from_rotation_x(self.arm_protection_lid_angle);
        let lid_pivot = lid_pivot + Vec3::Y * self.position;
        let raised = Vec3::Y * self.position;
        [
            (Vec3::new(around_pivot.x, base_y, around_pivot.z), turn),
            (Vec3::new(around_pivot.x, support_y, around_pivot.z), turn),
            (raised + Vec3::Z * self.arm_position, Quat::IDENTITY),
            (raised, Quat::IDENTITY),
            (lid_rotation * (raised - lid_pivot) + lid_pivot, lid_rotation),
            (
                raised + Vec3::new(0.0, self.arm_door_position, self.arm_position),
                Quat::IDENTITY,
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiniStackerSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending: Vec<u32>,
    pub levels: u32,
    pub level: u32,
    #[serde(flatten)]
    pub pose: MiniStackerPose,
    pub coin: Option<ObjectId>,
    pub coins: Vec<ObjectId>,
    pub body_handles: Vec<u32>,
    pub lights: LightsSave,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiniStackerReadings {
    pub floor_free: bool,
    pub coin_y: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MiniStacker {
    id: MechanismId,
    offset_x: f32,
    fsm: Fsm<MiniStackerState>,
    pending: VecDeque<u32>,
    levels: u32,
    level: u32,
    pose: MiniStackerPose,
    coin: Option<ObjectId>,
    coins: Vec<ObjectId>,
    bodies: [BodyHandle; PARTS_COUNT],
    lights: Lights,
}

impl MiniStacker {
    pub fn left(world: &mut dyn PhysicsWorld) -> Self {
        Self::new(world, MechanismId::LeftStacker, -OFFSET_X)
    }

    pub fn right(world: &mut dyn PhysicsWorld) -> Self {
        Self::new(world, MechanismId::RightStacker, OFFSET_X)
    }

    fn new(world: &mut dyn PhysicsWorld, id: MechanismId, offset_x: f32) -> Self {
        let shift = Vec3::X * offset_x;
        let carries = CollisionGroups::new(GROUP_STRUCTURE, u32::MAX);
        let hidden = CollisionGroups::new(GROUP_STRUCTURE, GROUP_STRUCTURE);
        let parts = [
            (
                ColliderShape::Cylinder {
                    half_height: 0.01,
                    radius: 0.04,
                },
                PIVOT + Vec3::Y * (BASE_TOP - 0.01),
                carries,
            ),
            (
                ColliderShape::Cylinder {
                    half_height: 0.08,
                    radius: 0.045,
                },
                PIVOT + Vec3::Y * (BASE_TOP - 0.1),
                hidden,
            ),
            (
                ColliderShape::cuboid(0.02, 0.01, 0.1),
                DROP_POSITION - Vec3::Z * 0.05,
                hidden,
            ),
            (
                ColliderShape::cuboid(0.04, 0.03, 0.1),
                ARM_PROTECTION_LID_PIVOT - Vec3::new(0.0, 0.02, 0.05),
                hidden,
            ),
            (
                ColliderShape::cuboid(0.04, 0.005, 0.1),
                ARM_PROTECTION_LID_PIVOT - Vec3::Z * 0.05,
                hidden,
            ),
            (
                ColliderShape::cuboid(0.03, 0.025, 0.005),
                DROP_POSITION + Vec3::Z * 0.005,
                hidden,
            ),
        ];
        let mut bodies = [BodyHandle(0); PARTS_COUNT];
        for (body, (shape, offset, groups)) in bodies.iter_mut().zip(parts) {
            *body = world.create_body(BodyDesc::kinematic());
            world.create_collider(
                ColliderDesc::new(shape)
                    .offset(offset + shift)
                    .material(0.4, 0.0, 1.0)
                    .groups(groups),
                *body,
            );
        }
        Self {
            id,
            offset_x,
            fsm: Fsm::new(MiniStackerState::Idle),
            pending: VecDeque::new(),
            levels: 0,
            level: 0,
            pose: MiniStackerPose::default(),
            coin: None,
            coins: Vec::new(),
            bodies,
            lights: Lights::new(LIGHT_COUNT),
        }
    }

    /// Queue a column `levels` coins high
    pub fn deliver(&mut self, levels: u32) {
        self.pending
            .push_back(levels.clamp(LEVELS_MIN, LEVELS_MAX));
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn pose(&self) -> &MiniStackerPose {
        &self.pose
    }

    pub fn coins(&self) -> &[ObjectId] {
        &self.coins
    }

    pub fn lights(&self) -> &Lights {
        &self.lights
    }

    fn pivot(&self) -> Vec3 {
        PIVOT + Vec3::X * self.offset_x
    }

    fn lights_cue(&self) -> LightsCue {
        use MiniStackerState::*;
        match self.fsm.state() {
            Idle | Activating | PreparingIdle => LightsCue::Off,
            RaisingStackerToCleanupPosition
            | RaisingBaseToCleanupPosition
            | CleaningUpBaseLeft
            | CleaningUpBaseRight
            | RaisingStacker
            | RaisingArmProtectionLid
            | LoweringArmProtectionLid
            | LoweringSupportToReadyPosition
            | LoweringBaseToReadyPosition
            | OpeningArmDoor
            | MovingArmToDropPosition => LightsCue::Blink,
            InitializingCoin | PushingCoin | LoweringBase | FinishingLevel
            | MovingArmToInitialPosition | ClosingArmDoor => LightsCue::Rotate,
            LoweringStacker => LightsCue::Deliver,
        }
    }

    pub fn save(&self) -> MiniStackerSave {
        MiniStackerSave {
            fsm: self.fsm.save(),
            pending: self.pending.iter().copied().collect(),
            levels: self.levels,
            level: self.level,
            pose: self.pose,
            coin: self.coin,
            coins: self.coins.clone(),
            body_handles: self.bodies.iter().map(|b| b.0).collect(),
            lights: self.lights.save(),
        }
    }

    pub fn restored(
        &self,
        save: &MiniStackerSave,
        world: &dyn PhysicsWorld,
    ) -> Result<Self, LoadError> {
        if save.body_handles.len() != PARTS_COUNT {
            return Err(LoadError::PartCount {
                machine: self.id.as_str(),
                expected: PARTS_COUNT,
                found: save.body_handles.len(),
            });
        }
        let mut bodies = self.bodies;
        for (body, handle) in bodies.iter_mut().zip(&save.body_handles) {
            *body = resolve_body(world, *handle)?;
        }
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, self.id.as_str())?,
            pending: save.pending.iter().copied().collect(),
            levels: save.levels,
            level: save.level,
            pose: save.pose,
            coin: save.coin,
            coins: save.coins.clone(),
            bodies,
            lights: self.lights.restored(&save.lights)?,
            ..self.clone()
        })
    }
}

impl Mechanism for MiniStacker {
    type State = MiniStackerState;
    type Readings = MiniStackerReadings;

    fn id(&self) -> MechanismId {
        self.id
    }

    fn fsm(&self) -> &Fsm<MiniStackerState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<MiniStackerState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(MiniStackerState::Idle) && self.pending.is_empty()
    }

    fn is_active(&self) -> bool {
        !matches!(
            self.fsm.state(),
            MiniStackerState::Idle | MiniStackerState::Activating
        )
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> MiniStackerReadings {
        MiniStackerReadings {
            floor_free: ctx.floor_lock.can_proceed(self.id),
            coin_y: self
                .coin
                .and_then(|id| ctx.pools.get(id))
                .filter(|instance| instance.used)
                .map(|instance| instance.position.y),
        }
    }

    fn compute_next(&self, r: &MiniStackerReadings) -> Option<MiniStackerState> {
        use MiniStackerState::*;
        let p = &self.pose;
        let settled_y = COIN_SETTLED_POSITION_Y + p.position;
        let coin_below = |y: f32| r.coin_y.is_none_or(|coin_y| coin_y < y);
        match self.fsm.state() {
            Idle => (!self.pending.is_empty()).then_some(Activating),
            Activating => r.floor_free.then_some(RaisingStackerToCleanupPosition),
            RaisingStackerToCleanupPosition => (p.position >= STACKER_CLEANUP_POSITION)
                .then_some(RaisingBaseToCleanupPosition),
            RaisingBaseToCleanupPosition => {
                (p.base_position >= BASE_CLEANUP_POSITION).then_some(CleaningUpBaseLeft)
            }
            CleaningUpBaseLeft => (p.base_angle <= -BASE_CLEANUP_ROTATIONS * TAU)
                .then_some(CleaningUpBaseRight),
            CleaningUpBaseRight => {
                (p.base_angle >= BASE_CLEANUP_ROTATIONS * TAU).then_some(RaisingStacker)
            }
            RaisingStacker => (p.position >= STACKER_MAX_POSITION).then_some(RaisingArmProtectionLid),
            RaisingArmProtectionLid => (p.arm_protection_lid_angle
                <= ARM_PROTECTION_LID_OPENED_ANGLE)
                .then_some(LoweringArmProtectionLid),
            LoweringArmProtectionLid => (p.arm_protection_lid_angle >= 0.0)
                .then_some(LoweringSupportToReadyPosition),
            LoweringSupportToReadyPosition => (p.support_position <= SUPPORT_READY_POSITION)
                .then_some(LoweringBaseToReadyPosition),
            LoweringBaseToReadyPosition => {
                (p.base_position <= BASE_READY_POSITION).then_some(OpeningArmDoor)
            }
            OpeningArmDoor => {
                (p.arm_door_position <= ARM_DOOR_OPENED_POSITION).then_some(MovingArmToDropPosition)
            }
            MovingArmToDropPosition => {
                (p.arm_position >= ARM_DROP_POSITION).then_some(InitializingCoin)
            }
            InitializingCoin => Some(PushingCoin),
            PushingCoin => coin_below(settled_y).then_some(LoweringBase),
            LoweringBase => coin_below(settled_y - COIN_HEIGHT).then_some(FinishingLevel),
            FinishingLevel => Some(if self.level < self.levels {
                InitializingCoin
            } else {
                MovingArmToInitialPosition
            }),
            MovingArmToInitialPosition => (p.arm_position <= 0.0).then_some(ClosingArmDoor),
            ClosingArmDoor => (p.arm_door_position >= 0.0).then_some(LoweringStacker),
            LoweringStacker => (p.position <= 0.0).then_some(PreparingIdle),
            PreparingIdle => Some(if self.pending.is_empty() {
                Idle
            } else {
                Activating
            }),
        }
    }

    fn drive(&mut self, _r: &MiniStackerReadings, ctx: &mut MechanismContext<'_>) {
        use MiniStackerState::*;
        let p = &mut self.pose;
        match self.fsm.state() {
            RaisingStackerToCleanupPosition => {
                p.position = approach(p.position, STACKER_CLEANUP_POSITION, STACKER_RAISING_SPEED)
            }
            RaisingBaseToCleanupPosition => {
                p.base_position = approach(p.base_position, BASE_CLEANUP_POSITION, BASE_SPEED)
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
            RaisingStacker => {
                p.position = approach(p.position, STACKER_MAX_POSITION, STACKER_RAISING_SPEED)
            }
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
            OpeningArmDoor => {
                p.arm_door_position =
                    approach(p.arm_door_position, ARM_DOOR_OPENED_POSITION, ARM_DOOR_SPEED)
            }
            MovingArmToDropPosition => {
                p.arm_position = approach(p.arm_position, ARM_DROP_POSITION, ARM_SPEED)
            }
            LoweringBase => {
                p.base_position -= BASE_SPEED;
                // Keep the column straight over the turntable
                if let Some(instance) = self.coin.and_then(|id| ctx.pools.get(id)) {
                    let pivot = PIVOT + Vec3::X * self.offset_x;
                    ctx.world.set_pose(
                        instance.body,
                        Pose {
                            translation: Vec3::new(pivot.x, instance.position.y, pivot.z),
                            rotation: Quat::IDENTITY,
                        },
                    );
                }
            }
            MovingArmToInitialPosition => {
                p.arm_position = approach(p.arm_position, 0.0, ARM_SPEED)
            }
            ClosingArmDoor => p.arm_door_position = approach(p.arm_door_position, 0.0, ARM_DOOR_SPEED),
            LoweringStacker => {
                p.position = approach(p.position, 0.0, STACKER_LOWERING_SPEED)
            }
            Idle | Activating | InitializingCoin | PushingCoin | FinishingLevel
            | PreparingIdle => {}
        }
    }

    fn enter(
        &mut self,
        _from: MiniStackerState,
        to: MiniStackerState,
        ctx: &mut MechanismContext<'_>,
    ) {
        use MiniStackerState::*;
        match to {
            Activating => {
                self.levels = self.pending.pop_front().unwrap_or(LEVELS_MIN);
                self.level = 0;
            }
            RaisingStackerToCleanupPosition => ctx.floor_lock.acquire(self.id),
            CleaningUpBaseRight | RaisingStacker => self.pose.base_angle = 0.0,
            InitializingCoin => {
                let position = DROP_POSITION
                    + Vec3::new(self.offset_x, self.pose.position, self.pose.arm_position);
                self.coin = ctx
                    .pools
                    .coins
                    .deposit(ctx.world, position, Quat::IDENTITY, None);
                self.coins.extend(self.coin);
            }
            FinishingLevel => self.level += 1,
            MovingArmToInitialPosition => self.level = 0,
            PreparingIdle => {
                self.pose = MiniStackerPose::default();
                self.coin = None;
                self.coins.clear();
            }
            Idle => ctx.floor_lock.release(self.id),
            _ => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        self.lights.update(self.lights_cue());
        if self.fsm.is(MiniStackerState::Idle) && self.pose == MiniStackerPose::default() {
            return;
        }
        let pivot = self.pivot();
        let lid_pivot = ARM_PROTECTION_LID_PIVOT + Vec3::X * self.offset_x;
        let targets = self.pose.targets(pivot, lid_pivot);
        for (body, (translation, rotation)) in self.bodies.iter().zip(targets) {
            ctx.world.set_next_kinematic_translation(*body, translation);
            ctx.world.set_next_kinematic_rotation(*body, rotation);
        }
    }
}
