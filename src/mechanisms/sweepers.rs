//! Floor sweepers
//!
//! Two mirrored arms hidden behind doors at the front corners of the floor.
//! A sweep opens the doors, slides and swings each base out, tips the
//! sweeper blade down and drags it across the floor, then reverses every
//! step. A sweep queued while one is running is served straight from the
//! backward sweep without folding the arms away.

use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{Fsm, FsmSave, Mechanism, MechanismContext, MechanismId, resolve_body};
use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, CollisionGroups, GROUP_STRUCTURE,
    PhysicsWorld,
};

const SWEEPERS_ROTATION: f32 = 26.5 * (PI / 180.0);
const DOORS_ROTATION_SPEED: f32 = 0.05;
const DOORS_OPENED_ANGLE: f32 = FRAC_PI_2;
const BASE_SPEED: f32 = 0.002;
const BASE_POSITION: f32 = 0.08;
const BASE_TRANSLATION: f32 = 0.07;
const BASE_ROTATION_SPEED: f32 = 0.01;
const SWEEPING_MAX_ANGLE: f32 = PI;
const SWEEPING_AXIS_ANGLE: f32 = FRAC_PI_2;
const SWEEPING_SPEED: f32 = 0.02;
const SWEEPING_BACK_SPEED: f32 = SWEEPING_SPEED * 1.5;
const SWEEPERS_AXIS_ROTATION_SPEED: f32 = 0.05;

/// Left arm pivot; the right one mirrors it through x = 0
const LEFT_PIVOT: Vec3 = Vec3::new(-0.36, 0.2, 0.62);
const LEFT_DOOR_PIVOT: Vec3 = Vec3::new(-0.42, 0.2, 0.66);
const PARTS_COUNT: usize = 6;

state_names! {
    pub enum SweepersState {
        Idle => "sweepers-idle",
        Activating => "sweepers-activating",
        OpeningDoors => "sweepers-opening-doors",
        MovingBase => "sweepers-moving-base",
        RotatingBase => "sweepers-rotating-base",
        TranslatingBase => "sweepers-translating-base",
        RotatingSweepers => "sweepers-rotating-sweepers",
        Sweeping => "sweepers-sweeping",
        SweepingBack => "sweepers-sweeping-back",
        RotatingSweepersBack => "sweepers-rotating-sweepers-back",
        TranslatingBaseBack => "sweepers-translating-base-back",
        RotatingBaseBack => "sweepers-rotating-base-back",
        MovingBaseBack => "sweepers-moving-base-back",
        ClosingDoors => "sweepers-closing-doors",
    }
}

/// Pose parameters shared by both sides
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Linkage {
    pub position: f32,
    pub rotation: f32,
    pub translation: f32,
    pub sweepers_rotation_z: f32,
    pub sweepers_rotation_y: f32,
    pub doors_rotation: f32,
}

/// Kinematic targets of one side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SidePoses {
    pub base: (Vec3, Quat),
    pub sweeper: (Vec3, Quat),
    pub door: (Vec3, Quat),
}

impl Linkage {
    /// Poses of one side; `side` is 1 for left and -1 for right
    pub fn poses(&self, side: f32) -> SidePoses {
        let pivot = LEFT_PIVOT * Vec3::new(side, 1.0, 1.0);
        let door_pivot = LEFT_DOOR_PIVOT * Vec3::new(side, 1.0, 1.0);
        let origin = Vec3::new(side * self.position, 0.0, 0.0);

        let base_rotation = Quat::from_rotation_y(-side * self.rotation);
        let sweeper_rotation = base_rotation
            * Quat::from_rotation_y(-side * self.sweepers_rotation_y)
            * Quat::from_rotation_z(side * self.sweepers_rotation_z);
        let translation = base_rotation * Vec3::new(side * self.translation, 0.0, 0.0);

        let base = base_rotation * (origin - pivot) + pivot + translation;
        let sweeper = sweeper_rotation * (origin - pivot) + pivot + translation;

        let door_axis = Quat::from_rotation_y(-side * SWEEPERS_ROTATION) * Vec3::Z;
        let door_rotation = Quat::from_axis_angle(door_axis, side * self.doors_rotation);
        let door = door_rotation * -door_pivot + door_pivot;

        SidePoses {
            base: (base, base_rotation),
            sweeper: (sweeper, sweeper_rotation),
            door: (door, door_rotation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepersSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending: u32,
    #[serde(flatten)]
    pub linkage: Linkage,
    pub body_handles: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepersReadings {
    pub floor_free: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sweepers {
    fsm: Fsm<SweepersState>,
    pending: u32,
    linkage: Linkage,
    /// Left base, sweeper, door, then the same for the right side
    bodies: [BodyHandle; PARTS_COUNT],
}

impl Sweepers {
    pub fn new(world: &mut dyn PhysicsWorld) -> Self {
        let groups = CollisionGroups::new(GROUP_STRUCTURE, u32::MAX);
        let mut part = |offset: Vec3, shape: ColliderShape| {
            let body = world.create_body(BodyDesc::kinematic());
            world.create_collider(
                ColliderDesc::new(shape)
                    .offset(offset)
                    .material(0.3, 0.0, 1.0)
                    .groups(groups),
                body,
            );
            body
        };
        let mut bodies = [BodyHandle(0); PARTS_COUNT];
        for (i, side) in [1.0_f32, -1.0].into_iter().enumerate() {
            let pivot = LEFT_PIVOT * Vec3::new(side, 1.0, 1.0);
            let door_pivot = LEFT_DOOR_PIVOT * Vec3::new(side, 1.0, 1.0);
            bodies[i * 3] = part(pivot, ColliderShape::cuboid(0.04, 0.03, 0.04));
            bodies[i * 3 + 1] = part(
                pivot + Vec3::new(-side * 0.1, -0.03, 0.0),
                ColliderShape::cuboid(0.2, 0.02, 0.01),
            );
            bodies[i * 3 + 2] = part(door_pivot, ColliderShape::cuboid(0.12, 0.06, 0.005));
        }
        Self {
            fsm: Fsm::new(SweepersState::Idle),
            pending: 0,
            linkage: Linkage::default(),
            bodies,
        }
    }

    /// Queue a sweep of the floor
    pub fn sweep_floor(&mut self) {
        self.pending += 1;
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn linkage(&self) -> &Linkage {
        &self.linkage
    }

    pub fn save(&self) -> SweepersSave {
        SweepersSave {
            fsm: self.fsm.save(),
            pending: self.pending,
            linkage: self.linkage,
            body_handles: self.bodies.iter().map(|b| b.0).collect(),
        }
    }

    pub fn restored(&self, save: &SweepersSave, world: &dyn PhysicsWorld) -> Result<Self, LoadError> {
        if save.body_handles.len() != PARTS_COUNT {
            return Err(LoadError::PartCount {
                machine: "sweepers",
                expected: PARTS_COUNT,
                found: save.body_handles.len(),
            });
        }
        let mut bodies = self.bodies;
        for (body, handle) in bodies.iter_mut().zip(&save.body_handles) {
            *body = resolve_body(world, *handle)?;
        }
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "sweepers")?,
            pending: save.pending,
            linkage: save.linkage,
            bodies,
        })
    }
}

impl Mechanism for Sweepers {
    type State = SweepersState;
    type Readings = SweepersReadings;

    fn id(&self) -> MechanismId {
        MechanismId::Sweepers
    }

    fn fsm(&self) -> &Fsm<SweepersState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<SweepersState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(SweepersState::Idle) && self.pending == 0
    }

    fn is_active(&self) -> bool {
        !matches!(
            self.fsm.state(),
            SweepersState::Idle | SweepersState::Activating
        )
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> SweepersReadings {
        SweepersReadings {
            floor_free: ctx.floor_lock.can_proceed(MechanismId::Sweepers),
        }
    }

    fn compute_next(&self, r: &SweepersReadings) -> Option<SweepersState> {
        use SweepersState::*;
        let l = &self.linkage;
        match self.fsm.state() {
            Idle => (self.pending > 0).then_some(Activating),
            Activating => r.floor_free.then_some(OpeningDoors),
            OpeningDoors => (l.doors_rotation >= DOORS_OPENED_ANGLE).then_some(MovingBase),
            MovingBase => (l.position >= BASE_POSITION).then_some(RotatingBase),
            RotatingBase => (l.rotation >= SWEEPERS_ROTATION).then_some(TranslatingBase),
            TranslatingBase => (l.translation >= BASE_TRANSLATION).then_some(RotatingSweepers),
            RotatingSweepers => (l.sweepers_rotation_z >= SWEEPING_AXIS_ANGLE).then_some(Sweeping),
            Sweeping => {
                (l.sweepers_rotation_y >= SWEEPING_MAX_ANGLE).then_some(RotatingSweepersBack)
            }
            RotatingSweepersBack => (l.sweepers_rotation_z <= 0.0).then_some(SweepingBack),
            SweepingBack => (l.sweepers_rotation_y <= 0.0).then(|| {
                if self.pending > 0 {
                    OpeningDoors
                } else {
                    TranslatingBaseBack
                }
            }),
            TranslatingBaseBack => (l.translation <= 0.0).then_some(RotatingBaseBack),
            RotatingBaseBack => (l.rotation <= 0.0).then_some(MovingBaseBack),
            MovingBaseBack => (l.position <= 0.0).then_some(ClosingDoors),
            ClosingDoors => (l.doors_rotation <= 0.0).then_some(Idle),
        }
    }

    fn drive(&mut self, _r: &SweepersReadings, _ctx: &mut MechanismContext<'_>) {
        use SweepersState::*;
        let l = &mut self.linkage;
        match self.fsm.state() {
            Idle | Activating => {}
            OpeningDoors => {
                l.doors_rotation = (l.doors_rotation + DOORS_ROTATION_SPEED).min(DOORS_OPENED_ANGLE)
            }
            MovingBase => l.position = (l.position + BASE_SPEED).min(BASE_POSITION),
            RotatingBase => {
                l.rotation = (l.rotation + BASE_ROTATION_SPEED).min(SWEEPERS_ROTATION)
            }
            TranslatingBase => l.translation = (l.translation + BASE_SPEED).min(BASE_TRANSLATION),
            RotatingSweepers => {
                l.sweepers_rotation_z =
                    (l.sweepers_rotation_z + SWEEPERS_AXIS_ROTATION_SPEED).min(SWEEPING_AXIS_ANGLE)
            }
            Sweeping => {
                l.sweepers_rotation_y =
                    (l.sweepers_rotation_y + SWEEPING_SPEED).min(SWEEPING_MAX_ANGLE)
            }
            RotatingSweepersBack => {
                l.sweepers_rotation_z = (l.sweepers_rotation_z - SWEEPERS_AXIS_ROTATION_SPEED).max(0.0)
            }
            SweepingBack => {
                l.sweepers_rotation_y = (l.sweepers_rotation_y - SWEEPING_BACK_SPEED).max(0.0)
            }
            TranslatingBaseBack => l.translation = (l.translation - BASE_SPEED).max(0.0),
            RotatingBaseBack => l.rotation = (l.rotation - BASE_ROTATION_SPEED).max(0.0),
            MovingBaseBack => l.position = (l.position - BASE_SPEED).max(0.0),
            ClosingDoors => l.doors_rotation = (l.doors_rotation - DOORS_ROTATION_SPEED).max(0.0),
        }
    }

    fn enter(&mut self, from: SweepersState, to: SweepersState, ctx: &mut MechanismContext<'_>) {
        match to {
            SweepersState::Activating => self.pending = self.pending.saturating_sub(1),
            SweepersState::OpeningDoors => {
                if from == SweepersState::SweepingBack {
                    self.pending = self.pending.saturating_sub(1);
                }
                ctx.floor_lock.acquire(MechanismId::Sweepers);
            }
            SweepersState::Idle => ctx.floor_lock.release(MechanismId::Sweepers),
            _ => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        if self.fsm.is(SweepersState::Idle) && self.fsm.next().is_none() && self.linkage == Linkage::default() {
            return;
        }
        for (i, side) in [1.0_f32, -1.0].into_iter().enumerate() {
            let poses = self.linkage.poses(side);
            for (body, (translation, rotation)) in self.bodies[i * 3..i * 3 + 3]
                .iter()
                .zip([poses.base, poses.sweeper, poses.door])
            {
                ctx.world.set_next_kinematic_translation(*body, translation);
                ctx.world.set_next_kinematic_rotation(*body, rotation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::testing::Rig;

    #[test]
    fn test_full_sweep_cycle() {
        let mut rig = Rig::new();
        let mut sweepers = Sweepers::new(&mut rig.world);
        sweepers.sweep_floor();
        let seen = rig.trace(&mut sweepers, 1200);
        use SweepersState::*;
        assert_eq!(
            seen,
            vec![
                Idle,
                Activating,
                OpeningDoors,
                MovingBase,
                RotatingBase,
                TranslatingBase,
                RotatingSweepers,
                Sweeping,
                RotatingSweepersBack,
                SweepingBack,
                TranslatingBaseBack,
                RotatingBaseBack,
                MovingBaseBack,
                ClosingDoors,
                Idle,
            ]
        );
        assert_eq!(*sweepers.linkage(), Linkage::default());
        assert!(!rig.lock.is_locked());
    }

    #[test]
    fn test_waits_for_floor() {
        let mut rig = Rig::new();
        let mut sweepers = Sweepers::new(&mut rig.world);
        rig.lock.acquire(MechanismId::Stacker);
        sweepers.sweep_floor();
        for _ in 0..50 {
            rig.tick(&mut sweepers);
        }
        assert_eq!(sweepers.state(), SweepersState::Activating);
        assert!(!sweepers.is_active());
        rig.lock.release(MechanismId::Stacker);
        rig.tick(&mut sweepers);
        assert_eq!(sweepers.state(), SweepersState::OpeningDoors);
        assert_eq!(rig.lock.holder(), Some(MechanismId::Sweepers));
    }

    #[test]
    fn test_queued_sweep_skips_folding() {
        let mut rig = Rig::new();
        let mut sweepers = Sweepers::new(&mut rig.world);
        sweepers.sweep_floor();
        rig.run_until(&mut sweepers, 500, |s| s.state() == SweepersState::Sweeping)
            .unwrap();
        sweepers.sweep_floor();
        let seen = rig.trace(&mut sweepers, 2000);
        let opened = seen
            .iter()
            .filter(|s| **s == SweepersState::OpeningDoors)
            .count();
        let folded = seen
            .iter()
            .filter(|s| **s == SweepersState::TranslatingBaseBack)
            .count();
        assert_eq!((opened, folded), (1, 1));
        let index = seen
            .iter()
            .position(|s| *s == SweepersState::OpeningDoors)
            .unwrap();
        assert_eq!(seen[index - 1], SweepersState::SweepingBack);
        assert!(sweepers.is_idle());
    }

    #[test]
    fn test_sides_mirror() {
        let linkage = Linkage {
            position: 0.05,
            rotation: 0.3,
            translation: 0.04,
            sweepers_rotation_z: 1.0,
            sweepers_rotation_y: 2.0,
            doors_rotation: 1.2,
        };
        let left = linkage.poses(1.0);
        let right = linkage.poses(-1.0);
        let mirror = Vec3::new(-1.0, 1.0, 1.0);
        for (l, r) in [
            (left.base.0, right.base.0),
            (left.sweeper.0, right.sweeper.0),
            (left.door.0, right.door.0),
        ] {
            assert!((l * mirror - r).length() < 1e-5, "{:?} vs {:?}", l, r);
        }
    }

    #[test]
    fn test_rest_pose_is_identity() {
        let poses = Linkage::default().poses(1.0);
        assert!(poses.base.0.length() < 1e-6);
        assert!(poses.door.0.length() < 1e-6);
        assert!(poses.sweeper.1.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn test_save_restore() {
        let mut rig = Rig::new();
        let mut sweepers = Sweepers::new(&mut rig.world);
        sweepers.sweep_floor();
        for _ in 0..150 {
            rig.tick(&mut sweepers);
        }
        let save = sweepers.save();
        let json = serde_json::to_string(&save).unwrap();
        let back: SweepersSave = serde_json::from_str(&json).unwrap();
        let restored = sweepers.restored(&back, &rig.world).unwrap();
        assert_eq!(restored, sweepers);

        let mut bad = back.clone();
        bad.body_handles[0] = 9999;
        assert!(matches!(
            sweepers.restored(&bad, &rig.world),
            Err(LoadError::UnresolvedHandle { .. })
        ));
    }
}
