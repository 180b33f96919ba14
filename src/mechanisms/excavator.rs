//! Excavator arm
//!
//! Seven motorised revolute joints: a rotating platform, the arm platform,
//! the arms and four jaws. Each state sets motor targets on entry and waits
//! for the joint angles to cross the thresholds of that phase. Two phases
//! also dwell for a fixed time measured on the simulation clock.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{
    Fsm, FsmSave, Mechanism, MechanismContext, MechanismId, resolve_body, resolve_joint,
};
use crate::cabinet::events::CabinetEvent;
use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, CollisionGroups, GROUP_OBJECTS,
    GROUP_STRUCTURE, JointHandle, PhysicsWorld,
};

pub const POSITION: Vec3 = Vec3::new(0.5, 0.29, 0.3);
const ROTATION_Y: f32 = std::f32::consts::PI;
/// Where the jaws open over the playfield
pub const DROP_POSITION: Vec3 = Vec3::new(0.12, 0.34, 0.05);
const DELAY_PICK_WAIT_MS: f64 = 2000.0;
const DELAY_DROP_WAIT_MS: f64 = 2000.0;
const MOTOR_STIFFNESS: f32 = 50000.0;
const MOTOR_DAMPING: f32 = 20000.0;
/// Slack on every angle threshold
const ANGLE_EPSILON: f32 = 0.001;

const PLATFORM: usize = 0;
const ARM_PLATFORM: usize = 1;
const ARMS: usize = 2;
const JAWS: [usize; 4] = [3, 4, 5, 6];
const JOINT_COUNT: usize = 7;

/// Limits of each joint while the excavator is running
const LIMITS: [(f32, f32); JOINT_COUNT] = [
    (-2.2, 0.1),
    (-1.3, 0.8),
    (-1.0, 0.5),
    (-0.1, 0.6),
    (-0.6, 0.1),
    (-0.1, 0.6),
    (-0.6, 0.1),
];

const JAWS_OPEN: [f32; 4] = [0.5, -0.5, 0.5, -0.5];
const JAWS_CLOSED: [f32; 4] = [0.0; 4];

state_names! {
    pub enum ExcavatorState {
        Idle => "excavator-idle",
        Activating => "excavator-activating",
        OpeningJaws => "excavator-opening-jaws",
        MovingDown => "excavator-moving-down",
        Picking => "excavator-picking",
        MovingUp => "excavator-moving-up",
        MovingToDropZone => "excavator-moving-to-drop-zone",
        ExtendingArms => "excavator-extending-arms",
        Dropping => "excavator-dropping",
        ClosingJaws => "excavator-closing-jaws",
        RetractingArms => "excavator-retracting-arms",
        MovingToBase => "excavator-moving-to-base",
        PreparingIdle => "excavator-preparing-idle",
    }
}

/// Angle threshold a joint must pass
#[derive(Debug, Clone, Copy)]
enum Past {
    Above(f32),
    Below(f32),
}

impl Past {
    fn holds(self, angle: f32) -> bool {
        match self {
            Past::Above(threshold) => angle > threshold - ANGLE_EPSILON,
            Past::Below(threshold) => angle < threshold + ANGLE_EPSILON,
        }
    }
}

fn jaws_open(angles: &[f32; JOINT_COUNT]) -> bool {
    Past::Above(0.5).holds(angles[JAWS[0]])
        && Past::Below(-0.5).holds(angles[JAWS[1]])
        && Past::Above(0.5).holds(angles[JAWS[2]])
        && Past::Below(-0.5).holds(angles[JAWS[3]])
}

fn jaws_closed(angles: &[f32; JOINT_COUNT]) -> bool {
    Past::Below(0.01).holds(angles[JAWS[0]])
        && Past::Above(-0.01).holds(angles[JAWS[1]])
        && Past::Below(0.01).holds(angles[JAWS[2]])
        && Past::Above(-0.01).holds(angles[JAWS[3]])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcavatorReadings {
    pub angles: [f32; JOINT_COUNT],
    pub floor_free: bool,
    pub pick_wait_ms: Option<f64>,
    pub drop_wait_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcavatorSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending_picks: u32,
    pub tick_pick: Option<u64>,
    pub tick_drop: Option<u64>,
    pub body_handles: Vec<u32>,
    pub joint_handles: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Excavator {
    fsm: Fsm<ExcavatorState>,
    pending_picks: u32,
    tick_pick: Option<u64>,
    tick_drop: Option<u64>,
    /// Base first, then the moving part driven by each joint
    bodies: Vec<BodyHandle>,
    joints: Vec<JointHandle>,
}

impl Excavator {
    pub fn new(world: &mut dyn PhysicsWorld) -> Self {
        let rotation = Quat::from_rotation_y(ROTATION_Y);
        let base = world.create_body(BodyDesc::fixed().at(POSITION).rotated(rotation));
        world.create_collider(
            ColliderDesc::new(ColliderShape::cuboid(0.12, 0.02, 0.12))
                .material(0.5, 0.0, 1.0)
                .groups(CollisionGroups::new(GROUP_STRUCTURE, u32::MAX)),
            base,
        );
        // Moving parts only touch objects so stacked parts never jam each other
        let part_groups = CollisionGroups::new(GROUP_STRUCTURE, GROUP_OBJECTS);
        let mut bodies = vec![base];
        let mut joints = Vec::with_capacity(JOINT_COUNT);
        let mut parent = base;
        for index in 0..JOINT_COUNT {
            let part = world.create_body(
                BodyDesc::dynamic()
                    .at(POSITION + Vec3::Y * 0.02 * (index as f32 + 1.0))
                    .rotated(rotation)
                    .weightless(),
            );
            world.create_collider(
                ColliderDesc::new(ColliderShape::cuboid(0.04, 0.02, 0.04))
                    .material(0.5, 0.0, 50.0)
                    .groups(part_groups),
                part,
            );
            let axis = if index == PLATFORM { Vec3::Y } else { Vec3::X };
            let joint = world.create_revolute_joint(parent, part, axis);
            world.configure_motor_position(joint, 0.0, MOTOR_STIFFNESS, MOTOR_DAMPING);
            world.set_joint_limits(joint, 0.0, 0.0);
            bodies.push(part);
            joints.push(joint);
            // Jaws all hang off the arms
            if index < ARMS + 1 {
                parent = part;
            }
        }
        world.set_rotations_enabled(bodies[PLATFORM + 1], false);
        Self {
            fsm: Fsm::new(ExcavatorState::Idle),
            pending_picks: 0,
            tick_pick: None,
            tick_drop: None,
            bodies,
            joints,
        }
    }

    pub fn pick(&mut self) {
        self.pending_picks += 1;
    }

    pub fn pending_picks(&self) -> u32 {
        self.pending_picks
    }

    pub fn joints(&self) -> &[JointHandle] {
        &self.joints
    }

    fn motor(&self, world: &mut dyn PhysicsWorld, joint: usize, target: f32) {
        if let Some(handle) = self.joints.get(joint) {
            world.configure_motor_position(*handle, target, MOTOR_STIFFNESS, MOTOR_DAMPING);
        }
    }

    fn jaws(&self, world: &mut dyn PhysicsWorld, targets: [f32; 4]) {
        for (joint, target) in JAWS.iter().zip(targets) {
            self.motor(world, *joint, target);
        }
    }

    fn platform_rotations(&self, world: &mut dyn PhysicsWorld, enabled: bool) {
        world.set_rotations_enabled(self.bodies[PLATFORM + 1], enabled);
    }

    pub fn save(&self) -> ExcavatorSave {
        ExcavatorSave {
            fsm: self.fsm.save(),
            pending_picks: self.pending_picks,
            tick_pick: self.tick_pick,
            tick_drop: self.tick_drop,
            body_handles: self.bodies.iter().map(|b| b.0).collect(),
            joint_handles: self.joints.iter().map(|j| j.0).collect(),
        }
    }

    pub fn restored(
        &self,
        save: &ExcavatorSave,
        world: &dyn PhysicsWorld,
    ) -> Result<Self, LoadError> {
        if save.joint_handles.len() != JOINT_COUNT || save.body_handles.len() != JOINT_COUNT + 1 {
            return Err(LoadError::PartCount {
                machine: "excavator",
                expected: JOINT_COUNT,
                found: save.joint_handles.len(),
            });
        }
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "excavator")?,
            pending_picks: save.pending_picks,
            tick_pick: save.tick_pick,
            tick_drop: save.tick_drop,
            bodies: save
                .body_handles
                .iter()
                .map(|h| resolve_body(world, *h))
                .collect::<Result<_, _>>()?,
            joints: save
                .joint_handles
                .iter()
                .map(|h| resolve_joint(world, *h))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Mechanism for Excavator {
    type State = ExcavatorState;
    type Readings = ExcavatorReadings;

    fn id(&self) -> MechanismId {
        MechanismId::Excavator
    }

    fn fsm(&self) -> &Fsm<ExcavatorState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<ExcavatorState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(ExcavatorState::Idle) && self.pending_picks == 0
    }

    fn is_active(&self) -> bool {
        !matches!(
            self.fsm.state(),
            ExcavatorState::Idle | ExcavatorState::Activating
        )
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> ExcavatorReadings {
        let mut angles = [0.0; JOINT_COUNT];
        for (angle, joint) in angles.iter_mut().zip(&self.joints) {
            *angle = ctx.world.joint_angle(*joint).unwrap_or(0.0);
        }
        ExcavatorReadings {
            angles,
            floor_free: ctx.floor_lock.can_proceed(MechanismId::Excavator),
            pick_wait_ms: self.tick_pick.map(|t| ctx.clock.elapsed_ms(t)),
            drop_wait_ms: self.tick_drop.map(|t| ctx.clock.elapsed_ms(t)),
        }
    }

    fn compute_next(&self, r: &ExcavatorReadings) -> Option<ExcavatorState> {
        use ExcavatorState::*;
        let a = &r.angles;
        let waited = |ms: Option<f64>, delay: f64| ms.is_some_and(|ms| ms > delay);
        let next = match self.fsm.state() {
            Idle => self.pending_picks > 0,
            Activating => r.floor_free,
            OpeningJaws => jaws_open(a),
            MovingDown => {
                Past::Above(0.7).holds(a[ARM_PLATFORM])
                    && Past::Below(-0.5).holds(a[ARMS])
                    && waited(r.pick_wait_ms, DELAY_PICK_WAIT_MS)
            }
            Picking => jaws_closed(a),
            MovingUp => Past::Below(-0.5).holds(a[ARM_PLATFORM]) && Past::Above(0.3).holds(a[ARMS]),
            MovingToDropZone => Past::Below(-2.0).holds(a[PLATFORM]),
            ExtendingArms => Past::Above(0.3).holds(a[ARM_PLATFORM]) && Past::Below(0.9).holds(a[ARMS]),
            Dropping => jaws_open(a) && waited(r.drop_wait_ms, DELAY_DROP_WAIT_MS),
            ClosingJaws => jaws_closed(a),
            RetractingArms => {
                Past::Below(-0.4).holds(a[ARM_PLATFORM]) && Past::Above(-0.5).holds(a[ARMS])
            }
            MovingToBase => Past::Above(-0.01).holds(a[PLATFORM]),
            PreparingIdle => {
                Past::Above(-0.01).holds(a[ARM_PLATFORM]) && Past::Below(0.01).holds(a[ARMS])
            }
        };
        if !next {
            return None;
        }
        Some(match self.fsm.state() {
            Idle => Activating,
            Activating => OpeningJaws,
            OpeningJaws => MovingDown,
            MovingDown => Picking,
            Picking => MovingUp,
            MovingUp => MovingToDropZone,
            MovingToDropZone => ExtendingArms,
            ExtendingArms => Dropping,
            Dropping => ClosingJaws,
            ClosingJaws => RetractingArms,
            RetractingArms => MovingToBase,
            MovingToBase => PreparingIdle,
            PreparingIdle if self.pending_picks > 0 => OpeningJaws,
            PreparingIdle => Idle,
        })
    }

    fn enter(&mut self, from: ExcavatorState, to: ExcavatorState, ctx: &mut MechanismContext<'_>) {
        use ExcavatorState::*;
        let world = &mut *ctx.world;
        match to {
            Idle => {
                for joint in &self.joints {
                    world.set_joint_limits(*joint, 0.0, 0.0);
                }
                ctx.floor_lock.release(MechanismId::Excavator);
            }
            Activating => {}
            OpeningJaws => {
                if from == Activating {
                    ctx.floor_lock.acquire(MechanismId::Excavator);
                }
                for (joint, (min, max)) in self.joints.iter().zip(LIMITS) {
                    world.set_joint_limits(*joint, min, max);
                }
                self.jaws(world, JAWS_OPEN);
            }
            MovingDown => {
                self.tick_pick = Some(ctx.clock.tick);
                self.motor(world, ARM_PLATFORM, 0.7);
                self.motor(world, ARMS, -0.5);
            }
            Picking => {
                self.tick_pick = None;
                self.jaws(world, JAWS_CLOSED);
            }
            MovingUp => {
                self.motor(world, ARM_PLATFORM, -0.5);
                self.motor(world, ARMS, 0.3);
            }
            MovingToDropZone => {
                self.platform_rotations(world, true);
                self.motor(world, PLATFORM, -2.0);
            }
            ExtendingArms => {
                self.platform_rotations(world, false);
                self.motor(world, ARM_PLATFORM, 0.3);
                self.motor(world, ARMS, -0.9);
            }
            Dropping => {
                self.tick_drop = Some(ctx.clock.tick);
                self.jaws(world, JAWS_OPEN);
                ctx.events.emit(CabinetEvent::ExcavatorPicked {
                    drop_position: DROP_POSITION,
                });
            }
            ClosingJaws => {
                self.tick_drop = None;
                self.jaws(world, JAWS_CLOSED);
            }
            RetractingArms => {
                self.motor(world, ARM_PLATFORM, -0.5);
                self.motor(world, ARMS, 0.3);
            }
            MovingToBase => {
                self.platform_rotations(world, true);
                self.motor(world, PLATFORM, 0.0);
            }
            PreparingIdle => {
                self.platform_rotations(world, false);
                self.motor(world, ARM_PLATFORM, 0.0);
                self.motor(world, ARMS, 0.0);
                self.pending_picks = self.pending_picks.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::testing::Rig;

    fn readings(angles: [f32; JOINT_COUNT]) -> ExcavatorReadings {
        ExcavatorReadings {
            angles,
            floor_free: true,
            pick_wait_ms: None,
            drop_wait_ms: None,
        }
    }

    #[test]
    fn test_dwell_gates_descent() {
        let mut rig = Rig::new();
        let mut excavator = Excavator::new(&mut rig.world);
        excavator.fsm.request(ExcavatorState::MovingDown);
        excavator.fsm.commit("excavator");
        let mut angles = [0.0; JOINT_COUNT];
        angles[ARM_PLATFORM] = 0.7;
        angles[ARMS] = -0.5;
        let mut r = readings(angles);
        r.pick_wait_ms = Some(1500.0);
        assert_eq!(excavator.compute_next(&r), None);
        r.pick_wait_ms = Some(2001.0);
        assert_eq!(excavator.compute_next(&r), Some(ExcavatorState::Picking));
    }

    #[test]
    fn test_full_cycle() {
        let mut rig = Rig::new();
        let mut excavator = Excavator::new(&mut rig.world);
        excavator.pick();
        let seen = rig.trace(&mut excavator, 2000);
        assert_eq!(
            seen,
            vec![
                ExcavatorState::Idle,
                ExcavatorState::Activating,
                ExcavatorState::OpeningJaws,
                ExcavatorState::MovingDown,
                ExcavatorState::Picking,
                ExcavatorState::MovingUp,
                ExcavatorState::MovingToDropZone,
                ExcavatorState::ExtendingArms,
                ExcavatorState::Dropping,
                ExcavatorState::ClosingJaws,
                ExcavatorState::RetractingArms,
                ExcavatorState::MovingToBase,
                ExcavatorState::PreparingIdle,
                ExcavatorState::Idle,
            ]
        );
        assert!(excavator.is_idle());
        assert!(!rig.lock.is_locked());
        let picks = rig
            .events
            .iter()
            .filter(|e| matches!(e, CabinetEvent::ExcavatorPicked { .. }))
            .count();
        assert_eq!(picks, 1);
    }

    #[test]
    fn test_pending_pick_loops_without_idle() {
        let mut rig = Rig::new();
        let mut excavator = Excavator::new(&mut rig.world);
        excavator.pick();
        excavator.pick();
        let seen = rig.trace(&mut excavator, 4000);
        let idles = seen.iter().filter(|s| **s == ExcavatorState::Idle).count();
        let drops = seen.iter().filter(|s| **s == ExcavatorState::Dropping).count();
        assert_eq!(idles, 2);
        assert_eq!(drops, 2);
        assert_eq!(excavator.pending_picks(), 0);
    }

    #[test]
    fn test_waits_for_floor() {
        let mut rig = Rig::new();
        let mut excavator = Excavator::new(&mut rig.world);
        rig.lock.acquire(MechanismId::Sweepers);
        excavator.pick();
        for _ in 0..100 {
            rig.tick(&mut excavator);
        }
        assert_eq!(excavator.state(), ExcavatorState::Activating);
        rig.lock.release(MechanismId::Sweepers);
        rig.tick(&mut excavator);
        assert_eq!(excavator.state(), ExcavatorState::OpeningJaws);
        assert_eq!(rig.lock.holder(), Some(MechanismId::Excavator));
    }

    #[test]
    fn test_save_restore_mid_cycle() {
        let mut rig = Rig::new();
        let mut excavator = Excavator::new(&mut rig.world);
        excavator.pick();
        rig.run_until(&mut excavator, 2000, |e| e.state() == ExcavatorState::MovingDown)
            .unwrap();
        let save = excavator.save();
        let restored = excavator.restored(&save, &rig.world).unwrap();
        assert_eq!(restored.save(), save);
        let mut truncated = save.clone();
        truncated.joint_handles.pop();
        assert!(excavator.restored(&truncated, &rig.world).is_err());
    }

    #[test]
    fn test_motors_open_jaws_in_rapier_world() {
        use crate::consts::SIM_DT;
        use crate::physics::RapierWorld;

        let mut world = RapierWorld::new();
        let excavator = Excavator::new(&mut world);
        for (joint, (min, max)) in excavator.joints().iter().zip(LIMITS) {
            world.set_joint_limits(*joint, min, max);
        }
        excavator.jaws(&mut world, JAWS_OPEN);
        for _ in 0..300 {
            world.step(SIM_DT);
        }
        let mut angles = [0.0; JOINT_COUNT];
        for (angle, joint) in angles.iter_mut().zip(excavator.joints()) {
            *angle = world.joint_angle(*joint).unwrap_or(f32::NAN);
        }
        assert!(jaws_open(&angles), "jaw angles {:?}", angles);
        assert!(angles[ARMS].abs() < 0.01);
    }
}
