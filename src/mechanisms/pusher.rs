//! Pusher platform and bonus door
//!
//! The platform slides back and forth along z on a sine. A bonus delivery
//! parks it at its back-most position, slides the door open, hands out the
//! reward, closes the door, and then resumes the sine exactly where it left
//! off by pushing the stopped interval into the time offset.

use std::collections::VecDeque;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::lights::LightsSave;
use super::{
    Fsm, FsmSave, Lights, LightsCue, Mechanism, MechanismContext, MechanismId, resolve_body,
};
use crate::cabinet::events::CabinetEvent;
use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, CollisionGroups, GROUP_STRUCTURE,
    PhysicsWorld, euler,
};
use crate::pool::Reward;

const SPEED: f64 = 2.0;
pub const DISTANCE: f32 = 0.1075;
const WIDTH: f32 = 0.6;
const HEIGHT: f32 = 0.055;
const DEPTH: f32 = 0.6;
const WALL: f32 = 0.005;
const EDGE: f32 = 0.005;
const FRICTION: f32 = 0.0;
const RESTITUTION: f32 = 0.05;
pub const POSITION: Vec3 = Vec3::new(0.0, 0.21, -0.22);
const START_ANGLE: f64 = std::f64::consts::FRAC_PI_4;
const PRECISION: f32 = 0.0001;
const DOOR_SPEED: f32 = 0.003;
const DOOR_SOFT_CCD_PREDICTION: f32 = 0.001;
/// Door travel past which the reward can drop
const DOOR_OPEN: f32 = POSITION.z + DEPTH;
pub const DELIVERY_POSITION: Vec3 = Vec3::new(0.0, 0.215, -0.25);
const LIGHT_COUNT: usize = 8;

state_names! {
    pub enum PusherState {
        Moving => "pusher-moving",
        PreparingDelivery => "pusher-preparing-delivery",
        OpeningDoor => "pusher-opening-door",
        DeliveringBonus => "pusher-delivering-bonus",
        ClosingDoor => "pusher-closing-door",
    }
}

/// Platform z on the sine at pusher time `t` (ms)
pub fn platform_z(t: f64) -> f32 {
    ((t / 1000.0 * SPEED + START_ANGLE).sin() as f32) * DISTANCE + POSITION.z
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PusherReadings {
    /// Pusher time: simulation time minus every stopped interval
    pub time: f64,
    pub door_position: f32,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusherSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending_rewards: Vec<Reward>,
    pub time_offset: f64,
    pub time_platform_stopped: Option<f64>,
    pub platform_position: f32,
    pub door_position: f32,
    pub platform_handle: u32,
    pub door_handle: u32,
    pub lights: LightsSave,
}

#[derive(Debug, Clone)]
pub struct Pusher {
    fsm: Fsm<PusherState>,
    pending_rewards: VecDeque<Reward>,
    time_offset: f64,
    time_platform_stopped: Option<f64>,
    platform_z: f32,
    door_position: f32,
    platform: BodyHandle,
    door: BodyHandle,
    lights: Lights,
}

impl Pusher {
    pub fn new(world: &mut dyn PhysicsWorld) -> Self {
        let groups = CollisionGroups::new(GROUP_STRUCTURE, u32::MAX);
        let platform = world.create_body(BodyDesc::kinematic().at(POSITION));
        let part = |shape: ColliderShape, offset: Vec3| {
            ColliderDesc::new(shape)
                .offset(offset)
                .material(FRICTION, RESTITUTION, 1.0)
                .groups(groups)
        };
        world.create_collider(
            part(
                ColliderShape::cuboid(WIDTH, WALL, DEPTH),
                Vec3::new(0.0, (HEIGHT - WALL) / 2.0, 0.0),
            ),
            platform,
        );
        for side in [-1.0, 1.0] {
            world.create_collider(
                part(
                    ColliderShape::cuboid(WALL, HEIGHT - WALL, DEPTH),
                    Vec3::new(side * (WIDTH - WALL) / 2.0, -WALL / 2.0, 0.0),
                ),
                platform,
            );
        }
        world.create_collider(
            part(
                ColliderShape::cuboid(WIDTH, EDGE, EDGE),
                Vec3::new(0.0, HEIGHT / 2.0 - WALL, DEPTH / 2.0),
            ),
            platform,
        );

        let door = world.create_body(
            BodyDesc::kinematic()
                .at(POSITION)
                .soft_ccd(DOOR_SOFT_CCD_PREDICTION)
                .rotated(euler(Vec3::ZERO)),
        );
        world.create_collider(
            part(
                ColliderShape::cuboid(WIDTH - WALL * 2.0, HEIGHT - WALL, WALL),
                Vec3::new(0.0, -WALL / 2.0, (DEPTH - WALL) / 2.0),
            ),
            door,
        );

        Self {
            fsm: Fsm::new(PusherState::Moving),
            pending_rewards: VecDeque::new(),
            time_offset: 0.0,
            time_platform_stopped: None,
            platform_z: POSITION.z,
            door_position: 0.0,
            platform,
            door,
            lights: Lights::new(LIGHT_COUNT),
        }
    }

    /// Queue a reward; deliveries are served in order
    pub fn deliver_bonus(&mut self, reward: Reward) {
        log::info!("pusher bonus queued: {:?}", reward);
        self.pending_rewards.push_back(reward);
        if self.fsm.is(PusherState::Moving) && self.fsm.next().is_none() {
            self.fsm.request(PusherState::PreparingDelivery);
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(POSITION.x, POSITION.y, self.platform_z)
    }

    pub fn door_position(&self) -> f32 {
        self.door_position
    }

    pub fn pending_rewards(&self) -> usize {
        self.pending_rewards.len()
    }

    pub fn lights(&self) -> &Lights {
        &self.lights
    }

    /// Sine phase in [0, 2π) at simulation time `now_ms`
    pub fn phase(&self, now_ms: f64) -> f64 {
        let t = now_ms - self.time_offset;
        (t / 1000.0 * SPEED + START_ANGLE).rem_euclid(std::f64::consts::TAU)
    }

    pub fn platform_body(&self) -> BodyHandle {
        self.platform
    }

    pub fn save(&self) -> PusherSave {
        PusherSave {
            fsm: self.fsm.save(),
            pending_rewards: self.pending_rewards.iter().copied().collect(),
            time_offset: self.time_offset,
            time_platform_stopped: self.time_platform_stopped,
            platform_position: self.platform_z,
            door_position: self.door_position,
            platform_handle: self.platform.0,
            door_handle: self.door.0,
            lights: self.lights.save(),
        }
    }

    pub fn restored(&self, save: &PusherSave, world: &dyn PhysicsWorld) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "pusher")?,
            pending_rewards: save.pending_rewards.iter().copied().collect(),
            time_offset: save.time_offset,
            time_platform_stopped: save.time_platform_stopped,
            platform_z: save.platform_position,
            door_position: save.door_position,
            platform: resolve_body(world, save.platform_handle)?,
            door: resolve_body(world, save.door_handle)?,
            lights: self.lights.restored(&save.lights)?,
        })
    }
}

impl Mechanism for Pusher {
    type State = PusherState;
    type Readings = PusherReadings;

    fn id(&self) -> MechanismId {
        MechanismId::Pusher
    }

    fn fsm(&self) -> &Fsm<PusherState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<PusherState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(PusherState::Moving) && self.pending_rewards.is_empty()
    }

    fn is_active(&self) -> bool {
        false
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> PusherReadings {
        PusherReadings {
            time: ctx.clock.now_ms() - self.time_offset,
            door_position: self.door_position,
            pending: self.pending_rewards.len(),
        }
    }

    fn compute_next(&self, r: &PusherReadings) -> Option<PusherState> {
        match self.fsm.state() {
            PusherState::Moving => (r.pending > 0).then_some(PusherState::PreparingDelivery),
            PusherState::PreparingDelivery => (platform_z(r.time)
                < POSITION.z - DISTANCE + PRECISION)
                .then_some(PusherState::OpeningDoor),
            PusherState::OpeningDoor => {
                (r.door_position > DOOR_OPEN).then_some(PusherState::DeliveringBonus)
            }
            PusherState::DeliveringBonus => Some(PusherState::ClosingDoor),
            PusherState::ClosingDoor => {
                if r.door_position > PRECISION {
                    None
                } else if r.pending > 1 {
                    Some(PusherState::PreparingDelivery)
                } else {
                    Some(PusherState::Moving)
                }
            }
        }
    }

    fn drive(&mut self, r: &PusherReadings, _ctx: &mut MechanismContext<'_>) {
        match self.fsm.state() {
            PusherState::Moving | PusherState::PreparingDelivery => {
                self.platform_z = platform_z(r.time);
            }
            PusherState::OpeningDoor => self.door_position += DOOR_SPEED,
            PusherState::ClosingDoor => self.door_position -= DOOR_SPEED,
            PusherState::DeliveringBonus => {}
        }
    }

    fn enter(&mut self, from: PusherState, to: PusherState, ctx: &mut MechanismContext<'_>) {
        let time = ctx.clock.now_ms() - self.time_offset;
        match to {
            PusherState::OpeningDoor => {
                self.platform_z = POSITION.z - DISTANCE;
                self.time_platform_stopped = Some(time);
            }
            PusherState::DeliveringBonus => {
                if let Some(reward) = self.pending_rewards.front() {
                    ctx.events.emit(CabinetEvent::PusherBonusDelivered {
                        reward: *reward,
                        position: DELIVERY_POSITION,
                    });
                }
            }
            PusherState::Moving | PusherState::PreparingDelivery
                if from == PusherState::ClosingDoor =>
            {
                if let Some(stopped) = self.time_platform_stopped.take() {
                    self.time_offset += time - stopped;
                }
                self.door_position = 0.0;
                self.pending_rewards.pop_front();
            }
            _ => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        let position = self.position();
        ctx.world.set_next_kinematic_translation(self.platform, position);
        ctx.world.set_next_kinematic_translation(
            self.door,
            Vec3::new(position.x, position.y, position.z - self.door_position),
        );
        let cue = if self.fsm.is(PusherState::Moving) {
            LightsCue::Rotate
        } else {
            LightsCue::Deliver
        };
        self.lights.update(cue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabinet::events::EventKind;
    use crate::mechanisms::testing::Rig;

    fn back_time() -> f64 {
        (3.0 * std::f64::consts::FRAC_PI_2 - START_ANGLE) / SPEED * 1000.0
    }

    #[test]
    fn test_platform_follows_sine() {
        assert!((platform_z(0.0) - (POSITION.z + DISTANCE * 0.70710677)).abs() < 1e-5);
        assert!((platform_z(back_time()) - (POSITION.z - DISTANCE)).abs() < 1e-6);
    }

    #[test]
    fn test_compute_next_waits_for_back_position() {
        let mut rig = Rig::new();
        let mut pusher = Pusher::new(&mut rig.world);
        pusher.deliver_bonus(Reward::coins(3));
        rig.tick(&mut pusher);
        assert_eq!(pusher.state(), PusherState::PreparingDelivery);
        let readings = PusherReadings {
            time: 0.0,
            door_position: 0.0,
            pending: 1,
        };
        assert_eq!(pusher.compute_next(&readings), None);
        let readings = PusherReadings {
            time: back_time(),
            ..readings
        };
        assert_eq!(pusher.compute_next(&readings), Some(PusherState::OpeningDoor));
    }

    #[test]
    fn test_delivery_cycle_emits_once_and_resumes() {
        let mut rig = Rig::new();
        let mut pusher = Pusher::new(&mut rig.world);
        pusher.deliver_bonus(Reward::coins(10));
        let seen = rig.trace(&mut pusher, 1000);
        assert_eq!(
            seen,
            vec![
                PusherState::Moving,
                PusherState::PreparingDelivery,
                PusherState::OpeningDoor,
                PusherState::DeliveringBonus,
                PusherState::ClosingDoor,
                PusherState::Moving,
            ]
        );
        let delivered = rig
            .events
            .iter()
            .filter(|e| e.kind() == EventKind::PusherBonusDelivered)
            .count();
        assert_eq!(delivered, 1);
        assert_eq!(pusher.pending_rewards(), 0);
        assert_eq!(pusher.door_position(), 0.0);
    }

    #[test]
    fn test_resumes_from_back_position() {
        let mut rig = Rig::new();
        let mut pusher = Pusher::new(&mut rig.world);
        pusher.deliver_bonus(Reward::coins(1));
        rig.tick(&mut pusher);
        rig.run_until(&mut pusher, 3000, |p| p.is_idle()).unwrap();
        rig.tick(&mut pusher);
        assert!((pusher.position().z - (POSITION.z - DISTANCE)).abs() < 0.002);
    }

    #[test]
    fn test_queued_rewards_delivered_in_order() {
        let mut rig = Rig::new();
        let mut pusher = Pusher::new(&mut rig.world);
        pusher.deliver_bonus(Reward::coins(1));
        pusher.deliver_bonus(Reward::coins(2));
        pusher.deliver_bonus(Reward::coins(3));
        rig.tick(&mut pusher);
        rig.run_until(&mut pusher, 8000, |p| p.is_idle()).unwrap();
        let coins: Vec<u32> = rig
            .events
            .iter()
            .filter_map(|e| match e {
                CabinetEvent::PusherBonusDelivered { reward, .. } => Some(reward.coins),
                _ => None,
            })
            .collect();
        assert_eq!(coins, vec![1, 2, 3]);
    }

    #[test]
    fn test_door_follows_platform() {
        let mut rig = Rig::new();
        let mut pusher = Pusher::new(&mut rig.world);
        pusher.deliver_bonus(Reward::coins(1));
        rig.run_until(&mut pusher, 3000, |p| {
            p.state() == PusherState::OpeningDoor && p.door_position() > 0.1
        })
        .unwrap();
        let platform = rig.world.pose(pusher.platform).unwrap().translation;
        let door = rig.world.pose(pusher.door).unwrap().translation;
        assert!((platform.z - door.z - pusher.door_position()).abs() < DOOR_SPEED * 1.5);
    }

    #[test]
    fn test_save_restore_mid_delivery() {
        let mut rig = Rig::new();
        let mut pusher = Pusher::new(&mut rig.world);
        pusher.deliver_bonus(Reward::coins(4));
        rig.run_until(&mut pusher, 3000, |p| p.state() == PusherState::OpeningDoor)
            .unwrap();
        for _ in 0..10 {
            rig.tick(&mut pusher);
        }
        let save = pusher.save();
        let restored = pusher.restored(&save, &rig.world).unwrap();
        assert_eq!(restored.save(), save);
        assert_eq!(restored.state(), PusherState::OpeningDoor);

        let mut broken = save.clone();
        broken.fsm.state = "pusher-flying".into();
        assert!(pusher.restored(&broken, &rig.world).is_err());
    }
}
