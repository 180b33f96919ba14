//! Deterministic reduced-order physics world for unit tests
//!
//! Enough physics to exercise mechanisms and the cabinet without an engine:
//! - dynamic bodies integrate gravity with linear/angular damping
//! - dynamic bodies come to rest on the top face of solid fixed/kinematic
//!   colliders (axis-aligned support test), with Coulomb-style friction
//! - kinematic bodies adopt their next-transform targets each step
//! - revolute joint angles slew toward their motor target at a rate set by
//!   stiffness/damping, clamped to their limits
//! - sensors report bounding-box overlaps
//! - dynamic bodies hanging off a joint hold their pose
//!
//! There are no dynamic-dynamic contacts and a moving kinematic platform does
//! not carry what rests on it. Bodies, colliders and joints are never
//! removed, so a handle is simply an index and survives a snapshot.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{
    BodyDesc, BodyHandle, BodyKind, ColliderDesc, ColliderHandle, ColliderShape, ColliderTag,
    CollisionGroups, JointHandle, PhysicsError, PhysicsWorld, Pose,
};
use crate::consts::GRAVITY;

/// How far above its previous bottom a support top may be and still catch a body
const SUPPORT_TOLERANCE: f32 = 0.01;
/// Slowest and fastest joint slew rates (rad/s)
const JOINT_MIN_RATE: f32 = 0.5;
const JOINT_MAX_RATE: f32 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxBody {
    kind: BodyKind,
    enabled: bool,
    translation: Vec3,
    rotation: Quat,
    linvel: Vec3,
    angvel: Vec3,
    linear_damping: f32,
    angular_damping: f32,
    soft_ccd_prediction: f32,
    gravity_scale: f32,
    ccd: bool,
    sleeping: bool,
    rotations_enabled: bool,
    next_translation: Option<Vec3>,
    next_rotation: Option<Quat>,
    colliders: Vec<ColliderHandle>,
    mass: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxCollider {
    parent: BodyHandle,
    shape: ColliderShape,
    offset: Vec3,
    friction: f32,
    restitution: f32,
    sensor: bool,
    enabled: bool,
    groups: CollisionGroups,
    tag: Option<ColliderTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxJoint {
    parent: BodyHandle,
    child: BodyHandle,
    axis: Vec3,
    angle: f32,
    target: f32,
    rate: f32,
    limits: Option<(f32, f32)>,
}

impl SandboxJoint {
    fn clamp(&self, value: f32) -> f32 {
        match self.limits {
            Some((min, max)) => value.clamp(min, max),
            None => value,
        }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    fn overlaps_footprint(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// A solid surface something can rest on
#[derive(Debug, Clone, Copy)]
struct Support {
    aabb: Aabb,
    groups: CollisionGroups,
    friction: f32,
}

fn shape_aabb(shape: &ColliderShape, offset: Vec3, translation: Vec3, rotation: Quat) -> Aabb {
    let center = translation + rotation * offset;
    let h = shape.local_half_extents();
    let m = Mat3::from_quat(rotation);
    let half = Vec3::new(
        m.x_axis.x.abs() * h.x + m.y_axis.x.abs() * h.y + m.z_axis.x.abs() * h.z,
        m.x_axis.y.abs() * h.x + m.y_axis.y.abs() * h.y + m.z_axis.y.abs() * h.z,
        m.x_axis.z.abs() * h.x + m.y_axis.z.abs() * h.y + m.z_axis.z.abs() * h.z,
    );
    Aabb {
        min: center - half,
        max: center + half,
    }
}

/// Deterministic in-crate [`PhysicsWorld`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxWorld {
    gravity: Vec3,
    bodies: Vec<SandboxBody>,
    colliders: Vec<SandboxCollider>,
    joints: Vec<SandboxJoint>,
}

impl Default for SandboxWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxWorld {
    pub fn new() -> Self {
        Self {
            gravity: Vec3::new(0.0, GRAVITY, 0.0),
            bodies: Vec::new(),
            colliders: Vec::new(),
            joints: Vec::new(),
        }
    }

    pub fn with_gravity(gravity: Vec3) -> Self {
        Self {
            gravity,
            ..Self::new()
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    fn body(&self, handle: BodyHandle) -> Option<&SandboxBody> {
        self.bodies.get(handle.0 as usize)
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut SandboxBody> {
        self.bodies.get_mut(handle.0 as usize)
    }

    fn collider(&self, handle: ColliderHandle) -> Option<&SandboxCollider> {
        self.colliders.get(handle.0 as usize)
    }

    /// Bounding box of a collider if it and its parent are live
    fn collider_aabb(&self, handle: ColliderHandle) -> Option<Aabb> {
        let collider = self.collider(handle)?;
        if !collider.enabled {
            return None;
        }
        let body = self.body(collider.parent)?;
        if !body.enabled {
            return None;
        }
        Some(shape_aabb(
            &collider.shape,
            collider.offset,
            body.translation,
            body.rotation,
        ))
    }

    /// Union of a body's solid colliders at an arbitrary pose
    fn solid_bounds_at(&self, body: &SandboxBody, translation: Vec3, rotation: Quat) -> Option<(Aabb, CollisionGroups, f32)> {
        let mut bounds: Option<(Aabb, CollisionGroups, f32)> = None;
        for handle in &body.colliders {
            let Some(collider) = self.collider(*handle) else {
                continue;
            };
            if collider.sensor || !collider.enabled {
                continue;
            }
            let aabb = shape_aabb(&collider.shape, collider.offset, translation, rotation);
            bounds = Some(match bounds {
                Some((acc, groups, friction)) => (acc.union(&aabb), groups, friction),
                None => (aabb, collider.groups, collider.friction),
            });
        }
        bounds
    }

    fn collect_supports(&self) -> Vec<Support> {
        let mut supports = Vec::new();
        for (index, collider) in self.colliders.iter().enumerate() {
            if collider.sensor || !collider.enabled {
                continue;
            }
            let Some(body) = self.body(collider.parent) else {
                continue;
            };
            if !body.enabled || body.kind == BodyKind::Dynamic {
                continue;
            }
            if let Some(aabb) = self.collider_aabb(ColliderHandle(index as u32)) {
                supports.push(Support {
                    aabb,
                    groups: collider.groups,
                    friction: collider.friction,
                });
            }
        }
        supports
    }

    fn step_kinematic(body: &mut SandboxBody, dt: f32) {
        match body.next_translation.take() {
            Some(target) => {
                body.linvel = (target - body.translation) / dt;
                body.translation = target;
            }
            None => body.linvel = Vec3::ZERO,
        }
        if let Some(target) = body.next_rotation.take() {
            body.rotation = target.normalize();
        }
        body.angvel = Vec3::ZERO;
    }

    fn step_dynamic(&self, mut body: SandboxBody, supports: &[Support], dt: f32) -> SandboxBody {
        if let Some(target) = body.next_translation.take() {
            body.translation = target;
            body.linvel = Vec3::ZERO;
            if let Some(rotation) = body.next_rotation.take() {
                body.rotation = rotation.normalize();
            }
            return body;
        }
        let Some((before, groups, friction)) =
            self.solid_bounds_at(&body, body.translation, body.rotation)
        else {
            return body;
        };

        if body.sleeping {
            let supported = supports.iter().any(|s| {
                s.groups.interacts_with(&groups)
                    && s.aabb.overlaps_footprint(&before)
                    && (s.aabb.max.y - before.min.y).abs() <= SUPPORT_TOLERANCE
            });
            if supported {
                return body;
            }
            body.sleeping = false;
        }

        body.linvel += self.gravity * body.gravity_scale * dt;
        body.linvel *= 1.0 / (1.0 + dt * body.linear_damping);
        body.angvel *= 1.0 / (1.0 + dt * body.angular_damping);
        body.translation += body.linvel * dt;
        if body.rotations_enabled && body.angvel.length_squared() > 0.0 {
            body.rotation = (Quat::from_scaled_axis(body.angvel * dt) * body.rotation).normalize();
        }

        let Some((after, _, _)) = self.solid_bounds_at(&body, body.translation, body.rotation)
        else {
            return body;
        };
        let mut best: Option<&Support> = None;
        for support in supports {
            if !support.groups.interacts_with(&groups) || !support.aabb.overlaps_footprint(&after) {
                continue;
            }
            let top = support.aabb.max.y;
            if top <= before.min.y + SUPPORT_TOLERANCE && top > after.min.y {
                if best.is_none_or(|b| top > b.aabb.max.y) {
                    best = Some(support);
                }
            }
        }
        if let Some(support) = best {
            body.translation.y += support.aabb.max.y - after.min.y;
            if body.linvel.y < 0.0 {
                body.linvel.y = 0.0;
            }
            let mu = (friction + support.friction) * 0.5;
            let horizontal = Vec3::new(body.linvel.x, 0.0, body.linvel.z);
            let speed = horizontal.length();
            if speed > 0.0 {
                let slowed = (speed - mu * GRAVITY.abs() * dt).max(0.0);
                let scaled = horizontal * (slowed / speed);
                body.linvel.x = scaled.x;
                body.linvel.z = scaled.z;
            }
        }
        body
    }
}

impl PhysicsWorld for SandboxWorld {
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(SandboxBody {
            kind: desc.kind,
            enabled: desc.enabled,
            translation: desc.translation,
            rotation: desc.rotation,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
            linear_damping: desc.linear_damping,
            angular_damping: desc.angular_damping,
            soft_ccd_prediction: desc.soft_ccd_prediction,
            gravity_scale: desc.gravity_scale,
            ccd: false,
            sleeping: false,
            rotations_enabled: true,
            next_translation: None,
            next_rotation: None,
            colliders: Vec::new(),
            mass: 0.0,
        });
        handle
    }

    fn create_collider(&mut self, desc: ColliderDesc, parent: BodyHandle) -> ColliderHandle {
        let handle = ColliderHandle(self.colliders.len() as u32);
        self.colliders.push(SandboxCollider {
            parent,
            shape: desc.shape,
            offset: desc.offset,
            friction: desc.friction,
            restitution: desc.restitution,
            sensor: desc.sensor,
            enabled: true,
            groups: desc.groups,
            tag: desc.tag,
        });
        if let Some(body) = self.body_mut(parent) {
            body.colliders.push(handle);
            if !desc.sensor {
                body.mass += desc.density * desc.shape.volume();
            }
        }
        handle
    }

    fn create_revolute_joint(
        &mut self,
        parent: BodyHandle,
        child: BodyHandle,
        axis: Vec3,
    ) -> JointHandle {
        let handle = JointHandle(self.joints.len() as u32);
        self.joints.push(SandboxJoint {
            parent,
            child,
            axis: axis.normalize_or_zero(),
            angle: 0.0,
            target: 0.0,
            rate: JOINT_MIN_RATE,
            limits: None,
        });
        handle
    }

    fn contains_body(&self, body: BodyHandle) -> bool {
        (body.0 as usize) < self.bodies.len()
    }

    fn contains_collider(&self, collider: ColliderHandle) -> bool {
        (collider.0 as usize) < self.colliders.len()
    }

    fn contains_joint(&self, joint: JointHandle) -> bool {
        (joint.0 as usize) < self.joints.len()
    }

    fn body_colliders(&self, body: BodyHandle) -> Vec<ColliderHandle> {
        self.body(body).map(|b| b.colliders.clone()).unwrap_or_default()
    }

    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle> {
        self.collider(collider).map(|c| c.parent)
    }

    fn set_body_enabled(&mut self, body: BodyHandle, enabled: bool) {
        if let Some(b) = self.body_mut(body) {
            b.enabled = enabled;
            if enabled {
                b.sleeping = false;
            }
        }
    }

    fn is_body_enabled(&self, body: BodyHandle) -> bool {
        self.body(body).is_some_and(|b| b.enabled)
    }

    fn pose(&self, body: BodyHandle) -> Option<Pose> {
        self.body(body).map(|b| Pose {
            translation: b.translation,
            rotation: b.rotation,
        })
    }

    fn set_pose(&mut self, body: BodyHandle, pose: Pose) {
        if let Some(b) = self.body_mut(body) {
            b.translation = pose.translation;
            b.rotation = pose.rotation;
            b.next_translation = None;
            b.next_rotation = None;
            b.sleeping = false;
        }
    }

    fn set_next_kinematic_translation(&mut self, body: BodyHandle, translation: Vec3) {
        if let Some(b) = self.body_mut(body) {
            b.next_translation = Some(translation);
        }
    }

    fn set_next_kinematic_rotation(&mut self, body: BodyHandle, rotation: Quat) {
        if let Some(b) = self.body_mut(body) {
            b.next_rotation = Some(rotation);
        }
    }

    fn linvel(&self, body: BodyHandle) -> Option<Vec3> {
        self.body(body).map(|b| b.linvel)
    }

    fn angvel(&self, body: BodyHandle) -> Option<Vec3> {
        self.body(body).map(|b| b.angvel)
    }

    fn set_linvel(&mut self, body: BodyHandle, linvel: Vec3) {
        if let Some(b) = self.body_mut(body) {
            b.linvel = linvel;
            if linvel != Vec3::ZERO {
                b.sleeping = false;
            }
        }
    }

    fn set_angvel(&mut self, body: BodyHandle, angvel: Vec3) {
        if let Some(b) = self.body_mut(body) {
            b.angvel = angvel;
            if angvel != Vec3::ZERO {
                b.sleeping = false;
            }
        }
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) {
        if let Some(b) = self.body_mut(body) {
            if b.kind == BodyKind::Dynamic && b.mass > 0.0 {
                b.linvel += impulse / b.mass;
                b.sleeping = false;
            }
        }
    }

    fn mass(&self, body: BodyHandle) -> f32 {
        self.body(body).map(|b| b.mass).unwrap_or(0.0)
    }

    fn sleep(&mut self, body: BodyHandle) {
        if let Some(b) = self.body_mut(body) {
            if b.kind == BodyKind::Dynamic {
                b.sleeping = true;
                b.linvel = Vec3::ZERO;
                b.angvel = Vec3::ZERO;
            }
        }
    }

    fn wake_up(&mut self, body: BodyHandle) {
        if let Some(b) = self.body_mut(body) {
            b.sleeping = false;
        }
    }

    fn is_sleeping(&self, body: BodyHandle) -> bool {
        self.body(body).is_some_and(|b| b.sleeping)
    }

    fn set_soft_ccd_prediction(&mut self, body: BodyHandle, prediction: f32) {
        if let Some(b) = self.body_mut(body) {
            b.soft_ccd_prediction = prediction;
        }
    }

    fn enable_ccd(&mut self, body: BodyHandle, enabled: bool) {
        if let Some(b) = self.body_mut(body) {
            b.ccd = enabled;
        }
    }

    fn set_rotations_enabled(&mut self, body: BodyHandle, enabled: bool) {
        if let Some(b) = self.body_mut(body) {
            b.rotations_enabled = enabled;
            if !enabled {
                b.angvel = Vec3::ZERO;
            }
        }
    }

    fn set_collider_enabled(&mut self, collider: ColliderHandle, enabled: bool) {
        if let Some(c) = self.colliders.get_mut(collider.0 as usize) {
            c.enabled = enabled;
        }
    }

    fn set_collision_groups(&mut self, collider: ColliderHandle, groups: CollisionGroups) {
        if let Some(c) = self.colliders.get_mut(collider.0 as usize) {
            c.groups = groups;
        }
    }

    fn collider_tag(&self, collider: ColliderHandle) -> Option<ColliderTag> {
        self.collider(collider).and_then(|c| c.tag)
    }

    fn set_collider_tag(&mut self, collider: ColliderHandle, tag: Option<ColliderTag>) {
        if let Some(c) = self.colliders.get_mut(collider.0 as usize) {
            c.tag = tag;
        }
    }

    fn configure_motor_position(
        &mut self,
        joint: JointHandle,
        target: f32,
        stiffness: f32,
        damping: f32,
    ) {
        if let Some(j) = self.joints.get_mut(joint.0 as usize) {
            j.target = target;
            j.rate = (stiffness / damping.max(1.0)).clamp(JOINT_MIN_RATE, JOINT_MAX_RATE);
        }
    }

    fn set_joint_limits(&mut self, joint: JointHandle, min: f32, max: f32) {
        if let Some(j) = self.joints.get_mut(joint.0 as usize) {
            j.limits = Some((min.min(max), min.max(max)));
            j.angle = j.clamp(j.angle);
        }
    }

    fn joint_angle(&self, joint: JointHandle) -> Option<f32> {
        self.joints.get(joint.0 as usize).map(|j| j.angle)
    }

    fn sensor_colliders(&self) -> Vec<ColliderHandle> {
        (0..self.colliders.len())
            .map(|i| ColliderHandle(i as u32))
            .filter(|h| {
                self.collider(*h).is_some_and(|c| c.sensor) && self.collider_aabb(*h).is_some()
            })
            .collect()
    }

    fn intersections_with(&self, collider: ColliderHandle) -> Vec<ColliderHandle> {
        let Some(this) = self.collider(collider) else {
            return Vec::new();
        };
        let Some(aabb) = self.collider_aabb(collider) else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        for (index, other) in self.colliders.iter().enumerate() {
            let handle = ColliderHandle(index as u32);
            if handle == collider || other.sensor || other.parent == this.parent {
                continue;
            }
            if !this.groups.interacts_with(&other.groups) {
                continue;
            }
            if let Some(other_aabb) = self.collider_aabb(handle) {
                if aabb.overlaps(&other_aabb) {
                    hits.push(handle);
                }
            }
        }
        hits
    }

    fn step(&mut self, dt: f32) {
        for body in self.bodies.iter_mut() {
            if body.enabled && body.kind == BodyKind::Kinematic {
                Self::step_kinematic(body, dt);
            }
        }
        for joint in self.joints.iter_mut() {
            let target = joint.clamp(joint.target);
            joint.angle = joint.clamp(crate::approach(joint.angle, target, joint.rate * dt));
        }
        let supports = self.collect_supports();
        for index in 0..self.bodies.len() {
            let body = &self.bodies[index];
            if !body.enabled || body.kind != BodyKind::Dynamic {
                continue;
            }
            if self.joints.iter().any(|j| j.child.0 as usize == index) {
                continue;
            }
            let stepped = self.step_dynamic(body.clone(), &supports, dt);
            self.bodies[index] = stepped;
        }
    }

    fn snapshot(&self) -> Result<Vec<u8>, PhysicsError> {
        bincode::serialize(self).map_err(PhysicsError::Encode)
    }

    fn from_snapshot(bytes: &[u8]) -> Result<Self, PhysicsError> {
        bincode::deserialize(bytes).map_err(PhysicsError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIM_DT;
    use crate::physics::{CollisionGroups, GROUP_OBJECTS, SensorId};

    fn floor(world: &mut SandboxWorld, top: f32) -> BodyHandle {
        let body = world.create_body(BodyDesc::fixed().at(Vec3::new(0.0, top - 0.05, 0.0)));
        world.create_collider(ColliderDesc::new(ColliderShape::cuboid(2.0, 0.1, 2.0)), body);
        body
    }

    fn coin(world: &mut SandboxWorld, at: Vec3) -> BodyHandle {
        let body = world.create_body(BodyDesc::dynamic().at(at));
        world.create_collider(
            ColliderDesc::new(ColliderShape::Cylinder {
                half_height: 0.0025,
                radius: 0.03,
            }),
            body,
        );
        body
    }

    #[test]
    fn test_body_comes_to_rest_on_floor() {
        let mut world = SandboxWorld::new();
        floor(&mut world, 0.2);
        let body = coin(&mut world, Vec3::new(0.0, 0.6, 0.0));
        for _ in 0..120 {
            world.step(SIM_DT);
        }
        let pose = world.pose(body).unwrap();
        assert!((pose.translation.y - 0.2025).abs() < 1e-4);
        assert!(world.linvel(body).unwrap().y.abs() < 1e-6);
    }

    #[test]
    fn test_body_falls_without_support() {
        let mut world = SandboxWorld::new();
        let body = coin(&mut world, Vec3::new(0.0, 1.0, 0.0));
        for _ in 0..60 {
            world.step(SIM_DT);
        }
        assert!(world.pose(body).unwrap().translation.y < -2.0);
    }

    #[test]
    fn test_disabled_body_does_not_move() {
        let mut world = SandboxWorld::new();
        let body = coin(&mut world, Vec3::new(0.0, 1.0, 0.0));
        world.set_body_enabled(body, false);
        world.step(SIM_DT);
        assert_eq!(world.pose(body).unwrap().translation, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_kinematic_adopts_target() {
        let mut world = SandboxWorld::new();
        let body = world.create_body(BodyDesc::kinematic());
        world.set_next_kinematic_translation(body, Vec3::new(0.0, 0.0, 0.1));
        world.step(SIM_DT);
        assert_eq!(world.pose(body).unwrap().translation, Vec3::new(0.0, 0.0, 0.1));
        world.step(SIM_DT);
        assert_eq!(world.linvel(body).unwrap(), Vec3::ZERO);
    }

    #[test]
    fn test_joint_converges_to_target_within_limits() {
        let mut world = SandboxWorld::new();
        let a = world.create_body(BodyDesc::kinematic());
        let b = world.create_body(BodyDesc::dynamic());
        let joint = world.create_revolute_joint(a, b, Vec3::X);
        world.configure_motor_position(joint, 1.0, 50000.0, 20000.0);
        for _ in 0..60 {
            world.step(SIM_DT);
        }
        assert!((world.joint_angle(joint).unwrap() - 1.0).abs() < 1e-5);

        world.set_joint_limits(joint, -0.5, 0.5);
        assert!((world.joint_angle(joint).unwrap() - 0.5).abs() < 1e-6);
        world.configure_motor_position(joint, -3.0, 50000.0, 20000.0);
        for _ in 0..120 {
            world.step(SIM_DT);
        }
        assert!((world.joint_angle(joint).unwrap() + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sensor_reports_overlap() {
        let mut world = SandboxWorld::new();
        let holder = world.create_body(BodyDesc::fixed());
        let sensor = world.create_collider(
            ColliderDesc::sensor(ColliderShape::cuboid(1.0, 0.1, 1.0), SensorId::Gutter),
            holder,
        );
        let body = coin(&mut world, Vec3::new(0.0, 0.5, 0.0));
        assert!(world.intersections_with(sensor).is_empty());
        world.set_pose(
            body,
            Pose {
                translation: Vec3::ZERO,
                rotation: Quat::IDENTITY,
            },
        );
        let hits = world.intersections_with(sensor);
        assert_eq!(hits, world.body_colliders(body));
        assert_eq!(world.sensor_colliders(), vec![sensor]);
    }

    #[test]
    fn test_sensor_respects_groups() {
        let mut world = SandboxWorld::new();
        let holder = world.create_body(BodyDesc::fixed());
        let sensor = world.create_collider(
            ColliderDesc::sensor(ColliderShape::cuboid(1.0, 1.0, 1.0), SensorId::Gutter)
                .groups(CollisionGroups::new(u32::MAX, !GROUP_OBJECTS)),
            holder,
        );
        let body = world.create_body(BodyDesc::dynamic());
        world.create_collider(
            ColliderDesc::new(ColliderShape::Ball { radius: 0.1 })
                .groups(CollisionGroups::new(GROUP_OBJECTS, u32::MAX)),
            body,
        );
        assert!(world.intersections_with(sensor).is_empty());
    }

    #[test]
    fn test_impulse_uses_mass() {
        let mut world = SandboxWorld::with_gravity(Vec3::ZERO);
        let body = coin(&mut world, Vec3::ZERO);
        let mass = world.mass(body);
        assert!(mass > 0.0);
        world.apply_impulse(body, Vec3::new(0.0, 0.0, -mass * 2.0));
        assert!((world.linvel(body).unwrap().z + 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_sleeping_body_wakes_when_support_leaves() {
        let mut world = SandboxWorld::new();
        let plate = world.create_body(BodyDesc::kinematic().at(Vec3::new(0.0, -0.05, 0.0)));
        world.create_collider(ColliderDesc::new(ColliderShape::cuboid(0.2, 0.1, 0.2)), plate);
        let body = coin(&mut world, Vec3::new(0.0, 0.0025, 0.0));
        world.sleep(body);
        world.step(SIM_DT);
        assert!(world.is_sleeping(body));
        world.set_next_kinematic_translation(plate, Vec3::new(0.0, -0.05, 1.0));
        world.step(SIM_DT);
        world.step(SIM_DT);
        assert!(!world.is_sleeping(body));
        assert!(world.pose(body).unwrap().translation.y < 0.0);
    }

    #[test]
    fn test_snapshot_preserves_handles() {
        let mut world = SandboxWorld::new();
        floor(&mut world, 0.0);
        let body = coin(&mut world, Vec3::new(0.1, 0.3, 0.0));
        world.step(SIM_DT);
        let bytes = world.snapshot().unwrap();
        let restored = SandboxWorld::from_snapshot(&bytes).unwrap();
        assert_eq!(restored.pose(body), world.pose(body));
        assert_eq!(restored.body_colliders(body), world.body_colliders(body));
        assert!(SandboxWorld::from_snapshot(b"garbage").is_err());
    }

    #[test]
    fn test_stale_handles_are_ignored() {
        let mut world = SandboxWorld::new();
        let stale = BodyHandle(99);
        world.set_linvel(stale, Vec3::ONE);
        world.apply_impulse(stale, Vec3::ONE);
        assert!(world.pose(stale).is_none());
        assert!(!world.contains_body(stale));
        assert_eq!(world.mass(stale), 0.0);
    }
}
