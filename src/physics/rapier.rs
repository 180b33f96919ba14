//! rapier3d-backed physics world
//!
//! Our handles index side tables of rapier handles. Nothing is ever removed
//! from the world, so a handle keeps naming the same rapier object across a
//! snapshot round trip. Rapier user data carries our own index back out of
//! narrow-phase queries.

use glam::{Quat, Vec3};
use rapier3d::na::{Isometry3, Point3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};
use rapier3d::prelude::{
    CCDSolver, Collider, ColliderBuilder, ColliderHandle as RapierColliderHandle, ColliderSet,
    DefaultBroadPhase, Group, ImpulseJoint, ImpulseJointHandle, ImpulseJointSet,
    IntegrationParameters, InteractionGroups, IslandManager, JointAxis, MultibodyJointSet,
    NarrowPhase, PhysicsPipeline, RevoluteJointBuilder, RigidBody, RigidBodyBuilder,
    RigidBodyHandle, RigidBodySet,
};
use serde::{Deserialize, Serialize};

use super::{
    BodyDesc, BodyHandle, BodyKind, ColliderDesc, ColliderHandle, ColliderShape, ColliderTag,
    CollisionGroups, JointHandle, PhysicsError, PhysicsWorld, Pose,
};
use crate::consts::GRAVITY;

#[inline]
fn to_vector(v: Vec3) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

#[inline]
fn from_vector(v: &Vector3<f32>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

#[inline]
fn to_rotation(q: Quat) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

#[inline]
fn from_rotation(q: &UnitQuaternion<f32>) -> Quat {
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

fn to_isometry(translation: Vec3, rotation: Quat) -> Isometry3<f32> {
    Isometry3::from_parts(
        Translation3::new(translation.x, translation.y, translation.z),
        to_rotation(rotation),
    )
}

fn to_groups(groups: CollisionGroups) -> InteractionGroups {
    InteractionGroups::new(
        Group::from_bits_truncate(groups.memberships),
        Group::from_bits_truncate(groups.filter),
    )
}

/// Signed rotation of `relative` around the unit `axis`, in (-π, π]
pub(crate) fn twist_angle(relative: Quat, axis: Vec3) -> f32 {
    let along = Vec3::new(relative.x, relative.y, relative.z).dot(axis);
    let angle = 2.0 * along.atan2(relative.w);
    if angle > std::f32::consts::PI {
        angle - std::f32::consts::TAU
    } else if angle <= -std::f32::consts::PI {
        angle + std::f32::consts::TAU
    } else {
        angle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JointRecord {
    handle: ImpulseJointHandle,
    parent: RigidBodyHandle,
    child: RigidBodyHandle,
    /// Rotation axis in the parent frame
    axis: Vec3,
    /// Child orientation relative to the parent when the joint was made
    rest: Quat,
}

/// Everything a snapshot carries; the pipeline only holds scratch buffers
#[derive(Serialize, Deserialize)]
struct Simulation {
    gravity: Vec3,
    params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    body_handles: Vec<RigidBodyHandle>,
    collider_handles: Vec<RapierColliderHandle>,
    tags: Vec<Option<ColliderTag>>,
    joints: Vec<Option<JointRecord>>,
}

/// Production physics world over rapier3d
pub struct RapierWorld {
    sim: Simulation,
    pipeline: PhysicsPipeline,
}

impl Default for RapierWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl RapierWorld {
    pub fn new() -> Self {
        Self::with_gravity(Vec3::new(0.0, GRAVITY, 0.0))
    }

    pub fn with_gravity(gravity: Vec3) -> Self {
        Self {
            sim: Simulation {
                gravity,
                params: IntegrationParameters::default(),
                islands: IslandManager::new(),
                broad_phase: DefaultBroadPhase::new(),
                narrow_phase: NarrowPhase::new(),
                bodies: RigidBodySet::new(),
                colliders: ColliderSet::new(),
                impulse_joints: ImpulseJointSet::new(),
                multibody_joints: MultibodyJointSet::new(),
                ccd: CCDSolver::new(),
                body_handles: Vec::new(),
                collider_handles: Vec::new(),
                tags: Vec::new(),
                joints: Vec::new(),
            },
            pipeline: PhysicsPipeline::new(),
        }
    }

    pub fn body_count(&self) -> usize {
        self.sim.body_handles.len()
    }

    pub fn collider_count(&self) -> usize {
        self.sim.collider_handles.len()
    }

    fn body_handle(&self, body: BodyHandle) -> Option<RigidBodyHandle> {
        self.sim.body_handles.get(body.0 as usize).copied()
    }

    fn collider_handle(&self, collider: ColliderHandle) -> Option<RapierColliderHandle> {
        self.sim.collider_handles.get(collider.0 as usize).copied()
    }

    fn body(&self, body: BodyHandle) -> Option<&RigidBody> {
        self.body_handle(body).and_then(|h| self.sim.bodies.get(h))
    }

    fn body_mut(&mut self, body: BodyHandle) -> Option<&mut RigidBody> {
        let handle = self.body_handle(body)?;
        self.sim.bodies.get_mut(handle)
    }

    fn collider_mut(&mut self, collider: ColliderHandle) -> Option<&mut Collider> {
        let handle = self.collider_handle(collider)?;
        self.sim.colliders.get_mut(handle)
    }

    fn rotation_of(&self, handle: RigidBodyHandle) -> Option<Quat> {
        self.sim
            .bodies
            .get(handle)
            .map(|rb| from_rotation(rb.rotation()))
    }

    fn joint_mut(&mut self, joint: JointHandle) -> Option<(&mut ImpulseJoint, RigidBodyHandle)> {
        let record = self.sim.joints.get(joint.0 as usize)?.as_ref()?;
        let (handle, child) = (record.handle, record.child);
        self.sim
            .impulse_joints
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, j)| (j, child))
    }

    fn wake(&mut self, handle: RigidBodyHandle) {
        if let Some(rb) = self.sim.bodies.get_mut(handle) {
            rb.wake_up(true);
        }
    }
}

impl PhysicsWorld for RapierWorld {
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let handle = BodyHandle(self.sim.body_handles.len() as u32);
        let builder = match desc.kind {
            BodyKind::Fixed => RigidBodyBuilder::fixed(),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
        };
        let body = builder
            .position(to_isometry(desc.translation, desc.rotation))
            .enabled(desc.enabled)
            .linear_damping(desc.linear_damping)
            .angular_damping(desc.angular_damping)
            .soft_ccd_prediction(desc.soft_ccd_prediction)
            .gravity_scale(desc.gravity_scale)
            .user_data(handle.0 as u128)
            .build();
        let inner = self.sim.bodies.insert(body);
        self.sim.body_handles.push(inner);
        handle
    }

    fn create_collider(&mut self, desc: ColliderDesc, parent: BodyHandle) -> ColliderHandle {
        let handle = ColliderHandle(self.sim.collider_handles.len() as u32);
        let builder = match desc.shape {
            ColliderShape::Cuboid { half_extents } => {
                ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            ColliderShape::Cylinder {
                half_height,
                radius,
            } => ColliderBuilder::cylinder(half_height, radius),
            ColliderShape::Ball { radius } => ColliderBuilder::ball(radius),
        };
        let collider = builder
            .translation(to_vector(desc.offset))
            .friction(desc.friction)
            .restitution(desc.restitution)
            .density(desc.density)
            .sensor(desc.sensor)
            .collision_groups(to_groups(desc.groups))
            .user_data(handle.0 as u128)
            .build();
        let sim = &mut self.sim;
        let inner = match sim.body_handles.get(parent.0 as usize) {
            Some(&body) if sim.bodies.contains(body) => {
                sim.colliders.insert_with_parent(collider, body, &mut sim.bodies)
            }
            _ => {
                log::warn!("Collider {} created without a live parent", handle.0);
                sim.colliders.insert(collider)
            }
        };
        sim.collider_handles.push(inner);
        sim.tags.push(desc.tag);
        handle
    }

    fn create_revolute_joint(
        &mut self,
        parent: BodyHandle,
        child: BodyHandle,
        axis: Vec3,
    ) -> JointHandle {
        let handle = JointHandle(self.sim.joints.len() as u32);
        let (Some(parent_rb), Some(child_rb)) = (self.body(parent), self.body(child)) else {
            log::warn!("Joint {} created between stale bodies", handle.0);
            self.sim.joints.push(None);
            return handle;
        };
        let parent_pose = *parent_rb.position();
        let child_pose = *child_rb.position();
        let axis = axis.normalize_or_zero();
        // Pin the child where it stands: the anchor sits at its origin
        let anchor =
            parent_pose.inverse_transform_point(&Point3::from(child_pose.translation.vector));
        let joint = RevoluteJointBuilder::new(Unit::new_normalize(to_vector(axis)))
            .local_anchor1(anchor)
            .local_anchor2(Point3::origin())
            .contacts_enabled(false);
        let (parent_handle, child_handle) = (
            self.sim.body_handles[parent.0 as usize],
            self.sim.body_handles[child.0 as usize],
        );
        let inner = self
            .sim
            .impulse_joints
            .insert(parent_handle, child_handle, joint, true);
        let rest =
            from_rotation(&parent_pose.rotation).inverse() * from_rotation(&child_pose.rotation);
        self.sim.joints.push(Some(JointRecord {
            handle: inner,
            parent: parent_handle,
            child: child_handle,
            axis,
            rest,
        }));
        handle
    }

    fn contains_body(&self, body: BodyHandle) -> bool {
        self.body(body).is_some()
    }

    fn contains_collider(&self, collider: ColliderHandle) -> bool {
        self.collider_handle(collider)
            .is_some_and(|h| self.sim.colliders.contains(h))
    }

    fn contains_joint(&self, joint: JointHandle) -> bool {
        matches!(self.sim.joints.get(joint.0 as usize), Some(Some(_)))
    }

    fn body_colliders(&self, body: BodyHandle) -> Vec<ColliderHandle> {
        let Some(rb) = self.body(body) else {
            return Vec::new();
        };
        let mut colliders: Vec<ColliderHandle> = rb
            .colliders()
            .iter()
            .filter_map(|h| self.sim.colliders.get(*h))
            .map(|c| ColliderHandle(c.user_data as u32))
            .collect();
        colliders.sort();
        colliders
    }

    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle> {
        let handle = self.collider_handle(collider)?;
        let parent = self.sim.colliders.get(handle)?.parent()?;
        self.sim
            .bodies
            .get(parent)
            .map(|rb| BodyHandle(rb.user_data as u32))
    }

    fn set_body_enabled(&mut self, body: BodyHandle, enabled: bool) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_enabled(enabled);
        }
    }

    fn is_body_enabled(&self, body: BodyHandle) -> bool {
        self.body(body).is_some_and(|rb| rb.is_enabled())
    }

    fn pose(&self, body: BodyHandle) -> Option<Pose> {
        self.body(body).map(|rb| Pose {
            translation: from_vector(rb.translation()),
            rotation: from_rotation(rb.rotation()),
        })
    }

    fn set_pose(&mut self, body: BodyHandle, pose: Pose) {
        if let Some(rb) = self.body_mut(body) {
            let position = to_isometry(pose.translation, pose.rotation);
            rb.set_position(position, true);
            if rb.is_kinematic() {
                rb.set_next_kinematic_position(position);
            }
        }
    }

    fn set_next_kinematic_translation(&mut self, body: BodyHandle, translation: Vec3) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_next_kinematic_translation(to_vector(translation));
        }
    }

    fn set_next_kinematic_rotation(&mut self, body: BodyHandle, rotation: Quat) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_next_kinematic_rotation(to_rotation(rotation));
        }
    }

    fn linvel(&self, body: BodyHandle) -> Option<Vec3> {
        self.body(body).map(|rb| from_vector(rb.linvel()))
    }

    fn angvel(&self, body: BodyHandle) -> Option<Vec3> {
        self.body(body).map(|rb| from_vector(rb.angvel()))
    }

    fn set_linvel(&mut self, body: BodyHandle, linvel: Vec3) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_linvel(to_vector(linvel), true);
        }
    }

    fn set_angvel(&mut self, body: BodyHandle, angvel: Vec3) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_angvel(to_vector(angvel), true);
        }
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) {
        if let Some(rb) = self.body_mut(body) {
            rb.apply_impulse(to_vector(impulse), true);
        }
    }

    fn mass(&self, body: BodyHandle) -> f32 {
        self.body(body).map_or(0.0, |rb| rb.mass())
    }

    fn sleep(&mut self, body: BodyHandle) {
        if let Some(rb) = self.body_mut(body) {
            rb.sleep();
        }
    }

    fn wake_up(&mut self, body: BodyHandle) {
        if let Some(rb) = self.body_mut(body) {
            rb.wake_up(true);
        }
    }

    fn is_sleeping(&self, body: BodyHandle) -> bool {
        self.body(body).is_some_and(|rb| rb.is_sleeping())
    }

    fn set_soft_ccd_prediction(&mut self, body: BodyHandle, prediction: f32) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_soft_ccd_prediction(prediction);
        }
    }

    fn enable_ccd(&mut self, body: BodyHandle, enabled: bool) {
        if let Some(rb) = self.body_mut(body) {
            rb.enable_ccd(enabled);
        }
    }

    fn set_rotations_enabled(&mut self, body: BodyHandle, enabled: bool) {
        if let Some(rb) = self.body_mut(body) {
            rb.lock_rotations(!enabled, true);
        }
    }

    fn set_collider_enabled(&mut self, collider: ColliderHandle, enabled: bool) {
        if let Some(c) = self.collider_mut(collider) {
            c.set_enabled(enabled);
        }
    }

    fn set_collision_groups(&mut self, collider: ColliderHandle, groups: CollisionGroups) {
        if let Some(c) = self.collider_mut(collider) {
            c.set_collision_groups(to_groups(groups));
        }
    }

    fn collider_tag(&self, collider: ColliderHandle) -> Option<ColliderTag> {
        self.sim.tags.get(collider.0 as usize).copied().flatten()
    }

    fn set_collider_tag(&mut self, collider: ColliderHandle, tag: Option<ColliderTag>) {
        if let Some(slot) = self.sim.tags.get_mut(collider.0 as usize) {
            *slot = tag;
        }
    }

    fn configure_motor_position(
        &mut self,
        joint: JointHandle,
        target: f32,
        stiffness: f32,
        damping: f32,
    ) {
        let Some((inner, child)) = self.joint_mut(joint) else {
            return;
        };
        inner
            .data
            .set_motor_position(JointAxis::AngX, target, stiffness, damping);
        self.wake(child);
    }

    fn set_joint_limits(&mut self, joint: JointHandle, min: f32, max: f32) {
        let Some((inner, child)) = self.joint_mut(joint) else {
            return;
        };
        inner.data.set_limits(JointAxis::AngX, [min, max]);
        self.wake(child);
    }

    fn joint_angle(&self, joint: JointHandle) -> Option<f32> {
        let record = self.sim.joints.get(joint.0 as usize)?.as_ref()?;
        let parent = self.rotation_of(record.parent)?;
        let child = self.rotation_of(record.child)?;
        let relative = record.rest.inverse() * parent.inverse() * child;
        Some(twist_angle(relative, record.axis))
    }

    fn sensor_colliders(&self) -> Vec<ColliderHandle> {
        self.sim
            .collider_handles
            .iter()
            .enumerate()
            .filter(|(_, h)| {
                self.sim
                    .colliders
                    .get(**h)
                    .is_some_and(|c| c.is_sensor() && c.is_enabled())
            })
            .map(|(index, _)| ColliderHandle(index as u32))
            .collect()
    }

    fn intersections_with(&self, collider: ColliderHandle) -> Vec<ColliderHandle> {
        let Some(handle) = self.collider_handle(collider) else {
            return Vec::new();
        };
        let mut hits: Vec<ColliderHandle> = self
            .sim
            .narrow_phase
            .intersection_pairs_with(handle)
            .filter(|(_, _, intersecting)| *intersecting)
            .map(|(a, b, _)| if a == handle { b } else { a })
            .filter_map(|other| self.sim.colliders.get(other))
            .map(|c| ColliderHandle(c.user_data as u32))
            .collect();
        hits.sort();
        hits.dedup();
        hits
    }

    fn step(&mut self, dt: f32) {
        let sim = &mut self.sim;
        sim.params.dt = dt;
        let gravity = to_vector(sim.gravity);
        self.pipeline.step(
            &gravity,
            &sim.params,
            &mut sim.islands,
            &mut sim.broad_phase,
            &mut sim.narrow_phase,
            &mut sim.bodies,
            &mut sim.colliders,
            &mut sim.impulse_joints,
            &mut sim.multibody_joints,
            &mut sim.ccd,
            None,
            &(),
            &(),
        );
    }

    fn snapshot(&self) -> Result<Vec<u8>, PhysicsError> {
        bincode::serialize(&self.sim).map_err(PhysicsError::Encode)
    }

    fn from_snapshot(bytes: &[u8]) -> Result<Self, PhysicsError> {
        let sim: Simulation = bincode::deserialize(bytes).map_err(PhysicsError::Decode)?;
        if sim.tags.len() != sim.collider_handles.len() {
            return Err(PhysicsError::Inconsistent("collider tags"));
        }
        Ok(Self {
            sim,
            pipeline: PhysicsPipeline::new(),
        })
    }
}
