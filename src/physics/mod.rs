//! Rigid-body world abstraction
//!
//! The cabinet never talks to a physics engine directly. Everything it needs
//! (bodies, colliders, motorised revolute joints, sensor intersections and
//! whole-world snapshots) goes through [`PhysicsWorld`]. Objects are always
//! referred to by stable integer handles so that identity survives a snapshot
//! round trip.
//!
//! [`RapierWorld`] is the production engine. Unit tests also run against a
//! small deterministic fake.

pub mod rapier;
#[cfg(test)]
pub mod sandbox;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::ObjectId;

pub use rapier::RapierWorld;
#[cfg(test)]
pub use sandbox::SandboxWorld;

/// Stable handle of a rigid body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

/// Stable handle of a collider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColliderHandle(pub u32);

/// Stable handle of a joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointHandle(pub u32);

/// How a body moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    /// Never moves
    Fixed,
    /// Driven by next-transform targets set every tick
    Kinematic,
    /// Driven by gravity, impulses and contacts
    Dynamic,
}

/// Body creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyDesc {
    pub kind: BodyKind,
    pub translation: Vec3,
    pub rotation: Quat,
    pub enabled: bool,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub soft_ccd_prediction: f32,
    pub gravity_scale: f32,
}

impl BodyDesc {
    pub fn new(kind: BodyKind) -> Self {
        Self {
            kind,
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            enabled: true,
            linear_damping: 0.0,
            angular_damping: 0.0,
            soft_ccd_prediction: 0.0,
            gravity_scale: 1.0,
        }
    }

    pub fn fixed() -> Self {
        Self::new(BodyKind::Fixed)
    }

    pub fn kinematic() -> Self {
        Self::new(BodyKind::Kinematic)
    }

    pub fn dynamic() -> Self {
        Self::new(BodyKind::Dynamic)
    }

    pub fn at(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn soft_ccd(mut self, prediction: f32) -> Self {
        self.soft_ccd_prediction = prediction;
        self
    }

    /// Motor-held parts ignore gravity so their joints settle on target
    pub fn weightless(mut self) -> Self {
        self.gravity_scale = 0.0;
        self
    }
}

/// Collider geometry (local frame, y up)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    Cuboid { half_extents: Vec3 },
    /// Axis along local y
    Cylinder { half_height: f32, radius: f32 },
    Ball { radius: f32 },
}

impl ColliderShape {
    pub fn cuboid(width: f32, height: f32, depth: f32) -> Self {
        ColliderShape::Cuboid {
            half_extents: Vec3::new(width, height, depth) * 0.5,
        }
    }

    /// Half extents of the local bounding box
    pub fn local_half_extents(&self) -> Vec3 {
        match *self {
            ColliderShape::Cuboid { half_extents } => half_extents,
            ColliderShape::Cylinder {
                half_height,
                radius,
            } => Vec3::new(radius, half_height, radius),
            ColliderShape::Ball { radius } => Vec3::splat(radius),
        }
    }

    pub fn volume(&self) -> f32 {
        match *self {
            ColliderShape::Cuboid { half_extents } => {
                8.0 * half_extents.x * half_extents.y * half_extents.z
            }
            ColliderShape::Cylinder {
                half_height,
                radius,
            } => std::f32::consts::PI * radius * radius * half_height * 2.0,
            ColliderShape::Ball { radius } => {
                4.0 / 3.0 * std::f32::consts::PI * radius * radius * radius
            }
        }
    }
}

/// Bitmask collision filtering (memberships / filter), rapier style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionGroups {
    pub memberships: u32,
    pub filter: u32,
}

impl CollisionGroups {
    pub const ALL: CollisionGroups = CollisionGroups {
        memberships: u32::MAX,
        filter: u32::MAX,
    };

    pub const fn new(memberships: u32, filter: u32) -> Self {
        Self {
            memberships,
            filter,
        }
    }

    pub fn interacts_with(&self, other: &CollisionGroups) -> bool {
        (self.memberships & other.filter) != 0 && (other.memberships & self.filter) != 0
    }
}

impl Default for CollisionGroups {
    fn default() -> Self {
        CollisionGroups::ALL
    }
}

/// Group bit carried by pooled objects
pub const GROUP_OBJECTS: u32 = 1 << 0;
/// Group bit carried by cabinet structure and mechanism parts
pub const GROUP_STRUCTURE: u32 = 1 << 1;

/// Sensors placed in the cabinet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorId {
    Gutter,
    LeftTrap,
    RightTrap,
    SensorGate,
    /// Coin roller bonus slot, 1..=3
    CoinRollerSlot(u8),
    CoinRollerTrap,
}

impl SensorId {
    pub const ALL: [SensorId; 8] = [
        SensorId::Gutter,
        SensorId::LeftTrap,
        SensorId::RightTrap,
        SensorId::SensorGate,
        SensorId::CoinRollerSlot(1),
        SensorId::CoinRollerSlot(2),
        SensorId::CoinRollerSlot(3),
        SensorId::CoinRollerTrap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorId::Gutter => "gutter",
            SensorId::LeftTrap => "left-trap",
            SensorId::RightTrap => "right-trap",
            SensorId::SensorGate => "sensor-gate",
            SensorId::CoinRollerSlot(1) => "slot-1",
            SensorId::CoinRollerSlot(2) => "slot-2",
            SensorId::CoinRollerSlot(_) => "slot-3",
            SensorId::CoinRollerTrap => "trap-sensor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gutter" => Some(SensorId::Gutter),
            "left-trap" => Some(SensorId::LeftTrap),
            "right-trap" => Some(SensorId::RightTrap),
            "sensor-gate" => Some(SensorId::SensorGate),
            "slot-1" => Some(SensorId::CoinRollerSlot(1)),
            "slot-2" => Some(SensorId::CoinRollerSlot(2)),
            "slot-3" => Some(SensorId::CoinRollerSlot(3)),
            "trap-sensor" => Some(SensorId::CoinRollerTrap),
            _ => None,
        }
    }
}

/// Opaque per-collider user data used for event routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColliderTag {
    Object(ObjectId),
    Sensor(SensorId),
}

/// Collider creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColliderDesc {
    pub shape: ColliderShape,
    /// Offset from the parent body origin
    pub offset: Vec3,
    pub friction: f32,
    pub restitution: f32,
    pub density: f32,
    pub sensor: bool,
    pub groups: CollisionGroups,
    pub tag: Option<ColliderTag>,
}

impl ColliderDesc {
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            shape,
            offset: Vec3::ZERO,
            friction: 0.5,
            restitution: 0.0,
            density: 1.0,
            sensor: false,
            groups: CollisionGroups::ALL,
            tag: None,
        }
    }

    pub fn sensor(shape: ColliderShape, id: SensorId) -> Self {
        Self {
            sensor: true,
            tag: Some(ColliderTag::Sensor(id)),
            ..Self::new(shape)
        }
    }

    pub fn offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }

    pub fn material(mut self, friction: f32, restitution: f32, density: f32) -> Self {
        self.friction = friction;
        self.restitution = restitution;
        self.density = density;
        self
    }

    pub fn groups(mut self, groups: CollisionGroups) -> Self {
        self.groups = groups;
        self
    }

    pub fn tag(mut self, tag: ColliderTag) -> Self {
        self.tag = Some(tag);
        self
    }
}

/// Translation and orientation of a body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Physics collaborator failures
#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("failed to encode world snapshot: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode world snapshot: {0}")]
    Decode(#[source] bincode::Error),
    #[error("world snapshot is inconsistent: {0}")]
    Inconsistent(&'static str),
}

/// The surface of a rigid-body engine consumed by the cabinet
///
/// Reads on a stale handle return `None`; writes on a stale handle are
/// ignored. `from_snapshot` builds a new world, leaving any live one
/// untouched until the caller decides to swap it in.
pub trait PhysicsWorld {
    // === Factories ===
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle;
    fn create_collider(&mut self, desc: ColliderDesc, parent: BodyHandle) -> ColliderHandle;
    /// Revolute joint rotating `child` around `axis` relative to `parent`
    fn create_revolute_joint(&mut self, parent: BodyHandle, child: BodyHandle, axis: Vec3)
    -> JointHandle;

    // === Lookup ===
    fn contains_body(&self, body: BodyHandle) -> bool;
    fn contains_collider(&self, collider: ColliderHandle) -> bool;
    fn contains_joint(&self, joint: JointHandle) -> bool;
    fn body_colliders(&self, body: BodyHandle) -> Vec<ColliderHandle>;
    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle>;

    // === Bodies ===
    fn set_body_enabled(&mut self, body: BodyHandle, enabled: bool);
    fn is_body_enabled(&self, body: BodyHandle) -> bool;
    fn pose(&self, body: BodyHandle) -> Option<Pose>;
    /// Teleport, discarding any pending kinematic target
    fn set_pose(&mut self, body: BodyHandle, pose: Pose);
    fn set_next_kinematic_translation(&mut self, body: BodyHandle, translation: Vec3);
    fn set_next_kinematic_rotation(&mut self, body: BodyHandle, rotation: Quat);
    fn linvel(&self, body: BodyHandle) -> Option<Vec3>;
    fn angvel(&self, body: BodyHandle) -> Option<Vec3>;
    fn set_linvel(&mut self, body: BodyHandle, linvel: Vec3);
    fn set_angvel(&mut self, body: BodyHandle, angvel: Vec3);
    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3);
    /// Mass from attached collider densities, zero until colliders exist
    fn mass(&self, body: BodyHandle) -> f32;
    fn sleep(&mut self, body: BodyHandle);
    fn wake_up(&mut self, body: BodyHandle);
    fn is_sleeping(&self, body: BodyHandle) -> bool;
    fn set_soft_ccd_prediction(&mut self, body: BodyHandle, prediction: f32);
    fn enable_ccd(&mut self, body: BodyHandle, enabled: bool);
    fn set_rotations_enabled(&mut self, body: BodyHandle, enabled: bool);

    // === Colliders ===
    fn set_collider_enabled(&mut self, collider: ColliderHandle, enabled: bool);
    fn set_collision_groups(&mut self, collider: ColliderHandle, groups: CollisionGroups);
    fn collider_tag(&self, collider: ColliderHandle) -> Option<ColliderTag>;
    fn set_collider_tag(&mut self, collider: ColliderHandle, tag: Option<ColliderTag>);

    // === Joints ===
    fn configure_motor_position(
        &mut self,
        joint: JointHandle,
        target: f32,
        stiffness: f32,
        damping: f32,
    );
    fn set_joint_limits(&mut self, joint: JointHandle, min: f32, max: f32);
    fn joint_angle(&self, joint: JointHandle) -> Option<f32>;

    // === Queries ===
    /// Every enabled sensor collider, sorted by handle
    fn sensor_colliders(&self) -> Vec<ColliderHandle>;
    /// Colliders currently overlapping `collider`, sorted by handle
    fn intersections_with(&self, collider: ColliderHandle) -> Vec<ColliderHandle>;

    // === Stepping / snapshot ===
    fn step(&mut self, dt: f32);
    fn snapshot(&self) -> Result<Vec<u8>, PhysicsError>;
    fn from_snapshot(bytes: &[u8]) -> Result<Self, PhysicsError>
    where
        Self: Sized;
}

/// Euler angles (XYZ order, radians) to quaternion
#[inline]
pub fn euler(rotation: Vec3) -> Quat {
    Quat::from_euler(glam::EulerRot::XYZ, rotation.x, rotation.y, rotation.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_groups() {
        let objects = CollisionGroups::new(GROUP_OBJECTS, u32::MAX);
        let structure_only = CollisionGroups::new(GROUP_STRUCTURE, GROUP_STRUCTURE);
        assert!(objects.interacts_with(&CollisionGroups::ALL));
        assert!(!objects.interacts_with(&structure_only));
    }

    #[test]
    fn test_sensor_names_round_trip() {
        for id in SensorId::ALL {
            assert_eq!(SensorId::from_str(id.as_str()), Some(id));
        }
        assert_eq!(SensorId::from_str("nope"), None);
    }

    #[test]
    fn test_coin_volume() {
        let coin = ColliderShape::Cylinder {
            half_height: 0.0025,
            radius: 0.03,
        };
        assert!((coin.volume() - 1.4137e-5).abs() < 1e-8);
    }
}
