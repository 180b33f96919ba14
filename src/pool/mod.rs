//! Pooled object registries
//!
//! Every coin, token, card and ingot the cabinet can ever hold is created up
//! front with a disabled dynamic body. Spawning flips an unused slot to used
//! and moves its body into place; recycling parks it again. Bodies are never
//! destroyed, so the number of live bodies is bounded by the pool capacity.

pub mod coins;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::persistence::LoadError;
use crate::physics::{
    BodyDesc, BodyHandle, ColliderDesc, ColliderShape, ColliderTag, CollisionGroups,
    GROUP_OBJECTS, PhysicsWorld, Pose,
};
use crate::rng::RngState;

pub use coins::{CoinPool, CoinPoolSave, DropRequest, SleepTracker};

pub const COIN_RADIUS: f32 = 0.03;
pub const COIN_DEPTH: f32 = 0.005;
pub const TOKEN_RADIUS: f32 = 0.0375;
pub const TOKEN_DEPTH: f32 = 0.0075;
pub const CARD_SIZE: Vec3 = Vec3::new(0.175, 0.005, 0.11);
pub const INGOT_SIZE: Vec3 = Vec3::new(0.15, 0.02, 0.075);

/// Number of token colours; the last one is never handed out as a reward
pub const TOKEN_VARIANTS: usize = 6;
/// Number of card colours; the last one is never handed out as a reward
pub const CARD_VARIANTS: usize = 7;

/// Horizontal spread of token rewards around the delivery point
const TOKEN_SPREAD_X: f32 = 0.6;
/// Horizontal spread of card rewards around the delivery point
const CARD_SPREAD_X: f32 = 0.2;

/// Parking pose of unused instances, well below the cabinet and every sensor
pub const HIDDEN_POSE: Pose = Pose {
    translation: Vec3::new(0.0, -10.0, 0.0),
    rotation: Quat::IDENTITY,
};

/// Kind of pooled object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Coin,
    Token,
    Card,
    Ingot,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Coin,
        ObjectKind::Token,
        ObjectKind::Card,
        ObjectKind::Ingot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Coin => "coin",
            ObjectKind::Token => "token",
            ObjectKind::Card => "card",
            ObjectKind::Ingot => "ingot",
        }
    }
}

/// Identity of a pooled instance: (kind, colour/type, slot index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub variant: u8,
    pub index: u16,
}

impl ObjectId {
    pub const fn new(kind: ObjectKind, variant: u8, index: u16) -> Self {
        Self {
            kind,
            variant,
            index,
        }
    }

    pub const fn coin(index: u16) -> Self {
        Self::new(ObjectKind::Coin, 0, index)
    }
}

/// Physical properties shared by every instance of a kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectSpec {
    pub kind: ObjectKind,
    pub shape: ColliderShape,
    pub friction: f32,
    pub restitution: f32,
    pub density: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub soft_ccd_prediction: f32,
}

impl ObjectSpec {
    pub fn coin(friction: f32, density: f32) -> Self {
        Self {
            kind: ObjectKind::Coin,
            shape: ColliderShape::Cylinder {
                half_height: COIN_DEPTH / 2.0,
                radius: COIN_RADIUS,
            },
            friction,
            restitution: 0.0,
            density,
            linear_damping: 0.5,
            angular_damping: 0.5,
            soft_ccd_prediction: COIN_RADIUS.max(COIN_DEPTH),
        }
    }

    pub fn token() -> Self {
        Self {
            kind: ObjectKind::Token,
            shape: ColliderShape::Cylinder {
                half_height: TOKEN_DEPTH / 2.0,
                radius: TOKEN_RADIUS,
            },
            friction: 0.3,
            restitution: 0.2,
            density: 0.5,
            linear_damping: 0.0,
            angular_damping: 0.0,
            soft_ccd_prediction: TOKEN_RADIUS.max(TOKEN_DEPTH),
        }
    }

    pub fn card() -> Self {
        Self {
            kind: ObjectKind::Card,
            shape: ColliderShape::cuboid(CARD_SIZE.x, CARD_SIZE.y, CARD_SIZE.z),
            friction: 0.1,
            restitution: 0.1,
            density: 0.8,
            linear_damping: 0.0,
            angular_damping: 0.0,
            soft_ccd_prediction: CARD_SIZE.max_element(),
        }
    }

    pub fn ingot() -> Self {
        Self {
            kind: ObjectKind::Ingot,
            shape: ColliderShape::cuboid(INGOT_SIZE.x, INGOT_SIZE.y, INGOT_SIZE.z),
            friction: 0.05,
            restitution: 0.0,
            density: 2.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            soft_ccd_prediction: INGOT_SIZE.max_element(),
        }
    }
}

/// One reusable slot backed by a dynamic body
#[derive(Debug, Clone, PartialEq)]
pub struct PooledInstance {
    pub id: ObjectId,
    pub position: Vec3,
    pub rotation: Quat,
    pub used: bool,
    pub body: BodyHandle,
    /// Impulse applied on the first update where the body has mass
    pub pending_impulse: Option<Vec3>,
}

/// Serialized form of a [`PooledInstance`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSave {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub used: bool,
    pub body_handle: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_impulse: Option<[f32; 3]>,
}

/// Fixed-capacity registry of one object kind, indexed by [variant][index]
#[derive(Debug, Clone)]
pub struct Pool {
    spec: ObjectSpec,
    instances: Vec<Vec<PooledInstance>>,
}

impl Pool {
    /// Pre-allocate `variants × capacity` disabled bodies
    pub fn new(
        world: &mut dyn PhysicsWorld,
        spec: ObjectSpec,
        variants: usize,
        capacity: usize,
    ) -> Self {
        let mut instances = Vec::with_capacity(variants);
        for variant in 0..variants {
            let mut slots = Vec::with_capacity(capacity);
            for index in 0..capacity {
                let id = ObjectId::new(spec.kind, variant as u8, index as u16);
                let body = world.create_body(
                    BodyDesc::dynamic()
                        .enabled(false)
                        .damping(spec.linear_damping, spec.angular_damping)
                        .soft_ccd(spec.soft_ccd_prediction),
                );
                world.create_collider(
                    ColliderDesc::new(spec.shape)
                        .material(spec.friction, spec.restitution, spec.density)
                        .groups(CollisionGroups::new(GROUP_OBJECTS, u32::MAX))
                        .tag(ColliderTag::Object(id)),
                    body,
                );
                slots.push(PooledInstance {
                    id,
                    position: HIDDEN_POSE.translation,
                    rotation: HIDDEN_POSE.rotation,
                    used: false,
                    body,
                    pending_impulse: None,
                });
            }
            instances.push(slots);
        }
        Self { spec, instances }
    }

    pub fn kind(&self) -> ObjectKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &ObjectSpec {
        &self.spec
    }

    pub fn variants(&self) -> usize {
        self.instances.len()
    }

    /// Slots per variant
    pub fn capacity(&self) -> usize {
        self.instances.first().map_or(0, Vec::len)
    }

    pub fn get(&self, id: ObjectId) -> Option<&PooledInstance> {
        if id.kind != self.spec.kind {
            return None;
        }
        self.instances
            .get(id.variant as usize)?
            .get(id.index as usize)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut PooledInstance> {
        if id.kind != self.spec.kind {
            return None;
        }
        self.instances
            .get_mut(id.variant as usize)?
            .get_mut(id.index as usize)
    }

    /// Take the first unused slot of `variant` and place it
    ///
    /// Returns `None` (and logs) when the variant is exhausted.
    pub fn deposit(
        &mut self,
        world: &mut dyn PhysicsWorld,
        variant: usize,
        position: Vec3,
        rotation: Quat,
        impulse: Option<Vec3>,
    ) -> Option<ObjectId> {
        let kind = self.spec.kind;
        let Some(instance) = self
            .instances
            .get_mut(variant)
            .and_then(|slots| slots.iter_mut().find(|i| !i.used))
        else {
            log::warn!(
                "{} pool exhausted (variant {}), spawn refused",
                kind.as_str(),
                variant
            );
            return None;
        };
        instance.used = true;
        instance.position = position;
        instance.rotation = rotation;
        instance.pending_impulse = impulse;
        world.set_pose(
            instance.body,
            Pose {
                translation: position,
                rotation,
            },
        );
        world.set_body_enabled(instance.body, true);
        Some(instance.id)
    }

    /// Return a slot to the pool; unknown or unused ids are ignored
    pub fn recycle(&mut self, world: &mut dyn PhysicsWorld, id: ObjectId) -> bool {
        let Some(instance) = self.get_mut(id) else {
            return false;
        };
        if !instance.used {
            return false;
        }
        instance.used = false;
        instance.pending_impulse = None;
        instance.position = HIDDEN_POSE.translation;
        instance.rotation = HIDDEN_POSE.rotation;
        world.set_body_enabled(instance.body, false);
        world.set_linvel(instance.body, Vec3::ZERO);
        world.set_angvel(instance.body, Vec3::ZERO);
        world.set_pose(instance.body, HIDDEN_POSE);
        true
    }

    /// Used instances in (variant, index) order
    pub fn active(&self) -> impl Iterator<Item = &PooledInstance> {
        self.instances.iter().flatten().filter(|i| i.used)
    }

    pub fn used_count(&self) -> usize {
        self.active().count()
    }

    /// Apply pending impulses and re-read body transforms
    pub fn update(&mut self, world: &mut dyn PhysicsWorld) {
        for instance in self.instances.iter_mut().flatten().filter(|i| i.used) {
            if let Some(impulse) = instance.pending_impulse {
                if world.mass(instance.body) > 0.0 {
                    world.apply_impulse(instance.body, impulse);
                    instance.pending_impulse = None;
                }
            }
        }
        self.refresh(world);
    }

    /// Copy body transforms into the cached instance transforms
    pub fn refresh(&mut self, world: &dyn PhysicsWorld) {
        for instance in self.instances.iter_mut().flatten().filter(|i| i.used) {
            if let Some(pose) = world.pose(instance.body) {
                instance.position = pose.translation;
                instance.rotation = pose.rotation;
            }
        }
    }

    /// Deposit `count` instances of random reward colours, spread along x
    pub fn deposit_spread(
        &mut self,
        world: &mut dyn PhysicsWorld,
        rng: &mut RngState,
        position: Vec3,
        count: usize,
    ) -> Vec<ObjectId> {
        let spread = match self.spec.kind {
            ObjectKind::Token => TOKEN_SPREAD_X,
            ObjectKind::Card => CARD_SPREAD_X,
            ObjectKind::Coin | ObjectKind::Ingot => 0.0,
        };
        let colours = self.variants().saturating_sub(1).max(1) as u32;
        let mut deposited = Vec::with_capacity(count);
        for _ in 0..count {
            let variant = rng.below(colours) as usize;
            let at = Vec3::new(rng.spread(spread / 2.0), position.y, position.z);
            if let Some(id) = self.deposit(world, variant, at, Quat::IDENTITY, None) {
                deposited.push(id);
            }
        }
        deposited
    }

    pub fn save(&self) -> Vec<Vec<InstanceSave>> {
        self.instances
            .iter()
            .map(|slots| {
                slots
                    .iter()
                    .map(|i| InstanceSave {
                        position: i.position.to_array(),
                        rotation: i.rotation.to_array(),
                        used: i.used,
                        body_handle: i.body.0,
                        pending_impulse: i.pending_impulse.map(|v| v.to_array()),
                    })
                    .collect()
            })
            .collect()
    }

    /// Rebuild this pool from a save against a freshly restored world
    ///
    /// The layout must match exactly and every body handle must resolve.
    /// Colliders of every restored body are re-tagged with their identity.
    pub fn restored(
        &self,
        save: &[Vec<InstanceSave>],
        world: &mut dyn PhysicsWorld,
    ) -> Result<Self, LoadError> {
        let kind = self.spec.kind.as_str();
        if save.len() != self.variants() {
            return Err(LoadError::PoolLayout {
                kind,
                expected: self.variants(),
                found: save.len(),
            });
        }
        let mut instances = Vec::with_capacity(save.len());
        for (variant, slots) in save.iter().enumerate() {
            if slots.len() != self.capacity() {
                return Err(LoadError::PoolLayout {
                    kind,
                    expected: self.capacity(),
                    found: slots.len(),
                });
            }
            let mut restored = Vec::with_capacity(slots.len());
            for (index, s) in slots.iter().enumerate() {
                let body = BodyHandle(s.body_handle);
                if !world.contains_body(body) {
                    return Err(LoadError::UnresolvedHandle {
                        what: "body",
                        handle: s.body_handle,
                    });
                }
                let id = ObjectId::new(self.spec.kind, variant as u8, index as u16);
                for collider in world.body_colliders(body) {
                    world.set_collider_tag(collider, Some(ColliderTag::Object(id)));
                }
                restored.push(PooledInstance {
                    id,
                    position: Vec3::from_array(s.position),
                    rotation: Quat::from_array(s.rotation),
                    used: s.used,
                    body,
                    pending_impulse: s.pending_impulse.map(Vec3::from_array),
                });
            }
            instances.push(restored);
        }
        Ok(Self {
            spec: self.spec,
            instances,
        })
    }
}

/// Every registry the cabinet owns
#[derive(Debug, Clone)]
pub struct Pools {
    pub coins: CoinPool,
    pub tokens: Pool,
    pub cards: Pool,
    pub ingots: Pool,
}

/// Serialized [`Pools`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolsSave {
    pub coins: CoinPoolSave,
    pub tokens: Vec<Vec<InstanceSave>>,
    pub cards: Vec<Vec<InstanceSave>>,
    pub ingots: Vec<Vec<InstanceSave>>,
}

/// Pool capacities (slots per variant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacities {
    pub coins: usize,
    pub tokens: usize,
    pub cards: usize,
    pub ingots: usize,
}

impl Default for PoolCapacities {
    fn default() -> Self {
        Self {
            coins: 1024,
            tokens: 16,
            cards: 8,
            ingots: 8,
        }
    }
}

impl Pools {
    pub fn new(
        world: &mut dyn PhysicsWorld,
        capacities: PoolCapacities,
        coin_friction: f32,
        coin_density: f32,
    ) -> Self {
        Self {
            coins: CoinPool::new(world, capacities.coins, coin_friction, coin_density),
            tokens: Pool::new(world, ObjectSpec::token(), TOKEN_VARIANTS, capacities.tokens),
            cards: Pool::new(world, ObjectSpec::card(), CARD_VARIANTS, capacities.cards),
            ingots: Pool::new(world, ObjectSpec::ingot(), 1, capacities.ingots),
        }
    }

    pub fn pool(&self, kind: ObjectKind) -> &Pool {
        match kind {
            ObjectKind::Coin => self.coins.pool(),
            ObjectKind::Token => &self.tokens,
            ObjectKind::Card => &self.cards,
            ObjectKind::Ingot => &self.ingots,
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&PooledInstance> {
        self.pool(id.kind).get(id)
    }

    /// Recycle any kind of object
    pub fn recycle(&mut self, world: &mut dyn PhysicsWorld, id: ObjectId) -> bool {
        match id.kind {
            ObjectKind::Coin => self.coins.recycle(world, id),
            ObjectKind::Token => self.tokens.recycle(world, id),
            ObjectKind::Card => self.cards.recycle(world, id),
            ObjectKind::Ingot => self.ingots.recycle(world, id),
        }
    }

    /// Used instances of every kind, coins first
    pub fn active(&self) -> impl Iterator<Item = &PooledInstance> {
        self.coins
            .pool()
            .active()
            .chain(self.tokens.active())
            .chain(self.cards.active())
            .chain(self.ingots.active())
    }

    pub fn update(&mut self, world: &mut dyn PhysicsWorld, rng: &mut RngState) {
        self.cards.update(world);
        self.coins.update(world, rng);
        self.tokens.update(world);
        self.ingots.update(world);
    }

    pub fn refresh(&mut self, world: &dyn PhysicsWorld) {
        self.coins.refresh(world);
        self.tokens.refresh(world);
        self.cards.refresh(world);
        self.ingots.refresh(world);
    }

    pub fn save(&self) -> PoolsSave {
        PoolsSave {
            coins: self.coins.save(),
            tokens: self.tokens.save(),
            cards: self.cards.save(),
            ingots: self.ingots.save(),
        }
    }

    /// Rebuild every registry against a restored world
    pub fn restored(
        &self,
        save: &PoolsSave,
        world: &mut dyn PhysicsWorld,
    ) -> Result<Self, LoadError> {
        Ok(Self {
            coins: self.coins.restored(&save.coins, world)?,
            tokens: self.tokens.restored(&save.tokens, world)?,
            cards: self.cards.restored(&save.cards, world)?,
            ingots: self.ingots.restored(&save.ingots, world)?,
        })
    }

    /// Spawn every item of a pusher reward at the delivery point
    pub fn deposit_reward(
        &mut self,
        world: &mut dyn PhysicsWorld,
        rng: &mut RngState,
        position: Vec3,
        reward: &Reward,
    ) {
        self.coins.deposit_coins(world, position, reward.coins as usize);
        self.tokens
            .deposit_spread(world, rng, position, reward.tokens as usize);
        self.cards
            .deposit_spread(world, rng, position, reward.cards as usize);
        for _ in 0..reward.ingots {
            self.ingots
                .deposit(world, 0, position, Quat::IDENTITY, None);
        }
    }
}

/// Bundle of objects handed out by the pusher's bonus door
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub coins: u32,
    pub tokens: u32,
    pub cards: u32,
    pub ingots: u32,
}

impl Reward {
    pub const fn coins(coins: u32) -> Self {
        Self {
            coins,
            tokens: 0,
            cards: 0,
            ingots: 0,
        }
    }
}
