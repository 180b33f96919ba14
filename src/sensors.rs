//! Edge-triggered sensor intersection router
//!
//! Each tick the router collects every (sensor, collider) overlap reported by
//! the world and compares it with the previous tick. Only pairs that were not
//! overlapping before produce an [`Intersection`], so an object lingering in a
//! sensor is reported once per overlap episode.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::persistence::LoadError;
use crate::physics::{ColliderHandle, ColliderTag, PhysicsWorld, SensorId};
use crate::pool::ObjectId;

/// (sensor collider, other collider)
pub type Pair = (ColliderHandle, ColliderHandle);

/// A pooled object entered a sensor this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intersection {
    pub sensor: SensorId,
    pub object: ObjectId,
}

/// Serialized router state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterSave {
    /// Sensor collider handle by sensor name
    pub sensors: BTreeMap<String, u32>,
    pub pairs: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, Default)]
pub struct SensorRouter {
    sensors: BTreeMap<SensorId, ColliderHandle>,
    previous: BTreeSet<Pair>,
}

impl SensorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tagged sensor currently in the world
    pub fn discover(world: &dyn PhysicsWorld) -> Self {
        let mut router = Self::new();
        for collider in world.sensor_colliders() {
            if let Some(ColliderTag::Sensor(id)) = world.collider_tag(collider) {
                router.sensors.insert(id, collider);
            }
        }
        router
    }

    pub fn sensor(&self, id: SensorId) -> Option<ColliderHandle> {
        self.sensors.get(&id).copied()
    }

    pub fn sensors(&self) -> impl Iterator<Item = (SensorId, ColliderHandle)> + '_ {
        self.sensors.iter().map(|(id, handle)| (*id, *handle))
    }

    /// Replace the previous pair-set with `current`, returning the new pairs
    pub fn rising_edges(&mut self, current: BTreeSet<Pair>) -> Vec<Pair> {
        let entered = current.difference(&self.previous).copied().collect();
        self.previous = current;
        entered
    }

    /// Diff this tick's overlaps against the last tick's
    ///
    /// Overlaps with untagged colliders are tracked but never reported.
    pub fn detect(&mut self, world: &dyn PhysicsWorld) -> Vec<Intersection> {
        let mut current = BTreeSet::new();
        for sensor in world.sensor_colliders() {
            if !matches!(world.collider_tag(sensor), Some(ColliderTag::Sensor(_))) {
                continue;
            }
            for other in world.intersections_with(sensor) {
                current.insert((sensor, other));
            }
        }
        self.rising_edges(current)
            .into_iter()
            .filter_map(|(sensor, other)| {
                match (world.collider_tag(sensor), world.collider_tag(other)) {
                    (Some(ColliderTag::Sensor(sensor)), Some(ColliderTag::Object(object))) => {
                        Some(Intersection { sensor, object })
                    }
                    _ => None,
                }
            })
            .collect()
    }

    pub fn pair_count(&self) -> usize {
        self.previous.len()
    }

    pub fn save(&self) -> RouterSave {
        RouterSave {
            sensors: self
                .sensors
                .iter()
                .map(|(id, handle)| (id.as_str().to_string(), handle.0))
                .collect(),
            pairs: self.previous.iter().map(|(a, b)| (a.0, b.0)).collect(),
        }
    }

    /// Resolve saved sensor handles in a restored world and re-tag them
    pub fn restored(save: &RouterSave, world: &mut dyn PhysicsWorld) -> Result<Self, LoadError> {
        let mut sensors = BTreeMap::new();
        for (name, handle) in &save.sensors {
            let id = SensorId::from_str(name).ok_or_else(|| LoadError::UnknownSensor(name.clone()))?;
            let collider = ColliderHandle(*handle);
            if !world.contains_collider(collider) {
                return Err(LoadError::UnresolvedHandle {
                    what: "sensor collider",
                    handle: *handle,
                });
            }
            world.set_collider_tag(collider, Some(ColliderTag::Sensor(id)));
            sensors.insert(id, collider);
        }
        let previous = save
            .pairs
            .iter()
            .map(|(a, b)| (ColliderHandle(*a), ColliderHandle(*b)))
            .collect();
        Ok(Self { sensors, previous })
    }
}
