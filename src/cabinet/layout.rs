//! Static cabinet shell: playfield floor, side walls, catch tray and the
//! cabinet-level sensors.

use glam::Vec3;

use crate::mechanisms::sensor_gate;
use crate::physics::{
    BodyDesc, ColliderDesc, ColliderShape, CollisionGroups, GROUP_STRUCTURE, PhysicsWorld,
    SensorId,
};

/// Top of the playfield the pusher slides over
pub const FLOOR_TOP: f32 = 0.18;
const FLOOR_WIDTH: f32 = 1.0;
const FLOOR_THICKNESS: f32 = 0.02;
const FLOOR_BACK_Z: f32 = -0.55;
/// Front edge; objects pushed past it fall into the gutter
pub const FLOOR_FRONT_Z: f32 = 0.72;
const FLOOR_FRICTION: f32 = 0.2;
const FLOOR_RESTITUTION: f32 = 0.05;

const WALL_HEIGHT: f32 = 0.3;
const WALL_THICKNESS: f32 = 0.01;

/// Everything that misses the sensors ends up resting here
const TRAY_TOP: f32 = 0.0;

/// Centre of the gutter sensor along the front edge
pub const GUTTER_POSITION: Vec3 = Vec3::new(0.0, 0.08, 0.82);
const GUTTER_SIZE: Vec3 = Vec3::new(1.2, 0.1, 0.2);
/// Centre x of the side traps (mirrored for the left one)
pub const TRAP_X: f32 = 0.56;
const TRAP_SIZE: Vec3 = Vec3::new(0.1, 0.1, 1.2);
/// Centre of the gate sensor spanning the drop slots
pub const SENSOR_GATE_CENTER: Vec3 = Vec3::new(0.0, sensor_gate::POSITION.y, -0.31);
const SENSOR_GATE_DEPTH: f32 = 0.06;

/// Create the shell bodies and sensors in `world`
pub fn build_shell(world: &mut dyn PhysicsWorld) {
    let groups = CollisionGroups::new(GROUP_STRUCTURE, u32::MAX);
    let floor_depth = FLOOR_FRONT_Z - FLOOR_BACK_Z;
    let floor_z = (FLOOR_FRONT_Z + FLOOR_BACK_Z) / 2.0;

    let shell = world.create_body(BodyDesc::fixed());
    world.create_collider(
        ColliderDesc::new(ColliderShape::cuboid(FLOOR_WIDTH, FLOOR_THICKNESS, floor_depth))
            .offset(Vec3::new(0.0, FLOOR_TOP - FLOOR_THICKNESS / 2.0, floor_z))
            .material(FLOOR_FRICTION, FLOOR_RESTITUTION, 1.0)
            .groups(groups),
        shell,
    );
    for side in [-1.0, 1.0] {
        world.create_collider(
            ColliderDesc::new(ColliderShape::cuboid(WALL_THICKNESS, WALL_HEIGHT, floor_depth))
                .offset(Vec3::new(
                    side * (FLOOR_WIDTH + WALL_THICKNESS) / 2.0,
                    FLOOR_TOP + WALL_HEIGHT / 2.0,
                    floor_z,
                ))
                .material(FLOOR_FRICTION, FLOOR_RESTITUTION, 1.0)
                .groups(groups),
            shell,
        );
    }
    world.create_collider(
        ColliderDesc::new(ColliderShape::cuboid(2.0, FLOOR_THICKNESS, 2.0))
            .offset(Vec3::new(0.0, TRAY_TOP - FLOOR_THICKNESS / 2.0, 0.0))
            .groups(groups),
        shell,
    );

    let sensors = world.create_body(BodyDesc::fixed());
    world.create_collider(
        ColliderDesc::sensor(
            ColliderShape::cuboid(GUTTER_SIZE.x, GUTTER_SIZE.y, GUTTER_SIZE.z),
            SensorId::Gutter,
        )
        .offset(GUTTER_POSITION),
        sensors,
    );
    for (id, side) in [(SensorId::LeftTrap, -1.0), (SensorId::RightTrap, 1.0)] {
        world.create_collider(
            ColliderDesc::sensor(ColliderShape::cuboid(TRAP_SIZE.x, TRAP_SIZE.y, TRAP_SIZE.z), id)
                .offset(Vec3::new(side * TRAP_X, GUTTER_POSITION.y, floor_z)),
            sensors,
        );
    }
    world.create_collider(
        ColliderDesc::sensor(
            ColliderShape::cuboid(sensor_gate::WIDTH, sensor_gate::HEIGHT, SENSOR_GATE_DEPTH),
            SensorId::SensorGate,
        )
        .offset(SENSOR_GATE_CENTER),
        sensors,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{ColliderTag, SandboxWorld};

    #[test]
    fn test_shell_registers_cabinet_sensors() {
        let mut world = SandboxWorld::new();
        build_shell(&mut world);
        let mut tags: Vec<SensorId> = world
            .sensor_colliders()
            .into_iter()
            .filter_map(|c| match world.collider_tag(c) {
                Some(ColliderTag::Sensor(id)) => Some(id),
                _ => None,
            })
            .collect();
        tags.sort();
        assert_eq!(
            tags,
            vec![
                SensorId::Gutter,
                SensorId::LeftTrap,
                SensorId::RightTrap,
                SensorId::SensorGate
            ]
        );
    }
}
