//! Minimal world and collaborators for driving a single mechanism in tests

use super::{Mechanism, MechanismContext};
use crate::Clock;
use crate::cabinet::events::EventBus;
use crate::consts::SIM_DT;
use crate::floor_lock::FloorLock;
use crate::physics::{PhysicsWorld, SandboxWorld};
use crate::pool::{PoolCapacities, Pools};
use crate::rng::RngState;

pub struct Rig {
    pub world: SandboxWorld,
    pub pools: Pools,
    pub lock: FloorLock,
    pub events: EventBus,
    pub rng: RngState,
    pub clock: Clock,
}

impl Rig {
    pub fn new() -> Self {
        let mut world = SandboxWorld::new();
        let pools = Pools::new(
            &mut world,
            PoolCapacities {
                coins: 64,
                tokens: 2,
                cards: 2,
                ingots: 2,
            },
            0.2,
            1.0,
        );
        Self {
            world,
            pools,
            lock: FloorLock::new(),
            events: EventBus::new(),
            rng: RngState::new(1),
            clock: Clock::new(),
        }
    }

    pub fn ctx(&mut self) -> MechanismContext<'_> {
        MechanismContext {
            world: &mut self.world,
            pools: &mut self.pools,
            floor_lock: &mut self.lock,
            events: &mut self.events,
            rng: &mut self.rng,
            clock: self.clock,
        }
    }

    /// One mechanism update, one physics step, one clock tick
    pub fn tick<M: Mechanism>(&mut self, mechanism: &mut M) {
        mechanism.update(&mut self.ctx());
        self.pools.update(&mut self.world, &mut self.rng);
        self.world.step(SIM_DT);
        self.pools.refresh(&self.world);
        self.clock.advance();
    }

    /// Tick until `done` holds, returning the number of ticks taken
    pub fn run_until<M: Mechanism>(
        &mut self,
        mechanism: &mut M,
        max_ticks: usize,
        mut done: impl FnMut(&M) -> bool,
    ) -> Option<usize> {
        for ticks in 0..max_ticks {
            if done(mechanism) {
                return Some(ticks);
            }
            self.tick(mechanism);
        }
        done(mechanism).then_some(max_ticks)
    }

    /// Distinct states visited while ticking `ticks` times
    pub fn trace<M: Mechanism>(&mut self, mechanism: &mut M, ticks: usize) -> Vec<M::State> {
        let mut seen = vec![mechanism.state()];
        for _ in 0..ticks {
            self.tick(mechanism);
            if seen.last() != Some(&mechanism.state()) {
                seen.push(mechanism.state());
            }
        }
        seen
    }
}

