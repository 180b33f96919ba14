//! Mechanism state machines
//!
//! Every moving feature of the cabinet is an owned struct holding an
//! [`Fsm`] over its own closed state enum. One tick of a mechanism is:
//!
//! 1. `read`: sample what the transition guards need from the world
//! 2. `compute_next`: pure guard evaluation, yielding the next state if any
//! 3. `drive`: progress within the current state when no transition fires
//! 4. commit: adopt the pending state, then run `enter` for it
//!
//! A transition is therefore never observed half-applied by anything else
//! running in the same tick. State names only exist at the save boundary.

/// Declare a state enum together with its stable name table
macro_rules! state_names {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl $crate::mechanisms::StateName for $name {
            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            fn from_str(name: &str) -> Option<Self> {
                match name {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pub mod card_reader;
pub mod coin_roller;
pub mod excavator;
pub mod lights;
pub mod mini_stacker;
pub mod pusher;
pub mod reels_box;
pub mod sensor_gate;
pub mod stacker;
pub mod sweepers;
#[cfg(test)]
pub(crate) mod testing;
pub mod token_slot;
pub mod tower;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Clock;
use crate::cabinet::events::EventBus;
use crate::floor_lock::FloorLock;
use crate::persistence::LoadError;
use crate::physics::{BodyHandle, ColliderHandle, JointHandle, PhysicsWorld};
use crate::pool::Pools;
use crate::rng::RngState;

pub use card_reader::CardReader;
pub use coin_roller::CoinRoller;
pub use excavator::Excavator;
pub use lights::{Lights, LightsCue};
pub use mini_stacker::MiniStacker;
pub use pusher::Pusher;
pub use reels_box::ReelsBox;
pub use sensor_gate::SensorGate;
pub use stacker::Stacker;
pub use sweepers::Sweepers;
pub use token_slot::TokenSlot;
pub use tower::Tower;

/// Stable string form of a state, used only for persistence and logs
pub trait StateName: Copy + Eq + fmt::Debug + 'static {
    fn as_str(&self) -> &'static str;
    fn from_str(name: &str) -> Option<Self>;
}

/// Identity of every mechanism instance in the cabinet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MechanismId {
    Pusher,
    Excavator,
    CoinRoller,
    Stacker,
    LeftStacker,
    RightStacker,
    Sweepers,
    ReelsBox,
    LeftTower,
    RightTower,
    SensorGate,
    CardReader,
    TokenSlot,
}

impl MechanismId {
    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismId::Pusher => "pusher",
            MechanismId::Excavator => "excavator",
            MechanismId::CoinRoller => "coin-roller",
            MechanismId::Stacker => "stacker",
            MechanismId::LeftStacker => "left-stacker",
            MechanismId::RightStacker => "right-stacker",
            MechanismId::Sweepers => "sweepers",
            MechanismId::ReelsBox => "reels-box",
            MechanismId::LeftTower => "left-tower",
            MechanismId::RightTower => "right-tower",
            MechanismId::SensorGate => "sensor-gate",
            MechanismId::CardReader => "card-reader",
            MechanismId::TokenSlot => "token-slot",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pusher" => Some(MechanismId::Pusher),
            "excavator" => Some(MechanismId::Excavator),
            "coin-roller" => Some(MechanismId::CoinRoller),
            "stacker" => Some(MechanismId::Stacker),
            "left-stacker" => Some(MechanismId::LeftStacker),
            "right-stacker" => Some(MechanismId::RightStacker),
            "sweepers" => Some(MechanismId::Sweepers),
            "reels-box" => Some(MechanismId::ReelsBox),
            "left-tower" => Some(MechanismId::LeftTower),
            "right-tower" => Some(MechanismId::RightTower),
            "sensor-gate" => Some(MechanismId::SensorGate),
            "card-reader" => Some(MechanismId::CardReader),
            "token-slot" => Some(MechanismId::TokenSlot),
            _ => None,
        }
    }
}

/// Current state plus the state requested for the next commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fsm<S> {
    state: S,
    next: Option<S>,
}

/// Serialized [`Fsm`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmSave {
    pub state: String,
    pub next_state: Option<String>,
}

impl<S: StateName> Fsm<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            next: None,
        }
    }

    #[inline]
    pub fn state(&self) -> S {
        self.state
    }

    #[inline]
    pub fn next(&self) -> Option<S> {
        self.next
    }

    #[inline]
    pub fn is(&self, state: S) -> bool {
        self.state == state
    }

    /// Request a switch at the next commit; the latest request wins
    pub fn request(&mut self, next: S) {
        self.next = Some(next);
    }

    /// Adopt the pending state, returning `(from, to)` if there was one
    pub fn commit(&mut self, machine: &str) -> Option<(S, S)> {
        let to = self.next.take()?;
        let from = self.state;
        self.state = to;
        log::debug!("{}: {} -> {}", machine, from.as_str(), to.as_str());
        Some((from, to))
    }

    pub fn save(&self) -> FsmSave {
        FsmSave {
            state: self.state.as_str().to_string(),
            next_state: self.next.map(|s| s.as_str().to_string()),
        }
    }

    /// Rebuild from saved names; an unknown name is a fatal load error
    pub fn restored(save: &FsmSave, machine: &'static str) -> Result<Self, LoadError> {
        let parse = |name: &str| {
            S::from_str(name).ok_or_else(|| LoadError::UnknownState {
                machine,
                name: name.to_string(),
            })
        };
        Ok(Self {
            state: parse(&save.state)?,
            next: save.next_state.as_deref().map(parse).transpose()?,
        })
    }
}

/// Everything a mechanism may touch during its update
pub struct MechanismContext<'a> {
    pub world: &'a mut dyn PhysicsWorld,
    pub pools: &'a mut Pools,
    pub floor_lock: &'a mut FloorLock,
    pub events: &'a mut EventBus,
    pub rng: &'a mut RngState,
    pub clock: Clock,
}

/// A cabinet feature driven by a compute/commit state machine
pub trait Mechanism {
    type State: StateName;
    /// What the guards read from the world each tick
    type Readings;

    fn id(&self) -> MechanismId;
    fn fsm(&self) -> &Fsm<Self::State>;
    fn fsm_mut(&mut self) -> &mut Fsm<Self::State>;
    fn is_idle(&self) -> bool;
    /// True while the mechanism occupies shared cabinet space
    fn is_active(&self) -> bool;

    fn read(&self, ctx: &MechanismContext<'_>) -> Self::Readings;
    /// Pure transition guard for the current state
    fn compute_next(&self, readings: &Self::Readings) -> Option<Self::State>;

    /// Per-tick progress inside the current state
    fn drive(&mut self, _readings: &Self::Readings, _ctx: &mut MechanismContext<'_>) {}

    /// Side effects of entering `to`
    fn enter(&mut self, _from: Self::State, _to: Self::State, _ctx: &mut MechanismContext<'_>) {}

    /// Secondary machines (lights, reels) that follow the primary state
    fn update_secondary(&mut self, _ctx: &mut MechanismContext<'_>) {}

    fn state(&self) -> Self::State {
        self.fsm().state()
    }

    fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    fn update(&mut self, ctx: &mut MechanismContext<'_>) {
        let readings = self.read(ctx);
        if self.fsm().next().is_none() {
            match self.compute_next(&readings) {
                Some(next) => self.fsm_mut().request(next),
                None => self.drive(&readings, ctx),
            }
        }
        let name = self.id().as_str();
        if let Some((from, to)) = self.fsm_mut().commit(name) {
            self.enter(from, to, ctx);
        }
        self.update_secondary(ctx);
    }
}

pub(crate) fn resolve_body(world: &dyn PhysicsWorld, handle: u32) -> Result<BodyHandle, LoadError> {
    let body = BodyHandle(handle);
    if world.contains_body(body) {
        Ok(body)
    } else {
        Err(LoadError::UnresolvedHandle {
            what: "body",
            handle,
        })
    }
}

pub(crate) fn resolve_joint(world: &dyn PhysicsWorld, handle: u32) -> Result<JointHandle, LoadError> {
    let joint = JointHandle(handle);
    if world.contains_joint(joint) {
        Ok(joint)
    } else {
        Err(LoadError::UnresolvedHandle {
            what: "joint",
            handle,
        })
    }
}

pub(crate) fn resolve_collider(
    world: &dyn PhysicsWorld,
    handle: u32,
) -> Result<ColliderHandle, LoadError> {
    let collider = ColliderHandle(handle);
    if world.contains_collider(collider) {
        Ok(collider)
    } else {
        Err(LoadError::UnresolvedHandle {
            what: "collider",
            handle,
        })
    }
}
