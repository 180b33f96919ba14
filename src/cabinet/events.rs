//! Cross-mechanism events
//!
//! Mechanisms never call each other. They emit a [`CabinetEvent`] and the
//! cabinet resolves the queue once per tick against [`ROUTES`], the complete
//! list of who reacts to what.

use glam::Vec3;

use crate::pool::{ObjectId, Reward};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CabinetEvent {
    /// The pusher door is open and the reward should be spawned
    PusherBonusDelivered { reward: Reward, position: Vec3 },
    /// The excavator closed its jaws on the pile
    ExcavatorPicked { drop_position: Vec3 },
    /// The coin roller's coin fell into bonus slot `bonus` (0..=2)
    CoinRollerBonusWon { bonus: u8 },
    /// The coin roller's coin fell into the trap
    CoinRollerCoinLost,
    /// All three reels settled
    ReelsWon { indices: [u8; 3] },
    /// A coin crossed the sensor gate
    SensorGateCoinPassed { coin: ObjectId },
    /// All sensor-gate letters are lit
    SensorGateWon,
    CardRead { variant: u8 },
    TokenRead { variant: u8 },
}

/// Discriminant of [`CabinetEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    PusherBonusDelivered,
    ExcavatorPicked,
    CoinRollerBonusWon,
    CoinRollerCoinLost,
    ReelsWon,
    SensorGateCoinPassed,
    SensorGateWon,
    CardRead,
    TokenRead,
}

impl CabinetEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CabinetEvent::PusherBonusDelivered { .. } => EventKind::PusherBonusDelivered,
            CabinetEvent::ExcavatorPicked { .. } => EventKind::ExcavatorPicked,
            CabinetEvent::CoinRollerBonusWon { .. } => EventKind::CoinRollerBonusWon,
            CabinetEvent::CoinRollerCoinLost => EventKind::CoinRollerCoinLost,
            CabinetEvent::ReelsWon { .. } => EventKind::ReelsWon,
            CabinetEvent::SensorGateCoinPassed { .. } => EventKind::SensorGateCoinPassed,
            CabinetEvent::SensorGateWon => EventKind::SensorGateWon,
            CabinetEvent::CardRead { .. } => EventKind::CardRead,
            CabinetEvent::TokenRead { .. } => EventKind::TokenRead,
        }
    }
}

/// Something in the cabinet that reacts to events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscriber {
    /// Spawns reward objects
    Pools,
    /// Queues coins through the drop slots or toggles coin CCD
    Coins,
    /// Queues a bonus delivery on the pusher
    Pusher,
    /// Enables or disables the action button
    ControlPanel,
    /// Adds to the score
    Score,
    /// Picks a random bonus mechanism to trigger
    BonusSelector,
}

/// Every (event, subscriber) pair, in dispatch order
pub const ROUTES: &[(EventKind, Subscriber)] = &[
    (EventKind::PusherBonusDelivered, Subscriber::Pools),
    (EventKind::ExcavatorPicked, Subscriber::Pools),
    (EventKind::CoinRollerBonusWon, Subscriber::Coins),
    (EventKind::CoinRollerBonusWon, Subscriber::ControlPanel),
    (EventKind::CoinRollerCoinLost, Subscriber::ControlPanel),
    (EventKind::ReelsWon, Subscriber::Pusher),
    (EventKind::SensorGateCoinPassed, Subscriber::Coins),
    (EventKind::SensorGateWon, Subscriber::BonusSelector),
    (EventKind::CardRead, Subscriber::Score),
    (EventKind::TokenRead, Subscriber::BonusSelector),
];

/// Subscribers of `kind` in dispatch order
pub fn subscribers(kind: EventKind) -> impl Iterator<Item = Subscriber> {
    ROUTES
        .iter()
        .filter(move |(k, _)| *k == kind)
        .map(|(_, s)| *s)
}

/// Events emitted during the current tick
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    queue: Vec<CabinetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: CabinetEvent) {
        log::trace!("event {:?}", event);
        self.queue.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CabinetEvent> {
        self.queue.iter()
    }

    /// Take every queued event in emission order
    pub fn drain(&mut self) -> Vec<CabinetEvent> {
        std::mem::take(&mut self.queue)
    }
}
