//! Slot-machine reels box
//!
//! Three reels of eight symbols each. A spin picks a random target symbol
//! and a random number of whole turns per reel, accelerates, spins, and
//! decelerates onto the target. One second after the last reel settles the
//! box reports the symbols it landed on.

use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use super::{Fsm, FsmSave, Mechanism, MechanismContext, MechanismId};
use crate::cabinet::events::CabinetEvent;
use crate::persistence::LoadError;
use crate::rng::RngState;

pub const REELS_COUNT: usize = 3;
pub const SYMBOLS_COUNT: u32 = 8;
const SYMBOL_ANGLE: f32 = TAU / SYMBOLS_COUNT as f32;
const MIN_SPEED: f32 = PI / 20.0;
const MAX_SPEED: f32 = PI / 10.0;
const ACCELERATION: f32 = PI / 90.0;
const DECELERATION: f32 = PI / 60.0;
const MIN_TURNS: u32 = 3;
const MAX_TURNS: u32 = 10;
const WON_DELAY_MS: f64 = 1000.0;

state_names! {
    pub enum ReelsBoxState {
        Idle => "reels-box-idle",
        Activating => "reels-box-activating",
        Active => "reels-box-active",
        Stopping => "reels-box-stopping",
        Settled => "reels-box-settled",
    }
}

state_names! {
    pub enum ReelState {
        Idle => "reel-idle",
        Starting => "reel-starting",
        Accelerating => "reel-accelerating",
        Spinning => "reel-spinning",
        Decelerating => "reel-decelerating",
        Settled => "reel-settled",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReelSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub index: u8,
    pub rotation: f32,
    pub target_index: Option<u8>,
    pub target_rotation: f32,
    pub previous_rotation: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reel {
    fsm: Fsm<ReelState>,
    index: u8,
    /// Radians around the reel axle, monotonically increasing while spinning
    rotation: f32,
    target_index: Option<u8>,
    target_rotation: f32,
    previous_rotation: f32,
    speed: f32,
}

impl Reel {
    fn new() -> Self {
        Self {
            fsm: Fsm::new(ReelState::Idle),
            index: 0,
            rotation: 0.0,
            target_index: None,
            target_rotation: 0.0,
            previous_rotation: 0.0,
            speed: 0.0,
        }
    }

    pub fn state(&self) -> ReelState {
        self.fsm.state()
    }

    /// Symbol currently facing the player
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    fn start(&mut self) {
        self.fsm.request(ReelState::Starting);
    }

    fn update(&mut self, rng: &mut RngState) {
        if self.fsm.next().is_none() {
            let remaining = self.target_rotation - self.rotation;
            let next = match self.fsm.state() {
                ReelState::Idle => None,
                ReelState::Starting => {
                    let target = rng.below(SYMBOLS_COUNT) as u8;
                    let turns = MIN_TURNS + rng.below(MAX_TURNS - MIN_TURNS + 1);
                    let mut distance = target as i32 - self.index as i32;
                    if target <= self.index {
                        distance += SYMBOLS_COUNT as i32;
                    }
                    self.target_index = Some(target);
                    self.target_rotation =
                        self.rotation + turns as f32 * TAU + distance as f32 * SYMBOL_ANGLE;
                    self.previous_rotation = self.rotation;
                    self.speed = 0.0;
                    Some(ReelState::Accelerating)
                }
                ReelState::Accelerating => {
                    if self.speed < MAX_SPEED {
                        self.speed += ACCELERATION;
                    }
                    let next = (self.rotation - self.previous_rotation > PI || remaining < 0.0)
                        .then_some(ReelState::Spinning);
                    self.rotation += self.speed;
                    next
                }
                ReelState::Spinning => {
                    let next = (remaining < PI).then_some(ReelState::Decelerating);
                    self.rotation += self.speed;
                    next
                }
                ReelState::Decelerating => {
                    self.speed = if self.speed > MIN_SPEED {
                        self.speed - DECELERATION
                    } else {
                        MIN_SPEED
                    };
                    let next = (remaining < 0.0).then_some(ReelState::Settled);
                    self.rotation += self.speed;
                    next
                }
                ReelState::Settled => {
                    if let Some(target) = self.target_index.take() {
                        self.index = target;
                    }
                    self.rotation = self.index as f32 * SYMBOL_ANGLE;
                    self.target_rotation = 0.0;
                    self.speed = 0.0;
                    Some(ReelState::Idle)
                }
            };
            if let Some(next) = next {
                self.fsm.request(next);
            }
        }
        self.fsm.commit("reel");
    }

    fn save(&self) -> ReelSave {
        ReelSave {
            fsm: self.fsm.save(),
            index: self.index,
            rotation: self.rotation,
            target_index: self.target_index,
            target_rotation: self.target_rotation,
            previous_rotation: self.previous_rotation,
            speed: self.speed,
        }
    }

    fn restored(save: &ReelSave) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "reel")?,
            index: save.index % SYMBOLS_COUNT as u8,
            rotation: save.rotation,
            target_index: save.target_index,
            target_rotation: save.target_rotation,
            previous_rotation: save.previous_rotation,
            speed: save.speed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReelsBoxSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending: u32,
    pub tick_settled: Option<u64>,
    pub reels: Vec<ReelSave>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReelsBoxReadings {
    pub reels_idle: bool,
    pub settled_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReelsBox {
    fsm: Fsm<ReelsBoxState>,
    pending: u32,
    tick_settled: Option<u64>,
    reels: [Reel; REELS_COUNT],
}

impl Default for ReelsBox {
    fn default() -> Self {
        Self::new()
    }
}

impl ReelsBox {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new(ReelsBoxState::Idle),
            pending: 0,
            tick_settled: None,
            reels: [Reel::new(); REELS_COUNT],
        }
    }

    /// Queue a spin of all three reels
    pub fn spin_reels(&mut self) {
        self.pending += 1;
    }

    pub fn reels(&self) -> &[Reel] {
        &self.reels
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn indices(&self) -> [u8; REELS_COUNT] {
        [self.reels[0].index, self.reels[1].index, self.reels[2].index]
    }

    pub fn save(&self) -> ReelsBoxSave {
        ReelsBoxSave {
            fsm: self.fsm.save(),
            pending: self.pending,
            tick_settled: self.tick_settled,
            reels: self.reels.iter().map(Reel::save).collect(),
        }
    }

    pub fn restored(&self, save: &ReelsBoxSave) -> Result<Self, LoadError> {
        if save.reels.len() != REELS_COUNT {
            return Err(LoadError::PartCount {
                machine: "reels-box",
                expected: REELS_COUNT,
                found: save.reels.len(),
            });
        }
        let mut reels = [Reel::new(); REELS_COUNT];
        for (reel, saved) in reels.iter_mut().zip(&save.reels) {
            *reel = Reel::restored(saved)?;
        }
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "reels-box")?,
            pending: save.pending,
            tick_settled: save.tick_settled,
            reels,
        })
    }
}

impl Mechanism for ReelsBox {
    type State = ReelsBoxState;
    type Readings = ReelsBoxReadings;

    fn id(&self) -> MechanismId {
        MechanismId::ReelsBox
    }

    fn fsm(&self) -> &Fsm<ReelsBoxState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<ReelsBoxState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(ReelsBoxState::Idle) && self.pending == 0
    }

    fn is_active(&self) -> bool {
        false
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> ReelsBoxReadings {
        ReelsBoxReadings {
            reels_idle: self
                .reels
                .iter()
                .all(|r| r.fsm.is(ReelState::Idle) && r.fsm.next().is_none()),
            settled_ms: self.tick_settled.map_or(0.0, |t| ctx.clock.elapsed_ms(t)),
        }
    }

    fn compute_next(&self, r: &ReelsBoxReadings) -> Option<ReelsBoxState> {
        use ReelsBoxState::*;
        match self.fsm.state() {
            Idle => (self.pending > 0).then_some(Activating),
            Activating => Some(Active),
            Active => r.reels_idle.then_some(Stopping),
            Stopping => (r.settled_ms > WON_DELAY_MS).then_some(Settled),
            Settled => Some(if self.pending > 0 { Activating } else { Idle }),
        }
    }

    fn enter(&mut self, _from: ReelsBoxState, to: ReelsBoxState, ctx: &mut MechanismContext<'_>) {
        match to {
            ReelsBoxState::Activating => {
                for reel in self.reels.iter_mut() {
                    reel.start();
                }
            }
            ReelsBoxState::Stopping => self.tick_settled = Some(ctx.clock.tick),
            ReelsBoxState::Settled => {
                self.tick_settled = None;
                self.pending = self.pending.saturating_sub(1);
                let indices = self.indices();
                log::debug!("reels settled on {:?}", indices);
                ctx.events.emit(CabinetEvent::ReelsWon { indices });
            }
            ReelsBoxState::Idle | ReelsBoxState::Active => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        for reel in self.reels.iter_mut() {
            reel.update(ctx.rng);
        }
    }
}
