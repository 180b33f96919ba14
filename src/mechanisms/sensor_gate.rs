//! Sensor gate above the drop slots
//!
//! Six letters span the gate. A coin falling through the gate picks the
//! letter under it; with probability 1/5 that letter flashes and locks on.
//! Once all six are locked, the whole gate flashes, the letters reset, and
//! a bonus is won.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{Fsm, FsmSave, Mechanism, MechanismContext, MechanismId};
use crate::Clock;
use crate::cabinet::events::{CabinetEvent, EventBus};
use crate::persistence::LoadError;
use crate::pool::ObjectId;
use crate::rng::RngState;

pub const POSITION: Vec3 = Vec3::new(0.0, 0.33, -0.27);
pub const WIDTH: f32 = 0.6;
pub const HEIGHT: f32 = 0.03;
pub const DEPTH: f32 = 0.04;
pub const LETTERS_COUNT: usize = 6;
const MIN_POSITION_X: f32 = -0.22;
const MAX_POSITION_X: f32 = 0.22;
const SLOT_WIDTH: f32 = 0.075;
const PROBABILITY_LETTER_WIN: f32 = 1.0 / 5.0;
const BONUS_FLASHING_DELAY_MS: f64 = 150.0;
const LETTER_FLASHING_DELAY_MS: f64 = 100.0;
const COUNT_BONUS_FLASHING: u32 = 5;
const COUNT_LETTER_FLASHING: u32 = 5;

state_names! {
    pub enum SensorGateState {
        Idle => "sensor-gate-idle",
        Activating => "sensor-gate-activating",
        FlashingOn => "sensor-gate-flashing-on",
        FlashingOff => "sensor-gate-flashing-off",
        AwaitingBonusDelivery => "sensor-gate-awaiting-bonus-delivery",
        BonusDelivered => "sensor-gate-bonus-delivered",
    }
}

state_names! {
    pub enum LetterState {
        Off => "letter-off",
        Activating => "letter-activating",
        FlashingOn => "letter-flashing-on",
        FlashingOff => "letter-flashing-off",
        LockedOn => "letter-locked-on",
    }
}

/// Letter index under a crossing at `x`, if inside the lettered span
pub fn letter_at(x: f32) -> Option<usize> {
    if x > MIN_POSITION_X && x < MAX_POSITION_X {
        let index = ((x + MAX_POSITION_X) / SLOT_WIDTH).floor() as usize;
        Some(index.min(LETTERS_COUNT - 1))
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetterSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub flash_start: Option<u64>,
    pub flash_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letter {
    fsm: Fsm<LetterState>,
    flash_start: Option<u64>,
    flash_count: u32,
}

impl Letter {
    fn new() -> Self {
        Self {
            fsm: Fsm::new(LetterState::Off),
            flash_start: None,
            flash_count: 0,
        }
    }

    pub fn state(&self) -> LetterState {
        self.fsm.state()
    }

    fn flash_elapsed(&self, clock: Clock) -> f64 {
        self.flash_start.map_or(0.0, |t| clock.elapsed_ms(t))
    }

    fn update(&mut self, clock: Clock, rng: &mut RngState) {
        if self.fsm.next().is_none() {
            let next = match self.fsm.state() {
                LetterState::Off | LetterState::LockedOn => None,
                LetterState::Activating => Some(if rng.chance(PROBABILITY_LETTER_WIN) {
                    LetterState::FlashingOn
                } else {
                    LetterState::Off
                }),
                LetterState::FlashingOn => (self.flash_elapsed(clock) >= LETTER_FLASHING_DELAY_MS)
                    .then(|| {
                        if self.flash_count < COUNT_LETTER_FLASHING {
                            LetterState::FlashingOff
                        } else {
                            LetterState::LockedOn
                        }
                    }),
                LetterState::FlashingOff => (self.flash_elapsed(clock)
                    >= LETTER_FLASHING_DELAY_MS)
                    .then_some(LetterState::FlashingOn),
            };
            if let Some(next) = next {
                self.fsm.request(next);
            }
        }
        if let Some((from, to)) = self.fsm.commit("sensor-gate letter") {
            match to {
                LetterState::FlashingOn => {
                    if from == LetterState::FlashingOff {
                        self.flash_count += 1;
                    }
                    self.flash_start = Some(clock.tick);
                }
                LetterState::FlashingOff => self.flash_start = Some(clock.tick),
                LetterState::LockedOn | LetterState::Off => {
                    self.flash_count = 0;
                    self.flash_start = None;
                }
                LetterState::Activating => {}
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn save(&self) -> LetterSave {
        LetterSave {
            fsm: self.fsm.save(),
            flash_start: self.flash_start,
            flash_count: self.flash_count,
        }
    }

    fn restored(save: &LetterSave) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "sensor-gate letter")?,
            flash_start: save.flash_start,
            flash_count: save.flash_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorGateSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub flash_start: Option<u64>,
    pub flash_count: u32,
    pub letters: Vec<LetterSave>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorGateReadings {
    pub all_locked: bool,
    pub flash_elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorGate {
    fsm: Fsm<SensorGateState>,
    flash_start: Option<u64>,
    flash_count: u32,
    letters: [Letter; LETTERS_COUNT],
}

impl Default for SensorGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorGate {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new(SensorGateState::Idle),
            flash_start: None,
            flash_count: 0,
            letters: [Letter::new(); LETTERS_COUNT],
        }
    }

    pub fn letters(&self) -> &[Letter] {
        &self.letters
    }

    /// A coin fell through the gate at `x`
    pub fn coin_crossed(&mut self, coin: ObjectId, x: f32, events: &mut EventBus) {
        events.emit(CabinetEvent::SensorGateCoinPassed { coin });
        if !self.fsm.is(SensorGateState::Idle) {
            return;
        }
        if let Some(letter) = letter_at(x).and_then(|i| self.letters.get_mut(i)) {
            if letter.fsm.is(LetterState::Off) && letter.fsm.next().is_none() {
                letter.fsm.request(LetterState::Activating);
            }
        }
    }

    /// Whether letter `index` is lit right now
    pub fn is_lit(&self, index: usize) -> bool {
        let Some(letter) = self.letters.get(index) else {
            return false;
        };
        match self.fsm.state() {
            SensorGateState::FlashingOn | SensorGateState::AwaitingBonusDelivery => true,
            SensorGateState::Idle => matches!(
                letter.state(),
                LetterState::FlashingOn | LetterState::LockedOn
            ),
            _ => letter.state() == LetterState::FlashingOn,
        }
    }

    pub fn save(&self) -> SensorGateSave {
        SensorGateSave {
            fsm: self.fsm.save(),
            flash_start: self.flash_start,
            flash_count: self.flash_count,
            letters: self.letters.iter().map(Letter::save).collect(),
        }
    }

    pub fn restored(&self, save: &SensorGateSave) -> Result<Self, LoadError> {
        if save.letters.len() != LETTERS_COUNT {
            return Err(LoadError::PartCount {
                machine: "sensor-gate",
                expected: LETTERS_COUNT,
                found: save.letters.len(),
            });
        }
        let mut letters = [Letter::new(); LETTERS_COUNT];
        for (letter, saved) in letters.iter_mut().zip(&save.letters) {
            *letter = Letter::restored(saved)?;
        }
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "sensor-gate")?,
            flash_start: save.flash_start,
            flash_count: save.flash_count,
            letters,
        })
    }
}

impl Mechanism for SensorGate {
    type State = SensorGateState;
    type Readings = SensorGateReadings;

    fn id(&self) -> MechanismId {
        MechanismId::SensorGate
    }

    fn fsm(&self) -> &Fsm<SensorGateState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<SensorGateState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(SensorGateState::Idle)
    }

    fn is_active(&self) -> bool {
        false
    }

    fn read(&self, ctx: &MechanismContext<'_>) -> SensorGateReadings {
        SensorGateReadings {
            all_locked: self
                .letters
                .iter()
                .all(|l| l.state() == LetterState::LockedOn),
            flash_elapsed_ms: self.flash_start.map_or(0.0, |t| ctx.clock.elapsed_ms(t)),
        }
    }

    fn compute_next(&self, r: &SensorGateReadings) -> Option<SensorGateState> {
        use SensorGateState::*;
        match self.fsm.state() {
            Idle => r.all_locked.then_some(Activating),
            Activating => Some(FlashingOn),
            FlashingOn => (r.flash_elapsed_ms >= BONUS_FLASHING_DELAY_MS).then(|| {
                if self.flash_count < COUNT_BONUS_FLASHING {
                    FlashingOff
                } else {
                    AwaitingBonusDelivery
                }
            }),
            FlashingOff => (r.flash_elapsed_ms >= BONUS_FLASHING_DELAY_MS).then_some(FlashingOn),
            AwaitingBonusDelivery => Some(BonusDelivered),
            BonusDelivered => Some(Idle),
        }
    }

    fn enter(&mut self, from: SensorGateState, to: SensorGateState, ctx: &mut MechanismContext<'_>) {
        use SensorGateState::*;
        match to {
            FlashingOn => {
                if from == FlashingOff {
                    self.flash_count += 1;
                }
                self.flash_start = Some(ctx.clock.tick);
            }
            FlashingOff => self.flash_start = Some(ctx.clock.tick),
            AwaitingBonusDelivery => {
                self.flash_count = 0;
                self.flash_start = None;
            }
            BonusDelivered => {
                for letter in self.letters.iter_mut() {
                    letter.reset();
                }
                log::info!("sensor gate bonus won");
                ctx.events.emit(CabinetEvent::SensorGateWon);
            }
            Idle | Activating => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        for letter in self.letters.iter_mut() {
            letter.update(ctx.clock, ctx.rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cabinet::events::EventKind;
    use crate::mechanisms::testing::Rig;

    fn lock_all(gate: &mut SensorGate) {
        for letter in gate.letters.iter_mut() {
            letter.fsm.request(LetterState::LockedOn);
            letter.fsm.commit("letter");
        }
    }

    #[test]
    fn test_letter_index() {
        assert_eq!(letter_at(-0.21), Some(0));
        assert_eq!(letter_at(0.0), Some(2));
        assert_eq!(letter_at(0.219), Some(5));
        assert_eq!(letter_at(0.3), None);
        assert_eq!(letter_at(-0.22), None);
    }

    #[test]
    fn test_crossing_emits_ccd_event_and_activates_letter() {
        let mut gate = SensorGate::new();
        let mut events = EventBus::new();
        gate.coin_crossed(ObjectId::coin(3), -0.06, &mut events);
        assert_eq!(events.iter().next().map(|e| e.kind()), Some(EventKind::SensorGateCoinPassed));
        assert_eq!(gate.letters[2].fsm.next(), Some(LetterState::Activating));
        // Outside the lettered span nothing is armed
        gate.coin_crossed(ObjectId::coin(4), 0.25, &mut events);
        assert!(gate.letters.iter().filter(|l| l.fsm.next().is_some()).count() == 1);
    }

    #[test]
    fn test_letter_wins_about_one_in_five() {
        let mut rig = Rig::new();
        let mut wins = 0;
        for _ in 0..500 {
            let mut letter = Letter::new();
            letter.fsm.request(LetterState::Activating);
            letter.update(rig.clock, &mut rig.rng);
            letter.update(rig.clock, &mut rig.rng);
            if letter.state() == LetterState::FlashingOn {
                wins += 1;
            }
        }
        assert!((60..=140).contains(&wins), "wins = {}", wins);
    }

    #[test]
    fn test_letter_flashes_then_locks() {
        let mut rig = Rig::new();
        let mut letter = Letter::new();
        letter.fsm.request(LetterState::FlashingOn);
        let mut ticks = 0;
        while letter.state() != LetterState::LockedOn && ticks < 200 {
            letter.update(rig.clock, &mut rig.rng);
            rig.clock.advance();
            ticks += 1;
        }
        assert_eq!(letter.state(), LetterState::LockedOn);
        // Eleven 100 ms phases of six ticks each
        assert!((60..=80).contains(&ticks), "ticks = {}", ticks);
    }

    #[test]
    fn test_all_locked_wins_once_and_resets() {
        let mut rig = Rig::new();
        let mut gate = SensorGate::new();
        lock_all(&mut gate);
        let seen = rig.trace(&mut gate, 200);
        assert_eq!(seen.first(), Some(&SensorGateState::Idle));
        assert_eq!(seen.last(), Some(&SensorGateState::Idle));
        assert!(seen.contains(&SensorGateState::AwaitingBonusDelivery));
        let wins = rig
            .events
            .iter()
            .filter(|e| e.kind() == EventKind::SensorGateWon)
            .count();
        assert_eq!(wins, 1);
        assert!(gate.letters().iter().all(|l| l.state() == LetterState::Off));
    }

    #[test]
    fn test_crossing_ignored_while_flashing() {
        let mut rig = Rig::new();
        let mut gate = SensorGate::new();
        lock_all(&mut gate);
        rig.tick(&mut gate);
        rig.tick(&mut gate);
        assert_eq!(gate.state(), SensorGateState::FlashingOn);
        gate.letters[0].reset();
        gate.coin_crossed(ObjectId::coin(0), -0.2, &mut rig.events);
        assert_eq!(gate.letters[0].fsm.next(), None);
    }

    #[test]
    fn test_save_round_trip() {
        let mut rig = Rig::new();
        let mut gate = SensorGate::new();
        gate.letters[1].fsm.request(LetterState::FlashingOn);
        for _ in 0..9 {
            rig.tick(&mut gate);
        }
        let restored = gate.restored(&gate.save()).unwrap();
        assert_eq!(restored, gate);
        let mut save = gate.save();
        save.letters[3].fsm.state = "letter-dim".into();
        assert!(gate.restored(&save).is_err());
    }
}
