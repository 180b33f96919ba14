//! Indicator lights that follow a mechanism's primary state
//!
//! The owner maps its own state to a [`LightsCue`] every tick; the lights
//! never feed anything back into the owner.

use serde::{Deserialize, Serialize};

use super::{Fsm, FsmSave};
use crate::persistence::LoadError;

pub const MIN_INTENSITY: f32 = 0.0;
pub const MAX_INTENSITY: f32 = 5.0;
const BLINK_TICKS: u32 = 35;
const DELIVER_TICKS: u32 = 10;
const ROTATE_TICKS: u32 = 4;
const REMANENCE: f32 = 0.8;

state_names! {
    pub enum LightsState {
        Idle => "idle",
        Activating => "activating",
        Blinking => "blinking",
        Rotating => "rotating",
        Delivering => "delivering",
        PreparingIdle => "preparing-idle",
    }
}

/// What the owner wants the lights to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightsCue {
    Off,
    Blink,
    Rotate,
    Deliver,
}

impl LightsCue {
    fn state(self) -> Option<LightsState> {
        match self {
            LightsCue::Off => None,
            LightsCue::Blink => Some(LightsState::Blinking),
            LightsCue::Rotate => Some(LightsState::Rotating),
            LightsCue::Deliver => Some(LightsState::Delivering),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightsSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub frame: u32,
    pub head: usize,
    pub bulbs: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lights {
    fsm: Fsm<LightsState>,
    frame: u32,
    head: usize,
    bulbs: Vec<f32>,
}

impl Lights {
    pub fn new(count: usize) -> Self {
        Self {
            fsm: Fsm::new(LightsState::Idle),
            frame: 0,
            head: 0,
            bulbs: vec![MIN_INTENSITY; count],
        }
    }

    pub fn state(&self) -> LightsState {
        self.fsm.state()
    }

    pub fn bulbs(&self) -> &[f32] {
        &self.bulbs
    }

    /// Flash every bulb to full; decays again while rotating
    pub fn pulse(&mut self) {
        self.bulbs.fill(MAX_INTENSITY);
    }

    fn compute_next(&self, cue: LightsCue) -> Option<LightsState> {
        match self.fsm.state() {
            LightsState::Idle => (cue != LightsCue::Off).then_some(LightsState::Activating),
            LightsState::Activating => Some(cue.state().unwrap_or(LightsState::PreparingIdle)),
            LightsState::Blinking | LightsState::Rotating | LightsState::Delivering => {
                match cue.state() {
                    None => Some(LightsState::PreparingIdle),
                    Some(state) if state != self.fsm.state() => Some(state),
                    Some(_) => None,
                }
            }
            LightsState::PreparingIdle => Some(LightsState::Idle),
        }
    }

    fn toggle_all(&mut self) {
        let on = self.bulbs.first().is_some_and(|b| *b > MIN_INTENSITY);
        self.bulbs
            .fill(if on { MIN_INTENSITY } else { MAX_INTENSITY });
    }

    fn drive(&mut self) {
        match self.fsm.state() {
            LightsState::Blinking => {
                self.frame += 1;
                if self.frame > BLINK_TICKS {
                    self.frame = 0;
                    self.toggle_all();
                }
            }
            LightsState::Delivering => {
                self.frame += 1;
                if self.frame > DELIVER_TICKS {
                    self.frame = 0;
                    self.toggle_all();
                }
            }
            LightsState::Rotating => {
                for bulb in self.bulbs.iter_mut() {
                    *bulb *= REMANENCE;
                }
                self.frame += 1;
                if self.frame >= ROTATE_TICKS && !self.bulbs.is_empty() {
                    self.frame = 0;
                    self.head = (self.head + 1) % self.bulbs.len();
                }
                if let Some(bulb) = self.bulbs.get_mut(self.head) {
                    *bulb = MAX_INTENSITY;
                }
            }
            LightsState::Idle | LightsState::Activating | LightsState::PreparingIdle => {}
        }
    }

    fn enter(&mut self, state: LightsState) {
        match state {
            LightsState::Activating => self.frame = 0,
            LightsState::PreparingIdle | LightsState::Idle => {
                self.bulbs.fill(MIN_INTENSITY);
                self.frame = 0;
                self.head = 0;
            }
            LightsState::Blinking | LightsState::Rotating | LightsState::Delivering => {
                self.frame = 0
            }
        }
    }

    pub fn update(&mut self, cue: LightsCue) {
        match self.compute_next(cue) {
            Some(next) => self.fsm.request(next),
            None => self.drive(),
        }
        if let Some((_, to)) = self.fsm.commit("lights") {
            self.enter(to);
        }
    }

    pub fn save(&self) -> LightsSave {
        LightsSave {
            fsm: self.fsm.save(),
            frame: self.frame,
            head: self.head,
            bulbs: self.bulbs.clone(),
        }
    }

    pub fn restored(&self, save: &LightsSave) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "lights")?,
            frame: save.frame,
            head: save.head,
            bulbs: save.bulbs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(lights: &Lights) -> usize {
        lights.bulbs().iter().filter(|b| **b >= MAX_INTENSITY).count()
    }

    #[test]
    fn test_cue_walks_through_activation() {
        let mut lights = Lights::new(4);
        lights.update(LightsCue::Blink);
        assert_eq!(lights.state(), LightsState::Activating);
        lights.update(LightsCue::Blink);
        assert_eq!(lights.state(), LightsState::Blinking);
        lights.update(LightsCue::Off);
        assert_eq!(lights.state(), LightsState::PreparingIdle);
        lights.update(LightsCue::Off);
        assert_eq!(lights.state(), LightsState::Idle);
        assert_eq!(lit(&lights), 0);
    }

    #[test]
    fn test_blink_toggles_after_period() {
        let mut lights = Lights::new(3);
        lights.update(LightsCue::Blink);
        lights.update(LightsCue::Blink);
        for _ in 0..BLINK_TICKS {
            lights.update(LightsCue::Blink);
        }
        assert_eq!(lit(&lights), 0);
        lights.update(LightsCue::Blink);
        assert_eq!(lit(&lights), 3);
    }

    #[test]
    fn test_rotation_keeps_one_head_lit() {
        let mut lights = Lights::new(6);
        for _ in 0..40 {
            lights.update(LightsCue::Rotate);
        }
        assert_eq!(lights.state(), LightsState::Rotating);
        assert_eq!(lit(&lights), 1);
        assert!(lights.bulbs().iter().any(|b| *b > MIN_INTENSITY && *b < MAX_INTENSITY));
    }

    #[test]
    fn test_mode_switch_without_idle() {
        let mut lights = Lights::new(2);
        lights.update(LightsCue::Rotate);
        lights.update(LightsCue::Rotate);
        lights.update(LightsCue::Deliver);
        assert_eq!(lights.state(), LightsState::Delivering);
    }

    #[test]
    fn test_save_round_trip() {
        let mut lights = Lights::new(5);
        for _ in 0..7 {
            lights.update(LightsCue::Rotate);
        }
        let restored = lights.restored(&lights.save()).unwrap();
        assert_eq!(restored, lights);
    }
}
