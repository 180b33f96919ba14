//! Scored game rounds
//!
//! A game is a fixed ladder of runs. Each run asks for a number of points
//! on top of the score at the moment it starts; once reached, the cabinet
//! pauses for a moment and moves on to the next rung.

use serde::{Deserialize, Serialize};

use crate::Clock;
use crate::mechanisms::{Fsm, FsmSave};
use crate::persistence::LoadError;

const DELAY_WAIT_AFTER_RUN_MS: f64 = 5000.0;
/// Points to win in each run, in order
pub const TARGETS: [u64; 6] = [150, 200, 250, 300, 350, 400];

state_names! {
    pub enum RunsState {
        Idle => "runs-idle",
        StartingRuns => "runs-starting-runs",
        StartingRun => "runs-starting-run",
        Running => "runs-running",
        CompletingRun => "runs-completing-run",
        FinishingGame => "runs-finishing-game",
    }
}

/// What happened during a runs update, for the cabinet to react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunsEvent {
    GameStarted,
    RunCompleted { step: usize },
    GameFinished,
}

/// Presentation of the current run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub description: String,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunsSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub step: Option<usize>,
    pub score_start: Option<u64>,
    pub tick_run_completed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Runs {
    fsm: Fsm<RunsState>,
    step: Option<usize>,
    score_start: Option<u64>,
    tick_run_completed: Option<u64>,
}

impl Default for Runs {
    fn default() -> Self {
        Self::new()
    }
}

impl Runs {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new(RunsState::Idle),
            step: None,
            score_start: None,
            tick_run_completed: None,
        }
    }

    pub fn state(&self) -> RunsState {
        self.fsm.state()
    }

    pub fn step(&self) -> Option<usize> {
        self.step
    }

    /// Begin a game; ignored while one is in progress
    pub fn start(&mut self) -> bool {
        let idle = self.fsm.is(RunsState::Idle) && self.fsm.next().is_none();
        if idle {
            self.fsm.request(RunsState::StartingRuns);
        }
        idle
    }

    /// True while points count towards the score
    pub fn started(&self) -> bool {
        !matches!(self.fsm.state(), RunsState::Idle | RunsState::StartingRuns)
    }

    pub fn status(&self, score: u64) -> Option<RunStatus> {
        let target = TARGETS.get(self.step?)?;
        let gained = score.saturating_sub(self.score_start.unwrap_or(score));
        Some(RunStatus {
            description: format!("Win {} points", target),
            remaining: *target as i64 - gained as i64,
        })
    }

    fn passed(&self, score: u64) -> bool {
        match (self.step.and_then(|s| TARGETS.get(s)), self.score_start) {
            (Some(target), Some(start)) => score.saturating_sub(start) >= *target,
            _ => false,
        }
    }

    fn compute_next(&self, score: u64, clock: Clock) -> Option<RunsState> {
        match self.fsm.state() {
            RunsState::Idle => None,
            RunsState::StartingRuns => Some(RunsState::StartingRun),
            RunsState::StartingRun => Some(RunsState::Running),
            RunsState::Running => self.passed(score).then_some(RunsState::CompletingRun),
            RunsState::CompletingRun => {
                let waited = self
                    .tick_run_completed
                    .is_none_or(|tick| clock.elapsed_ms(tick) > DELAY_WAIT_AFTER_RUN_MS);
                let more = self.step.is_some_and(|s| s + 1 < TARGETS.len());
                waited.then_some(if more {
                    RunsState::StartingRun
                } else {
                    RunsState::FinishingGame
                })
            }
            RunsState::FinishingGame => Some(RunsState::Idle),
        }
    }

    pub fn update(&mut self, score: u64, clock: Clock) -> Option<RunsEvent> {
        if self.fsm.next().is_none() {
            if let Some(next) = self.compute_next(score, clock) {
                self.fsm.request(next);
            }
        }
        let (from, to) = self.fsm.commit("runs")?;
        match to {
            RunsState::StartingRuns => {
                self.step = Some(0);
                log::info!("runs: game started");
                return Some(RunsEvent::GameStarted);
            }
            RunsState::StartingRun => {
                if from == RunsState::CompletingRun {
                    self.step = self.step.map(|s| s + 1);
                    self.tick_run_completed = None;
                }
            }
            RunsState::Running => self.score_start = Some(score),
            RunsState::CompletingRun => {
                self.tick_run_completed = Some(clock.tick);
                let step = self.step.unwrap_or_default();
                log::info!("runs: run {} completed", step + 1);
                return Some(RunsEvent::RunCompleted { step });
            }
            RunsState::FinishingGame => {
                log::info!("runs: game finished");
                return Some(RunsEvent::GameFinished);
            }
            RunsState::Idle => {
                self.step = None;
                self.score_start = None;
                self.tick_run_completed = None;
            }
        }
        None
    }

    pub fn save(&self) -> RunsSave {
        RunsSave {
            fsm: self.fsm.save(),
            step: self.step,
            score_start: self.score_start,
            tick_run_completed: self.tick_run_completed,
        }
    }

    pub fn restored(save: &RunsSave) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, "runs")?,
            step: save.step,
            score_start: save.score_start,
            tick_run_completed: save.tick_run_completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(runs: &mut Runs, score: u64, clock: &mut Clock) -> Option<RunsEvent> {
        let event = runs.update(score, *clock);
        clock.advance();
        event
    }

    #[test]
    fn test_start_only_from_idle() {
        let mut runs = Runs::new();
        assert!(!runs.started());
        assert!(runs.start());
        assert!(!runs.start());
        let mut clock = Clock::new();
        assert_eq!(tick(&mut runs, 0, &mut clock), Some(RunsEvent::GameStarted));
        assert!(!runs.started());
        tick(&mut runs, 0, &mut clock);
        assert!(runs.started());
        assert!(!runs.start());
    }

    #[test]
    fn test_run_target_is_relative_to_start() {
        let mut runs = Runs::new();
        let mut clock = Clock::new();
        runs.start();
        for _ in 0..3 {
            tick(&mut runs, 40, &mut clock);
        }
        assert_eq!(runs.state(), RunsState::Running);
        let status = runs.status(100).unwrap();
        assert_eq!(status.description, "Win 150 points");
        assert_eq!(status.remaining, 90);
        assert_eq!(tick(&mut runs, 189, &mut clock), None);
        assert_eq!(
            tick(&mut runs, 190, &mut clock),
            Some(RunsEvent::RunCompleted { step: 0 })
        );
    }

    #[test]
    fn test_pause_between_runs() {
        let mut runs = Runs::new();
        let mut clock = Clock::new();
        runs.start();
        for _ in 0..3 {
            tick(&mut runs, 0, &mut clock);
        }
        tick(&mut runs, 150, &mut clock);
        assert_eq!(runs.state(), RunsState::CompletingRun);
        let mut waited = 0;
        while runs.state() == RunsState::CompletingRun {
            tick(&mut runs, 150, &mut clock);
            waited += 1;
        }
        assert!((300..=302).contains(&waited), "waited {}", waited);
        assert_eq!(runs.step(), Some(1));
        tick(&mut runs, 150, &mut clock);
        assert_eq!(runs.status(150).unwrap().remaining, 200);
    }

    #[test]
    fn test_full_game_returns_to_idle() {
        let mut runs = Runs::new();
        let mut clock = Clock::new();
        runs.start();
        let mut score = 0;
        let mut events = Vec::new();
        for _ in 0..5000 {
            if runs.state() == RunsState::Running {
                score += 10;
            }
            events.extend(tick(&mut runs, score, &mut clock));
            if runs.state() == RunsState::Idle && !events.is_empty() {
                break;
            }
        }
        assert_eq!(runs.state(), RunsState::Idle);
        assert_eq!(events.first(), Some(&RunsEvent::GameStarted));
        assert_eq!(events.last(), Some(&RunsEvent::GameFinished));
        let completed = events
            .iter()
            .filter(|e| matches!(e, RunsEvent::RunCompleted { .. }))
            .count();
        assert_eq!(completed, TARGETS.len());
        assert_eq!(runs.step(), None);
    }

    #[test]
    fn test_save_restore() {
        let mut runs = Runs::new();
        let mut clock = Clock::new();
        runs.start();
        for _ in 0..3 {
            tick(&mut runs, 25, &mut clock);
        }
        let save = runs.save();
        let json = serde_json::to_string(&save).unwrap();
        assert!(json.contains("runs-running"));
        let back: RunsSave = serde_json::from_str(&json).unwrap();
        assert_eq!(Runs::restored(&back).unwrap(), runs);
    }
}
