//! Coin Pusher headless runner
//!
//! `coin-pusher [settings.json]` plays a scripted session against the
//! rapier world and logs the outcome.

#[cfg(not(target_arch = "wasm32"))]
fn main() -> std::process::ExitCode {
    env_logger::init();
    let settings = match std::env::args().nth(1) {
        Some(path) => coin_pusher::Settings::load_from(path),
        None => coin_pusher::Settings::default(),
    };
    match session::run(&settings) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // Headless runner only
}

#[cfg(not(target_arch = "wasm32"))]
mod session {
    use coin_pusher::cabinet::{Control, TickInput};
    use coin_pusher::persistence::{CabinetSave, LoadError, SaveError};
    use coin_pusher::physics::RapierWorld;
    use coin_pusher::runs::RunsState;
    use coin_pusher::{Cabinet, Settings};
    use thiserror::Error;

    /// Real time between two rendered frames; deliberately off the tick grid
    const FRAME_DT: f32 = 1.0 / 50.0;
    /// Frames between two coin drops
    const DROP_EVERY: u64 = 20;

    #[derive(Debug, Error)]
    pub enum SessionError {
        #[error(transparent)]
        Save(#[from] SaveError),
        #[error(transparent)]
        Load(#[from] LoadError),
        #[error("reloaded save differs from the one written")]
        Mismatch,
        #[error("cabinet state changed across a reload")]
        Diverged,
    }

    pub fn run(settings: &Settings) -> Result<(), SessionError> {
        let mut cabinet = Cabinet::new(RapierWorld::new(), settings);
        let mut frame: u64 = 0;
        let mut slot = 0;

        while cabinet.clock().tick < settings.ticks {
            let mut input = TickInput::default();
            if cabinet.runs().state() == RunsState::Idle {
                input.controls.push(Control::Start);
            }
            if frame % DROP_EVERY == 0 && cabinet.score().coins > 0 {
                input.controls.push(Control::DropCoin(slot));
                slot = (slot + 1) % 3;
            }
            if cabinet.mechanisms().coin_roller.can_trigger() {
                input.controls.push(Control::Action);
            }
            cabinet.advance(FRAME_DT, &input);
            frame += 1;

            if frame % 600 == 0 {
                let score = cabinet.score();
                log::debug!(
                    "tick {}: score {}, coins {}, on the floor {}",
                    cabinet.clock().tick,
                    score.score,
                    score.coins,
                    cabinet.pools().coins.used_count()
                );
            }
        }

        let score = cabinet.score();
        log::info!(
            "Session over after {} ticks: score {}, points {}, coins left {}",
            cabinet.clock().tick,
            score.score,
            score.points,
            score.coins
        );
        if let Some(status) = cabinet.runs().status(score.score) {
            log::info!("{} ({} to go)", status.description, status.remaining);
        }

        if let Some(path) = &settings.save_path {
            let save = cabinet.save()?;
            save.write_to(path)?;
            let reloaded = CabinetSave::read_from(path)?;
            if reloaded != save {
                return Err(SessionError::Mismatch);
            }
            cabinet.load(&reloaded)?;
            let after = cabinet.save()?;
            // World blobs need not re-encode byte for byte
            if after.clock != save.clock
                || after.score != save.score
                || after.pools != save.pools
                || after.mechanisms != save.mechanisms
            {
                return Err(SessionError::Diverged);
            }
            log::info!("Save verified");
        }
        Ok(())
    }
}
