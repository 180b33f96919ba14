//! Cabinet orchestrator
//!
//! Owns the physics world, the pools and every mechanism, and advances them
//! in a fixed order once per tick:
//!
//! 1. pools (drop queue, pending impulses, coin settling)
//! 2. pusher
//! 3. sensor dispatch
//! 4. every other mechanism
//! 5. runs
//! 6. event resolution
//! 7. fallen-object sweep
//!
//! followed by one physics step and a transform refresh.

pub mod events;
pub mod layout;

use std::f32::consts::FRAC_PI_8;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::Clock;
use crate::consts::{MAX_SUBSTEPS, MIN_POSITION_Y_OBJECTS, SIM_DT};
use crate::floor_lock::FloorLock;
use crate::mechanisms::card_reader::CardReaderSave;
use crate::mechanisms::coin_roller::CoinRollerSave;
use crate::mechanisms::excavator::ExcavatorSave;
use crate::mechanisms::mini_stacker::MiniStackerSave;
use crate::mechanisms::pusher::PusherSave;
use crate::mechanisms::reels_box::ReelsBoxSave;
use crate::mechanisms::sensor_gate::SensorGateSave;
use crate::mechanisms::stacker::StackerSave;
use crate::mechanisms::sweepers::SweepersSave;
use crate::mechanisms::token_slot::TokenSlotSave;
use crate::mechanisms::tower::TowerSave;
use crate::mechanisms::{
    CardReader, CoinRoller, Excavator, Mechanism, MechanismContext, MiniStacker, Pusher, ReelsBox,
    SensorGate, Stacker, Sweepers, TokenSlot, Tower,
};
use crate::persistence::LoadError;
use crate::physics::{PhysicsWorld, SensorId, euler};
use crate::pool::{ObjectId, ObjectKind, Pools, Reward, TOKEN_VARIANTS};
use crate::rng::RngState;
use crate::runs::{Runs, RunsEvent};
use crate::sensors::SensorRouter;
use crate::settings::Settings;
use events::{CabinetEvent, EventBus, Subscriber, subscribers};

// Excavator pick
const PICK_MIN_COINS: u32 = 30;
const PICK_EXTRA_COINS: u32 = 10;
const PICK_SPREAD: f32 = 0.01;
const PICK_TILT: f32 = FRAC_PI_8;
const PICK_TOKEN_PROBABILITY: f32 = 0.25;

// Reels win
const REELS_MIN_COINS: u32 = 10;
const REELS_EXTRA_COINS: u32 = 5;
const REELS_ITEM_PROBABILITY: f32 = 0.5;
const REELS_INGOT_PROBABILITY: f32 = 0.25;

const CARD_READ_POINTS: u64 = 50;
const MINI_STACKER_LEVELS: u32 = 30;
const STACKER_STACKS: u32 = 7;
const STACKER_LEVELS: u32 = 15;

// Autoplay
const AUTOPLAY_BONUS_COINS: u32 = 10;
const AUTOPLAY_DROP_PHASE: f64 = 2.0;
const AUTOPLAY_DROP_COINS: usize = 10;

/// Maximum real time fed to the accumulator in one frame: exactly the substep cap
const MAX_FRAME_DT: f32 = SIM_DT * MAX_SUBSTEPS as f32;

/// Player credit and score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreState {
    pub score: u64,
    pub points: u64,
    /// Coins the player may still drop
    pub coins: u64,
}

impl ScoreState {
    fn add(&mut self, points: u64) {
        self.score += points;
        self.points += points;
    }

    /// Credit an object that fell into the gutter
    pub fn collect(&mut self, kind: ObjectKind) {
        match kind {
            ObjectKind::Coin => {
                self.add(1);
                self.coins += 1;
            }
            ObjectKind::Token => self.add(5),
            ObjectKind::Card => self.add(10),
            ObjectKind::Ingot => {}
        }
    }
}

/// Player controls, applied at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    /// Spend one coin through drop slot 0..=2
    DropCoin(u8),
    /// Release the coin-roller coin
    Action,
    Start,
    InsertToken(u8),
    InsertCard(u8),
}

/// Input commands for a single tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickInput {
    pub controls: Vec<Control>,
}

impl TickInput {
    pub fn with(control: Control) -> Self {
        Self {
            controls: vec![control],
        }
    }
}

/// Bonus picked when the sensor gate is won or a token is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bonus {
    Reels,
    Excavator,
    CoinRoller,
    Towers,
    MiniStackers,
    Sweepers,
    Stacker,
}

impl Bonus {
    /// Map a uniform roll in [0, 1) onto a bonus
    pub fn from_roll(roll: f32) -> Self {
        if roll < 0.14 {
            Bonus::Reels
        } else if roll < 0.28 {
            Bonus::Excavator
        } else if roll < 0.43 {
            Bonus::CoinRoller
        } else if roll < 0.57 {
            Bonus::Towers
        } else if roll < 0.71 {
            Bonus::MiniStackers
        } else if roll < 0.86 {
            Bonus::Sweepers
        } else {
            Bonus::Stacker
        }
    }
}

/// World-facing collaborators shared by every mechanism during a tick
pub(crate) struct Shared<W> {
    pub world: W,
    pub pools: Pools,
    pub floor_lock: FloorLock,
    pub events: EventBus,
    pub rng: RngState,
    pub clock: Clock,
}

impl<W: PhysicsWorld> Shared<W> {
    fn ctx(&mut self) -> MechanismContext<'_> {
        MechanismContext {
            world: &mut self.world,
            pools: &mut self.pools,
            floor_lock: &mut self.floor_lock,
            events: &mut self.events,
            rng: &mut self.rng,
            clock: self.clock,
        }
    }
}

/// Every mechanism in the cabinet
pub struct Mechanisms {
    pub pusher: Pusher,
    pub sensor_gate: SensorGate,
    pub reels_box: ReelsBox,
    pub sweepers: Sweepers,
    pub excavator: Excavator,
    pub left_tower: Tower,
    pub right_tower: Tower,
    pub coin_roller: CoinRoller,
    pub stacker: Stacker,
    pub left_stacker: MiniStacker,
    pub right_stacker: MiniStacker,
    pub card_reader: CardReader,
    pub token_slot: TokenSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismsSave {
    pub pusher: PusherSave,
    pub sensor_gate: SensorGateSave,
    pub reels_box: ReelsBoxSave,
    pub sweepers: SweepersSave,
    pub excavator: ExcavatorSave,
    pub left_tower: TowerSave,
    pub right_tower: TowerSave,
    pub coin_roller: CoinRollerSave,
    pub stacker: StackerSave,
    pub left_stacker: MiniStackerSave,
    pub right_stacker: MiniStackerSave,
    pub card_reader: CardReaderSave,
    pub token_slot: TokenSlotSave,
}

impl Mechanisms {
    /// Build every mechanism; creation order fixes the body handles
    fn new(world: &mut dyn PhysicsWorld) -> Self {
        Self {
            pusher: Pusher::new(world),
            sensor_gate: SensorGate::new(),
            reels_box: ReelsBox::new(),
            sweepers: Sweepers::new(world),
            excavator: Excavator::new(world),
            left_tower: Tower::left(world),
            right_tower: Tower::right(world),
            coin_roller: CoinRoller::new(world),
            stacker: Stacker::new(world),
            left_stacker: MiniStacker::left(world),
            right_stacker: MiniStacker::right(world),
            card_reader: CardReader::new(),
            token_slot: TokenSlot::new(),
        }
    }

    /// Everything after the pusher and the sensor dispatch
    fn update(&mut self, ctx: &mut MechanismContext<'_>) {
        self.sensor_gate.update(ctx);
        self.reels_box.update(ctx);
        self.sweepers.update(ctx);
        self.excavator.update(ctx);
        self.left_tower.update(ctx);
        self.right_tower.update(ctx);
        self.coin_roller.update(ctx);
        self.stacker.update(ctx);
        self.left_stacker.update(ctx);
        self.right_stacker.update(ctx);
        self.card_reader.update(ctx);
        self.token_slot.update(ctx);
    }

    /// True when no mechanism has work in progress or queued
    pub fn is_idle(&self) -> bool {
        self.pusher.is_idle()
            && self.sensor_gate.is_idle()
            && self.reels_box.is_idle()
            && self.sweepers.is_idle()
            && self.excavator.is_idle()
            && self.left_tower.is_idle()
            && self.right_tower.is_idle()
            && self.coin_roller.is_idle()
            && self.stacker.is_idle()
            && self.left_stacker.is_idle()
            && self.right_stacker.is_idle()
            && self.card_reader.is_idle()
            && self.token_slot.is_idle()
    }

    pub fn save(&self) -> MechanismsSave {
        MechanismsSave {
            pusher: self.pusher.save(),
            sensor_gate: self.sensor_gate.save(),
            reels_box: self.reels_box.save(),
            sweepers: self.sweepers.save(),
            excavator: self.excavator.save(),
            left_tower: self.left_tower.save(),
            right_tower: self.right_tower.save(),
            coin_roller: self.coin_roller.save(),
            stacker: self.stacker.save(),
            left_stacker: self.left_stacker.save(),
            right_stacker: self.right_stacker.save(),
            card_reader: self.card_reader.save(),
            token_slot: self.token_slot.save(),
        }
    }

    pub fn restored(
        &self,
        save: &MechanismsSave,
        world: &dyn PhysicsWorld,
    ) -> Result<Self, LoadError> {
        Ok(Self {
            pusher: self.pusher.restored(&save.pusher, world)?,
            sensor_gate: self.sensor_gate.restored(&save.sensor_gate)?,
            reels_box: self.reels_box.restored(&save.reels_box)?,
            sweepers: self.sweepers.restored(&save.sweepers, world)?,
            excavator: self.excavator.restored(&save.excavator, world)?,
            left_tower: self.left_tower.restored(&save.left_tower, world)?,
            right_tower: self.right_tower.restored(&save.right_tower, world)?,
            coin_roller: self.coin_roller.restored(&save.coin_roller, world)?,
            stacker: self.stacker.restored(&save.stacker, world)?,
            left_stacker: self.left_stacker.restored(&save.left_stacker, world)?,
            right_stacker: self.right_stacker.restored(&save.right_stacker, world)?,
            card_reader: self.card_reader.restored(&save.card_reader, world)?,
            token_slot: self.token_slot.restored(&save.token_slot, world)?,
        })
    }
}

/// The whole cabinet over a physics world `W`
pub struct Cabinet<W: PhysicsWorld> {
    pub(crate) shared: Shared<W>,
    pub(crate) mechanisms: Mechanisms,
    pub(crate) router: SensorRouter,
    pub(crate) runs: Runs,
    pub(crate) score: ScoreState,
    pub(crate) action_button: bool,
    pub(crate) last_pusher_phase: f64,
    pub(crate) autoplay: bool,
    pub(crate) stopped: bool,
    pub(crate) accumulator: f32,
    /// Events resolved during the last tick
    pub(crate) resolved: Vec<CabinetEvent>,
    pub(crate) last_bonus: Option<Bonus>,
}

impl<W: PhysicsWorld> Cabinet<W> {
    pub fn new(mut world: W, settings: &Settings) -> Self {
        layout::build_shell(&mut world);
        let pools = Pools::new(
            &mut world,
            settings.pools,
            settings.coin_friction,
            settings.coin_density,
        );
        let mechanisms = Mechanisms::new(&mut world);
        let router = SensorRouter::discover(&world);
        log::info!(
            "Cabinet built: {} sensors, {} coin slots, seed {}",
            router.sensors().count(),
            pools.coins.capacity(),
            settings.seed
        );
        Self {
            shared: Shared {
                world,
                pools,
                floor_lock: FloorLock::new(),
                events: EventBus::new(),
                rng: RngState::new(settings.seed),
                clock: Clock::new(),
            },
            mechanisms,
            router,
            runs: Runs::new(),
            score: ScoreState {
                coins: settings.starting_coins,
                ..ScoreState::default()
            },
            action_button: false,
            last_pusher_phase: 0.0,
            autoplay: settings.autoplay,
            stopped: false,
            accumulator: 0.0,
            resolved: Vec::new(),
            last_bonus: None,
        }
    }

    // === Accessors ===

    pub fn world(&self) -> &W {
        &self.shared.world
    }

    pub fn pools(&self) -> &Pools {
        &self.shared.pools
    }

    pub fn mechanisms(&self) -> &Mechanisms {
        &self.mechanisms
    }

    pub fn mechanisms_mut(&mut self) -> &mut Mechanisms {
        &mut self.mechanisms
    }

    pub fn runs(&self) -> &Runs {
        &self.runs
    }

    pub fn router(&self) -> &SensorRouter {
        &self.router
    }

    pub fn score(&self) -> ScoreState {
        self.score
    }

    pub fn clock(&self) -> Clock {
        self.shared.clock
    }

    pub fn floor_lock(&self) -> FloorLock {
        self.shared.floor_lock
    }

    pub fn action_button_lit(&self) -> bool {
        self.action_button
    }

    pub fn last_events(&self) -> &[CabinetEvent] {
        &self.resolved
    }

    pub fn last_bonus(&self) -> Option<Bonus> {
        self.last_bonus
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Freeze the tick loop; `tick` and `advance` do nothing until resumed
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn resume(&mut self) {
        self.stopped = false;
    }

    // === Loop ===

    /// Feed real elapsed time and run the fixed ticks that fit
    ///
    /// One-shot controls in `input` apply to the first tick only. Returns
    /// the number of ticks run.
    pub fn advance(&mut self, dt: f32, input: &TickInput) -> u32 {
        if self.stopped {
            return 0;
        }
        self.accumulator += dt.min(MAX_FRAME_DT);
        let idle = TickInput::default();
        let mut substeps = 0;
        while self.accumulator >= SIM_DT && substeps < MAX_SUBSTEPS {
            self.tick(if substeps == 0 { input } else { &idle });
            self.accumulator -= SIM_DT;
            substeps += 1;
        }
        substeps
    }

    /// Advance the cabinet by one fixed timestep
    pub fn tick(&mut self, input: &TickInput) {
        if self.stopped {
            return;
        }
        self.resolved.clear();
        for control in &input.controls {
            self.apply(*control);
        }

        let shared = &mut self.shared;
        shared.pools.update(&mut shared.world, &mut shared.rng);
        self.mechanisms.pusher.update(&mut self.shared.ctx());
        self.dispatch_sensors();
        self.mechanisms.update(&mut self.shared.ctx());
        if let Some(RunsEvent::GameFinished) = self.runs.update(self.score.score, self.shared.clock)
        {
            log::info!("Game finished, score {}", self.score.score);
        }
        self.resolve_events();
        self.sweep_fallen();
        if self.autoplay {
            self.autoplay_drops();
        }

        let shared = &mut self.shared;
        shared.world.step(SIM_DT);
        shared.pools.refresh(&shared.world);
        shared.clock.advance();
    }

    fn apply(&mut self, control: Control) {
        match control {
            Control::DropCoin(slot) => {
                if self.score.coins > 0 {
                    self.score.coins -= 1;
                    self.shared.pools.coins.drop_coin(slot);
                }
            }
            Control::Action => {
                self.mechanisms.coin_roller.trigger_coin();
            }
            Control::Start => {
                if self.runs.start() {
                    log::info!("Start pressed");
                }
            }
            Control::InsertToken(variant) => self.mechanisms.token_slot.read_token(variant),
            Control::InsertCard(variant) => self.mechanisms.card_reader.read_card(variant),
        }
    }

    fn dispatch_sensors(&mut self) {
        for hit in self.router.detect(&self.shared.world) {
            match hit.sensor {
                SensorId::Gutter => self.collect(hit.object, true),
                SensorId::LeftTrap | SensorId::RightTrap => self.collect(hit.object, false),
                SensorId::SensorGate => {
                    if hit.object.kind != ObjectKind::Coin {
                        continue;
                    }
                    let crossing = self
                        .shared
                        .pools
                        .get(hit.object)
                        .filter(|instance| instance.used)
                        .map(|instance| instance.position.x);
                    if let Some(x) = crossing {
                        self.mechanisms
                            .sensor_gate
                            .coin_crossed(hit.object, x, &mut self.shared.events);
                    }
                }
                SensorId::CoinRollerSlot(slot) => {
                    self.mechanisms
                        .coin_roller
                        .coin_in_slot(hit.object, slot, &mut self.shared.ctx())
                }
                SensorId::CoinRollerTrap => self
                    .mechanisms
                    .coin_roller
                    .coin_in_trap(hit.object, &mut self.shared.ctx()),
            }
        }
    }

    /// Recycle an object that left the playfield, scoring it if asked to
    fn collect(&mut self, object: ObjectId, scoring: bool) {
        let shared = &mut self.shared;
        // Recycle first: an object already recycled this tick never scores twice
        if !shared.pools.recycle(&mut shared.world, object) {
            return;
        }
        if scoring && self.runs.started() {
            self.score.collect(object.kind);
        }
    }

    fn resolve_events(&mut self) {
        let events = self.shared.events.drain();
        for event in &events {
            for subscriber in subscribers(event.kind()) {
                self.notify(subscriber, *event);
            }
        }
        self.resolved.extend(events);
    }

    fn notify(&mut self, subscriber: Subscriber, event: CabinetEvent) {
        match (subscriber, event) {
            (Subscriber::Pools, CabinetEvent::PusherBonusDelivered { reward, position }) => {
                let Shared {
                    world, pools, rng, ..
                } = &mut self.shared;
                pools.deposit_reward(world, rng, position, &reward);
            }
            (Subscriber::Pools, CabinetEvent::ExcavatorPicked { drop_position }) => {
                self.deposit_pick(drop_position)
            }
            (Subscriber::Coins, CabinetEvent::CoinRollerBonusWon { bonus }) => {
                let count = (bonus as usize + 1).pow(2) * 5;
                self.shared.pools.coins.drop_coins(&mut self.shared.rng, count);
            }
            (Subscriber::Coins, CabinetEvent::SensorGateCoinPassed { coin }) => {
                let Shared { world, pools, .. } = &mut self.shared;
                pools.coins.enable_ccd(world, coin, false);
            }
            (
                Subscriber::ControlPanel,
                CabinetEvent::CoinRollerBonusWon { .. } | CabinetEvent::CoinRollerCoinLost,
            ) => self.action_button = false,
            (Subscriber::Pusher, CabinetEvent::ReelsWon { .. }) => {
                let rng = &mut self.shared.rng;
                let reward = Reward {
                    coins: REELS_MIN_COINS + rng.below(REELS_EXTRA_COINS),
                    cards: rng.chance(REELS_ITEM_PROBABILITY) as u32,
                    tokens: rng.chance(REELS_ITEM_PROBABILITY) as u32,
                    ingots: rng.chance(REELS_INGOT_PROBABILITY) as u32,
                };
                self.mechanisms.pusher.deliver_bonus(reward);
            }
            (Subscriber::Score, CabinetEvent::CardRead { .. }) => {
                if self.runs.started() {
                    self.score.add(CARD_READ_POINTS);
                }
            }
            (
                Subscriber::BonusSelector,
                CabinetEvent::SensorGateWon | CabinetEvent::TokenRead { .. },
            ) => self.select_bonus(),
            (subscriber, event) => log::trace!("{:?} ignores {:?}", subscriber, event),
        }
    }

    /// Rain the excavator's load over its drop zone
    fn deposit_pick(&mut self, drop_position: Vec3) {
        let Shared {
            world, pools, rng, ..
        } = &mut self.shared;
        let scatter = |rng: &mut RngState| {
            let position =
                drop_position + Vec3::new(rng.spread(PICK_SPREAD), 0.0, rng.spread(PICK_SPREAD));
            let rotation = euler(Vec3::new(
                rng.spread(PICK_TILT),
                rng.spread(PICK_TILT),
                rng.spread(PICK_TILT),
            ));
            (position, rotation)
        };
        let count = PICK_MIN_COINS + rng.below(PICK_EXTRA_COINS);
        for _ in 0..count {
            let (position, rotation) = scatter(rng);
            pools.coins.deposit(world, position, rotation, None);
        }
        if rng.chance(PICK_TOKEN_PROBABILITY) {
            let (position, rotation) = scatter(rng);
            let variant = rng.below(TOKEN_VARIANTS as u32 - 1) as usize;
            pools.tokens.deposit(world, variant, position, rotation, None);
        }
    }

    fn select_bonus(&mut self) {
        let rng = &mut self.shared.rng;
        if self.autoplay {
            let reward = Reward {
                coins: AUTOPLAY_BONUS_COINS,
                cards: rng.chance(REELS_ITEM_PROBABILITY) as u32,
                tokens: rng.chance(REELS_ITEM_PROBABILITY) as u32,
                ingots: rng.chance(REELS_ITEM_PROBABILITY) as u32,
            };
            self.mechanisms.pusher.deliver_bonus(reward);
            return;
        }
        let roll = rng.next_f32();
        let bonus = Bonus::from_roll(roll);
        log::info!("Bonus selected: {:?} (roll {:.3})", bonus, roll);
        let m = &mut self.mechanisms;
        match bonus {
            Bonus::Reels => m.reels_box.spin_reels(),
            Bonus::Excavator => m.excavator.pick(),
            Bonus::CoinRoller => {
                self.action_button = true;
                m.coin_roller.shoot_coin();
            }
            Bonus::Towers => {
                m.left_tower.shoot_coins();
                m.right_tower.shoot_coins();
            }
            Bonus::MiniStackers => {
                m.left_stacker.deliver(MINI_STACKER_LEVELS);
                m.right_stacker.deliver(MINI_STACKER_LEVELS);
            }
            Bonus::Sweepers => m.sweepers.sweep_floor(),
            Bonus::Stacker => m.stacker.deliver(STACKER_STACKS, STACKER_LEVELS),
        }
        self.last_bonus = Some(bonus);
    }

    fn sweep_fallen(&mut self) {
        let fallen: Vec<ObjectId> = self
            .shared
            .pools
            .active()
            .filter(|instance| instance.position.y < MIN_POSITION_Y_OBJECTS)
            .map(|instance| instance.id)
            .collect();
        let Shared { world, pools, .. } = &mut self.shared;
        for id in fallen {
            if let Some(instance) = pools.get(id) {
                log::warn!(
                    "{} {}:{} fell out of the cabinet at {:?}, recycled",
                    id.kind.as_str(),
                    id.variant,
                    id.index,
                    instance.position
                );
            }
            pools.recycle(world, id);
        }
    }

    /// Rain coins once per pusher cycle
    fn autoplay_drops(&mut self) {
        let phase = self.mechanisms.pusher.phase(self.shared.clock.now_ms());
        if self.last_pusher_phase <= AUTOPLAY_DROP_PHASE && phase > AUTOPLAY_DROP_PHASE {
            self.shared
                .pools
                .coins
                .drop_coins(&mut self.shared.rng, AUTOPLAY_DROP_COINS);
        }
        self.last_pusher_phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::coin_roller::CoinRollerState;
    use crate::mechanisms::excavator;
    use crate::physics::SandboxWorld;
    use crate::pool::PoolCapacities;
    use glam::Quat;

    fn cabinet() -> Cabinet<SandboxWorld> {
        let settings = Settings {
            pools: PoolCapacities {
                coins: 256,
                ..PoolCapacities::default()
            },
            ..Settings::default()
        };
        Cabinet::new(SandboxWorld::new(), &settings)
    }

    fn idle(cabinet: &mut Cabinet<SandboxWorld>, ticks: usize) {
        for _ in 0..ticks {
            cabinet.tick(&TickInput::default());
        }
    }

    fn start_run(cabinet: &mut Cabinet<SandboxWorld>) {
        cabinet.tick(&TickInput::with(Control::Start));
        while !cabinet.runs().started() {
            cabinet.tick(&TickInput::default());
        }
    }

    /// Drop an object just past the front edge, above the gutter
    fn over_gutter(cabinet: &mut Cabinet<SandboxWorld>, kind: ObjectKind) -> ObjectId {
        let at = Vec3::new(0.0, 0.25, layout::GUTTER_POSITION.z);
        let Shared { world, pools, .. } = &mut cabinet.shared;
        let id = match kind {
            ObjectKind::Coin => pools.coins.deposit(world, at, Quat::IDENTITY, None),
            ObjectKind::Token => pools.tokens.deposit(world, 0, at, Quat::IDENTITY, None),
            ObjectKind::Card => pools.cards.deposit(world, 0, at, Quat::IDENTITY, None),
            ObjectKind::Ingot => pools.ingots.deposit(world, 0, at, Quat::IDENTITY, None),
        };
        id.unwrap()
    }

    fn wait_recycled(cabinet: &mut Cabinet<SandboxWorld>, id: ObjectId) {
        for _ in 0..120 {
            if !cabinet.pools().get(id).unwrap().used {
                return;
            }
            cabinet.tick(&TickInput::default());
        }
        panic!("{:?} never reached the gutter", id);
    }

    #[test]
    fn test_every_sensor_is_routed() {
        let cabinet = cabinet();
        let ids: Vec<SensorId> = cabinet.router().sensors().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), SensorId::ALL.len());
        for id in SensorId::ALL {
            assert!(cabinet.router().sensor(id).is_some(), "{:?} missing", id);
        }
    }

    #[test]
    fn test_gutter_recycles_without_scoring_outside_run() {
        let mut cabinet = cabinet();
        let coin = over_gutter(&mut cabinet, ObjectKind::Coin);
        wait_recycled(&mut cabinet, coin);
        assert_eq!(cabinet.score().score, 0);
        assert_eq!(cabinet.score().coins, Settings::default().starting_coins);
    }

    #[test]
    fn test_gutter_scores_by_kind_during_run() {
        let mut cabinet = cabinet();
        start_run(&mut cabinet);
        let coins = cabinet.score().coins;
        let coin = over_gutter(&mut cabinet, ObjectKind::Coin);
        wait_recycled(&mut cabinet, coin);
        assert_eq!(cabinet.score().score, 1);
        assert_eq!(cabinet.score().coins, coins + 1);

        let token = over_gutter(&mut cabinet, ObjectKind::Token);
        wait_recycled(&mut cabinet, token);
        let card = over_gutter(&mut cabinet, ObjectKind::Card);
        wait_recycled(&mut cabinet, card);
        assert_eq!(cabinet.score().score, 16);
        assert_eq!(cabinet.score().points, 16);
        assert_eq!(cabinet.score().coins, coins + 1);
    }

    #[test]
    fn test_drop_coin_spends_credit() {
        let mut cabinet = cabinet();
        cabinet.score.coins = 1;
        cabinet.tick(&TickInput::with(Control::DropCoin(1)));
        assert_eq!(cabinet.score().coins, 0);
        assert_eq!(cabinet.pools().coins.queued(), 1);
        cabinet.tick(&TickInput::with(Control::DropCoin(2)));
        assert_eq!(cabinet.pools().coins.queued(), 1);
    }

    #[test]
    fn test_dropped_coin_crosses_sensor_gate_once() {
        let mut cabinet = cabinet();
        cabinet.tick(&TickInput::with(Control::DropCoin(1)));
        let mut passed = 0;
        for _ in 0..120 {
            cabinet.tick(&TickInput::default());
            passed += cabinet
                .last_events()
                .iter()
                .filter(|e| matches!(e, CabinetEvent::SensorGateCoinPassed { .. }))
                .count();
        }
        assert_eq!(passed, 1);
    }

    #[test]
    fn test_coin_roller_single_outcome() {
        let mut cabinet = cabinet();
        cabinet.mechanisms_mut().coin_roller.shoot_coin();
        let mut outcomes = Vec::new();
        let mut record = |cabinet: &Cabinet<SandboxWorld>| {
            for event in cabinet.last_events() {
                match event {
                    CabinetEvent::CoinRollerBonusWon { bonus } => outcomes.push(Some(*bonus)),
                    CabinetEvent::CoinRollerCoinLost => outcomes.push(None),
                    _ => {}
                }
            }
        };
        for _ in 0..600 {
            if cabinet.mechanisms().coin_roller.can_trigger() {
                break;
            }
            cabinet.tick(&TickInput::default());
            record(&cabinet);
        }
        assert!(cabinet.mechanisms().coin_roller.can_trigger());
        idle(&mut cabinet, 40);
        cabinet.tick(&TickInput::with(Control::Action));
        record(&cabinet);
        for _ in 0..2000 {
            if cabinet.mechanisms().coin_roller.state() == CoinRollerState::Idle {
                break;
            }
            cabinet.tick(&TickInput::default());
            record(&cabinet);
        }
        assert_eq!(cabinet.mechanisms().coin_roller.state(), CoinRollerState::Idle);
        assert_eq!(cabinet.mechanisms().coin_roller.coin(), None);
        assert_eq!(outcomes.len(), 1, "outcomes {:?}", outcomes);
        if let Some(bonus) = outcomes[0] {
            let expected = (bonus as usize + 1).pow(2) * 5;
            let pool = &cabinet.pools().coins;
            assert!(pool.queued() + pool.used_count() <= expected);
            assert!(pool.queued() + pool.used_count() > 0);
        }
        assert!(!cabinet.action_button_lit());
    }

    #[test]
    fn test_card_read_scores_during_run() {
        let mut cabinet = cabinet();
        start_run(&mut cabinet);
        cabinet.tick(&TickInput::with(Control::InsertCard(3)));
        for _ in 0..600 {
            if cabinet.mechanisms().card_reader.is_idle() {
                break;
            }
            cabinet.tick(&TickInput::default());
        }
        assert!(cabinet.mechanisms().card_reader.is_idle());
        assert_eq!(cabinet.score().score, CARD_READ_POINTS);
        assert_eq!(cabinet.pools().cards.used_count(), 0);
    }

    #[test]
    fn test_token_read_selects_a_bonus() {
        let mut cabinet = cabinet();
        cabinet.tick(&TickInput::with(Control::InsertToken(1)));
        for _ in 0..2000 {
            if cabinet.last_bonus().is_some() {
                break;
            }
            cabinet.tick(&TickInput::default());
        }
        assert!(cabinet.last_bonus().is_some());
    }

    #[test]
    fn test_bonus_thresholds() {
        assert_eq!(Bonus::from_roll(0.0), Bonus::Reels);
        assert_eq!(Bonus::from_roll(0.14), Bonus::Excavator);
        assert_eq!(Bonus::from_roll(0.42), Bonus::CoinRoller);
        assert_eq!(Bonus::from_roll(0.43), Bonus::Towers);
        assert_eq!(Bonus::from_roll(0.70), Bonus::MiniStackers);
        assert_eq!(Bonus::from_roll(0.85), Bonus::Sweepers);
        assert_eq!(Bonus::from_roll(0.86), Bonus::Stacker);
        assert_eq!(Bonus::from_roll(0.999), Bonus::Stacker);
    }

    #[test]
    fn test_reels_win_queues_pusher_bonus() {
        let mut cabinet = cabinet();
        cabinet
            .shared
            .events
            .emit(CabinetEvent::ReelsWon { indices: [1, 1, 1] });
        cabinet.resolve_events();
        assert_eq!(cabinet.mechanisms().pusher.pending_rewards(), 1);
    }

    #[test]
    fn test_excavator_pick_rains_coins() {
        let mut cabinet = cabinet();
        cabinet.shared.events.emit(CabinetEvent::ExcavatorPicked {
            drop_position: excavator::DROP_POSITION,
        });
        cabinet.resolve_events();
        let coins = cabinet.pools().coins.used_count();
        assert!((30..=39).contains(&coins), "{} coins", coins);
        assert!(cabinet.pools().tokens.used_count() <= 1);
        for coin in cabinet.pools().coins.pool().active() {
            assert!((coin.position - excavator::DROP_POSITION).length() < 0.02);
        }
    }

    #[test]
    fn test_fallen_objects_are_recycled() {
        let mut cabinet = cabinet();
        let Shared { world, pools, .. } = &mut cabinet.shared;
        let id = pools
            .coins
            .deposit(world, Vec3::new(0.0, -1.5, 0.0), Quat::IDENTITY, None)
            .unwrap();
        cabinet.tick(&TickInput::default());
        assert!(!cabinet.pools().get(id).unwrap().used);
    }

    #[test]
    fn test_stopped_cabinet_does_not_advance() {
        let mut cabinet = cabinet();
        cabinet.stop();
        cabinet.tick(&TickInput::default());
        assert_eq!(cabinet.advance(1.0, &TickInput::default()), 0);
        assert_eq!(cabinet.clock().tick, 0);
        cabinet.resume();
        cabinet.tick(&TickInput::default());
        assert_eq!(cabinet.clock().tick, 1);
    }

    #[test]
    fn test_pusher_door_shoves_floor_coin_in_rapier_world() {
        use crate::physics::RapierWorld;

        let settings = Settings {
            autoplay: false,
            ..Settings::default()
        };
        let mut cabinet = Cabinet::new(RapierWorld::new(), &settings);
        let start = Vec3::new(0.0, layout::FLOOR_TOP + 0.004, 0.2);
        let Shared { world, pools, .. } = &mut cabinet.shared;
        let id = pools.coins.deposit(world, start, Quat::IDENTITY, None).unwrap();
        for _ in 0..60 {
            cabinet.tick(&TickInput::default());
        }
        let coin = cabinet.pools().get(id).unwrap();
        assert!(coin.used);
        assert!(coin.position.z > 0.21, "coin at {:?}", coin.position);
        assert!(coin.position.y > layout::FLOOR_TOP - 0.01);
    }

    #[test]
    fn test_advance_caps_substeps() {
        let mut cabinet = cabinet();
        assert_eq!(cabinet.advance(SIM_DT * 2.5, &TickInput::default()), 2);
        assert_eq!(cabinet.advance(5.0, &TickInput::default()), MAX_SUBSTEPS);
        assert_eq!(cabinet.clock().tick, 2 + MAX_SUBSTEPS as u64);
        // A long stall leaves no backlog behind
        assert_eq!(cabinet.advance(SIM_DT, &TickInput::default()), 1);
    }

    #[test]
    fn test_controls_apply_on_first_substep_only() {
        let mut cabinet = cabinet();
        cabinet.advance(SIM_DT * 3.0, &TickInput::with(Control::DropCoin(0)));
        assert_eq!(
            cabinet.score().coins,
            Settings::default().starting_coins - 1
        );
    }

    #[test]
    fn test_autoplay_rains_once_per_pusher_cycle() {
        let settings = Settings {
            autoplay: true,
            pools: PoolCapacities {
                coins: 64,
                ..PoolCapacities::default()
            },
            ..Settings::default()
        };
        let mut cabinet = Cabinet::new(SandboxWorld::new(), &settings);
        // The pusher starts at phase pi/4 and crosses 2.0 after ~36 ticks
        idle(&mut cabinet, 30);
        assert_eq!(cabinet.pools().coins.queued(), 0);
        idle(&mut cabinet, 10);
        let pool = &cabinet.pools().coins;
        assert_eq!(pool.queued() + pool.used_count(), AUTOPLAY_DROP_COINS);
    }
}
