//! Card reader next to the token slot
//!
//! Inserted cards are taken from the card pool, slid into the reader, read
//! while the reader light blinks, then ejected and returned to the pool.

use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_2;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::token_slot::SlotLight;
use super::{Fsm, FsmSave, Mechanism, MechanismContext, MechanismId};
use crate::cabinet::events::CabinetEvent;
use crate::persistence::LoadError;
use crate::physics::{PhysicsWorld, Pose};
use crate::pool::{CARD_VARIANTS, ObjectId};

const INSERT_POSITION: Vec3 = Vec3::new(-0.26, 0.12, 0.48);
const CARD_INITIAL_POSITION: f32 = 0.0;
const CARD_INSERTED_POSITION: f32 = 0.06;
const CARD_SPEED: f32 = 0.001;
const READING_TICKS: u32 = 40;
const LIGHT_ON_TICKS: i32 = 6;

state_names! {
    pub enum CardReaderState {
        Idle => "card-reader-idle",
        Activating => "card-reader-activating",
        RetrievingCard => "card-reader-retrieving-card",
        InsertingCard => "card-reader-inserting-card",
        ReadingCard => "card-reader-reading-card",
        EjectingCard => "card-reader-ejecting-card",
        PreparingIdle => "card-reader-preparing-idle",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardReaderSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending: Vec<u8>,
    pub variant: Option<u8>,
    pub card: Option<ObjectId>,
    pub position: f32,
    pub reading_frames: u32,
    pub light: SlotLight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardReader {
    fsm: Fsm<CardReaderState>,
    pending: VecDeque<u8>,
    variant: Option<u8>,
    card: Option<ObjectId>,
    /// Depth of the card inside the reader
    position: f32,
    reading_frames: u32,
    light: SlotLight,
}

impl Default for CardReader {
    fn default() -> Self {
        Self::new()
    }
}

fn card_rotation() -> Quat {
    Quat::from_rotation_x(FRAC_PI_2)
}

impl CardReader {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new(CardReaderState::Idle),
            pending: VecDeque::new(),
            variant: None,
            card: None,
            position: CARD_INITIAL_POSITION,
            reading_frames: 0,
            light: SlotLight::default(),
        }
    }

    pub fn read_card(&mut self, variant: u8) {
        if (variant as usize) < CARD_VARIANTS {
            self.pending.push_back(variant);
        } else {
            log::warn!("card reader: no card colour {}", variant);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn card(&self) -> Option<ObjectId> {
        self.card
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn light(&self) -> SlotLight {
        self.light
    }

    pub fn save(&self) -> CardReaderSave {
        CardReaderSave {
            fsm: self.fsm.save(),
            pending: self.pending.iter().copied().collect(),
            variant: self.variant,
            card: self.card,
            position: self.position,
            reading_frames: self.reading_frames,
            light: self.light,
        }
    }

    pub fn restored(&self, save: &CardReaderSave, _world: &dyn PhysicsWorld) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, MechanismId::CardReader.as_str())?,
            pending: save.pending.iter().copied().collect(),
            variant: save.variant,
            card: save.card,
            position: save.position,
            reading_frames: save.reading_frames,
            light: save.light,
        })
    }

    fn set_card_collider(&self, ctx: &mut MechanismContext<'_>, enabled: bool) {
        if let Some(instance) = self.card.and_then(|id| ctx.pools.get(id)) {
            for collider in ctx.world.body_colliders(instance.body) {
                ctx.world.set_collider_enabled(collider, enabled);
            }
        }
    }
}

impl Mechanism for CardReader {
    type State = CardReaderState;
    type Readings = ();

    fn id(&self) -> MechanismId {
        MechanismId::CardReader
    }

    fn fsm(&self) -> &Fsm<CardReaderState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<CardReaderState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(CardReaderState::Idle) && self.pending.is_empty()
    }

    fn is_active(&self) -> bool {
        !self.fsm.is(CardReaderState::Idle)
    }

    fn read(&self, _ctx: &MechanismContext<'_>) {}

    fn compute_next(&self, _: &()) -> Option<CardReaderState> {
        use CardReaderState::*;
        match self.fsm.state() {
            Idle => (!self.pending.is_empty()).then_some(Activating),
            Activating => Some(RetrievingCard),
            RetrievingCard => Some(InsertingCard),
            InsertingCard => (self.position >= CARD_INSERTED_POSITION).then_some(ReadingCard),
            ReadingCard => (self.reading_frames >= READING_TICKS).then_some(EjectingCard),
            EjectingCard => (self.position <= CARD_INITIAL_POSITION).then_some(PreparingIdle),
            PreparingIdle => Some(if self.pending.is_empty() {
                Idle
            } else {
                Activating
            }),
        }
    }

    fn drive(&mut self, _: &(), _ctx: &mut MechanismContext<'_>) {
        match self.fsm.state() {
            CardReaderState::InsertingCard => {
                self.position = (self.position + CARD_SPEED).min(CARD_INSERTED_POSITION)
            }
            CardReaderState::ReadingCard => {
                self.reading_frames += 1;
                self.light.blink(LIGHT_ON_TICKS);
            }
            CardReaderState::EjectingCard => {
                self.position = (self.position - CARD_SPEED).max(CARD_INITIAL_POSITION)
            }
            _ => {}
        }
    }

    fn enter(&mut self, _from: CardReaderState, to: CardReaderState, ctx: &mut MechanismContext<'_>) {
        use CardReaderState::*;
        match to {
            Activating => self.variant = self.pending.pop_front(),
            RetrievingCard => {
                let variant = self.variant.unwrap_or_default() as usize;
                self.card =
                    ctx.pools
                        .cards
                        .deposit(ctx.world, variant, INSERT_POSITION, card_rotation(), None);
                if self.card.is_none() {
                    log::warn!("card reader: card pool exhausted");
                }
                self.set_card_collider(ctx, false);
            }
            ReadingCard => {
                self.reading_frames = 0;
                self.light.on = true;
                if let (Some(variant), Some(_)) = (self.variant, self.card) {
                    ctx.events.emit(CabinetEvent::CardRead { variant });
                }
            }
            EjectingCard => self.light = SlotLight::default(),
            PreparingIdle => {
                self.set_card_collider(ctx, true);
                if let Some(card) = self.card.take() {
                    ctx.pools.recycle(ctx.world, card);
                }
                self.variant = None;
            }
            Idle | InsertingCard => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        if let Some(instance) = self.card.and_then(|id| ctx.pools.get(id)) {
            ctx.world.set_pose(
                instance.body,
                Pose {
                    translation: INSERT_POSITION - Vec3::Z * self.position,
                    rotation: card_rotation(),
                },
            );
        }
    }
}
