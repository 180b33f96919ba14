//! Token slot on the front panel
//!
//! An inserted token is pulled from the token pool, pushed up into the
//! reader, wiggled forward and back for validation, retracted and read.

use std::collections::VecDeque;
use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{Fsm, FsmSave, Mechanism, MechanismContext, MechanismId};
use crate::cabinet::events::CabinetEvent;
use crate::persistence::LoadError;
use crate::physics::{PhysicsWorld, Pose};
use crate::pool::{ObjectId, TOKEN_VARIANTS};

const INIT_POSITION: Vec3 = Vec3::new(0.26, 0.12, 0.48);
const TOKEN_INITIAL_POSITION: f32 = 0.0;
const TOKEN_VALIDATED_POSITION_MAX: f32 = 0.045;
const TOKEN_SPEED: f32 = 0.0005;
const ROTATION_STEPS: i32 = 24;
const ROTATION_FORWARD_STEPS: i32 = 12;
const ROTATION_FORWARD_MAX_STEPS: i32 = 36;
const ROTATION_BACKWARD_STEPS: i32 = 6;
const ROTATION_BACKWARD_MAX_STEPS: i32 = 18;
const ROTATION_PAUSE_TICKS: u32 = 10;
const ROTATION_SPEED: f32 = PI / ROTATION_STEPS as f32;
const LIGHT_ON_TICKS: i32 = 8;
const LIGHT_FAST_ON_TICKS: i32 = 4;

state_names! {
    pub enum TokenSlotState {
        Idle => "token-slot-idle",
        Activating => "token-slot-activating",
        RetrievingToken => "token-slot-retrieving-token",
        PushingToken => "token-slot-pushing-token",
        RotatingTokenForward => "token-slot-rotating-token-forward",
        PausingTokenForward => "token-slot-pausing-token-forward",
        RotatingTokenBackward => "token-slot-rotating-token-backward",
        PausingTokenBackward => "token-slot-pausing-token-backward",
        RetractingToken => "token-slot-retracting-token",
        ReadingToken => "token-slot-reading-token",
        PreparingIdle => "token-slot-preparing-idle",
    }
}

/// Validation light on the slot bezel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLight {
    pub on: bool,
    pub frame: i32,
}

impl SlotLight {
    pub(crate) fn blink(&mut self, period: i32) {
        self.frame += 1;
        if self.frame > period {
            self.frame = 0;
            self.on = !self.on;
        }
    }

    pub(crate) fn off(&mut self) {
        self.on = false;
        self.frame = -1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSlotSave {
    #[serde(flatten)]
    pub fsm: FsmSave,
    pub pending: Vec<u8>,
    pub variant: Option<u8>,
    pub token: Option<ObjectId>,
    pub position: f32,
    pub rotation: i32,
    pub pause_frames: u32,
    pub light: SlotLight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenSlot {
    fsm: Fsm<TokenSlotState>,
    pending: VecDeque<u8>,
    variant: Option<u8>,
    token: Option<ObjectId>,
    position: f32,
    /// Signed rotation in steps of `ROTATION_SPEED`
    rotation: i32,
    pause_frames: u32,
    light: SlotLight,
}

impl Default for TokenSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Orientation of a token standing in the slot
fn token_rotation(steps: i32) -> Quat {
    Quat::from_rotation_x(FRAC_PI_2)
        * Quat::from_rotation_z(FRAC_PI_2)
        * Quat::from_rotation_y(steps as f32 * ROTATION_SPEED)
}

impl TokenSlot {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new(TokenSlotState::Idle),
            pending: VecDeque::new(),
            variant: None,
            token: None,
            position: TOKEN_INITIAL_POSITION,
            rotation: 0,
            pause_frames: 0,
            light: SlotLight {
                on: false,
                frame: -1,
            },
        }
    }

    /// Insert a token of colour `variant`; queued while a token is in the slot
    pub fn read_token(&mut self, variant: u8) {
        if (variant as usize) < TOKEN_VARIANTS {
            self.pending.push_back(variant);
        } else {
            log::warn!("token slot: no token colour {}", variant);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn token(&self) -> Option<ObjectId> {
        self.token
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    pub fn light(&self) -> SlotLight {
        self.light
    }

    pub fn save(&self) -> TokenSlotSave {
        TokenSlotSave {
            fsm: self.fsm.save(),
            pending: self.pending.iter().copied().collect(),
            variant: self.variant,
            token: self.token,
            position: self.position,
            rotation: self.rotation,
            pause_frames: self.pause_frames,
            light: self.light,
        }
    }

    pub fn restored(&self, save: &TokenSlotSave, _world: &dyn PhysicsWorld) -> Result<Self, LoadError> {
        Ok(Self {
            fsm: Fsm::restored(&save.fsm, MechanismId::TokenSlot.as_str())?,
            pending: save.pending.iter().copied().collect(),
            variant: save.variant,
            token: save.token,
            position: save.position,
            rotation: save.rotation,
            pause_frames: save.pause_frames,
            light: save.light,
        })
    }

    fn set_token_collider(&self, ctx: &mut MechanismContext<'_>, enabled: bool) {
        if let Some(instance) = self.token.and_then(|id| ctx.pools.get(id)) {
            for collider in ctx.world.body_colliders(instance.body) {
                ctx.world.set_collider_enabled(collider, enabled);
            }
        }
    }
}

impl Mechanism for TokenSlot {
    type State = TokenSlotState;
    type Readings = ();

    fn id(&self) -> MechanismId {
        MechanismId::TokenSlot
    }

    fn fsm(&self) -> &Fsm<TokenSlotState> {
        &self.fsm
    }

    fn fsm_mut(&mut self) -> &mut Fsm<TokenSlotState> {
        &mut self.fsm
    }

    fn is_idle(&self) -> bool {
        self.fsm.is(TokenSlotState::Idle) && self.pending.is_empty()
    }

    fn is_active(&self) -> bool {
        !self.fsm.is(TokenSlotState::Idle)
    }

    fn read(&self, _ctx: &MechanismContext<'_>) {}

    fn compute_next(&self, _: &()) -> Option<TokenSlotState> {
        use TokenSlotState::*;
        match self.fsm.state() {
            Idle => (!self.pending.is_empty()).then_some(Activating),
            Activating => Some(RetrievingToken),
            RetrievingToken => Some(PushingToken),
            PushingToken => {
                (self.position >= TOKEN_VALIDATED_POSITION_MAX).then_some(RotatingTokenForward)
            }
            RotatingTokenForward => {
                (self.rotation % ROTATION_FORWARD_STEPS == 0).then_some(PausingTokenForward)
            }
            PausingTokenForward => (self.pause_frames > ROTATION_PAUSE_TICKS).then_some(
                if self.rotation == ROTATION_FORWARD_MAX_STEPS {
                    RotatingTokenBackward
                } else {
                    RotatingTokenForward
                },
            ),
            RotatingTokenBackward => {
                (self.rotation % ROTATION_BACKWARD_STEPS == 0).then_some(PausingTokenBackward)
            }
            PausingTokenBackward => (self.pause_frames > ROTATION_PAUSE_TICKS).then_some(
                if self.rotation == -ROTATION_BACKWARD_MAX_STEPS {
                    RetractingToken
                } else {
                    RotatingTokenBackward
                },
            ),
            RetractingToken => (self.position <= TOKEN_INITIAL_POSITION).then_some(ReadingToken),
            ReadingToken => Some(PreparingIdle),
            PreparingIdle => Some(if self.pending.is_empty() {
                Idle
            } else {
                Activating
            }),
        }
    }

    fn drive(&mut self, _: &(), _ctx: &mut MechanismContext<'_>) {
        use TokenSlotState::*;
        match self.fsm.state() {
            PushingToken => {
                self.position = (self.position + TOKEN_SPEED).min(TOKEN_VALIDATED_POSITION_MAX);
                self.light.blink(LIGHT_ON_TICKS);
            }
            RotatingTokenForward => self.rotation += 1,
            RotatingTokenBackward => self.rotation -= 1,
            PausingTokenForward | PausingTokenBackward => self.pause_frames += 1,
            RetractingToken => {
                self.position = (self.position - TOKEN_SPEED).max(TOKEN_INITIAL_POSITION);
                self.light.blink(LIGHT_FAST_ON_TICKS);
            }
            Idle | Activating | RetrievingToken | ReadingToken | PreparingIdle => {}
        }
    }

    fn enter(&mut self, from: TokenSlotState, to: TokenSlotState, ctx: &mut MechanismContext<'_>) {
        use TokenSlotState::*;
        match to {
            Activating => self.variant = self.pending.pop_front(),
            RetrievingToken => {
                let variant = self.variant.unwrap_or_default() as usize;
                let rotation = token_rotation(0);
                self.token = ctx
                    .pools
                    .tokens
                    .deposit(ctx.world, variant, INIT_POSITION, rotation, None);
                if self.token.is_none() {
                    log::warn!("token slot: token pool exhausted");
                }
                self.set_token_collider(ctx, false);
            }
            RotatingTokenForward => {
                if from == PushingToken {
                    self.light.on = true;
                    self.rotation = 0;
                }
                self.rotation += 1;
            }
            RotatingTokenBackward => {
                if from == PausingTokenForward {
                    self.rotation = 0;
                }
                self.rotation -= 1;
            }
            PausingTokenForward | PausingTokenBackward => self.pause_frames = 0,
            RetractingToken => {
                self.rotation = 0;
                self.light.frame = -1;
            }
            ReadingToken => {
                self.light.off();
                if let (Some(variant), Some(_)) = (self.variant, self.token) {
                    ctx.events.emit(CabinetEvent::TokenRead { variant });
                }
            }
            PreparingIdle => {
                self.set_token_collider(ctx, true);
                if let Some(token) = self.token.take() {
                    ctx.pools.recycle(ctx.world, token);
                }
                self.variant = None;
                self.position = TOKEN_INITIAL_POSITION;
            }
            Idle | PushingToken => {}
        }
    }

    fn update_secondary(&mut self, ctx: &mut MechanismContext<'_>) {
        if let Some(instance) = self.token.and_then(|id| ctx.pools.get(id)) {
            ctx.world.set_pose(
                instance.body,
                Pose {
                    translation: INIT_POSITION + Vec3::Y * self.position,
                    rotation: token_rotation(self.rotation),
                },
            );
        }
    }
}
