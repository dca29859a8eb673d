#![allow(dead_code)]

use image::{ImageBuffer, Luma};

use rql::environment::Emulator;
use rql::model::NetworkFactory;
use rql::prelude::{ActionIndex, GrayFrame, Result, RqlError};
use rql::protocol::{SetupReply, SetupRequest, StepReply, StepRequest};
use rql::remote_loop::PlayTransport;
use rql::session::SessionController;

#[ctor::ctor]
fn init() {
    rql::log::init_test_logging();
}

/// Emulator without rewards; loses a life at each frame listed in `life_loss_frames`
pub struct ScriptedEmulator {
    action_count: usize,
    lives: u32,
    frame: u32,
    life_loss_frames: Vec<u32>,
    pub reward_per_frame: f32,
    pub actions: Vec<ActionIndex>,
}

impl ScriptedEmulator {
    pub fn new(action_count: usize) -> Self {
        Self {
            action_count,
            lives: 3,
            frame: 0,
            life_loss_frames: vec![],
            reward_per_frame: 0.0,
            actions: vec![],
        }
    }

    pub fn losing_lives_at(mut self, frames: &[u32]) -> Self {
        self.life_loss_frames = frames.to_vec();
        self
    }
}

impl Emulator for ScriptedEmulator {
    fn action_count(&self) -> usize {
        self.action_count
    }

    fn act(&mut self, action: ActionIndex) -> f32 {
        self.actions.push(action);
        self.frame += 1;
        if self.life_loss_frames.contains(&self.frame) {
            self.lives = self.lives.saturating_sub(1);
        }
        self.reward_per_frame
    }

    fn lives(&self) -> u32 {
        self.lives
    }

    fn game_over(&self) -> bool {
        self.lives == 0
    }

    fn reset_game(&mut self) {
        self.lives = 3;
        self.frame = 0;
    }

    fn screen(&self) -> GrayFrame {
        let shade = (self.frame % 256) as u8;
        ImageBuffer::from_pixel(32, 32, Luma([shade]))
    }
}

/// Talks to a [SessionController] directly, the way the HTTP layer would
pub struct InProcessTransport<'a, F: NetworkFactory> {
    controller: &'a SessionController<F>,
    pub setups: Vec<SetupRequest>,
    pub steps: Vec<StepRequest>,
    /// Sends every non-terminal step twice, as a client retrying after a lost reply would
    pub resend_steps: bool,
}

impl<'a, F: NetworkFactory> InProcessTransport<'a, F> {
    pub fn new(controller: &'a SessionController<F>) -> Self {
        Self { controller, setups: vec![], steps: vec![], resend_steps: false }
    }
}

impl<F: NetworkFactory> PlayTransport for InProcessTransport<'_, F> {
    fn setup(&mut self, request: &SetupRequest) -> Result<SetupReply> {
        self.setups.push(request.clone());
        self.controller.setup(request)
    }

    fn step(&mut self, request: &StepRequest) -> Result<StepReply> {
        self.steps.push(request.clone());
        if self.resend_steps && !request.terminal {
            let first = self.controller.step(request.clone());
            let second = self.controller.step(request.clone());
            assert_eq!(first.as_ref().ok(), second.as_ref().ok(), "retry answered differently");
        }
        match self.controller.step(request.clone()) {
            Err(RqlError::SessionNotBound(_)) => Ok(StepReply::Stopped),
            result => result,
        }
    }
}
