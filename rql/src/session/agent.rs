use rand::rngs::StdRng;

use crate::agent::{EpsilonGreedyPolicy, ExplorationMode, ExplorationSchedule};
use crate::model::QNetwork;
use crate::prelude::{ActionIndex, GrayFrame, Result};
use crate::protocol::StepReply;
use crate::replay_memory::ReplayMemory;
use crate::state_buffer::StateBuffer;

/// Everything a bound session needs to answer steps: network, policy, state buffer and bookkeeping.
/// Owned exclusively by one session.
pub(super) struct StepAgent<N: QNetwork> {
    network: N,
    policy: EpsilonGreedyPolicy<StdRng>,
    buffer: StateBuffer,
    schedule: ExplorationSchedule,
    exploration_mode: ExplorationMode,
    replay: Option<Box<dyn ReplayMemory>>,
    last_action: ActionIndex,
    /// Step index and reply of the latest indexed step
    last_reply: Option<(u64, StepReply)>,
    episode_steps: u64,
    episode_reward: f64,
}

/// Result of one observed step
pub(super) struct StepOutcome {
    pub reply: StepReply,
    /// `(steps, total reward)` of an episode that just ended
    pub finished_episode: Option<(u64, f64)>,
}

impl<N: QNetwork> StepAgent<N> {
    pub fn new(
        network: N,
        policy: EpsilonGreedyPolicy<StdRng>,
        buffer: StateBuffer,
        schedule: ExplorationSchedule,
        exploration_mode: ExplorationMode,
        replay: Option<Box<dyn ReplayMemory>>,
    ) -> Self {
        Self {
            network,
            policy,
            buffer,
            schedule,
            exploration_mode,
            replay,
            last_action: 0,
            last_reply: None,
            episode_steps: 0,
            episode_reward: 0.0,
        }
    }

    /// Reply already given to the step with this index, if it was the latest one
    pub fn repeated_reply(&self, step_index: Option<u64>) -> Option<StepReply> {
        match (step_index, self.last_reply) {
            (Some(index), Some((last, reply))) if index == last => Some(reply),
            _ => None,
        }
    }

    /// Takes in the observation caused by the previously sent action and decides the next one.
    /// A terminal observation ends the episode without inference.
    pub fn step(&mut self, screen: GrayFrame, reward: f64, terminal: bool, step_index: Option<u64>) -> Result<StepOutcome> {
        let outcome = self.observe(screen, reward, terminal)?;
        if let Some(index) = step_index {
            self.last_reply = Some((index, outcome.reply));
        }
        Ok(outcome)
    }

    fn observe(&mut self, screen: GrayFrame, reward: f64, terminal: bool) -> Result<StepOutcome> {
        let replay_frame = self.replay.as_ref().filter(|_| !terminal).map(|_| screen.clone());
        self.buffer.add(screen)?;

        if reward != 0.0 {
            log::debug!("Reward: {}", reward);
        }
        self.episode_reward += reward;
        self.episode_steps += 1;

        if terminal {
            log::debug!("Terminal state, waiting for restart");
            let finished = (self.episode_steps, self.episode_reward);
            self.buffer.clear();
            self.episode_steps = 0;
            self.episode_reward = 0.0;
            return Ok(StepOutcome { reply: StepReply::Acknowledged, finished_episode: Some(finished) });
        }

        if let (Some(replay), Some(frame)) = (self.replay.as_mut(), replay_frame) {
            replay.add(self.last_action, reward as f32, frame, false);
        }

        let rate = self.schedule.rate(self.exploration_mode);
        let decision = self.policy.select_action(&self.network, &self.buffer, rate)?;
        self.schedule.advance();
        self.last_action = decision.action;
        Ok(StepOutcome { reply: StepReply::Action(decision.action), finished_episode: None })
    }

    pub fn replay_len(&self) -> usize {
        self.replay.as_ref().map(|r| r.len()).unwrap_or(0)
    }
}
