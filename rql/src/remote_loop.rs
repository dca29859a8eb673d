use std::fmt::{Display, Formatter};

use crate::environment::{Emulator, EnvironmentAdapter};
use crate::prelude::{Result, RqlError};
use crate::protocol::{FrameEncoding, RewardRounding, SessionId, SetupReply, SetupRequest, StepReply, StepRequest};

/// Carries protocol requests to a session controller and returns its replies.
///
/// Implementations are synchronous: one request is in flight at a time.
pub trait PlayTransport {
    fn setup(&mut self, request: &SetupRequest) -> Result<SetupReply>;

    fn step(&mut self, request: &StepRequest) -> Result<StepReply>;
}

#[derive(Clone, Debug)]
pub struct RemoteLoopSettings {
    pub game_name: String,
    /// Consecutive zero-reward steps after which an episode is given up; `0` disables the guard
    pub stall_limit: usize,
    pub reward_rounding: RewardRounding,
    pub frame_encoding: FrameEncoding,
}

impl Default for RemoteLoopSettings {
    fn default() -> Self {
        Self {
            game_name: "catcher".to_string(),
            stall_limit: 500,
            reward_rounding: RewardRounding::Truncate,
            frame_encoding: FrameEncoding::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpisodeEnd {
    /// The environment reported a terminal state
    Terminal,
    /// The stall guard gave up on the episode
    Stalled,
    /// The server has no session bound for us anymore
    Stopped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpisodeSummary {
    pub steps: u64,
    pub total_reward: f64,
    pub end: EpisodeEnd,
}

impl Display for EpisodeSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} after {} steps, total reward {}", self.end, self.steps, self.total_reward)
    }
}

/// Counts consecutive zero-reward steps
#[derive(Clone, Debug)]
pub struct StallGuard {
    limit: usize,
    zero_rewards: usize,
}

impl StallGuard {
    pub fn new(limit: usize) -> Self {
        Self { limit, zero_rewards: 0 }
    }

    /// Returns `true` when the episode should be given up
    pub fn observe(&mut self, reward: f32) -> bool {
        if reward == 0.0 {
            self.zero_rewards += 1;
        } else {
            self.zero_rewards = 0;
        }
        self.limit > 0 && self.zero_rewards >= self.limit
    }
}

/// Client side driver: plays a local environment, delegating every decision to the remote side.
pub struct RemoteLoop<E: Emulator, T: PlayTransport> {
    env: EnvironmentAdapter<E>,
    transport: T,
    settings: RemoteLoopSettings,
}

impl<E: Emulator, T: PlayTransport> RemoteLoop<E, T> {
    pub fn new(env: EnvironmentAdapter<E>, transport: T, settings: RemoteLoopSettings) -> Self {
        Self { env, transport, settings }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn environment(&self) -> &EnvironmentAdapter<E> {
        &self.env
    }

    /// Plays one episode from setup to the final (terminal) step. The environment is restarted afterwards.
    pub fn run_episode(&mut self) -> Result<EpisodeSummary> {
        let action_count = self.env.action_count();
        let setup = self.transport.setup(&SetupRequest {
            action_count,
            game_name: self.settings.game_name.clone(),
        })?;
        let session_id = setup.session_id;
        log::debug!("Session {} set up for '{}'", session_id, self.settings.game_name);

        let mut stall_guard = StallGuard::new(self.settings.stall_limit);
        let mut reward = 0.0;
        let mut steps = 0;
        let mut total_reward = 0.0;

        let end = loop {
            let request = self.step_request(&session_id, steps, reward, false)?;
            let action = match self.transport.step(&request)? {
                StepReply::Action(action) if action < action_count => action,
                StepReply::Action(action) => {
                    return Err(RqlError::protocol(format!("action {} out of range (0..{})", action, action_count)));
                }
                StepReply::Stopped => {
                    log::warn!("Server stopped session {}", session_id);
                    break EpisodeEnd::Stopped;
                }
                StepReply::Acknowledged => {
                    return Err(RqlError::protocol("non-terminal step acknowledged without an action"));
                }
            };

            let raw_reward = self.env.act(action);
            reward = self.settings.reward_rounding.apply(raw_reward);
            total_reward += reward;
            steps += 1;

            if stall_guard.observe(raw_reward) {
                log::info!("No reward for {} steps, giving up the episode", self.settings.stall_limit);
                self.finish(&session_id, steps, reward)?;
                break EpisodeEnd::Stalled;
            }
            if self.env.is_terminal() {
                log::debug!("Terminal state reached");
                self.finish(&session_id, steps, reward)?;
                break EpisodeEnd::Terminal;
            }
        };

        self.env.restart();
        Ok(EpisodeSummary { steps, total_reward, end })
    }

    /// Final step carrying the last reward and the terminal flag
    fn finish(&mut self, session_id: &SessionId, step_index: u64, reward: f64) -> Result<()> {
        let request = self.step_request(session_id, step_index, reward, true)?;
        match self.transport.step(&request)? {
            StepReply::Acknowledged => {}
            reply => log::debug!("Final step answered with {:?}", reply),
        }
        Ok(())
    }

    fn step_request(&self, session_id: &SessionId, step_index: u64, reward: f64, terminal: bool) -> Result<StepRequest> {
        let frame = self.env.capture_percept();
        Ok(StepRequest {
            session_id: Some(session_id.clone()),
            screen: self.settings.frame_encoding.encode(&frame)?,
            reward,
            terminal,
            step_index: Some(step_index),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(3, &[0.0, 0.0, 0.0], true)]
    #[case(3, &[0.0, 0.0, 1.0, 0.0, 0.0], false)]
    #[case(0, &[0.0; 1000], false)]
    fn test_stall_guard(#[case] limit: usize, #[case] rewards: &[f32], #[case] gives_up: bool) {
        let mut guard = StallGuard::new(limit);
        let result = rewards.iter().fold(false, |_, &r| guard.observe(r));
        assert_eq!(result, gives_up);
    }
}
