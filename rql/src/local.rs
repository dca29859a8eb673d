use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::EpsilonGreedyPolicy;
use crate::environment::{Emulator, EnvironmentAdapter, Mode};
use crate::model::QNetwork;
use crate::prelude::Result;
use crate::remote_loop::{EpisodeEnd, EpisodeSummary, StallGuard};
use crate::state_buffer::{StateBuffer, WarmUp};

#[derive(Clone, Debug)]
pub struct LocalPlaySettings {
    pub history_length: usize,
    /// Perform at most this number of no-op actions after a game restart
    pub random_starts: usize,
    pub exploration_rate: f64,
    pub stall_limit: usize,
    pub random_seed: Option<u64>,
}

impl Default for LocalPlaySettings {
    fn default() -> Self {
        Self {
            history_length: 4,
            random_starts: 30,
            exploration_rate: 0.05,
            stall_limit: 500,
            random_seed: None,
        }
    }
}

/// Plays games in-process with a locally loaded network; no learning takes place.
pub struct LocalPlayer<E: Emulator, N: QNetwork> {
    env: EnvironmentAdapter<E>,
    network: N,
    policy: EpsilonGreedyPolicy<StdRng>,
    buffer: StateBuffer,
    rng: StdRng,
    settings: LocalPlaySettings,
}

impl<E: Emulator, N: QNetwork> LocalPlayer<E, N> {
    /// `frame_dims` must match the frames captured by `env`
    pub fn new(mut env: EnvironmentAdapter<E>, network: N, frame_dims: (u32, u32), settings: LocalPlaySettings) -> Self {
        // losing a life is part of the game when playing
        env.set_mode(Mode::Test);
        let mut rng = match settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let policy = EpsilonGreedyPolicy::new(env.action_count(), StdRng::seed_from_u64(rng.gen()));
        let buffer = StateBuffer::new(settings.history_length, frame_dims.0, frame_dims.1, WarmUp::None);
        Self { env, network, policy, buffer, rng, settings }
    }

    pub fn play_episode(&mut self) -> Result<EpisodeSummary> {
        self.env.restart();
        self.buffer.clear();
        // make sure there are `history_length` screens to form a state
        for frame in self.env.random_start(self.settings.random_starts, self.settings.history_length, &mut self.rng) {
            self.buffer.add(frame)?;
        }
        if self.env.is_terminal() {
            log::warn!("Game ended during warm-up, episode skipped");
            return Ok(EpisodeSummary { steps: 0, total_reward: 0.0, end: EpisodeEnd::Terminal });
        }

        let mut stall_guard = StallGuard::new(self.settings.stall_limit);
        let mut steps = 0;
        let mut total_reward = 0.0;
        let end = loop {
            let decision = self.policy.select_action(&self.network, &self.buffer, self.settings.exploration_rate)?;
            let reward = self.env.act(decision.action);
            self.buffer.add(self.env.capture_percept())?;
            total_reward += reward as f64;
            steps += 1;

            if self.env.is_terminal() {
                break EpisodeEnd::Terminal;
            }
            if stall_guard.observe(reward) {
                break EpisodeEnd::Stalled;
            }
        };
        Ok(EpisodeSummary { steps, total_reward, end })
    }
}

#[cfg(test)]
mod tests {
    use crate::environment::{Catcher, EnvironmentSettings};
    use crate::model::{InputDims, LinearNetworkFactory, NetworkFactory};

    use super::*;

    #[test]
    fn test_plays_catcher_until_game_over() {
        let env_settings = EnvironmentSettings { screen_width: 16, screen_height: 16, ..Default::default() };
        let env = EnvironmentAdapter::new(Catcher::new(Some(42)), &env_settings, Mode::Train);
        let dims = InputDims { history_length: 4, height: 16, width: 16 };
        let network = LinearNetworkFactory::new(dims, Some(1)).create(3).unwrap();
        let settings = LocalPlaySettings { random_seed: Some(3), stall_limit: 0, ..Default::default() };
        let mut player = LocalPlayer::new(env, network, (16, 16), settings);

        let summary = player.play_episode().unwrap();
        assert_eq!(summary.end, EpisodeEnd::Terminal);
        assert!(summary.steps > 0);
        assert!(summary.total_reward >= -3.0);
    }

    #[test]
    fn test_long_warm_up_with_large_frame_skip() {
        let env_settings = EnvironmentSettings { frame_skip: 8, screen_width: 16, screen_height: 16, ..Default::default() };
        let dims = InputDims { history_length: 4, height: 16, width: 16 };
        for seed in 0..5 {
            let env = EnvironmentAdapter::new(Catcher::new(Some(seed)), &env_settings, Mode::Test);
            let network = LinearNetworkFactory::new(dims, Some(seed)).create(3).unwrap();
            let settings = LocalPlaySettings { random_starts: 31, random_seed: Some(seed), ..Default::default() };
            let mut player = LocalPlayer::new(env, network, (16, 16), settings);
            assert!(player.play_episode().is_ok());
        }
    }
}
