use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::agent::{EpsilonGreedyPolicy, ExplorationMode, ExplorationSchedule};
use crate::model::{CheckpointTable, NetworkFactory, QNetwork};
use crate::prelude::{Result, RqlError};
use crate::protocol::{decode_frame, SessionId, SetupReply, SetupRequest, StepReply, StepRequest};
use crate::replay_memory::{BoundedReplayMemory, ReplayMemory};
use crate::state_buffer::{StateBuffer, WarmUp};

use agent::StepAgent;

mod agent;

#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// How many screen frames form a state
    pub history_length: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    pub warm_up: WarmUp,
    pub exploration: ExplorationSchedule,
    pub exploration_mode: ExplorationMode,
    /// Sessions without a step for this long lose their agent
    pub idle_timeout: Duration,
    /// Replay memory capacity per session; `0` disables recording
    pub replay_size: usize,
    pub random_seed: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_length: 4,
            frame_width: 84,
            frame_height: 84,
            warm_up: WarmUp::RepeatFirst,
            exploration: ExplorationSchedule::default(),
            exploration_mode: ExplorationMode::Evaluation,
            idle_timeout: Duration::from_secs(600),
            replay_size: 0,
            random_seed: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No agent bound
    Init,
    /// Serving steps
    Play,
}

struct Session<N: QNetwork> {
    id: SessionId,
    phase: Phase,
    game_name: String,
    agent: Option<StepAgent<N>>,
    last_seen: Instant,
}

impl<N: QNetwork> Session<N> {
    fn bound_agent(&mut self) -> Result<&mut StepAgent<N>> {
        match (self.phase, self.agent.as_mut()) {
            (Phase::Play, Some(agent)) => Ok(agent),
            _ => Err(RqlError::SessionNotBound(self.id.to_string())),
        }
    }

    fn unbind(&mut self) {
        if self.phase == Phase::Play {
            log::info!("Session {} ({}) unbound", self.id, self.game_name);
        }
        self.phase = Phase::Init;
        self.agent = None;
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Server side state machine of the remote play protocol.
///
/// Each setup creates a session with its own network, policy and state buffer,
/// keyed by a freshly issued [SessionId]. Steps are dispatched to the session they name;
/// a step for an unknown, expired or otherwise unbound session yields [RqlError::SessionNotBound].
pub struct SessionController<F: NetworkFactory> {
    factory: F,
    checkpoints: CheckpointTable,
    settings: SessionSettings,
    sessions: Mutex<FxHashMap<SessionId, Arc<Mutex<Session<F::Network>>>>>,
    sessions_created: AtomicU64,
}

impl<F: NetworkFactory> SessionController<F> {
    pub fn new(factory: F, checkpoints: CheckpointTable, settings: SessionSettings) -> Self {
        Self {
            factory,
            checkpoints,
            settings,
            sessions: Mutex::new(FxHashMap::default()),
            sessions_created: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// INIT -> PLAY: binds a new session to a network loaded for the requested game
    pub fn setup(&self, request: &SetupRequest) -> Result<SetupReply> {
        let released = self.release_idle();
        if released > 0 {
            log::debug!("released {} idle session(s)", released);
        }

        let agent = self.create_agent(request).map_err(|e| {
            log::error!("Setup for game '{}' failed: {}", request.game_name, e);
            e
        })?;

        let id = SessionId::generate();
        let session = Session {
            id: id.clone(),
            phase: Phase::Play,
            game_name: request.game_name.clone(),
            agent: Some(agent),
            last_seen: Instant::now(),
        };
        lock(&self.sessions).insert(id.clone(), Arc::new(Mutex::new(session)));
        log::info!("Session {} bound to game '{}' with {} actions, proceed to play", id, request.game_name, request.action_count);

        Ok(SetupReply { session_id: id })
    }

    /// PLAY -> PLAY: feeds the observation to the session's agent and returns its next action.
    /// A terminal step finishes the session (PLAY -> INIT) and forgets it.
    pub fn step(&self, request: StepRequest) -> Result<StepReply> {
        let session = request.session_id.as_ref()
            .and_then(|id| lock(&self.sessions).get(id).cloned());
        let Some(session) = session else {
            let id = request.session_id.map(|id| id.to_string()).unwrap_or_default();
            log::warn!("Step for unknown session '{}'", id);
            return Err(RqlError::SessionNotBound(id));
        };

        let (id, reply) = {
            let mut session = lock(&session);
            if session.phase == Phase::Play && session.is_idle(self.settings.idle_timeout) {
                session.unbind();
            }
            let agent = session.bound_agent()?;
            if let Some(reply) = agent.repeated_reply(request.step_index) {
                log::debug!("Repeated step {:?}, answering {:?} again", request.step_index, reply);
                return Ok(reply);
            }

            let screen = decode_frame(&request.screen, (self.settings.frame_width, self.settings.frame_height))?;
            let outcome = agent.step(screen, request.reward, request.terminal, request.step_index)?;
            session.last_seen = Instant::now();

            if let Some((steps, total_reward)) = outcome.finished_episode {
                log::info!("Session {} ({}): episode finished after {} steps, total reward {}", session.id, session.game_name, steps, total_reward);
                session.unbind();
            }
            (session.id.clone(), outcome.reply)
        };

        if reply == StepReply::Acknowledged {
            lock(&self.sessions).remove(&id);
        }
        Ok(reply)
    }

    /// Phase of a session; unknown sessions are in [Phase::Init]
    pub fn phase(&self, id: &SessionId) -> Phase {
        lock(&self.sessions).get(id)
            .map(|session| lock(session).phase)
            .unwrap_or(Phase::Init)
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Number of transitions recorded by a session (0 with disabled replay memory)
    pub fn replay_len(&self, id: &SessionId) -> usize {
        lock(&self.sessions).get(id)
            .and_then(|session| lock(session).agent.as_ref().map(StepAgent::replay_len))
            .unwrap_or(0)
    }

    /// Unbinds idle sessions and forgets all unbound ones. Returns the number of removed sessions.
    pub fn release_idle(&self) -> usize {
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, session| {
            // sessions busy with a step are alive by definition
            let Ok(mut session) = session.try_lock() else { return true };
            if session.is_idle(self.settings.idle_timeout) {
                session.unbind();
            }
            session.phase == Phase::Play
        });
        before - sessions.len()
    }

    fn create_agent(&self, request: &SetupRequest) -> Result<StepAgent<F::Network>> {
        let mut network = self.factory.create(request.action_count)?;
        match self.checkpoints.lookup(&request.game_name) {
            Some(path) => {
                log::info!("Loading weights from {}", path.display());
                network.load_weights(path)?;
            }
            None => log::info!("No checkpoint for game '{}', playing with untrained weights", request.game_name),
        }
        if network.action_count() != request.action_count {
            return Err(RqlError::UnavailableBackend(format!(
                "network has {} actions, game has {}",
                network.action_count(), request.action_count
            )));
        }

        let s = &self.settings;
        let policy = EpsilonGreedyPolicy::new(request.action_count, self.session_rng());
        let buffer = StateBuffer::new(s.history_length, s.frame_width, s.frame_height, s.warm_up);
        let replay = (s.replay_size > 0)
            .then(|| Box::new(BoundedReplayMemory::new(s.replay_size)) as Box<dyn ReplayMemory>);
        Ok(StepAgent::new(network, policy, buffer, s.exploration.clone(), s.exploration_mode, replay))
    }

    fn session_rng(&self) -> StdRng {
        let n = self.sessions_created.fetch_add(1, Ordering::Relaxed);
        match self.settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n)),
            None => StdRng::from_entropy(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
