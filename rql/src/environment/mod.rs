use rand::Rng;

use crate::prelude::{ActionIndex, GrayFrame};

pub use catcher::Catcher;
pub use preprocess::{ResizeFilter, ScreenPreprocessor};

pub mod catcher;
mod preprocess;

/// Opaque percept/action source (e.g. an Atari emulator or a 2D game engine).
///
/// One call to [Self::act] advances the game by exactly one frame.
pub trait Emulator {
    /// Size of the (minimal) action set
    fn action_count(&self) -> usize;

    /// Applies the action for a single frame and returns the reward earned during that frame
    fn act(&mut self, action: ActionIndex) -> f32;

    fn lives(&self) -> u32;

    fn game_over(&self) -> bool;

    fn reset_game(&mut self);

    /// Current screen in native resolution
    fn screen(&self) -> GrayFrame;
}

/// Terminal-state detection strategy of an [EnvironmentAdapter]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Losing a life counts as a (soft) terminal; the episode continues with the remaining lives on restart
    Train,
    /// Only a game over is terminal
    Test,
}

impl Mode {
    fn is_terminal(&self, game_over: bool, life_lost: bool) -> bool {
        match self {
            Mode::Train => game_over || life_lost,
            Mode::Test => game_over,
        }
    }

    fn requires_full_reset(&self, game_over: bool, life_lost: bool) -> bool {
        match self {
            Mode::Test => true,
            Mode::Train => !life_lost || game_over,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnvironmentSettings {
    /// How many times to repeat each chosen action
    pub frame_skip: usize,
    /// Screen width after resize
    pub screen_width: u32,
    /// Screen height after resize
    pub screen_height: u32,
    /// Average the last two emulated screens
    pub color_averaging: bool,
    pub resize_filter: ResizeFilter,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            frame_skip: 4,
            screen_width: 84,
            screen_height: 84,
            color_averaging: true,
            resize_filter: ResizeFilter::Nearest,
        }
    }
}

/// Wraps one emulator instance and normalizes its output into a consistent percept:
/// fixed-size grayscale frames, accumulated rewards and a terminal flag according to the [Mode].
pub struct EnvironmentAdapter<E: Emulator> {
    emulator: E,
    mode: Mode,
    frame_skip: usize,
    preprocessor: ScreenPreprocessor,
    life_lost: bool,
    last_screen: Option<GrayFrame>,
    previous_screen: Option<GrayFrame>,
}

impl<E: Emulator> EnvironmentAdapter<E> {
    pub fn new(emulator: E, settings: &EnvironmentSettings, mode: Mode) -> Self {
        assert!(settings.frame_skip > 0, "frame_skip must be at least 1");
        Self {
            emulator,
            mode,
            frame_skip: settings.frame_skip,
            preprocessor: ScreenPreprocessor::new(settings),
            life_lost: false,
            last_screen: None,
            previous_screen: None,
        }
    }

    pub fn action_count(&self) -> usize {
        self.emulator.action_count()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Replaces the terminal-detection strategy
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Applies `action` for `frame_skip` frames (less if the game ends in between)
    /// and returns the reward accumulated over these frames.
    pub fn act(&mut self, action: ActionIndex) -> f32 {
        assert!(
            action < self.action_count(),
            "action {} out of range (0..{})", action, self.action_count()
        );
        let lives = self.emulator.lives();
        let mut reward = 0.0;
        for _ in 0..self.frame_skip {
            reward += self.emulator.act(action);
            self.previous_screen = self.last_screen.take();
            self.last_screen = Some(self.emulator.screen());
            if self.emulator.game_over() {
                break;
            }
        }
        self.life_lost = self.emulator.lives() < lives;
        reward
    }

    /// Current screen, grayscale and resized to the configured frame size
    pub fn capture_percept(&self) -> GrayFrame {
        match (&self.last_screen, &self.previous_screen) {
            (Some(last), Some(previous)) => self.preprocessor.process(last, Some(previous)),
            (Some(last), None) => self.preprocessor.process(last, None),
            _ => self.preprocessor.process(&self.emulator.screen(), None),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.mode.is_terminal(self.emulator.game_over(), self.life_lost)
    }

    /// Full reset in test mode or after a real game end;
    /// after a mere life loss in train mode play continues with the remaining lives.
    pub fn restart(&mut self) {
        if self.mode.requires_full_reset(self.emulator.game_over(), self.life_lost) {
            self.emulator.reset_game();
            self.last_screen = None;
            self.previous_screen = None;
        }
        self.life_lost = false;
    }

    pub fn life_lost(&self) -> bool {
        self.life_lost
    }

    pub fn lives(&self) -> u32 {
        self.emulator.lives()
    }

    /// Performs a random number of no-op actions (at least `history_length + 1`) to produce more
    /// stochastic game starts. Returns the frames captured after each of them.
    ///
    /// Should the no-ops end the episode, the game is restarted and warmed up once more with
    /// `history_length + 1` no-ops. If even that ends the episode the adapter is left terminal;
    /// callers check [Self::is_terminal].
    pub fn random_start<R: Rng>(&mut self, max_noops: usize, history_length: usize, rng: &mut R) -> Vec<GrayFrame> {
        let upper = max_noops.max(history_length);
        let noops = rng.gen_range(history_length..=upper) + 1;
        match self.noop_frames(noops) {
            Ok(frames) => frames,
            Err(_) => {
                log::warn!("Terminal state during {} random start no-ops, restarting with {}", noops, history_length + 1);
                self.restart();
                self.noop_frames(history_length + 1).unwrap_or_else(|frames| frames)
            }
        }
    }

    /// `Err` carries the frames captured up to a terminal state
    fn noop_frames(&mut self, count: usize) -> Result<Vec<GrayFrame>, Vec<GrayFrame>> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            self.act(0);
            frames.push(self.capture_percept());
            if self.is_terminal() {
                return Err(frames);
            }
        }
        Ok(frames)
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }
}

/// Known games which can be instantiated locally
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameCatalog {
    Catcher,
}

impl GameCatalog {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "catcher" => Some(GameCatalog::Catcher),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GameCatalog::Catcher => "catcher",
        }
    }

    pub fn instantiate(&self, seed: Option<u64>) -> Box<dyn Emulator> {
        match self {
            GameCatalog::Catcher => Box::new(Catcher::new(seed)),
        }
    }
}

impl<T: Emulator + ?Sized> Emulator for Box<T> {
    fn action_count(&self) -> usize { (**self).action_count() }

    fn act(&mut self, action: ActionIndex) -> f32 { (**self).act(action) }

    fn lives(&self) -> u32 { (**self).lives() }

    fn game_over(&self) -> bool { (**self).game_over() }

    fn reset_game(&mut self) { (**self).reset_game() }

    fn screen(&self) -> GrayFrame { (**self).screen() }
}
