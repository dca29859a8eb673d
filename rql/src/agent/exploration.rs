/// Which exploration rate a serving agent uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExplorationMode {
    /// Constant [ExplorationSchedule::rate_test]
    Evaluation,
    /// Linearly decaying rate of the schedule
    Annealed,
}

/// Linearly decaying epsilon-greedy exploration rate
#[derive(Clone, Debug, PartialEq)]
pub struct ExplorationSchedule {
    /// Exploration rate at the beginning of decay
    pub rate_start: f64,
    /// Exploration rate at the end of decay
    pub rate_end: f64,
    /// How many steps to decay the exploration rate
    pub decay_steps: u64,
    /// Exploration rate used during testing / serving
    pub rate_test: f64,
    pub steps_taken: u64,
}

impl Default for ExplorationSchedule {
    fn default() -> Self {
        Self {
            rate_start: 1.0,
            rate_end: 0.1,
            decay_steps: 1_000_000,
            rate_test: 0.05,
            steps_taken: 0,
        }
    }
}

impl ExplorationSchedule {
    /// Resumes the schedule after `steps` already taken steps
    pub fn starting_at(mut self, steps: u64) -> Self {
        self.steps_taken = steps;
        self
    }

    /// Exploration rate after `steps` steps
    pub fn rate_at(&self, steps: u64) -> f64 {
        if steps < self.decay_steps {
            self.rate_start - steps as f64 * (self.rate_start - self.rate_end) / self.decay_steps as f64
        } else {
            self.rate_end
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.rate_at(self.steps_taken)
    }

    pub fn rate(&self, mode: ExplorationMode) -> f64 {
        match mode {
            ExplorationMode::Evaluation => self.rate_test,
            ExplorationMode::Annealed => self.current_rate(),
        }
    }

    pub fn advance(&mut self) {
        self.steps_taken += 1;
    }
}
