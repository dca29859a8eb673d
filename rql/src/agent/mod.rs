pub use exploration::{ExplorationMode, ExplorationSchedule};
pub use policy::{argmax, Decision, EpsilonGreedyPolicy};

mod exploration;
mod policy;
