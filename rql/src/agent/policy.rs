use rand::Rng;

use crate::model::QNetwork;
use crate::prelude::{ActionIndex, Result, RqlError};
use crate::state_buffer::StateBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub action: ActionIndex,
    /// `true` for a uniformly random (exploring) action, `false` for a predicted one
    pub explored: bool,
}

/// Acts uniformly at random with probability `exploration_rate`, greedily on the network's Q-values otherwise
pub struct EpsilonGreedyPolicy<R: Rng> {
    action_count: usize,
    rng: R,
}

impl<R: Rng> EpsilonGreedyPolicy<R> {
    pub fn new(action_count: usize, rng: R) -> Self {
        assert!(action_count > 0, "action_count must be at least 1");
        Self { action_count, rng }
    }

    pub fn action_count(&self) -> usize {
        self.action_count
    }

    pub fn select_action<N: QNetwork + ?Sized>(
        &mut self,
        network: &N,
        state: &StateBuffer,
        exploration_rate: f64,
    ) -> Result<Decision> {
        assert!((0.0..=1.0).contains(&exploration_rate), "exploration rate {} out of [0,1]", exploration_rate);

        if self.rng.gen::<f64>() < exploration_rate {
            let action = self.rng.gen_range(0..self.action_count);
            log::debug!("Random action = {}", action);
            return Ok(Decision { action, explored: true });
        }

        let batch = state.inference_batch()?;
        let q_values = network.predict(&batch)?;
        // first row belongs to the one and only state of the batch
        let values = q_values.first().map(Vec::as_slice).unwrap_or_default();
        if values.len() != self.action_count {
            return Err(RqlError::NetworkOutput { expected: self.action_count, actual: values.len() });
        }
        let action = argmax(values).unwrap_or(0);
        log::debug!("Predicted action = {}", action);
        Ok(Decision { action, explored: false })
    }
}

/// Index of the maximum value; ties go to the first index. NaN values are never chosen.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
