use std::path::Path;

use crate::prelude::{GrayFrame, Result};

pub use checkpoint::CheckpointTable;
pub use linear::{LinearNetworkFactory, LinearQNetwork};

mod checkpoint;
mod linear;

/// Shape of a single network input: a stack of `history_length` grayscale frames
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputDims {
    pub history_length: usize,
    pub height: usize,
    pub width: usize,
}

impl InputDims {
    pub fn len(&self) -> usize {
        self.history_length * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dense batch of states `[batch_size, history_length, height, width]`, one pixel per float (0..=255)
#[derive(Clone, Debug, PartialEq)]
pub struct StateBatch {
    batch_size: usize,
    input_dims: InputDims,
    data: Vec<f32>,
}

impl StateBatch {
    /// All states must consist of equally sized frames and have the same history length
    pub fn from_states(states: &[Vec<&GrayFrame>]) -> Self {
        assert!(!states.is_empty(), "empty batch");
        let first = states[0][0];
        let input_dims = InputDims {
            history_length: states[0].len(),
            height: first.height() as usize,
            width: first.width() as usize,
        };
        let mut data = Vec::with_capacity(states.len() * input_dims.len());
        for state in states {
            assert_eq!(state.len(), input_dims.history_length, "history length mismatch within batch");
            for frame in state {
                assert_eq!(frame.dimensions(), first.dimensions(), "frame size mismatch within batch");
                data.extend(frame.as_raw().iter().map(|&p| p as f32));
            }
        }
        Self {
            batch_size: states.len(),
            input_dims,
            data,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn input_dims(&self) -> InputDims {
        self.input_dims
    }

    pub fn dims(&self) -> [usize; 4] {
        [self.batch_size, self.input_dims.history_length, self.input_dims.height, self.input_dims.width]
    }

    /// Flattened values of the batch item at `index`
    pub fn item(&self, index: usize) -> &[f32] {
        let len = self.input_dims.len();
        &self.data[index * len..(index + 1) * len]
    }
}

/// Q-value estimator, used read-only (predict) while serving
pub trait QNetwork: Send {
    fn action_count(&self) -> usize;

    /// Returns one row of per-action values for each state in the batch
    fn predict(&self, batch: &StateBatch) -> Result<Vec<Vec<f32>>>;

    fn load_weights(&mut self, path: &Path) -> Result<()>;
}

/// Creates fresh (untrained) networks sized to an action count
pub trait NetworkFactory: Send + Sync {
    type Network: QNetwork;

    fn create(&self, action_count: usize) -> Result<Self::Network>;
}
