use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::{InputDims, NetworkFactory, QNetwork, StateBatch};
use crate::prelude::{Result, RqlError};

const INITIAL_WEIGHT_RANGE: f32 = 0.01;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LinearWeights {
    input_len: usize,
    /// `[action][input]`
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

/// A single affine layer over the stacked frames (pixels scaled to `0..=1`).
///
/// Weights are persisted as JSON.
#[derive(Clone, Debug)]
pub struct LinearQNetwork {
    input_dims: InputDims,
    params: LinearWeights,
}

impl LinearQNetwork {
    pub fn untrained<R: Rng>(action_count: usize, input_dims: InputDims, rng: &mut R) -> Self {
        assert!(action_count > 0, "action_count must be at least 1");
        let input_len = input_dims.len();
        let weights = (0..action_count)
            .map(|_| (0..input_len).map(|_| rng.gen_range(-INITIAL_WEIGHT_RANGE..INITIAL_WEIGHT_RANGE)).collect())
            .collect();
        Self {
            input_dims,
            params: LinearWeights {
                input_len,
                weights,
                bias: vec![0.0; action_count],
            },
        }
    }

    pub fn input_dims(&self) -> InputDims {
        self.input_dims
    }

    pub fn save_weights(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| RqlError::UnavailableBackend(format!("{}: {}", path.display(), e)))?;
        serde_json::to_writer(BufWriter::new(file), &self.params)
            .map_err(|e| RqlError::UnavailableBackend(format!("{}: {}", path.display(), e)))
    }

    fn q_values(&self, input: &[f32]) -> Vec<f32> {
        self.params.weights.iter()
            .zip(self.params.bias.iter())
            .map(|(row, bias)| {
                bias + row.iter().zip(input.iter()).map(|(w, x)| w * (x / 255.0)).sum::<f32>()
            })
            .collect()
    }
}

impl QNetwork for LinearQNetwork {
    fn action_count(&self) -> usize {
        self.params.weights.len()
    }

    fn predict(&self, batch: &StateBatch) -> Result<Vec<Vec<f32>>> {
        assert_eq!(
            batch.input_dims(), self.input_dims,
            "state dimension mismatch. Expected {:?}, got {:?}", self.input_dims, batch.input_dims()
        );
        Ok((0..batch.batch_size())
            .map(|i| self.q_values(batch.item(i)))
            .collect())
    }

    fn load_weights(&mut self, path: &Path) -> Result<()> {
        let unavailable = |reason: String| RqlError::UnavailableBackend(format!("{}: {}", path.display(), reason));

        let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let params: LinearWeights = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| unavailable(e.to_string()))?;

        if params.input_len != self.input_dims.len() {
            return Err(unavailable(format!(
                "checkpoint input length {} does not match network input length {}",
                params.input_len, self.input_dims.len()
            )));
        }
        if params.weights.len() != self.action_count() || params.bias.len() != self.action_count() {
            return Err(unavailable(format!(
                "checkpoint holds {} actions, network has {}",
                params.weights.len(), self.action_count()
            )));
        }
        if params.weights.iter().any(|row| row.len() != params.input_len) {
            return Err(unavailable("malformed weight matrix".to_string()));
        }
        self.params = params;
        Ok(())
    }
}

/// Creates [LinearQNetwork]s with small random weights.
/// With a seed, the n-th created network is initialized from `seed + n`.
pub struct LinearNetworkFactory {
    input_dims: InputDims,
    seed: Option<u64>,
    created: AtomicU64,
}

impl LinearNetworkFactory {
    pub fn new(input_dims: InputDims, seed: Option<u64>) -> Self {
        Self {
            input_dims,
            seed,
            created: AtomicU64::new(0),
        }
    }
}

impl NetworkFactory for LinearNetworkFactory {
    type Network = LinearQNetwork;

    fn create(&self, action_count: usize) -> Result<Self::Network> {
        if action_count == 0 {
            return Err(RqlError::UnavailableBackend("network needs at least one action".to_string()));
        }
        let n = self.created.fetch_add(1, Ordering::Relaxed);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n)),
            None => StdRng::from_entropy(),
        };
        Ok(LinearQNetwork::untrained(action_count, self.input_dims, &mut rng))
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use crate::prelude::GrayFrame;

    use super::*;

    const DIMS: InputDims = InputDims { history_length: 2, height: 2, width: 2 };

    fn batch(value: u8) -> StateBatch {
        let frame = GrayFrame::from_pixel(2, 2, Luma([value]));
        StateBatch::from_states(&[vec![&frame, &frame]])
    }

    #[test]
    fn test_predict_returns_one_value_per_action() {
        let net = LinearNetworkFactory::new(DIMS, Some(1)).create(5).unwrap();
        let q = net.predict(&batch(100)).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].len(), 5);
    }

    #[test]
    fn test_weights_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.json");
        let trained = LinearNetworkFactory::new(DIMS, Some(1)).create(3).unwrap();
        trained.save_weights(&path).unwrap();

        let mut fresh = LinearNetworkFactory::new(DIMS, Some(99)).create(3).unwrap();
        assert_ne!(fresh.predict(&batch(200)).unwrap(), trained.predict(&batch(200)).unwrap());
        fresh.load_weights(&path).unwrap();
        assert_eq!(fresh.predict(&batch(200)).unwrap(), trained.predict(&batch(200)).unwrap());
    }

    #[test]
    fn test_load_rejects_checkpoint_for_other_action_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.json");
        LinearNetworkFactory::new(DIMS, Some(1)).create(4).unwrap().save_weights(&path).unwrap();

        let mut net = LinearNetworkFactory::new(DIMS, Some(1)).create(3).unwrap();
        assert!(matches!(net.load_weights(&path), Err(RqlError::UnavailableBackend(_))));
    }

    #[test]
    fn test_load_missing_file_is_unavailable_backend() {
        let mut net = LinearNetworkFactory::new(DIMS, None).create(2).unwrap();
        let result = net.load_weights(Path::new("/nonexistent/snapshot.json"));
        assert!(matches!(result, Err(RqlError::UnavailableBackend(_))));
    }
}
