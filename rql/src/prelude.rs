use image::{ImageBuffer, Luma};
use thiserror::Error;

/// Gray-scaled image
pub type GrayFrame = ImageBuffer<Luma<u8>, Vec<u8>>;

/// Index into the action set of an environment; always in range `0..action_count`
pub type ActionIndex = usize;

/// One timestep's observation taken from an environment
#[derive(Clone, Debug, PartialEq)]
pub struct Percept {
    pub frame: GrayFrame,
    pub reward: f32,
    pub terminal: bool,
}

#[derive(Debug, Error)]
pub enum RqlError {
    /// Malformed or out-of-sequence request
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("insufficient history: {available} of {required} frames available")]
    InsufficientHistory { available: usize, required: usize },

    #[error("no active session bound for '{0}'")]
    SessionNotBound(String),

    /// Network or checkpoint could not be made available
    #[error("backend unavailable: {0}")]
    UnavailableBackend(String),

    #[error("frame dimension mismatch: expected {expected:?}, got {actual:?}")]
    FrameDimension { expected: (u32, u32), actual: (u32, u32) },

    #[error("frame codec error: {0}")]
    FrameCodec(#[from] image::ImageError),

    #[error("network produced {actual} values, expected one per action ({expected})")]
    NetworkOutput { expected: usize, actual: usize },

    /// Transport failure (timeout, refused connection) after all retries
    #[error("remote side unavailable: {0}")]
    Unavailable(String),
}

impl RqlError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        RqlError::Protocol(msg.into())
    }
}

pub type Result<T, E = RqlError> = std::result::Result<T, E>;
