use std::collections::VecDeque;

use crate::model::StateBatch;
use crate::prelude::{GrayFrame, Result, RqlError};

/// How a [StateBuffer] answers before `history_length` frames have been added
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarmUp {
    /// Missing history is an [RqlError::InsufficientHistory]
    None,
    /// Missing history is padded with the oldest captured frame
    RepeatFirst,
}

/// Sliding window over the `history_length` most recent frames, forming the agent's perceptual state.
#[derive(Clone, Debug)]
pub struct StateBuffer {
    history_length: usize,
    frame_width: u32,
    frame_height: u32,
    warm_up: WarmUp,
    /// oldest first
    frames: VecDeque<GrayFrame>,
}

impl StateBuffer {
    pub fn new(history_length: usize, frame_width: u32, frame_height: u32, warm_up: WarmUp) -> Self {
        assert!(history_length > 0, "history_length must be at least 1");
        Self {
            history_length,
            frame_width,
            frame_height,
            warm_up,
            frames: VecDeque::with_capacity(history_length),
        }
    }

    pub fn history_length(&self) -> usize {
        self.history_length
    }

    pub fn frame_dims(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Number of frames currently held (at most `history_length`)
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_warmed_up(&self) -> bool {
        self.frames.len() == self.history_length
    }

    /// Appends a frame, evicting the oldest one when the buffer is full
    pub fn add(&mut self, frame: GrayFrame) -> Result<()> {
        if frame.dimensions() != self.frame_dims() {
            return Err(RqlError::FrameDimension {
                expected: self.frame_dims(),
                actual: frame.dimensions(),
            });
        }
        if self.frames.len() == self.history_length {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Current window of exactly `history_length` frames, oldest first
    pub fn state(&self) -> Result<Vec<&GrayFrame>> {
        let missing = self.history_length - self.frames.len();
        match (missing, self.frames.front(), self.warm_up) {
            (0, _, _) => Ok(self.frames.iter().collect()),
            (_, Some(first), WarmUp::RepeatFirst) => Ok(
                std::iter::repeat(first).take(missing)
                    .chain(self.frames.iter())
                    .collect()
            ),
            _ => Err(RqlError::InsufficientHistory {
                available: self.frames.len(),
                required: self.history_length,
            }),
        }
    }

    /// Batch of size one containing [Self::state], the input shape the network requires
    pub fn inference_batch(&self) -> Result<StateBatch> {
        let state = self.state()?;
        Ok(StateBatch::from_states(&[state]))
    }

    pub fn clear(&mut self) {
        self.frames.clear()
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use rstest::rstest;

    use super::*;

    fn frame(value: u8) -> GrayFrame {
        GrayFrame::from_pixel(4, 3, Luma([value]))
    }

    fn values(frames: Vec<&GrayFrame>) -> Vec<u8> {
        frames.iter().map(|f| f.get_pixel(0, 0)[0]).collect()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    #[case(10)]
    fn test_state_holds_last_frames_oldest_first(#[case] k: usize) {
        let mut buffer = StateBuffer::new(4, 4, 3, WarmUp::None);
        for i in 0..(4 + k) {
            buffer.add(frame(i as u8)).unwrap();
        }
        let expected: Vec<u8> = (k..k + 4).map(|i| i as u8).collect();
        assert_eq!(values(buffer.state().unwrap()), expected);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_insufficient_history_without_warm_up() {
        let mut buffer = StateBuffer::new(4, 4, 3, WarmUp::None);
        buffer.add(frame(1)).unwrap();
        buffer.add(frame(2)).unwrap();
        assert!(matches!(
            buffer.state(),
            Err(RqlError::InsufficientHistory { available: 2, required: 4 })
        ));
    }

    #[test]
    fn test_repeat_first_pads_missing_history() {
        let mut buffer = StateBuffer::new(4, 4, 3, WarmUp::RepeatFirst);
        assert!(buffer.state().is_err());
        buffer.add(frame(7)).unwrap();
        buffer.add(frame(8)).unwrap();
        assert_eq!(values(buffer.state().unwrap()), vec![7, 7, 7, 8]);
    }

    #[test]
    fn test_rejects_frame_of_wrong_size() {
        let mut buffer = StateBuffer::new(2, 4, 3, WarmUp::None);
        let result = buffer.add(GrayFrame::new(3, 4));
        assert!(matches!(result, Err(RqlError::FrameDimension { expected: (4, 3), actual: (3, 4) })));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_inference_batch_has_single_item() {
        let mut buffer = StateBuffer::new(2, 4, 3, WarmUp::None);
        buffer.add(frame(1)).unwrap();
        buffer.add(frame(2)).unwrap();
        let batch = buffer.inference_batch().unwrap();
        assert_eq!(batch.dims(), [1, 2, 3, 4]);
        assert_eq!(batch.item(0)[0], 1.0);
        assert_eq!(batch.item(0)[12], 2.0);
    }
}
