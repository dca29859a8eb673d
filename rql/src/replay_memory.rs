use std::collections::VecDeque;

use crate::prelude::{ActionIndex, GrayFrame};

/// Experience storage fed by the playing agent (training-time collaborator)
pub trait ReplayMemory: Send {
    fn add(&mut self, action: ActionIndex, reward: f32, next_frame: GrayFrame, terminal: bool);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub action: ActionIndex,
    pub reward: f32,
    pub next_frame: GrayFrame,
    pub terminal: bool,
}

/// Keeps the `max_len` most recent transitions
pub struct BoundedReplayMemory {
    max_len: usize,
    buffer: VecDeque<Transition>,
}

impl BoundedReplayMemory {
    pub fn new(max_len: usize) -> Self {
        assert!(max_len > 0);
        Self {
            max_len,
            buffer: VecDeque::with_capacity(max_len.min(1024)),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Transition> {
        self.buffer.get(index)
    }

    /// oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }
}

impl ReplayMemory for BoundedReplayMemory {
    fn add(&mut self, action: ActionIndex, reward: f32, next_frame: GrayFrame, terminal: bool) {
        if self.buffer.len() == self.max_len {
            self.buffer.pop_front();
        }
        self.buffer.push_back(Transition { action, reward, next_frame, terminal });
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_transition_is_evicted() {
        let mut memory = BoundedReplayMemory::new(2);
        for action in 0..3 {
            memory.add(action, action as f32, GrayFrame::new(1, 1), false);
        }
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.iter().map(|t| t.action).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(memory.get(1).map(|t| t.reward), Some(2.0));
    }
}
