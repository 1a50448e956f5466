use std::collections::VecDeque;

/// Bounded replay log of serialized DISPATCH frames, oldest first.
///
/// Capacity eviction drops from the front, so the buffer always holds a
/// contiguous suffix of the session's dispatch history.
#[derive(Debug)]
pub struct ResumeBuffer {
    capacity: usize,
    frames: VecDeque<(u64, String)>,
}

impl ResumeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn push(&mut self, seq: u64, frame: String) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back((seq, frame));
    }

    pub fn first_seq(&self) -> Option<u64> {
        self.frames.front().map(|(seq, _)| *seq)
    }

    /// Frames with sequence strictly greater than `seq`, in original order.
    /// The caller is responsible for checking `seq` is still retained.
    pub fn frames_after(&self, seq: u64) -> Vec<String> {
        self.frames
            .iter()
            .filter(|(frame_seq, _)| *frame_seq > seq)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
