use crate::frame::FrameData;

/// Fixed-capacity circular buffer of frame references used for pre-capture.
///
/// Slots are allocated once; pushing past capacity overwrites the oldest
/// frame. Capacity zero is valid and keeps nothing.
#[derive(Debug)]
pub struct PreCaptureRing {
    /// Frame slots, allocated at construction
    slots: Vec<Option<FrameData>>,
    /// Index of the next slot to write
    head: usize,
    /// Number of occupied slots
    len: usize,
    /// Frames overwritten before they were drained
    overwritten: u64,
}

impl PreCaptureRing {
    /// Create a ring holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            head: 0,
            len: 0,
            overwritten: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Push a frame, returning the frame it displaced if the ring was full
    pub fn push(&mut self, frame: FrameData) -> Option<FrameData> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Some(frame);
        }

        let evicted = self.slots[self.head].replace(frame);
        self.head = (self.head + 1) % capacity;

        if evicted.is_some() {
            self.overwritten += 1;
        } else {
            self.len += 1;
        }

        evicted
    }

    /// Iterate frames oldest first without removing them
    pub fn iter(&self) -> impl Iterator<Item = &FrameData> {
        let capacity = self.capacity();
        let start = (self.head + capacity - self.len) % capacity.max(1);
        (0..self.len).filter_map(move |offset| self.slots[(start + offset) % capacity].as_ref())
    }

    /// Remove all frames, oldest first. Slots stay allocated.
    pub fn drain(&mut self) -> Vec<FrameData> {
        let capacity = self.capacity();
        let mut frames = Vec::with_capacity(self.len);
        if capacity > 0 {
            let start = (self.head + capacity - self.len) % capacity;
            for offset in 0..self.len {
                if let Some(frame) = self.slots[(start + offset) % capacity].take() {
                    frames.push(frame);
                }
            }
        }

        self.head = 0;
        self.len = 0;
        frames
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}
