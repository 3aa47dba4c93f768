//! Bounded queue of side effects the audio thread defers to the control thread.

use crate::host::{HostOpcode, InternalControl};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_POSTPONED_CAPACITY: usize = 512;

/// Diagnostic raised on the audio thread, logged later by `idle()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtDiagnostic {
    /// An event arrived with a frame offset before the last split point.
    TimingError { time: u32, offset: u32 },
    MidiOverflow { dropped: u32 },
    CallPanicked(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostponedEvent {
    ParameterChanged { index: u32, value: f32 },
    InternalValueChanged { control: InternalControl, value: f32 },
    ProgramChanged { index: usize },
    MidiProgramChanged { index: usize },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    AllNotesOff,
    LatencyChanged { frames: u32 },
    TransportRelocated,
    HostRequest(HostOpcode),
    Diagnostic(RtDiagnostic),
}

/// Lock-free and allocation-free on push. Overflow is counted, never blocks.
pub struct PostponedQueue {
    queue: ArrayQueue<PostponedEvent>,
    dropped: AtomicU64,
}

impl PostponedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn push(&self, event: PostponedEvent) -> bool {
        if self.queue.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn pop(&self) -> Option<PostponedEvent> {
        self.queue.pop()
    }

    pub fn drain(&self) -> impl Iterator<Item = PostponedEvent> + '_ {
        std::iter::from_fn(move || self.queue.pop())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for PostponedQueue {
    fn default() -> Self {
        Self::new(DEFAULT_POSTPONED_CAPACITY)
    }
}
