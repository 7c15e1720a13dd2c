//! Reassembly of mailbox messages from 32 bit receive words.

use crate::mailbox::registers::RxCtl;

/// Where the assembler is within the message stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// No message in progress. The next ready word starts a new message.
    Waiting,
    /// A message is being received.
    Reading {
        /// Bytes of the message still to come.
        remaining: usize,
    },
}

/// Why buffered data should be handed to the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    /// The last byte of a message was received.
    FrameComplete,
    /// The buffer limit was reached in the middle of a message.
    BufferFull,
}

/// The result of accepting one receive word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    word: [u8; 4],
    len: usize,
    /// This word started a new message.
    pub frame_started: bool,
    /// Set if the buffered data should be flushed now.
    pub flush: Option<FlushReason>,
}

impl Received {
    /// The message bytes taken from the word, without padding.
    pub fn bytes(&self) -> &[u8] {
        &self.word[..self.len]
    }
}

/// Collects message bytes until a message is complete or the buffer limit is reached.
///
/// Bytes that the sink did not take stay at the front of the buffer, ahead of anything
/// received later.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    state: FrameState,
    buffer: Vec<u8>,
    limit: usize,
}

impl FrameAssembler {
    /// Create an assembler that asks for a flush once `limit` bytes are buffered.
    pub fn new(limit: usize) -> Self {
        Self {
            state: FrameState::Waiting,
            buffer: Vec::with_capacity(limit + 4),
            limit,
        }
    }

    /// The current framing state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The buffer limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Process one word read from RXD, with `control` being the RXCTL value read before it.
    pub fn accept(&mut self, control: RxCtl, data: u32) -> Received {
        let (mut remaining, frame_started) = match self.state {
            FrameState::Waiting => (usize::from(control.length()), true),
            FrameState::Reading { remaining } => (remaining, false),
        };

        let word = data.to_le_bytes();
        let len = remaining.min(word.len());
        self.buffer.extend_from_slice(&word[..len]);
        remaining -= len;

        let flush = if remaining == 0 {
            self.state = FrameState::Waiting;
            Some(FlushReason::FrameComplete)
        } else {
            self.state = FrameState::Reading { remaining };
            self.is_full().then_some(FlushReason::BufferFull)
        };

        Received {
            word,
            len,
            frame_started,
            flush,
        }
    }

    /// Buffered bytes not yet taken by the sink.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop the first `count` pending bytes after the sink took them.
    pub fn consume(&mut self, count: usize) {
        self.buffer.drain(..count.min(self.buffer.len()));
    }

    /// Whether the buffer limit is reached. No further words may be accepted until the
    /// sink takes some of the pending bytes.
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.limit
    }
}
