//! Per-handle read and write progress.
//!
//! Formatters are stateless, so the progress of a multi-record read or write
//! lives in the storage handle. Backends embed a [`ReadCursor`] and a
//! [`WriteProgress`]; the formatter protocol helpers drive them.

use std::collections::VecDeque;

/// Where a handle is in its read sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    NotStarted,
    InProgress,
    /// Terminal. No transition leaves this state.
    Exhausted,
}

/// Queue of records loaded on the first read call and handed out one per
/// subsequent call.
#[derive(Debug)]
pub struct ReadCursor<T> {
    state: ReadState,
    pending: VecDeque<T>,
}

impl<T> Default for ReadCursor<T> {
    fn default() -> Self {
        Self {
            state: ReadState::NotStarted,
            pending: VecDeque::new(),
        }
    }
}

impl<T> ReadCursor<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Records not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// `NotStarted → InProgress` with the loaded records.
    pub fn start(&mut self, records: Vec<T>) {
        self.pending = records.into();
        self.state = ReadState::InProgress;
    }

    /// Takes the next record. Moves to `Exhausted` when the queue empties,
    /// including when it was empty to begin with.
    pub fn advance(&mut self) -> Option<T> {
        let next = self.pending.pop_front();
        if self.pending.is_empty() {
            self.state = ReadState::Exhausted;
        }
        next
    }
}

/// Records written since the container was opened for the current sequence.
/// `None` while no sequence is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteProgress {
    written: Option<usize>,
}

impl WriteProgress {
    #[must_use]
    pub fn written(&self) -> Option<usize> {
        self.written
    }

    pub fn open(&mut self) {
        self.written = Some(0);
    }

    pub fn record(&mut self) {
        if let Some(n) = self.written.as_mut() {
            *n += 1;
        }
    }

    pub fn close(&mut self) {
        self.written = None;
    }
}
