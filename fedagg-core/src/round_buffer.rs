use std::collections::VecDeque;
use std::num::NonZeroUsize;

use crate::share::Share;

/// Shares received for the current round, in arrival order
///
/// Shares beyond the quorum are not dropped when a round is drained, they
/// stay in the buffer and become the first shares of the next round.
#[derive(Debug)]
pub struct RoundBuffer {
    shares: VecDeque<Share>,
    quorum: NonZeroUsize,
}

impl RoundBuffer {
    pub fn new(quorum: NonZeroUsize) -> Self {
        Self {
            shares: VecDeque::with_capacity(quorum.get()),
            quorum,
        }
    }

    pub fn quorum(&self) -> NonZeroUsize {
        self.quorum
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn append(&mut self, share: Share) {
        self.shares.push_back(share);
    }

    /// Removes the first `n` shares if there are at least `n`, otherwise
    /// leaves the buffer untouched
    pub fn try_drain(&mut self, n: usize) -> Option<Vec<Share>> {
        if self.shares.len() < n {
            return None;
        }

        Some(self.shares.drain(..n).collect())
    }

    /// [`Self::try_drain`] with the configured quorum
    pub fn try_drain_round(&mut self) -> Option<Vec<Share>> {
        self.try_drain(self.quorum.get())
    }
}
