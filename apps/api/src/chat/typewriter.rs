//! Typewriter Scheduler. Decouples network arrival rate from reveal rate.
//!
//! Fragments are queued as characters in arrival order and drained FIFO on a fixed
//! tick, a few characters at a time. A large backlog drains in bigger chunks so a burst
//! from the network cannot leave the reveal far behind. Revealed text is therefore
//! always a prefix of the full reply: nothing is skipped, repeated or reordered.

use std::collections::VecDeque;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;

use crate::chat::error::ChatError;

/// Reveal pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealPolicy {
    pub tick: Duration,
    /// Backlog (in characters) above which `burst_chunk` is used.
    pub backlog_threshold: usize,
    pub burst_chunk: usize,
    pub steady_chunk: usize,
}

impl Default for RevealPolicy {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(15),
            backlog_threshold: 50,
            burst_chunk: 3,
            steady_chunk: 1,
        }
    }
}

impl RevealPolicy {
    pub fn with_tick(tick: Duration) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}

/// Outcome of one reveal tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Characters to append to the visible message.
    Reveal(String),
    /// Queue empty, upstream still open.
    Waiting,
    /// Queue empty and upstream closed. Returned exactly once.
    Finished,
    /// Already finished; nothing left to do.
    Idle,
}

/// Per-message character queue.
#[derive(Debug)]
pub struct RevealQueue {
    policy: RevealPolicy,
    pending: VecDeque<char>,
    closed: bool,
    finalized: bool,
}

impl RevealQueue {
    pub fn new(policy: RevealPolicy) -> Self {
        Self {
            policy,
            pending: VecDeque::new(),
            closed: false,
            finalized: false,
        }
    }

    pub fn push(&mut self, fragment: &str) {
        debug_assert!(!self.closed, "fragment pushed after upstream closed");
        self.pending.extend(fragment.chars());
    }

    /// Marks upstream as complete. Queued text is still revealed.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn backlog(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn chunk_size(&self) -> usize {
        if self.pending.len() > self.policy.backlog_threshold {
            self.policy.burst_chunk.max(1)
        } else {
            self.policy.steady_chunk.max(1)
        }
    }

    pub fn tick(&mut self) -> Tick {
        if self.finalized {
            return Tick::Idle;
        }
        if !self.pending.is_empty() {
            let take = self.chunk_size().min(self.pending.len());
            return Tick::Reveal(self.pending.drain(..take).collect());
        }
        if self.closed {
            self.finalized = true;
            return Tick::Finished;
        }
        Tick::Waiting
    }

    /// Takes everything still queued at once, bypassing the pacing.
    pub fn drain_all(&mut self) -> String {
        self.pending.drain(..).collect()
    }
}

/// Progress reported by `drive` while a reply is revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reveal {
    /// The first fragment arrived from upstream.
    FirstFragment,
    /// Upstream finished; only queued text remains.
    UpstreamComplete,
    /// Text to append to the visible message.
    Chunk(String),
}

/// Pulls `fragments` and reveals them through `sink` at the policy's pace.
///
/// Returns once every received character has been revealed and upstream is complete.
/// On an upstream error the remaining queue is flushed to `sink` in one chunk and the
/// error is returned. Dropping the future stops both the pull and the ticker.
pub async fn drive<S>(
    fragments: S,
    policy: RevealPolicy,
    mut sink: impl FnMut(Reveal),
) -> Result<(), ChatError>
where
    S: Stream<Item = Result<String, ChatError>>,
{
    let mut fragments = std::pin::pin!(fragments);
    let mut queue = RevealQueue::new(policy);
    let mut ticker = tokio::time::interval(policy.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut upstream_open = true;
    let mut received_any = false;

    loop {
        tokio::select! {
            next = fragments.next(), if upstream_open => match next {
                Some(Ok(fragment)) => {
                    if !received_any {
                        received_any = true;
                        sink(Reveal::FirstFragment);
                    }
                    queue.push(&fragment);
                }
                Some(Err(err)) => {
                    let rest = queue.drain_all();
                    if !rest.is_empty() {
                        sink(Reveal::Chunk(rest));
                    }
                    return Err(err);
                }
                None => {
                    upstream_open = false;
                    queue.close();
                    sink(Reveal::UpstreamComplete);
                }
            },
            _ = ticker.tick() => match queue.tick() {
                Tick::Reveal(chunk) => sink(Reveal::Chunk(chunk)),
                Tick::Finished | Tick::Idle => return Ok(()),
                Tick::Waiting => {}
            },
        }
    }
}
