//! Message dispatch and sequencing.
//!
//! One queue exists per payload type: each has an independent tag numbering
//! space and its own response-matching rule. Tags come from a bounded
//! wrapping range; a request fails fast when every tag is in flight. The
//! receiver completes entries by tag, orphan responses are dropped, and a
//! timed-out request retries under a *new* tag so a late response to the old
//! one can never be confused with the retry's.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::types::RawResponse;

/// Size of the tag space per queue (6-bit request sequence numbers).
pub(crate) const TAG_SPACE: usize = 64;

/// What a pending entry expects back from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    /// An IPMI LAN response decoded against these codes.
    Lan { netfn: u8, cmd: u8 },
    /// A streaming acknowledgement echoing this outbound sequence number
    /// for a message of `sent` payload bytes.
    Stream { seq: u8, sent: usize },
}

/// A listener notified of every completed tag.
///
/// Callbacks run on the receiver thread while the connection lock is held;
/// they must return quickly and must not re-enter the client.
pub trait ResponseListener: Send + Sync {
    /// Called once per completed tag with the decoded response or the
    /// decode/protocol error that response produced.
    fn on_response(&self, tag: u8, result: &Result<RawResponse>);
}

#[derive(Debug)]
struct PendingEntry {
    expect: Expect,
    submitted_at: Instant,
    retries: u32,
    outcome: Option<Result<RawResponse>>,
}

/// Outcome of a caller-driven poll for one tag.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    /// The response (or its decode error) arrived; the entry is removed.
    Ready(Result<RawResponse>),
    /// Still waiting within the timeout budget.
    Pending,
    /// The timeout budget is spent; the entry is still queued so the caller
    /// can release or retry it.
    TimedOut,
}

/// Outcome of a streaming acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamAck {
    /// No pending entry matched; the frame is dropped.
    Orphan,
    /// The peer accepted only part of the data; the entry remains queued
    /// for a follow-up retry.
    Partial,
    /// Fully acknowledged; the entry is completed.
    Completed,
}

/// Outgoing-message queue for one payload type.
#[derive(Debug)]
pub(crate) struct MessageQueue {
    entries: Vec<Option<PendingEntry>>,
    next_tag: u8,
}

impl MessageQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: (0..TAG_SPACE).map(|_| None).collect(),
            next_tag: 0,
        }
    }

    /// Allocate the next free tag and queue an entry under it.
    ///
    /// Scans the bounded range from the wrapping cursor; an exhausted range
    /// is a fail-fast error, not a wait.
    pub(crate) fn submit(&mut self, expect: Expect, now: Instant) -> Result<u8> {
        self.submit_with_retries(expect, now, 0)
    }

    fn submit_with_retries(&mut self, expect: Expect, now: Instant, retries: u32) -> Result<u8> {
        for offset in 0..TAG_SPACE {
            let tag = (usize::from(self.next_tag) + offset) % TAG_SPACE;
            if self.entries[tag].is_none() {
                self.entries[tag] = Some(PendingEntry {
                    expect,
                    submitted_at: now,
                    retries,
                    outcome: None,
                });
                self.next_tag = ((tag + 1) % TAG_SPACE) as u8;
                return Ok(tag as u8);
            }
        }
        Err(Error::Protocol("no free message tag"))
    }

    fn entry_mut(&mut self, tag: u8) -> Option<&mut PendingEntry> {
        self.entries.get_mut(usize::from(tag))?.as_mut()
    }

    /// What the entry under `tag` expects, if it is still pending.
    pub(crate) fn expect(&self, tag: u8) -> Option<Expect> {
        self.entries
            .get(usize::from(tag))?
            .as_ref()
            .map(|e| e.expect)
    }

    /// Store a completed outcome for `tag`.
    ///
    /// Returns false when no entry matches: the response is an orphan and is
    /// dropped without touching any other entry's state or timeout clock.
    pub(crate) fn complete(&mut self, tag: u8, outcome: Result<RawResponse>) -> bool {
        match self.entry_mut(tag) {
            Some(entry) => {
                entry.outcome = Some(outcome);
                true
            }
            None => false,
        }
    }

    /// Apply a streaming acknowledgement to `tag`.
    ///
    /// The acknowledge-sequence field must echo the entry's outbound
    /// sequence number; partial acceptance keeps the entry queued for a
    /// follow-up retry.
    pub(crate) fn acknowledge_stream(
        &mut self,
        tag: u8,
        ack_seq: u8,
        accepted: usize,
    ) -> StreamAck {
        let Some(entry) = self.entry_mut(tag) else {
            return StreamAck::Orphan;
        };
        let Expect::Stream { seq, sent } = entry.expect else {
            return StreamAck::Orphan;
        };
        if seq != ack_seq {
            return StreamAck::Orphan;
        }

        if accepted < sent {
            return StreamAck::Partial;
        }

        entry.outcome = Some(Ok(RawResponse {
            completion_code: 0x00,
            data: Vec::new(),
        }));
        StreamAck::Completed
    }

    /// Caller-driven poll: response, still pending, or out of budget.
    pub(crate) fn poll(&mut self, tag: u8, now: Instant, timeout: Duration) -> PollOutcome {
        let idx = usize::from(tag);
        let (has_outcome, timed_out) = match self.entries.get(idx).and_then(Option::as_ref) {
            // The entry was reclaimed out from under the caller.
            None => return PollOutcome::TimedOut,
            Some(entry) => (
                entry.outcome.is_some(),
                now.duration_since(entry.submitted_at) >= timeout,
            ),
        };

        if has_outcome {
            match self.entries[idx].take().and_then(|e| e.outcome) {
                Some(outcome) => PollOutcome::Ready(outcome),
                None => PollOutcome::TimedOut,
            }
        } else if timed_out {
            PollOutcome::TimedOut
        } else {
            PollOutcome::Pending
        }
    }

    /// Drop the entry under `tag`, abandoning any late response.
    pub(crate) fn release(&mut self, tag: u8) {
        if let Some(slot) = self.entries.get_mut(usize::from(tag)) {
            *slot = None;
        }
    }

    /// Re-submit a timed-out request under a fresh tag.
    ///
    /// The old tag is released first; the retry count carries over so the
    /// caller's policy can cap attempts.
    pub(crate) fn retry(&mut self, tag: u8, expect: Expect, now: Instant) -> Result<u8> {
        let retries = self
            .entries
            .get(usize::from(tag))
            .and_then(Option::as_ref)
            .map_or(0, |e| e.retries);
        self.release(tag);
        self.submit_with_retries(expect, now, retries + 1)
    }

    /// Retry count recorded for `tag`.
    #[cfg(test)]
    pub(crate) fn retries(&self, tag: u8) -> u32 {
        self.entries
            .get(usize::from(tag))
            .and_then(Option::as_ref)
            .map_or(0, |e| e.retries)
    }

    /// Reclaim entries abandoned by callers that stopped polling.
    pub(crate) fn reclaim(&mut self, now: Instant, ttl: Duration) {
        for slot in &mut self.entries {
            let expired = slot
                .as_ref()
                .is_some_and(|e| now.duration_since(e.submitted_at) >= ttl);
            if expired {
                *slot = None;
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// The set of sequencing queues, one per payload type.
///
/// Keep-alive and caller traffic share these queues so tag allocation stays
/// globally consistent per payload type.
#[derive(Debug)]
pub(crate) struct QueueSet {
    ipmi: MessageQueue,
    sol: MessageQueue,
}

impl QueueSet {
    pub(crate) fn new() -> Self {
        Self {
            ipmi: MessageQueue::new(),
            sol: MessageQueue::new(),
        }
    }

    /// Queue for standard IPMI command traffic.
    pub(crate) fn ipmi_mut(&mut self) -> &mut MessageQueue {
        &mut self.ipmi
    }

    /// Queue for the streaming (Serial-over-LAN) tag space.
    pub(crate) fn sol_mut(&mut self) -> &mut MessageQueue {
        &mut self.sol
    }
}
