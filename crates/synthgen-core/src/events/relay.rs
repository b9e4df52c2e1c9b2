//! Per-job event relay.
//!
//! One producer (the job runner) publishes sequenced events; any number of
//! stream subscribers read them. Publishing never waits on subscribers: a
//! subscriber that falls more than the channel capacity behind receives a
//! [`Delivery::Gap`] and resumes with the oldest retained event.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::types::{Delivery, RelayEvent};

/// Default buffer size for the broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default number of events retained for late subscribers.
pub const DEFAULT_REPLAY_LIMIT: usize = 500;

struct ReplayState {
    buffer: VecDeque<RelayEvent>,
    end: Option<RelayEvent>,
    last_sequence: u64,
}

struct Inner {
    sender: broadcast::Sender<RelayEvent>,
    state: Mutex<ReplayState>,
    replay_limit: usize,
}

/// Ordered fan-out of one job's events.
///
/// Cloning is cheap; all clones share the same channel and replay buffer.
#[derive(Clone)]
pub struct EventRelay {
    inner: Arc<Inner>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY, DEFAULT_REPLAY_LIMIT)
    }

    pub fn with_capacity(channel_capacity: usize, replay_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                state: Mutex::new(ReplayState {
                    buffer: VecDeque::with_capacity(replay_limit.min(DEFAULT_CHANNEL_CAPACITY)),
                    end: None,
                    last_sequence: 0,
                }),
                replay_limit,
            }),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Events must arrive with strictly increasing sequence numbers; anything
    /// out of order or published after the end marker is discarded. Returns
    /// the number of live subscribers that received it.
    pub fn publish(&self, event: RelayEvent) -> usize {
        let mut state = self.inner.state.lock();
        if state.end.is_some() {
            tracing::warn!(sequence = event.sequence, "event published after end of stream; dropped");
            return 0;
        }
        if event.sequence <= state.last_sequence {
            tracing::warn!(
                sequence = event.sequence,
                last = state.last_sequence,
                "out of order event dropped"
            );
            return 0;
        }
        state.last_sequence = event.sequence;

        if event.is_end() {
            state.end = Some(event.clone());
        } else if self.inner.replay_limit > 0 {
            if state.buffer.len() == self.inner.replay_limit {
                state.buffer.pop_front();
            }
            state.buffer.push_back(event.clone());
        }

        // Sent under the lock so subscribe() sees each event in exactly one
        // of the replay snapshot or the live channel.
        self.inner.sender.send(event).unwrap_or_default()
    }

    /// Subscribe to the relay.
    ///
    /// The subscription first replays retained events with a sequence greater
    /// than `after`, then continues with live events. When `after` is older
    /// than the replay window the subscription opens with a
    /// [`Delivery::Gap`] counting the events no longer retained.
    pub fn subscribe(&self, after: Option<u64>) -> Subscription {
        let state = self.inner.state.lock();
        let receiver = self.inner.sender.subscribe();
        let threshold = after.unwrap_or(0);
        let mut backlog: VecDeque<Delivery> = VecDeque::new();

        if let Some(after) = after {
            let first_retained = state
                .buffer
                .front()
                .or(state.end.as_ref())
                .map_or(state.last_sequence + 1, |e| e.sequence);
            let missed = first_retained.saturating_sub(after.saturating_add(1));
            if missed > 0 {
                tracing::debug!(after, missed, "resume point is outside the replay window");
                backlog.push_back(Delivery::Gap { missed });
            }
        }

        backlog.extend(
            state
                .buffer
                .iter()
                .filter(|e| e.sequence > threshold)
                .cloned()
                .map(Delivery::Event),
        );
        if let Some(end) = &state.end {
            backlog.push_back(Delivery::Event(end.clone()));
        }

        Subscription {
            backlog,
            receiver,
            last_delivered: after,
            finished: false,
        }
    }

    /// Sequence of the most recently published event, 0 if none.
    pub fn last_sequence(&self) -> u64 {
        self.inner.state.lock().last_sequence
    }

    pub fn is_ended(&self) -> bool {
        self.inner.state.lock().end.is_some()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRelay")
            .field("subscriber_count", &self.subscriber_count())
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}

/// A single subscriber's view of the relay.
pub struct Subscription {
    backlog: VecDeque<Delivery>,
    receiver: broadcast::Receiver<RelayEvent>,
    last_delivered: Option<u64>,
    finished: bool,
}

impl Subscription {
    /// Next delivery, or `None` once the end marker has been delivered or the
    /// relay is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        loop {
            let event = match self.backlog.pop_front() {
                Some(Delivery::Event(event)) => event,
                Some(gap @ Delivery::Gap { .. }) => return Some(gap),
                None => match self.receiver.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "stream subscriber lagged");
                        return Some(Delivery::Gap { missed });
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.finished = true;
                        return None;
                    }
                },
            };

            // The end marker is delivered even when `after` already covers it.
            if !event.is_end()
                && let Some(last) = self.last_delivered
                && event.sequence <= last
            {
                continue;
            }
            self.last_delivered = Some(self.last_delivered.map_or(event.sequence, |l| l.max(event.sequence)));
            if event.is_end() {
                self.finished = true;
            }
            return Some(Delivery::Event(event));
        }
    }

    /// Sequence of the last event handed out.
    pub fn last_delivered(&self) -> Option<u64> {
        self.last_delivered
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
