// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO queue holding events until a drain pass picks them up.
//!
//! The capacity check and the push happen under the same lock, so under the
//! `Discard` and `Block` actions the queue never holds more than
//! `queue_limit` events, however many producers race on it. Once closed the
//! queue admits nothing, checked under that same lock.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::event::Event;
use crate::overflow::{Admission, OverflowAction};

/// Result of a bounded push. A rejected event is handed back to the caller
/// together with the decision that rejected it.
#[derive(Debug)]
pub enum PushOutcome<T> {
    Admitted,
    Rejected(Event<T>, Admission),
    Closed(Event<T>),
}

#[derive(Debug)]
struct QueueState<T> {
    events: VecDeque<Event<T>>,
    closed: bool,
}

#[derive(Debug)]
pub struct EventQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                closed: false,
            }),
        }
    }
}

impl<T> EventQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn push(&self, event: Event<T>) {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        state.events.push_back(event);
    }

    /// Appends an event if the queue is open and `action` admits it at the
    /// current length.
    pub fn push_bounded(
        &self,
        event: Event<T>,
        action: OverflowAction,
        queue_limit: usize,
    ) -> PushOutcome<T> {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return PushOutcome::Closed(event);
        }
        match action.decide(state.events.len(), queue_limit) {
            Admission::Enqueue => {
                state.events.push_back(event);
                PushOutcome::Admitted
            }
            rejected => PushOutcome::Rejected(event, rejected),
        }
    }

    /// Pops up to `max_count` events in enqueue order. Never blocks waiting
    /// for events; returns an empty batch when the queue is empty.
    pub fn try_pop_batch(&self, max_count: usize) -> Vec<Event<T>> {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        let count = max_count.min(state.events.len());
        state.events.drain(..count).collect()
    }

    /// Stops admitting events and returns whatever is still queued.
    pub fn close(&self) -> Vec<Event<T>> {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        state.closed = true;
        state.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("lock poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn event(payload: u32) -> Event<u32> {
        Event::new(payload, |_| {})
    }

    fn payloads(batch: Vec<Event<u32>>) -> Vec<u32> {
        batch
            .into_iter()
            .map(|event| {
                let (payload, completer) = event.into_parts();
                completer.complete(Ok(()));
                payload
            })
            .collect()
    }

    #[test]
    fn test_new_queue_is_empty() {
        let queue: EventQueue<u32> = EventQueue::new();
        assert!(queue.is_empty());
        assert!(queue.try_pop_batch(10).is_empty());
    }

    #[test]
    fn test_pop_preserves_order_and_respects_max() {
        let queue = EventQueue::new();
        for i in 0..5 {
            queue.push(event(i));
        }

        assert_eq!(payloads(queue.try_pop_batch(3)), vec![0, 1, 2]);
        assert_eq!(queue.len(), 2);
        assert_eq!(payloads(queue.try_pop_batch(3)), vec![3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_zero_returns_nothing() {
        let queue = EventQueue::new();
        queue.push(event(1));
        assert!(queue.try_pop_batch(0).is_empty());
        assert_eq!(queue.len(), 1);
        queue.close().into_iter().for_each(|e| e.complete(Ok(())));
    }

    #[test]
    fn test_push_bounded_discard_hands_event_back() {
        let queue = EventQueue::new();
        for i in 0..2 {
            assert!(matches!(
                queue.push_bounded(event(i), OverflowAction::Discard, 2),
                PushOutcome::Admitted
            ));
        }

        match queue.push_bounded(event(9), OverflowAction::Discard, 2) {
            PushOutcome::Rejected(rejected, Admission::Discard) => {
                assert_eq!(*rejected.payload(), 9);
                rejected.complete(Ok(()));
            }
            other => panic!("expected discard, got {other:?}"),
        }
        assert_eq!(queue.len(), 2);
        queue.close().into_iter().for_each(|e| e.complete(Ok(())));
    }

    #[test]
    fn test_push_bounded_block_asks_to_wait() {
        let queue = EventQueue::new();
        queue.push(event(0));

        match queue.push_bounded(event(1), OverflowAction::Block, 1) {
            PushOutcome::Rejected(rejected, Admission::Wait) => rejected.complete(Ok(())),
            other => panic!("expected wait, got {other:?}"),
        }
        queue.close().into_iter().for_each(|e| e.complete(Ok(())));
    }

    #[test]
    fn test_push_bounded_grow_exceeds_limit() {
        let queue = EventQueue::new();
        for i in 0..10 {
            assert!(matches!(
                queue.push_bounded(event(i), OverflowAction::Grow, 5),
                PushOutcome::Admitted
            ));
        }
        assert_eq!(queue.len(), 10);
        assert_eq!(payloads(queue.close()), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_bounded_push_never_overshoots() {
        let queue = Arc::new(EventQueue::new());
        let limit = 50;

        let handles: Vec<_> = (0..8)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut admitted = 0;
                    for i in 0..100 {
                        match queue.push_bounded(
                            event(producer * 100 + i),
                            OverflowAction::Discard,
                            limit,
                        ) {
                            PushOutcome::Admitted => admitted += 1,
                            PushOutcome::Rejected(rejected, _) | PushOutcome::Closed(rejected) => {
                                rejected.complete(Ok(()))
                            }
                        }
                    }
                    admitted
                })
            })
            .collect();

        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("producer panicked"))
            .sum();

        assert_eq!(admitted, limit);
        assert_eq!(queue.len(), limit);
        queue.close().into_iter().for_each(|e| e.complete(Ok(())));
    }

    #[test]
    fn test_closed_queue_hands_events_back() {
        let queue = EventQueue::new();
        queue.push(event(0));

        assert_eq!(payloads(queue.close()), vec![0]);

        match queue.push_bounded(event(1), OverflowAction::Grow, 10) {
            PushOutcome::Closed(rejected) => {
                assert_eq!(*rejected.payload(), 1);
                rejected.complete(Ok(()));
            }
            other => panic!("expected closed, got {other:?}"),
        }
        assert!(queue.is_empty());
    }
}
