// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-flight draining engine.
//!
//! Any number of threads may call [`Drainer::request_drain`] at once. In
//! sequential mode exactly one of them becomes the active drainer and keeps
//! running passes until every request observed so far has been served; the
//! others return immediately. In parallel mode every request runs its own
//! pass and the downstream may see batches out of enqueue order.
//!
//! A pass takes a snapshot of the pending flush requests before popping the
//! batch, and resolves them only once every event in that batch has been
//! completed by the sink.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::event::panic_message;
use crate::flush_registry::{FlushRegistry, FlushSnapshot};
use crate::queue::EventQueue;
use crate::sink::BatchSink;
use crate::stats::Counters;

const OWNERSHIP_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Drainer<T> {
    queue: Arc<EventQueue<T>>,
    flushes: Arc<FlushRegistry>,
    sink: Arc<dyn BatchSink<T>>,
    counters: Arc<Counters>,
    batch_size: usize,
    parallel_write: bool,
    pending: AtomicUsize,
    active: AtomicBool,
}

/// Resolves a flush snapshot once the last event of its batch completes.
struct BatchCountdown {
    remaining: AtomicUsize,
    flushes: Mutex<Option<FlushSnapshot>>,
}

impl BatchCountdown {
    fn new(batch_len: usize, flushes: FlushSnapshot) -> Self {
        Self {
            remaining: AtomicUsize::new(batch_len),
            flushes: Mutex::new(Some(flushes)),
        }
    }

    fn event_completed(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let flushes = {
            #[allow(clippy::expect_used)]
            let mut flushes = self.flushes.lock().expect("lock poisoned");
            flushes.take()
        };
        if let Some(flushes) = flushes {
            trace!("Batch acknowledged, resolving {} flush requests", flushes.len());
            flushes.resolve(&Ok(()));
        }
    }
}

impl<T: Send + 'static> Drainer<T> {
    pub fn new(
        queue: Arc<EventQueue<T>>,
        flushes: Arc<FlushRegistry>,
        sink: Arc<dyn BatchSink<T>>,
        batch_size: usize,
        parallel_write: bool,
    ) -> Self {
        Self::with_counters(
            queue,
            flushes,
            sink,
            Arc::new(Counters::default()),
            batch_size,
            parallel_write,
        )
    }

    pub(crate) fn with_counters(
        queue: Arc<EventQueue<T>>,
        flushes: Arc<FlushRegistry>,
        sink: Arc<dyn BatchSink<T>>,
        counters: Arc<Counters>,
        batch_size: usize,
        parallel_write: bool,
    ) -> Self {
        Self {
            queue,
            flushes,
            sink,
            counters,
            batch_size,
            parallel_write,
            pending: AtomicUsize::new(0),
            active: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn parallel_write(&self) -> bool {
        self.parallel_write
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Requests a drain. Runs passes on the calling thread when it wins
    /// ownership. In sequential mode a caller that loses the race returns
    /// immediately, before any pass has served its request: the current owner
    /// runs that pass later on its own thread.
    pub fn request_drain(&self) {
        if self.parallel_write {
            self.drain_once();
            return;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.serve_pending();
    }

    /// Runs one pass on the calling thread, waiting for an in-flight pass to
    /// finish first, and returns the number of events handed to the sink.
    pub fn drain_exclusive(&self) -> usize {
        if self.parallel_write {
            return self.drain_once();
        }

        while self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            thread::sleep(OWNERSHIP_POLL_INTERVAL);
        }
        let written = self.drain_once();
        self.active.store(false, Ordering::Release);

        // Requests that gave up while this pass held the flag are still owed.
        if self.pending.load(Ordering::Acquire) > 0 {
            self.serve_pending();
        }
        written
    }

    fn serve_pending(&self) {
        loop {
            if self
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            loop {
                self.drain_once();
                if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    break;
                }
            }

            self.active.store(false, Ordering::Release);

            // A request that arrived between the last decrement and the
            // release saw the flag still set and returned; reclaim for it.
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
        }
    }

    /// Executes one pass and returns the number of events handed to the sink.
    pub fn drain_once(&self) -> usize {
        let flushes = self.flushes.take_all();
        let batch = self.queue.try_pop_batch(self.batch_size);
        let batch_len = batch.len();
        self.counters.record_pass(batch_len);

        if batch.is_empty() {
            if !flushes.is_empty() {
                debug!(
                    "Queue empty, resolving {} flush requests immediately",
                    flushes.len()
                );
            }
            flushes.resolve(&Ok(()));
            return 0;
        }

        let batch = if flushes.is_empty() {
            batch
        } else {
            let countdown = Arc::new(BatchCountdown::new(batch_len, flushes));
            batch
                .into_iter()
                .map(|event| {
                    let countdown = Arc::clone(&countdown);
                    event.and_then(move || countdown.event_completed())
                })
                .collect()
        };

        debug!("Writing batch of {batch_len} events");
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.sink.write_batch(batch))) {
            error!(
                "Sink panicked while writing a batch of {batch_len} events: {}",
                panic_message(panic.as_ref())
            );
        }
        batch_len
    }
}
