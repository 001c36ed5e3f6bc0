// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scheduler service and producer-facing handle.
//!
//! ```text
//!    ┌──────────────┐
//!    │   Handles    │ submit / flush / close (many producers)
//!    └──────┬───────┘
//!           │ events -> EventQueue, triggers -> channel
//!           v
//!    ┌──────────────┐
//!    │   Service    │ one loop: interval ticks + triggers + cancellation
//!    └──────┬───────┘
//!           │ spawn_blocking
//!           v
//!    ┌──────────────┐
//!    │   Drainer    │ single-flight passes -> BatchSink
//!    └──────────────┘
//! ```
//!
//! Timer ticks never call into the drainer directly: they are events of the
//! service loop, just like explicit drain requests. A producer blocked by a
//! full queue under [`OverflowAction::Block`] drains synchronously on its
//! own thread instead of waiting for the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::BatchSinkConfig;
use crate::drainer::Drainer;
use crate::errors::{ConfigError, DeliveryError, SinkError};
use crate::event::{DeliveryResult, Event};
use crate::flush_registry::FlushRegistry;
use crate::overflow::{Admission, OverflowAction, WakeSignal};
use crate::queue::{EventQueue, PushOutcome};
use crate::sink::BatchSink;
use crate::stats::{Counters, SinkStats};

#[derive(Debug)]
pub enum SinkCommand {
    /// Run a drain pass now.
    Drain,
    /// Stop the periodic trigger, run a last pass, then acknowledge.
    Shutdown(oneshot::Sender<()>),
}

/// State shared between the handles, the service loop and blocking passes.
struct Shared<T> {
    queue: Arc<EventQueue<T>>,
    flushes: Arc<FlushRegistry>,
    drainer: Drainer<T>,
    counters: Arc<Counters>,
    overflow_action: OverflowAction,
    queue_limit: usize,
    closed: AtomicBool,
}

impl<T: Send + 'static> Shared<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the sink closed, runs the last pass and rejects whatever the
    /// pass could not take. A pass already in flight on another thread is
    /// waited for, then the last pass runs here.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Batch sink already closed");
            return;
        }

        let written = self.drainer.drain_exclusive();
        debug!("Last pass handed {written} events to the sink");

        let leftover = self.queue.close();
        if !leftover.is_empty() {
            warn!(
                "Batch sink closed with {} events still queued, rejecting them",
                leftover.len()
            );
        }
        for event in leftover {
            event.complete(Err(DeliveryError::Closed));
        }
        self.flushes.close().resolve(&Err(DeliveryError::Closed));
    }
}

/// Cloneable producer-side handle.
pub struct BatchSinkHandle<T> {
    shared: Arc<Shared<T>>,
    tx: mpsc::UnboundedSender<SinkCommand>,
}

impl<T> Clone for BatchSinkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> BatchSinkHandle<T> {
    /// Offers an event to the queue.
    ///
    /// Never fails. When the queue is full the configured
    /// [`OverflowAction`] applies: `Grow` admits anyway, `Discard` completes
    /// the event with [`DeliveryError::Dropped`], and `Block` parks the
    /// calling thread until a drain pass frees space. Do not call this from
    /// an async context with `Block` configured.
    pub fn submit<F>(&self, payload: T, completion: F)
    where
        F: FnOnce(DeliveryResult) + Send + 'static,
    {
        self.shared.counters.record_submitted();
        let mut event = Event::new(payload, completion);

        loop {
            match self.shared.queue.push_bounded(
                event,
                self.shared.overflow_action,
                self.shared.queue_limit,
            ) {
                PushOutcome::Admitted => return,
                PushOutcome::Closed(rejected) => {
                    rejected.complete(Err(DeliveryError::Closed));
                    return;
                }
                PushOutcome::Rejected(rejected, Admission::Discard) => {
                    self.shared.counters.record_dropped();
                    warn!(
                        "Batch sink queue full ({} events), dropping event",
                        self.shared.queue_limit
                    );
                    rejected.complete(Err(DeliveryError::Dropped));
                    return;
                }
                PushOutcome::Rejected(rejected, _) => {
                    event = rejected;
                    self.wait_for_space();
                }
            }
        }
    }

    /// Parks the caller until the next drain pass has been acknowledged.
    fn wait_for_space(&self) {
        debug!("Batch sink queue full, blocking producer until the next pass");
        let signal = Arc::new(WakeSignal::default());
        let waker = Arc::clone(&signal);
        self.shared
            .flushes
            .register(Box::new(move |_| waker.notify()));
        self.shared.drainer.request_drain();
        signal.wait();
    }

    /// Registers `completion` with the next drain pass. It fires once every
    /// event of that pass's batch has been completed by the downstream, or
    /// right away when the queue is empty.
    ///
    /// A pass takes at most `batch_size` events, so with a longer queue the
    /// completion only covers the oldest `batch_size` of them. Flush again
    /// until [`SinkStats::queue_len`] reaches zero to wait for everything.
    pub fn flush<F>(&self, completion: F)
    where
        F: FnOnce(DeliveryResult) + Send + 'static,
    {
        self.shared.flushes.register(Box::new(completion));
        self.trigger_drain();
    }

    /// Async form of [`Self::flush`].
    pub async fn flush_async(&self) -> Result<(), SinkError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.flush(move |result| {
            if response_tx.send(result).is_err() {
                debug!("Flush waiter dropped before completion");
            }
        });

        response_rx
            .await
            .map_err(|e| SinkError::Runtime(format!("Failed to receive flush response: {e}")))?
            .map_err(SinkError::from)
    }

    /// Asks the service loop for a pass without registering a flush. When
    /// the loop is gone the pass runs on the calling thread.
    pub fn trigger_drain(&self) {
        if self.tx.send(SinkCommand::Drain).is_err() {
            debug!("Batch sink service not running, draining on caller thread");
            self.shared.drainer.request_drain();
        }
    }

    /// Stops the periodic trigger and runs one last pass. Events the pass
    /// could not take, and later submissions, complete with
    /// [`DeliveryError::Closed`].
    pub async fn close(&self) -> Result<(), SinkError> {
        if self.shared.is_closed() {
            return Ok(());
        }
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(SinkCommand::Shutdown(response_tx)).is_err() {
            debug!("Batch sink service not running, closing on a blocking thread");
            let shared = Arc::clone(&self.shared);
            return tokio::task::spawn_blocking(move || shared.close())
                .await
                .map_err(|e| SinkError::Runtime(format!("Failed to close batch sink: {e}")));
        }

        response_rx
            .await
            .map_err(|e| SinkError::Runtime(format!("Failed to receive shutdown response: {e}")))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    #[must_use]
    pub fn stats(&self) -> SinkStats {
        self.shared.counters.snapshot(self.shared.queue.len())
    }
}

/// Service owning the periodic drain loop. Spawn [`BatchSinkService::run`]
/// on a tokio runtime and talk to it through [`BatchSinkHandle`].
pub struct BatchSinkService<T> {
    shared: Arc<Shared<T>>,
    rx: mpsc::UnboundedReceiver<SinkCommand>,
    period: Duration,
    cancel_token: CancellationToken,
}

impl<T: Send + 'static> BatchSinkService<T> {
    pub fn new<S>(
        config: &BatchSinkConfig,
        sink: S,
    ) -> Result<(Self, BatchSinkHandle<T>), ConfigError>
    where
        S: BatchSink<T> + 'static,
    {
        Self::with_sink(config, Arc::new(sink))
    }

    pub fn with_sink(
        config: &BatchSinkConfig,
        sink: Arc<dyn BatchSink<T>>,
    ) -> Result<(Self, BatchSinkHandle<T>), ConfigError> {
        config.validate()?;

        let queue = Arc::new(EventQueue::new());
        let flushes = Arc::new(FlushRegistry::new());
        let counters = Arc::new(Counters::default());
        let drainer = Drainer::with_counters(
            Arc::clone(&queue),
            Arc::clone(&flushes),
            sink,
            Arc::clone(&counters),
            config.batch_size,
            config.parallel_write,
        );

        let shared = Arc::new(Shared {
            queue,
            flushes,
            drainer,
            counters,
            overflow_action: config.overflow_action,
            queue_limit: config.queue_limit,
            closed: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            shared: Arc::clone(&shared),
            rx,
            period: config.time_to_sleep_between_batches,
            cancel_token: CancellationToken::new(),
        };
        let handle = BatchSinkHandle { shared, tx };

        Ok((service, handle))
    }

    /// Token that shuts the service down, with the same last pass as
    /// [`BatchSinkHandle::close`], when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Runs the drain loop until shutdown, cancellation, or until every
    /// handle has been dropped.
    pub async fn run(mut self) {
        debug!("Batch sink service started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain().await;
                }
                command = self.rx.recv() => match command {
                    Some(SinkCommand::Drain) => self.drain().await,
                    Some(SinkCommand::Shutdown(response_tx)) => {
                        self.shutdown().await;
                        if response_tx.send(()).is_err() {
                            error!("Failed to send shutdown response - receiver dropped");
                        }
                        break;
                    }
                    None => {
                        debug!("All batch sink handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                () = self.cancel_token.cancelled() => {
                    self.shutdown().await;
                    break;
                }
            }
        }

        debug!("Batch sink service stopped");
    }

    async fn drain(&self) {
        let shared = Arc::clone(&self.shared);
        let pass = tokio::task::spawn_blocking(move || shared.drainer.request_drain());

        // Parallel passes are left to run on their own.
        if self.shared.drainer.parallel_write() {
            return;
        }
        if let Err(e) = pass.await {
            error!("Drain pass failed: {e}");
        }
    }

    async fn shutdown(&self) {
        debug!("Batch sink service shutting down");
        let shared = Arc::clone(&self.shared);
        if let Err(e) = tokio::task::spawn_blocking(move || shared.close()).await {
            error!("Final drain pass failed: {e}");
        }
    }
}
