// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, info_span};
use tracing_subscriber::EnvFilter;

use batch_sink::{
    config::BatchSinkConfig,
    errors::{DeliveryError, SinkError},
    event::{DeliveryResult, Event},
    service::{BatchSinkHandle, BatchSinkService},
    sink::BatchSink,
};

const DEFAULT_PRODUCERS: usize = 4;
const DEFAULT_EVENTS_PER_PRODUCER: u64 = 10_000;
const DEFAULT_SINK_LATENCY_MS: u64 = 2;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Downstream stand-in: waits a fixed latency per batch, then acknowledges
/// every event, failing every `fail_every`-th one.
struct SimulatedDownstream {
    latency: Duration,
    fail_every: u64,
}

impl BatchSink<u64> for SimulatedDownstream {
    fn write_batch(&self, batch: Vec<Event<u64>>) {
        debug!("Downstream received {} events", batch.len());
        thread::sleep(self.latency);
        for event in batch {
            let sequence = *event.payload();
            if self.fail_every > 0 && sequence % self.fail_every == 0 {
                event.complete(Err(DeliveryError::Sink(format!(
                    "simulated rejection of event {sequence}"
                ))));
            } else {
                event.complete(Ok(()));
            }
        }
    }
}

#[derive(Debug, Default)]
struct Outcomes {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl Outcomes {
    fn record(&self, result: &DeliveryResult) {
        let counter = match result {
            Ok(()) => &self.delivered,
            Err(DeliveryError::Sink(_)) => &self.failed,
            Err(DeliveryError::Dropped) => &self.dropped,
            Err(DeliveryError::Abandoned | DeliveryError::Closed) => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn env_or<V: std::str::FromStr>(key: &str, default: V) -> V {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<V>().ok())
        .unwrap_or(default)
}

/// Flushes until the queue is empty. One flush only covers the batch of the
/// pass it rides on.
async fn flush_until_empty(handle: &BatchSinkHandle<u64>) -> Result<(), SinkError> {
    loop {
        handle.flush_async().await?;
        if handle.stats().queue_len == 0 {
            return Ok(());
        }
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("BATCH_SINK_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = match EnvFilter::try_new(&log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid BATCH_SINK_LOG_LEVEL '{log_level}': {e}");
            return;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(logger::Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let config = match BatchSinkConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid batch sink configuration: {e}");
            return;
        }
    };

    let producers: usize = env_or("LOADGEN_PRODUCERS", DEFAULT_PRODUCERS);
    let events_per_producer: u64 =
        env_or("LOADGEN_EVENTS_PER_PRODUCER", DEFAULT_EVENTS_PER_PRODUCER);
    let downstream = SimulatedDownstream {
        latency: Duration::from_millis(env_or(
            "LOADGEN_SINK_LATENCY_MS",
            DEFAULT_SINK_LATENCY_MS,
        )),
        fail_every: env_or("LOADGEN_FAIL_EVERY", 0),
    };

    info!(
        "Starting load: {producers} producers x {events_per_producer} events, batch_size={}, queue_limit={}, overflow_action={}, parallel_write={}",
        config.batch_size, config.queue_limit, config.overflow_action, config.parallel_write
    );

    let (service, handle) = match BatchSinkService::new(&config, downstream) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to create batch sink service: {e}");
            return;
        }
    };
    let service_task = tokio::spawn(service.run());

    let outcomes = Arc::new(Outcomes::default());
    let producer_tasks: Vec<_> = (0..producers)
        .map(|id| {
            let handle = handle.clone();
            let outcomes = Arc::clone(&outcomes);
            tokio::task::spawn_blocking(move || {
                let _span = info_span!("producer", id).entered();
                let base = id as u64 * events_per_producer;
                for sequence in base..base + events_per_producer {
                    let outcomes = Arc::clone(&outcomes);
                    handle.submit(sequence, move |result| outcomes.record(&result));
                }
                debug!("Producer finished");
            })
        })
        .collect();

    for task in producer_tasks {
        if let Err(e) = task.await {
            error!("Producer failed: {e}");
        }
    }

    match timeout(SHUTDOWN_TIMEOUT, flush_until_empty(&handle)).await {
        Ok(Ok(())) => debug!("Flush completed"),
        Ok(Err(e)) => error!("Flush failed: {e}"),
        Err(_) => error!("Flush timed out after {SHUTDOWN_TIMEOUT:?}"),
    }

    if let Err(e) = handle.close().await {
        error!("Failed to close batch sink: {e}");
    }
    if let Err(e) = service_task.await {
        error!("Batch sink service failed: {e}");
    }

    let stats = handle.stats();
    match serde_json::to_string(&stats) {
        Ok(json) => info!("Batch sink stats: {json}"),
        Err(e) => error!("Failed to serialize stats: {e}"),
    }
    info!(
        "Outcomes: delivered={} failed={} dropped={} rejected={}",
        outcomes.delivered.load(Ordering::Relaxed),
        outcomes.failed.load(Ordering::Relaxed),
        outcomes.dropped.load(Ordering::Relaxed),
        outcomes.rejected.load(Ordering::Relaxed)
    );
}
