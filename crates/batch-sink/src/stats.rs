// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of a batch sink's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Events offered through `submit`.
    pub submitted: u64,
    /// Events rejected by the `Discard` action.
    pub dropped: u64,
    /// Events handed to the downstream sink.
    pub written: u64,
    /// Drain passes executed, including empty ones.
    pub passes: u64,
    /// Events waiting in the queue when the snapshot was taken.
    pub queue_len: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    passes: AtomicU64,
}

impl Counters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass(&self, written: usize) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.written.fetch_add(written as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queue_len: usize) -> SinkStats {
        SinkStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            queue_len,
        }
    }
}
