// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::Event;

/// Downstream consumer fed by the drainer.
///
/// `write_batch` receives a non-empty batch in enqueue order. The
/// implementation owns the events from then on and must complete each one
/// exactly once, with `Ok(())` or a [`crate::errors::DeliveryError`], even
/// when only part of the batch fails. Completion may happen later and from
/// any thread. An event dropped without completion resolves as abandoned.
pub trait BatchSink<T>: Send + Sync {
    fn write_batch(&self, batch: Vec<Event<T>>);
}

impl<T, F> BatchSink<T> for F
where
    F: Fn(Vec<Event<T>>) + Send + Sync,
{
    fn write_batch(&self, batch: Vec<Event<T>>) {
        self(batch);
    }
}

