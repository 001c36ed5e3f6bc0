// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Events and their completion callbacks.
//!
//! Every event carries a [`Completer`] that must fire exactly once. Whoever
//! ends up owning the event (the downstream sink, the overflow policy, or the
//! shutdown path) resolves it. A `Completer` that is dropped unresolved fires
//! with [`DeliveryError::Abandoned`] so waiters never hang on a lost event.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, warn};

use crate::errors::DeliveryError;

/// Result delivered to a completion callback.
pub type DeliveryResult = Result<(), DeliveryError>;

/// A one-shot completion callback.
pub type Completion = Box<dyn FnOnce(DeliveryResult) + Send + 'static>;

/// Runs a caller supplied callback, catching and logging a panic so that one
/// faulty callback cannot take down the drain pass that invoked it.
pub(crate) fn invoke_isolated(completion: Completion, result: DeliveryResult) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(move || completion(result))) {
        error!(
            "Completion callback panicked: {}",
            panic_message(panic.as_ref())
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Exactly-once handle to an event's completion callback.
pub struct Completer {
    completion: Option<Completion>,
}

impl Completer {
    pub(crate) fn new(completion: Completion) -> Self {
        Self {
            completion: Some(completion),
        }
    }

    /// Resolves the completion. A panic raised by the callback is logged and
    /// swallowed.
    pub fn complete(mut self, result: DeliveryResult) {
        if let Some(completion) = self.completion.take() {
            invoke_isolated(completion, result);
        }
    }

    /// Chains `notify` to run after the original callback, whatever the
    /// callback did.
    pub(crate) fn and_then<F>(mut self, notify: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        match self.completion.take() {
            Some(original) => Self::new(Box::new(move |result| {
                invoke_isolated(original, result);
                notify();
            })),
            None => self,
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            warn!("Event dropped without completion, resolving as abandoned");
            invoke_isolated(completion, Err(DeliveryError::Abandoned));
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

/// A unit of work queued for the downstream sink.
#[derive(Debug)]
pub struct Event<T> {
    payload: T,
    completer: Completer,
}

impl<T> Event<T> {
    pub fn new<F>(payload: T, completion: F) -> Self
    where
        F: FnOnce(DeliveryResult) + Send + 'static,
    {
        Self {
            payload,
            completer: Completer::new(Box::new(completion)),
        }
    }

    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Splits the event so the payload can be consumed while the completion
    /// is resolved later, possibly from another thread.
    #[must_use]
    pub fn into_parts(self) -> (T, Completer) {
        (self.payload, self.completer)
    }

    pub fn complete(self, result: DeliveryResult) {
        self.completer.complete(result);
    }

    pub(crate) fn and_then<F>(self, notify: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            payload: self.payload,
            completer: self.completer.and_then(notify),
        }
    }
}
