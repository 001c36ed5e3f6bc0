// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::errors::DeliveryError;
use crate::event::{invoke_isolated, Completion, DeliveryResult};

#[derive(Default)]
struct RegistryState {
    pending: VecDeque<Completion>,
    closed: bool,
}

/// Pending flush requests, kept apart from the event queue.
#[derive(Default)]
pub struct FlushRegistry {
    state: Mutex<RegistryState>,
}

impl FlushRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a request for the next pass. Once the registry is closed the
    /// request resolves right away with [`DeliveryError::Closed`].
    pub fn register(&self, completion: Completion) {
        {
            #[allow(clippy::expect_used)]
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.closed {
                state.pending.push_back(completion);
                return;
            }
        }
        invoke_isolated(completion, Err(DeliveryError::Closed));
    }

    /// Takes every request registered so far. Requests registered after this
    /// call belong to a later pass.
    pub fn take_all(&self) -> FlushSnapshot {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        FlushSnapshot {
            callbacks: state.pending.drain(..).collect(),
        }
    }

    /// Stops accepting requests and takes the ones still pending.
    pub fn close(&self) -> FlushSnapshot {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        state.closed = true;
        FlushSnapshot {
            callbacks: state.pending.drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("lock poisoned").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for FlushRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

/// Flush callbacks coalesced into one drain pass, resolved together in
/// registration order.
#[must_use]
pub struct FlushSnapshot {
    callbacks: Vec<Completion>,
}

impl FlushSnapshot {
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invokes every callback. A panicking callback is logged and does not
    /// prevent the ones after it from running.
    pub fn resolve(self, result: &DeliveryResult) {
        for callback in self.callbacks {
            invoke_isolated(callback, result.clone());
        }
    }
}

impl fmt::Debug for FlushSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushSnapshot")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    fn recorder(id: usize, log: &Arc<Mutex<Vec<(usize, DeliveryResult)>>>) -> Completion {
        let log = Arc::clone(log);
        Box::new(move |result| log.lock().unwrap().push((id, result)))
    }

    #[test]
    fn test_take_all_clears_registry() {
        let registry = FlushRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recorder(1, &log));
        registry.register(recorder(2, &log));
        assert_eq!(registry.len(), 2);

        let snapshot = registry.take_all();
        assert_eq!(snapshot.len(), 2);
        assert!(registry.is_empty());

        snapshot.resolve(&Ok(()));
        assert_eq!(*log.lock().unwrap(), vec![(1, Ok(())), (2, Ok(()))]);
    }

    #[test]
    fn test_snapshot_excludes_later_registrations() {
        let registry = FlushRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recorder(1, &log));

        let snapshot = registry.take_all();
        registry.register(recorder(2, &log));
        snapshot.resolve(&Ok(()));

        assert_eq!(*log.lock().unwrap(), vec![(1, Ok(()))]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let registry = FlushRegistry::new();
        let snapshot = registry.take_all();
        assert!(snapshot.is_empty());
        snapshot.resolve(&Ok(()));
    }

    #[test]
    #[traced_test]
    fn test_panicking_callback_does_not_stop_the_rest() {
        let registry = FlushRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recorder(1, &log));
        registry.register(Box::new(|_| panic!("flush callback bug")));
        registry.register(recorder(3, &log));

        registry.take_all().resolve(&Err(DeliveryError::Closed));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (1, Err(DeliveryError::Closed)),
                (3, Err(DeliveryError::Closed))
            ]
        );
        assert!(logs_contain("flush callback bug"));
    }

    #[test]
    fn test_register_after_close_resolves_immediately() {
        let registry = FlushRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recorder(1, &log));

        registry.close().resolve(&Err(DeliveryError::Closed));
        registry.register(recorder(2, &log));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (1, Err(DeliveryError::Closed)),
                (2, Err(DeliveryError::Closed))
            ]
        );
        assert!(registry.is_empty());
    }
}
