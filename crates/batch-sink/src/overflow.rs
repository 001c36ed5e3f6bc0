// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Admission policy applied when a producer pushes into a full queue.

use std::fmt;
use std::str::FromStr;
use std::sync::{Condvar, Mutex};

use serde::Deserialize;

use crate::errors::ConfigError;

/// What to do with a new event when the queue already holds `queue_limit`
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum OverflowAction {
    /// Always admit. The limit is advisory and the queue grows unbounded.
    Grow,
    /// Reject the event. Its completion fires with
    /// [`crate::errors::DeliveryError::Dropped`].
    #[default]
    Discard,
    /// Park the producer until a drain pass frees space. There is no
    /// timeout: a downstream that never completes events blocks producers
    /// forever.
    Block,
}

/// Admission decision for a single push, taken under the queue lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Enqueue,
    Discard,
    Wait,
}

impl OverflowAction {
    #[must_use]
    pub fn decide(self, queue_len: usize, queue_limit: usize) -> Admission {
        if queue_len < queue_limit {
            return Admission::Enqueue;
        }
        match self {
            OverflowAction::Grow => Admission::Enqueue,
            OverflowAction::Discard => Admission::Discard,
            OverflowAction::Block => Admission::Wait,
        }
    }
}

impl FromStr for OverflowAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grow" => Ok(OverflowAction::Grow),
            "discard" => Ok(OverflowAction::Discard),
            "block" => Ok(OverflowAction::Block),
            _ => Err(ConfigError::UnknownOverflowAction(s.to_string())),
        }
    }
}

impl TryFrom<String> for OverflowAction {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for OverflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowAction::Grow => write!(f, "grow"),
            OverflowAction::Discard => write!(f, "discard"),
            OverflowAction::Block => write!(f, "block"),
        }
    }
}

/// One-shot wake-up a blocked producer parks on. It is registered as a flush
/// request, so it fires once the next drain pass has been acknowledged.
#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    pub(crate) fn notify(&self) {
        #[allow(clippy::expect_used)]
        let mut woken = self.woken.lock().expect("lock poisoned");
        *woken = true;
        self.condvar.notify_all();
    }

    #[allow(clippy::expect_used)]
    pub(crate) fn wait(&self) {
        let mut woken = self.woken.lock().expect("lock poisoned");
        while !*woken {
            woken = self.condvar.wait(woken).expect("lock poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_below_limit_always_enqueues() {
        for action in [
            OverflowAction::Grow,
            OverflowAction::Discard,
            OverflowAction::Block,
        ] {
            assert_eq!(action.decide(4, 5), Admission::Enqueue);
        }
    }

    #[test]
    fn test_at_limit_follows_action() {
        assert_eq!(OverflowAction::Grow.decide(5, 5), Admission::Enqueue);
        assert_eq!(OverflowAction::Discard.decide(5, 5), Admission::Discard);
        assert_eq!(OverflowAction::Block.decide(5, 5), Admission::Wait);
        assert_eq!(OverflowAction::Grow.decide(50, 5), Admission::Enqueue);
    }

    #[test]
    fn test_default_is_discard() {
        assert_eq!(OverflowAction::default(), OverflowAction::Discard);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Grow".parse::<OverflowAction>(), Ok(OverflowAction::Grow));
        assert_eq!(
            " DISCARD ".parse::<OverflowAction>(),
            Ok(OverflowAction::Discard)
        );
        assert_eq!("block".parse::<OverflowAction>(), Ok(OverflowAction::Block));
    }

    #[test]
    fn test_parse_unknown_action_fails() {
        assert_eq!(
            "spill".parse::<OverflowAction>(),
            Err(ConfigError::UnknownOverflowAction("spill".to_string()))
        );
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let action = OverflowAction::Block;
        assert_eq!(action.to_string().parse::<OverflowAction>(), Ok(action));
    }

    #[test]
    fn test_deserialize_rejects_unknown_action() {
        let parsed: Result<OverflowAction, _> = serde_json::from_str("\"Block\"");
        assert_eq!(parsed.unwrap(), OverflowAction::Block);

        let parsed: Result<OverflowAction, _> = serde_json::from_str("\"overwrite\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_wake_signal_releases_waiter() {
        let signal = Arc::new(WakeSignal::default());
        let waiter_signal = Arc::clone(&signal);
        let waiter = thread::spawn(move || waiter_signal.wait());

        thread::sleep(Duration::from_millis(20));
        signal.notify();

        waiter.join().expect("waiter thread panicked");
    }

    #[test]
    fn test_wake_signal_notified_before_wait_does_not_block() {
        let signal = WakeSignal::default();
        signal.notify();
        signal.wait();
    }
}
