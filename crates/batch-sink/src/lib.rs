// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Batch Sink
//!
//! An in-process batching sink with backpressure. Many producers submit
//! events; a single downstream [`sink::BatchSink`] receives them in batches.
//!
//! ## Overview
//!
//! - [`queue`]: bounded FIFO of pending events
//! - [`flush_registry`]: pending flush requests, coalesced per drain pass
//! - [`overflow`]: admission policy when the queue is full (grow, discard, block)
//! - [`drainer`]: single-flight drain passes feeding the downstream
//! - [`service`]: periodic and on-demand drain triggers, producer handle
//!
//! ## Example
//!
//! ```rust,ignore
//! use batch_sink::{config::BatchSinkConfig, event::Event, service::BatchSinkService};
//!
//! let (service, handle) = BatchSinkService::new(
//!     &BatchSinkConfig::default(),
//!     |batch: Vec<Event<String>>| {
//!         for event in batch {
//!             event.complete(Ok(()));
//!         }
//!     },
//! )?;
//! tokio::spawn(service.run());
//!
//! handle.submit("hello".to_string(), |result| println!("delivered: {result:?}"));
//! handle.flush_async().await?;
//! handle.close().await?;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod drainer;
pub mod errors;
pub mod event;
pub mod flush_registry;
pub mod overflow;
pub mod queue;
pub mod service;
pub mod sink;
pub mod stats;
