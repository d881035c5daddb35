// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event delivery core of a log shipper.
//!
//! Harvested batches flow from an input queue through a publisher into a
//! load-balancing pool of workers, one per remote endpoint. Once every event
//! of a batch is acknowledged, the batch is handed to the registrar in the
//! order it was published.
//!
//! ```text
//! input ──▶ Publisher ──▶ LoadBalancer ──▶ Worker ──▶ endpoint
//!              │              ▲   (retries)  │
//!              │              └──────────────┘
//!              └──▶ output (registrar, publish order)
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backoff;
pub mod client;
pub mod config;
pub mod errors;
pub mod event;
pub mod lb;
pub mod logger;
pub mod observer;
pub mod publish;
pub mod publisher;
pub mod signal;

pub use client::{AsyncClient, BulkResult};
pub use config::Config;
pub use event::{Batch, Event};
pub use lb::LoadBalancer;
pub use observer::{Observer, PipelineEvent, TracingObserver};
pub use publish::{Publish, PublishOptions};
pub use publisher::{new_publisher, LogPublisher};
