// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous log ingestion and query.
//!
//! Submissions are validated at the HTTP boundary, acknowledged with their
//! identifiers and handed to a bounded queue. A pool of write workers persists
//! them with retries, routing entries that exhaust their budget to a
//! dead-letter observer. Searches and lookups read the store directly.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod config;
pub mod dead_letter;
pub mod entry;
pub mod error;
pub mod http_utils;
pub mod ingestion;
pub mod log_agent;
pub mod query;
pub mod queue;
pub mod requests;
pub mod resources;
pub mod store;
pub mod write_worker;
