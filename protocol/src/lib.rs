// Copyright (c) 2026 kvchain contributors. MIT License.
// See LICENSE for details.

//! # kvchain: Replicated Key-Value Application
//!
//! A deterministic key-value state machine driven by an external BFT
//! consensus engine. The engine orders transactions and replicates blocks;
//! this crate executes them, persists the result, and reports a digest of
//! the committed state (the *app hash*) so replicas can check they agree.
//!
//! ## Architecture
//!
//! - **transaction**: the `key=value` transaction rule.
//! - **storage**: sled-backed store with atomic block commits and a
//!   persisted (height, app hash) checkpoint.
//! - **abci**: the application state machine, its wire types, and the two
//!   transports (socket server, embedded client).
//! - **home**: home directory layout, settings document, key material.
//! - **supervisor**: startup, run-mode selection, graceful shutdown.
//! - **metrics**: Prometheus series for the node binary to expose.
//! - **config**: fixed constants shared by every replica.
//!
//! ## Ground Rules
//!
//! 1. Everything that feeds the app hash is a pure function of committed
//!    bytes. No clocks, no randomness, no map iteration order.
//! 2. A block is either fully on disk with its checkpoint, or not at all.
//! 3. A failed commit stops the node. Continuing would fork it.

pub mod abci;
pub mod config;
pub mod home;
pub mod metrics;
pub mod storage;
pub mod supervisor;
pub mod transaction;
