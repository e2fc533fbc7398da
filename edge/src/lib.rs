// SPDX-License-Identifier: CC0-1.0

//! # bmon edge daemon
//!
//! One edge runs next to each monitored `bitcoind`, turning its debug log
//! and JSON-RPC interface into a stream of structured events for the hub:
//!
//! - [`logfollow`] tails the debug log across rotations with a durable
//!   resume cursor;
//! - [`listeners`] extract events from lines (and run the multi-line state
//!   machines for reorgs, header-to-tip latency and connect-block timings);
//! - [`queues`] buffer events in the edge-local fast store and forward them
//!   to the hub with independent worker pools per volume class;
//! - [`ship`] batches the mempool firehose into Avro archives for object
//!   storage;
//! - [`peers`], [`cursor`], [`poller`] and [`metrics`] cover peer identity,
//!   resume state, RPC enrichment and observability.

pub mod config;
pub mod cursor;
pub mod hostinfo;
pub mod listeners;
pub mod logfollow;
pub mod metrics;
pub mod peers;
pub mod poller;
pub mod queues;
pub mod ship;
