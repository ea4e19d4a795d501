//! FlexNode firmware — cooperative scheduler core.
//!
//! The node runs sensors, actuators, user rules and network plumbing on
//! a single execution thread. This crate is the part that decides, on
//! every pass of the main loop, which deferred work is due, dispatches
//! it without timing drift, and interleaves best-effort events with
//! deadline work fairly. Hardware drivers, the plugin registry, storage
//! and the outer loop live in the host firmware and reach this core
//! only through the port traits in [`ports`].
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; the whole core builds and tests on the host.

#![deny(unused_must_use)]

pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod ports;
pub mod scheduler;
