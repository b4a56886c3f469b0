// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Telemetry sink trait for observability without coupling to I/O.
//!
//! The store emits pipeline events through this trait, allowing hosts to
//! decide how to handle them (logging, metrics, discard). All methods
//! have default no-op implementations, so implementors pick only the
//! events they care about.

/// Sink for store pipeline events.
pub trait StoreTelemetry {
    /// Called after a publish merged into the base source.
    ///
    /// `changed` is the number of records whose value actually changed.
    fn on_publish(&self, _changed: usize) {}

    /// Called after a notify pass dispatched callbacks.
    ///
    /// `notified` is the number of subscribers whose data changed.
    fn on_notify(&self, _notified: usize) {}

    /// Called after a garbage-collection pass.
    ///
    /// `collected` is the number of records reclaimed.
    fn on_gc(&self, _collected: usize) {}
}

/// A no-op telemetry sink that discards all events.
///
/// This is the default when no telemetry is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStoreTelemetry;

impl StoreTelemetry for NullStoreTelemetry {}
