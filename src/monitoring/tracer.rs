/*!
 * Structured Tracing
 * Subscriber setup for the scheduler binary and spans around world-switch operations
 */

use std::time::Instant;
use tracing::{debug, info, span, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - GPUV_TRACE_JSON: Enable JSON output (default: false)
///
/// `log` records from the library modules are forwarded into the subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("GPUV_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    // A second init (tests, embedding hosts) keeps the first subscriber
    let result = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if result.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Span covering one world-switch operation
pub struct SwitchSpan {
    span: Span,
    start: Instant,
}

impl SwitchSpan {
    pub fn new(operation: &'static str, world_switch: u32) -> Self {
        let span = span!(
            Level::DEBUG,
            "world_switch",
            op = operation,
            ws = world_switch,
            duration_us = tracing::field::Empty,
            error = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    /// Close the span with the operation outcome
    pub fn finish<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        let elapsed = self.start.elapsed().as_micros() as u64;
        self.span.record("duration_us", elapsed);
        if let Err(e) = result {
            self.span.record("error", tracing::field::display(e));
        }
        let _entered = self.span.enter();
        debug!(duration_us = elapsed, ok = result.is_ok(), "operation finished");
    }
}

/// Convenience constructor for a world-switch span
#[inline]
pub fn span_operation(operation: &'static str, world_switch: u32) -> SwitchSpan {
    SwitchSpan::new(operation, world_switch)
}
