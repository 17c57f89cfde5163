/*!
 * Structured Tracing
 * Subscriber setup and per-operation spans for the authorization facade
 */

use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Operations slower than this are reported at warn level
const SLOW_OPERATION: Duration = Duration::from_millis(100);

/// Install the global subscriber
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - AUTHZ_TRACE_JSON: Enable JSON output (default: false)
///
/// Installing twice is a no-op.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("AUTHZ_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "authorization tracing initialized");
    }
}

/// Span covering one facade operation
pub struct OperationSpan {
    span: Span,
    start: Instant,
    operation: &'static str,
    trace_id: String,
}

impl OperationSpan {
    pub fn new(operation: &'static str, principal: &str) -> Self {
        let trace_id = Uuid::new_v4().to_string();
        let span = span!(
            Level::DEBUG,
            "authz_operation",
            trace_id = %trace_id,
            operation = operation,
            principal = principal,
            outcome = tracing::field::Empty,
            reason = tracing::field::Empty,
            cached = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            operation,
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Span handle, for `Instrument`
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_outcome(&self, allowed: bool, reason: &str) {
        self.span.record("outcome", if allowed { "allow" } else { "deny" });
        self.span.record("reason", reason);
    }

    pub fn record_cached(&self, cached: bool) {
        self.span.record("cached", cached);
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration > SLOW_OPERATION {
            warn!(
                trace_id = %self.trace_id,
                operation = self.operation,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow authorization operation"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                operation = self.operation,
                duration_us = duration.as_micros() as u64,
                "authorization operation completed"
            );
        }
    }
}

#[inline]
pub fn span_operation(operation: &'static str, principal: &str) -> OperationSpan {
    OperationSpan::new(operation, principal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_records_without_subscriber() {
        let span = span_operation("authorize", "alice");
        span.record_outcome(true, "capability_granted");
        span.record_cached(false);
        assert_eq!(span.trace_id().len(), 36);
    }
}
