//! Timing helpers for request and kernel instrumentation.
//!
//! ```rust
//! use gna_tracing::performance::{record_request, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("affine", Some(100));
//! // ... run the kernel ...
//! drop(span); // logged only when it took at least 100us
//!
//! record_request(7, 3, 120, 0);
//! ```

use std::time::Instant;
use tracing::Level;

/// RAII guard that measures its own lifetime and logs it on drop.
///
/// When a threshold is set the span is only logged if the measured duration
/// reaches it.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start a debug-level span.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    /// Start a span at an explicit level.
    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    /// Measure into an existing span, keeping whatever fields it carries.
    pub fn from_span(
        span: tracing::Span,
        name: impl Into<String>,
        threshold_us: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold_us(&self) -> Option<u64> {
        self.threshold_us
    }

    /// Microseconds elapsed since the span started.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Enter the span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record the completion of one inference request.
pub fn record_request(request_id: u32, operations: usize, duration_us: u64, saturations: u32) {
    let operations_per_sec = if duration_us > 0 {
        (operations as f64 / duration_us as f64) * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "request",
        request_id = request_id,
        operations = operations,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        operations_per_sec = operations_per_sec,
        saturations = saturations,
        "request_execution"
    );
}

/// Record a scratch-memory allocation made by a worker.
pub fn record_allocation(size_bytes: usize, region: &str, duration_us: u64) {
    tracing::debug!(
        event = "allocation",
        size_bytes = size_bytes,
        size_kb = size_bytes as f64 / 1024.0,
        region = region,
        duration_us = duration_us,
        "scratch_allocation"
    );
}
