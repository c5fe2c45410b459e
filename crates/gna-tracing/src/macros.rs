//! Convenience macros for performance instrumentation.

/// Create a [`crate::performance::PerformanceSpan`] with optional fields.
///
/// The fields are recorded on the span the completion event is logged in.
///
/// ```rust
/// use gna_tracing::perf_span;
///
/// {
///     let _span = perf_span!("request", request_id = 3, operations = 2);
///     // ... work ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let span = tracing::debug_span!(
            "perf",
            name = $name,
            $($field = $value),+
        );
        $crate::performance::PerformanceSpan::from_span(span, $name, None)
    }};
}

/// Run a block and return `(result, duration_us)`, logging the duration.
///
/// ```rust
/// use gna_tracing::timed_block;
///
/// let (sum, _duration_us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            operation = $name,
            duration_us = duration_us,
            "timed_block_complete"
        );
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_perf_span_macro() {
        let _plain = perf_span!("copy");
        let _with_fields = perf_span!("transpose", rows = 8, columns = 16);
    }

    #[test]
    fn test_perf_span_fields_stay_on_the_span() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = perf_span!("transpose", rows = 8, columns = 16);
            assert_eq!(span.name(), "transpose");
            assert!(span.span().field("rows").is_some());
            assert!(span.span().field("columns").is_some());
            assert!(!span.span().is_disabled());
        });
    }

    #[test]
    fn test_timed_block_macro() {
        let (result, duration_us) = timed_block!("sleep", {
            thread::sleep(Duration::from_millis(2));
            7
        });
        assert_eq!(result, 7);
        assert!(duration_us >= 2_000);
    }
}
