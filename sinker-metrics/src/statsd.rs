use sinker_stats::{CounterMetric, HistogramMetric};

/// Counter metrics for backend conversion.
pub enum MetricCounters {
    /// Incremented for every top-level payload key that is not a handler object.
    ///
    /// Tagged by backend.
    HandlerSkipped,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::HandlerSkipped => "convert.handler.skipped",
        }
    }
}

/// Histogram metrics for backend conversion.
pub enum MetricHistograms {
    /// Number of time series produced from a single policy payload.
    ///
    /// Tagged by backend.
    SeriesPerPayload,
}

impl HistogramMetric for MetricHistograms {
    fn name(&self) -> &'static str {
        match *self {
            Self::SeriesPerPayload => "convert.series",
        }
    }

    fn buckets(&self) -> &'static [f64] {
        match *self {
            Self::SeriesPerPayload => &[1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0],
        }
    }
}
