//! Internal metrics of the sinker, exposed in the Prometheus text format.
//!
//! Metrics are declared as enums implementing one of [`CounterMetric`], [`GaugeMetric`],
//! [`HistogramMetric`] or [`TimerMetric`]. The trait decides how the value is recorded, so a
//! counter can never be passed where a timer is expected. Values are recorded with the
//! [`metric!`] macro:
//!
//! ```
//! use sinker_stats::{metric, CounterMetric};
//!
//! enum IngressCounters {
//!     Received,
//! }
//!
//! impl CounterMetric for IngressCounters {
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Self::Received => "message.received",
//!         }
//!     }
//! }
//!
//! metric!(counter(IngressCounters::Received) += 1, backend = "pktvisor");
//! ```
//!
//! Until a client is installed with [`init`] or [`set_client`], recording is a no-op. The client
//! created by [`init`] aggregates into a Prometheus registry that [`render`] serializes for the
//! `/metrics` endpoint. Dots in metric names become underscores and the configured prefix is
//! prepended:
//!
//! ```
//! # use std::collections::BTreeMap;
//! use sinker_stats::MetricsClientConfig;
//!
//! sinker_stats::init(MetricsClientConfig {
//!     prefix: "sinker",
//!     default_tags: BTreeMap::new(),
//! });
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use prometheus::{Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Default buckets for histograms, tailored for byte sizes of payloads.
pub const SIZE_BUCKETS: &[f64] = &[
    256.0, 1024.0, 4096.0, 16384.0, 32768.0, 65536.0, 102400.0, 262144.0, 1048576.0,
];

/// Default buckets for timers, in seconds.
pub const TIMER_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// A tag attached to a metric.
pub type Tag<'a> = (&'a str, &'a str);

/// Where recorded metrics end up.
enum MetricSink {
    /// Aggregates metrics in a Prometheus registry.
    Registry(RegistrySink),
    /// Records metrics as text lines, used in tests.
    Capture(Mutex<Vec<String>>),
}

/// Client configuration object to store globally.
pub struct MetricsClient {
    /// Prefix prepended to all metric names.
    prefix: String,
    /// Default tags to apply to every metric.
    default_tags: BTreeMap<String, String>,
    sink: MetricSink,
}

impl std::fmt::Debug for MetricsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.sink {
            MetricSink::Registry(_) => "registry",
            MetricSink::Capture(_) => "capture",
        };

        f.debug_struct("MetricsClient")
            .field("prefix", &self.prefix)
            .field("default_tags", &self.default_tags)
            .field("sink", &kind)
            .finish()
    }
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Creates a client that aggregates into a fresh Prometheus registry.
    pub fn new(config: MetricsClientConfig<'_>) -> Self {
        Self {
            prefix: sanitize(config.prefix),
            default_tags: config
                .default_tags
                .into_iter()
                .map(|(k, v)| (sanitize(&k), v))
                .collect(),
            sink: MetricSink::Registry(RegistrySink::default()),
        }
    }

    fn capturing() -> Self {
        Self {
            prefix: String::new(),
            default_tags: BTreeMap::new(),
            sink: MetricSink::Capture(Mutex::new(Vec::new())),
        }
    }

    fn metric_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            sanitize(name)
        } else {
            format!("{}_{}", self.prefix, sanitize(name))
        }
    }

    /// Increments a counter by `value`.
    pub fn count(&self, name: &str, value: u64, tags: &[Tag<'_>]) {
        match &self.sink {
            MetricSink::Registry(sink) => {
                let labels = self.labels(tags);
                sink.count(&self.metric_name(name), value, &labels);
            }
            MetricSink::Capture(lines) => lines.lock().push(capture_line(name, value, "c", tags)),
        }
    }

    /// Sets a gauge to `value`.
    pub fn gauge(&self, name: &str, value: f64, tags: &[Tag<'_>]) {
        match &self.sink {
            MetricSink::Registry(sink) => {
                let labels = self.labels(tags);
                sink.gauge(&self.metric_name(name), value, &labels);
            }
            MetricSink::Capture(lines) => lines.lock().push(capture_line(name, value, "g", tags)),
        }
    }

    /// Records an observation into a histogram with the given buckets.
    pub fn histogram(&self, name: &str, buckets: &[f64], value: f64, tags: &[Tag<'_>]) {
        match &self.sink {
            MetricSink::Registry(sink) => {
                let labels = self.labels(tags);
                sink.histogram(&self.metric_name(name), buckets, value, &labels);
            }
            MetricSink::Capture(lines) => lines.lock().push(capture_line(name, value, "h", tags)),
        }
    }

    /// Renders all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        match &self.sink {
            MetricSink::Registry(sink) => sink.render(),
            MetricSink::Capture(lines) => lines.lock().join("\n"),
        }
    }

    /// Merges default tags with the given tags. Explicit tags win on collision.
    fn labels(&self, tags: &[Tag<'_>]) -> BTreeMap<String, String> {
        let mut labels = self.default_tags.clone();
        for (key, value) in tags {
            labels.insert(sanitize(key), (*value).to_owned());
        }
        labels
    }
}

/// Lazily registered metric families of a Prometheus registry.
///
/// A family is created on first use with the label keys of that first call. Later calls with a
/// different set of label keys are rejected by Prometheus and logged.
#[derive(Default)]
struct RegistrySink {
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

impl RegistrySink {
    fn count(&self, name: &str, value: u64, labels: &BTreeMap<String, String>) {
        let mut counters = self.counters.lock();
        let family = match counters.get(name) {
            Some(family) => family.clone(),
            None => {
                let keys: Vec<&str> = labels.keys().map(String::as_str).collect();
                let family = match IntCounterVec::new(Opts::new(name, name), &keys) {
                    Ok(family) => family,
                    Err(error) => return report(name, error),
                };
                if let Err(error) = self.registry.register(Box::new(family.clone())) {
                    return report(name, error);
                }
                counters.insert(name.to_owned(), family.clone());
                family
            }
        };
        drop(counters);

        match family.get_metric_with(&label_values(labels)) {
            Ok(counter) => counter.inc_by(value),
            Err(error) => report(name, error),
        }
    }

    fn gauge(&self, name: &str, value: f64, labels: &BTreeMap<String, String>) {
        let mut gauges = self.gauges.lock();
        let family = match gauges.get(name) {
            Some(family) => family.clone(),
            None => {
                let keys: Vec<&str> = labels.keys().map(String::as_str).collect();
                let family = match GaugeVec::new(Opts::new(name, name), &keys) {
                    Ok(family) => family,
                    Err(error) => return report(name, error),
                };
                if let Err(error) = self.registry.register(Box::new(family.clone())) {
                    return report(name, error);
                }
                gauges.insert(name.to_owned(), family.clone());
                family
            }
        };
        drop(gauges);

        match family.get_metric_with(&label_values(labels)) {
            Ok(gauge) => gauge.set(value),
            Err(error) => report(name, error),
        }
    }

    fn histogram(&self, name: &str, buckets: &[f64], value: f64, labels: &BTreeMap<String, String>) {
        let mut histograms = self.histograms.lock();
        let family = match histograms.get(name) {
            Some(family) => family.clone(),
            None => {
                let keys: Vec<&str> = labels.keys().map(String::as_str).collect();
                let opts = HistogramOpts::new(name, name).buckets(buckets.to_vec());
                let family = match HistogramVec::new(opts, &keys) {
                    Ok(family) => family,
                    Err(error) => return report(name, error),
                };
                if let Err(error) = self.registry.register(Box::new(family.clone())) {
                    return report(name, error);
                }
                histograms.insert(name.to_owned(), family.clone());
                family
            }
        };
        drop(histograms);

        match family.get_metric_with(&label_values(labels)) {
            Ok(histogram) => histogram.observe(value),
            Err(error) => report(name, error),
        }
    }

    fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        if let Err(error) = encoder.encode(&self.registry.gather(), &mut buffer) {
            sinker_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to encode metrics"
            );
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

fn label_values(labels: &BTreeMap<String, String>) -> HashMap<&str, &str> {
    labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn report(name: &str, error: prometheus::Error) {
    sinker_log::debug!(
        error = &error as &dyn std::error::Error,
        metric = name,
        "failed to record metric"
    );
}

fn capture_line<V: std::fmt::Display>(name: &str, value: V, ty: &str, tags: &[Tag<'_>]) -> String {
    let mut line = format!("{name}:{value}|{ty}");
    for (index, (key, value)) in tags.iter().enumerate() {
        line.push_str(if index == 0 { "|#" } else { "," });
        line.push_str(key);
        line.push(':');
        line.push_str(value);
    }
    line
}

/// Maps a metric or tag name onto the Prometheus charset `[a-zA-Z0-9_]`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> = METRICS_CLIENT.read().clone().into();
}

/// Installs the process-wide client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Captures all metrics recorded on the current thread while `f` runs.
///
/// Each metric becomes one line of the form `name:value|type|#tag:value,...`, with the
/// unprefixed name.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let client = Arc::new(MetricsClient::capturing());

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(client.clone()));
        f();
        cell.replace(old_client);
    });

    match &client.sink {
        MetricSink::Capture(lines) => std::mem::take(&mut *lines.lock()),
        MetricSink::Registry(_) => Vec::new(),
    }
}

/// Removes the process-wide client.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
}

/// Tell the metrics system to report to a fresh Prometheus registry.
pub fn init(config: MetricsClientConfig<'_>) {
    sinker_log::info!(prefix = config.prefix, "collecting internal metrics");
    set_client(MetricsClient::new(config));
}

/// Renders the metrics of the current client in the Prometheus text format.
///
/// Returns an empty string if no client is configured.
pub fn render() -> String {
    with_client(|client| client.render())
}

/// Calls `f` with the client of the current thread, or returns `R::default()` without one.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A duration, recorded in seconds into a histogram with [`TIMER_BUCKETS`].
///
/// Besides an explicit [`Duration`](std::time::Duration), the macro can time a block and return
/// its value:
///
/// ```
/// use std::time::Instant;
/// use sinker_stats::{metric, TimerMetric};
///
/// struct Delivery;
///
/// impl TimerMetric for Delivery {
///     fn name(&self) -> &'static str {
///         "remote_write.duration"
///     }
/// }
///
/// let start = Instant::now();
/// metric!(timer(Delivery) = start.elapsed(), outcome = "success");
///
/// let written = metric!(timer(Delivery), outcome = "success", { 42 });
/// assert_eq!(written, 42);
/// ```
pub trait TimerMetric {
    /// The metric name, before prefixing and sanitizing.
    fn name(&self) -> &'static str;
}

/// A monotonic counter. Increments of zero are not recorded.
///
/// ```
/// use sinker_stats::{metric, CounterMetric};
///
/// struct Rejected;
///
/// impl CounterMetric for Rejected {
///     fn name(&self) -> &'static str {
///         "message.rejected"
///     }
/// }
///
/// let reason = String::from("payload_too_large");
/// metric!(counter(Rejected) += 1, reason = reason);
/// ```
pub trait CounterMetric {
    /// The metric name, before prefixing and sanitizing.
    fn name(&self) -> &'static str;
}

/// A distribution of observed values.
///
/// The bucket layout defaults to [`SIZE_BUCKETS`], which fits payload sizes in bytes.
pub trait HistogramMetric {
    /// The metric name, before prefixing and sanitizing.
    fn name(&self) -> &'static str;

    /// Upper bounds of the histogram buckets.
    fn buckets(&self) -> &'static [f64] {
        SIZE_BUCKETS
    }
}

/// A value that is set rather than accumulated, such as the size of a cache.
pub trait GaugeMetric {
    /// The metric name, before prefixing and sanitizing.
    fn name(&self) -> &'static str;
}

/// Records a metric with the current client.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value as u64 {
            0 => {},
            value => {
                $crate::with_client(|client| {
                    client.count(
                        $crate::CounterMetric::name(&$id),
                        value,
                        &[$((stringify!($($k).*), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
                    )
                })
            },
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            client.gauge(
                $crate::GaugeMetric::name(&$id),
                $value as f64,
                &[$((stringify!($($k).*), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
            )
        })
    };

    // histogram observation
    (histogram($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            client.histogram(
                $crate::HistogramMetric::name(&$id),
                $crate::HistogramMetric::buckets(&$id),
                $value as f64,
                &[$((stringify!($($k).*), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            client.histogram(
                $crate::TimerMetric::name(&$id),
                $crate::TIMER_BUCKETS,
                ::std::time::Duration::as_secs_f64(&$value),
                &[$((stringify!($($k).*), ::std::convert::AsRef::<str>::as_ref(&$v))),*],
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    enum TestGauges {
        Sinks,
        Connections,
    }

    impl GaugeMetric for TestGauges {
        fn name(&self) -> &'static str {
            match self {
                Self::Sinks => "cache.sinks",
                Self::Connections => "redis.connections",
            }
        }
    }

    struct TestCounter;

    impl CounterMetric for TestCounter {
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    struct TestHistogram;

    impl HistogramMetric for TestHistogram {
        fn name(&self) -> &'static str {
            "histogram"
        }
    }

    struct TestTimer;

    impl TimerMetric for TestTimer {
        fn name(&self) -> &'static str {
            "timer"
        }
    }

    #[test]
    fn test_capturing_client() {
        let captures = with_capturing_test_client(|| {
            metric!(gauge(TestGauges::Sinks) = 12, state = "active");
            metric!(gauge(TestGauges::Connections) = 3);
        });

        assert_eq!(
            captures,
            ["cache.sinks:12|g|#state:active", "redis.connections:3|g"]
        );
    }

    #[test]
    fn test_counter_skips_zero() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounter) += 0, sink = "s1");
            metric!(counter(TestCounter) += 10, sink = "s1");
        });
        assert_eq!(captures, ["counter:10|c|#sink:s1"]);
    }

    #[test]
    fn test_owned_tag_values() {
        let owner = String::from("owner-1");
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounter) += 1, owner = owner, outcome = "ok");
        });
        assert_eq!(captures, ["counter:1|c|#owner:owner-1,outcome:ok"]);
    }

    #[test]
    fn test_histogram() {
        let captures = with_capturing_test_client(|| {
            metric!(histogram(TestHistogram) = 1024, sink = "s1");
        });
        assert_eq!(captures, ["histogram:1024|h|#sink:s1"]);
    }

    #[test]
    fn test_timer_records_seconds() {
        let captures = with_capturing_test_client(|| {
            metric!(timer(TestTimer) = Duration::from_millis(250), sink = "s1");
        });
        assert_eq!(captures, ["timer:0.25|h|#sink:s1"]);
    }

    #[test]
    fn test_timed_block() {
        let captures = with_capturing_test_client(|| {
            let value = metric!(timer(TestTimer), sink = "s1", { 5 });
            assert_eq!(value, 5);
        });
        assert_eq!(captures.len(), 1);
        assert!(captures[0].starts_with("timer:"));
    }

    #[test]
    fn test_without_client_is_noop() {
        assert_eq!(with_client(|client| client.render()), "");
    }

    #[test]
    fn test_registry_render() {
        let client = MetricsClient::new(MetricsClientConfig {
            prefix: "sinker",
            default_tags: BTreeMap::from([("host".to_owned(), "h1".to_owned())]),
        });

        client.count("remote_write.requests", 2, &[("outcome", "ok")]);
        client.count("remote_write.requests", 1, &[("outcome", "ok")]);
        client.gauge("cache.sinks", 4.0, &[]);
        client.histogram("payload_size", SIZE_BUCKETS, 300.0, &[]);

        let output = client.render();
        assert!(output.contains(r#"sinker_remote_write_requests{host="h1",outcome="ok"} 3"#));
        assert!(output.contains(r#"sinker_cache_sinks{host="h1"} 4"#));
        assert!(output.contains(r#"sinker_payload_size_bucket{host="h1",le="1024"} 1"#));
    }

    #[test]
    fn test_registry_rejects_inconsistent_labels() {
        let client = MetricsClient::new(MetricsClientConfig {
            prefix: "",
            default_tags: BTreeMap::new(),
        });

        client.count("requests", 1, &[("outcome", "ok")]);
        // Different label keys for an existing family are dropped.
        client.count("requests", 1, &[("sink", "s1")]);

        let output = client.render();
        assert!(output.contains(r#"requests{outcome="ok"} 1"#));
        assert!(!output.contains("sink="));
    }
}
