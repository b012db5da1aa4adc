use sinker_stats::{CounterMetric, GaugeMetric, HistogramMetric, TimerMetric};

/// Gauge metrics used by the sinker.
pub enum SinkerGauges {
    /// The number of sinks currently held in the sink state cache.
    CachedSinks,
    /// The number of open connections in the redis pool of the event stream consumer.
    RedisConnections,
    /// The number of idle connections in the redis pool of the event stream consumer.
    RedisIdleConnections,
}

impl GaugeMetric for SinkerGauges {
    fn name(&self) -> &'static str {
        match self {
            SinkerGauges::CachedSinks => "cache.sinks",
            SinkerGauges::RedisConnections => "redis.pool.connections",
            SinkerGauges::RedisIdleConnections => "redis.pool.idle_connections",
        }
    }
}

/// Histogram metrics used by the sinker.
pub enum SinkerHistograms {
    /// The size of agent messages received from the message bus in bytes.
    ///
    /// Recorded before the size limit is applied.
    MessageSize,
    /// The size of remote-write request bodies in bytes, after compression.
    ///
    /// This metric is tagged with:
    ///  - `agent`: The name of the publishing agent.
    ///  - `policy`: The name of the policy.
    ///  - `sink`: The sink id.
    ///  - `owner`: The owner of the sink.
    RemoteWriteBytes,
}

impl HistogramMetric for SinkerHistograms {
    fn name(&self) -> &'static str {
        match self {
            SinkerHistograms::MessageSize => "message.size",
            SinkerHistograms::RemoteWriteBytes => "remote_write.bytes",
        }
    }
}

/// Timer metrics used by the sinker.
pub enum SinkerTimers {
    /// Total time spent handling one agent message, from receipt to the last delivery.
    MessageHandling,
    /// Duration of a single remote-write request.
    ///
    /// This metric is tagged with:
    ///  - `outcome`: `success` or `failure`.
    RemoteWriteDuration,
}

impl TimerMetric for SinkerTimers {
    fn name(&self) -> &'static str {
        match self {
            SinkerTimers::MessageHandling => "message.duration",
            SinkerTimers::RemoteWriteDuration => "remote_write.duration",
        }
    }
}

/// Counter metrics used by the sinker.
pub enum SinkerCounters {
    /// Number of times the HTTP server has been started.
    ServerStarting,
    /// Number of agent messages received from the message bus.
    MessagesReceived,
    /// Number of agent messages dropped before delivery.
    ///
    /// This metric is tagged with:
    ///  - `reason`: Why the message was dropped, for example `payload_too_large`.
    MessagesRejected,
    /// Number of policy payloads skipped because they did not match the envelope schema.
    PolicyInvalid,
    /// Number of policy payloads for which no sink could be resolved.
    PolicyWithoutSinks,
    /// Number of policy payloads the backend converter failed on.
    ///
    /// This metric is tagged with:
    ///  - `backend`: The backend that produced the payload.
    ConversionFailed,
    /// Number of failed dataset lookups during sink resolution.
    DatasetLookupFailed,
    /// Number of remote-write requests.
    ///
    /// This metric is tagged with:
    ///  - `agent`: The agent name.
    ///  - `policy`: The policy name.
    ///  - `sink`: The sink id.
    ///  - `owner`: The owner of the sink.
    ///  - `outcome`: `success` or `failure`.
    RemoteWriteRequests,
    /// Number of sinks evicted from the cache after going idle.
    ///
    /// This metric is tagged with:
    ///  - `state`: The state of the sink before eviction.
    SinksEvicted,
    /// Number of sink state events published to the sinker stream.
    ///
    /// This metric is tagged with:
    ///  - `outcome`: `success` or `failure`.
    EventsProduced,
    /// Number of sink events read from the sinks stream.
    ///
    /// This metric is tagged with:
    ///  - `operation`: The sink operation, or `invalid` if it could not be parsed.
    EventsConsumed,
    /// Number of errors while reading or acknowledging the sinks stream.
    EventStreamErrors,
}

impl CounterMetric for SinkerCounters {
    fn name(&self) -> &'static str {
        match self {
            SinkerCounters::ServerStarting => "server.starting",
            SinkerCounters::MessagesReceived => "message.received",
            SinkerCounters::MessagesRejected => "message.rejected",
            SinkerCounters::PolicyInvalid => "policy.invalid",
            SinkerCounters::PolicyWithoutSinks => "policy.no_sinks",
            SinkerCounters::ConversionFailed => "policy.conversion_failed",
            SinkerCounters::DatasetLookupFailed => "resolver.dataset_failed",
            SinkerCounters::RemoteWriteRequests => "remote_write.requests",
            SinkerCounters::SinksEvicted => "cache.evicted",
            SinkerCounters::EventsProduced => "events.produced",
            SinkerCounters::EventsConsumed => "events.consumed",
            SinkerCounters::EventStreamErrors => "events.errors",
        }
    }
}
