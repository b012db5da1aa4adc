use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sinker_config::Config;
use sinker_stats::metric;
use sinker_system::{Controller, Receiver, Service};

use crate::services::sink_cache::{SinkCache, SinkConfig, SinkState};
use crate::statsd::SinkerCounters;

/// Periodically evicts sinks that stopped receiving data.
///
/// A sink is idle when its last write is older than the idle timeout. Only
/// [`Active`](SinkState::Active) sinks idle out, and [`Error`](SinkState::Error) sinks only if
/// `cache.evict_errored` is set. Sinks that were never written to are kept.
#[derive(Debug)]
pub struct IdleReaperService {
    cache: Arc<SinkCache>,
    idle_timeout: TimeDelta,
    interval: Duration,
    evict_errored: bool,
}

impl IdleReaperService {
    /// Creates a reaper for the given cache.
    pub fn new(config: &Config, cache: Arc<SinkCache>) -> Self {
        Self {
            cache,
            idle_timeout: TimeDelta::from_std(config.idle_timeout()).unwrap_or(TimeDelta::MAX),
            interval: config.idle_check_interval(),
            evict_errored: config.evict_errored(),
        }
    }

    fn is_idle(&self, config: &SinkConfig, now: DateTime<Utc>) -> bool {
        let evictable = match config.state {
            SinkState::Active => true,
            SinkState::Error => self.evict_errored,
            SinkState::Unknown | SinkState::Idle => false,
        };

        match config.last_remote_write {
            Some(last) if evictable => now.signed_duration_since(last) > self.idle_timeout,
            _ => false,
        }
    }

    /// Evicts the sink if it is still idle, returning the state it was evicted in.
    ///
    /// Idleness is checked again on the cached entry, since a delivery may have refreshed the
    /// sink after it was listed.
    fn evict_if_idle(
        &self,
        owner_id: &str,
        sink_id: &str,
        now: DateTime<Utc>,
    ) -> Option<SinkState> {
        let mut state = None;
        self.cache.remove_if(owner_id, sink_id, |config| {
            state = Some(config.state);
            self.is_idle(config, now)
        })?;
        state
    }

    /// Evicts all idle sinks and returns how many were evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;

        for owner_id in self.cache.get_all_owners() {
            for config in self.cache.get_all(&owner_id) {
                if !self.is_idle(&config, now) {
                    continue;
                }

                let Some(state) = self.evict_if_idle(&owner_id, &config.sink_id, now) else {
                    continue;
                };

                sinker_log::info!(
                    owner_id,
                    sink_id = config.sink_id,
                    state = state.as_str(),
                    "evicted idle sink"
                );
                metric!(counter(SinkerCounters::SinksEvicted) += 1, state = state);
                evicted += 1;
            }
        }

        evicted
    }
}

impl Service for IdleReaperService {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let mut shutdown = Controller::shutdown_handle();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately, there is nothing to sweep at startup.
        ticker.tick().await;

        sinker_log::info!(
            interval_secs = self.interval.as_secs(),
            "idle sink reaper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep(Utc::now());
                    sinker_log::debug!(evicted, "idle sink sweep finished");
                }
            }
        }

        sinker_log::info!("idle sink reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutils::test_cache;

    fn reaper(cache: &Arc<SinkCache>, evict_errored: bool) -> IdleReaperService {
        let config = Config::from_json_value(json!({
            "cache": {"idle_timeout": 60, "evict_errored": evict_errored}
        }))
        .unwrap();
        IdleReaperService::new(&config, cache.clone())
    }

    fn sink(sink_id: &str, state: SinkState, last_write: Option<DateTime<Utc>>) -> SinkConfig {
        let mut config = SinkConfig::new("o1", sink_id, "http://sink");
        config.state = state;
        config.last_remote_write = last_write;
        config
    }

    #[test]
    fn test_sweep_evicts_idle_active_sinks() {
        let (cache, mut rx) = test_cache();
        let now = Utc::now();
        let old = Some(now - TimeDelta::seconds(120));
        let recent = Some(now - TimeDelta::seconds(30));

        cache.add(sink("idle", SinkState::Active, old));
        cache.add(sink("fresh", SinkState::Active, recent));
        cache.add(sink("failing", SinkState::Error, old));
        cache.add(sink("unknown", SinkState::Unknown, None));
        while rx.try_recv().is_ok() {}

        let captures = sinker_stats::with_capturing_test_client(|| {
            assert_eq!(reaper(&cache, false).sweep(now), 1);
        });

        assert!(!cache.exists("o1", "idle"));
        assert!(cache.exists("o1", "fresh"));
        assert!(cache.exists("o1", "failing"));
        assert!(cache.exists("o1", "unknown"));
        assert_eq!(captures, ["cache.sinks:3|g", "cache.evicted:1|c|#state:active"]);

        let event = rx.try_recv().unwrap().0;
        assert_eq!(event.sink_id, "idle");
        assert_eq!(event.state, SinkState::Idle);
    }

    #[test]
    fn test_sweep_evicts_errored_sinks_when_enabled() {
        let (cache, _rx) = test_cache();
        let now = Utc::now();
        let old = Some(now - TimeDelta::seconds(120));

        cache.add(sink("failing", SinkState::Error, old));
        cache.add(sink("unknown", SinkState::Unknown, old));

        assert_eq!(reaper(&cache, true).sweep(now), 1);
        assert!(!cache.exists("o1", "failing"));
        assert!(cache.exists("o1", "unknown"));
    }

    #[test]
    fn test_refreshed_sink_is_not_evicted() {
        let (cache, mut rx) = test_cache();
        let now = Utc::now();
        cache.add(sink("busy", SinkState::Active, Some(now - TimeDelta::seconds(120))));

        let reaper = reaper(&cache, false);
        let listed = cache.get_all("o1");
        assert!(reaper.is_idle(&listed[0], now));

        // A delivery succeeds between listing and eviction.
        cache.set_health("o1", "busy", SinkState::Active, String::new(), now);
        while rx.try_recv().is_ok() {}

        assert_eq!(reaper.evict_if_idle("o1", "busy", now), None);
        assert!(cache.exists("o1", "busy"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sweep_empty_cache() {
        let (cache, _rx) = test_cache();
        assert_eq!(reaper(&cache, true).sweep(Utc::now()), 0);
    }
}
