//! In-memory replica of sink configurations and their delivery health.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sinker_stats::metric;
use sinker_system::Addr;

use crate::services::events::{EventProducer, SinkStateChanged};
use crate::statsd::SinkerGauges;

/// Delivery health of a sink.
///
/// Newly learned sinks start out [`Unknown`](Self::Unknown). [`Active`](Self::Active) and
/// [`Error`](Self::Error) are only set after a delivery attempt, [`Idle`](Self::Idle) is only
/// published when the entry is evicted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkState {
    /// No delivery has been attempted yet.
    #[default]
    Unknown,
    /// The last delivery succeeded.
    Active,
    /// The last delivery failed.
    Error,
    /// The sink stopped receiving data and was evicted.
    Idle,
}

impl SinkState {
    /// Returns the lowercase name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkState::Unknown => "unknown",
            SinkState::Active => "active",
            SinkState::Error => "error",
            SinkState::Idle => "idle",
        }
    }
}

impl AsRef<str> for SinkState {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery configuration and health of one sink.
#[derive(Clone, PartialEq)]
pub struct SinkConfig {
    /// Id of the sink.
    pub sink_id: String,
    /// The tenant owning the sink.
    pub owner_id: String,
    /// Remote-write endpoint.
    pub url: String,
    /// Basic auth user.
    pub username: String,
    /// Basic auth password.
    pub password: String,
    /// Health of the sink.
    pub state: SinkState,
    /// Error message of the last failed delivery, empty otherwise.
    pub msg: String,
    /// Time of the last delivery attempt that changed the state.
    pub last_remote_write: Option<DateTime<Utc>>,
}

impl SinkConfig {
    /// Creates a configuration in the [`Unknown`](SinkState::Unknown) state.
    pub fn new(
        owner_id: impl Into<String>,
        sink_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            sink_id: sink_id.into(),
            owner_id: owner_id.into(),
            url: url.into(),
            username: String::new(),
            password: String::new(),
            state: SinkState::Unknown,
            msg: String::new(),
            last_remote_write: None,
        }
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("sink_id", &self.sink_id)
            .field("owner_id", &self.owner_id)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("state", &self.state)
            .field("msg", &self.msg)
            .field("last_remote_write", &self.last_remote_write)
            .finish()
    }
}

/// Result of [`SinkCache::set_health`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthUpdate {
    /// The sink is no longer cached. Nothing was written.
    Missing,
    /// The stored state and message already match.
    Unchanged,
    /// The state or message changed and an event was published.
    Changed,
}

/// Errors returned by the [`SinkCache`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The sink is not in the cache.
    #[error("sink {sink_id} of owner {owner_id} not found")]
    NotFound {
        /// The owner that was looked up.
        owner_id: String,
        /// The sink that was looked up.
        sink_id: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SinkKey {
    owner_id: String,
    sink_id: String,
}

impl SinkKey {
    fn new(owner_id: &str, sink_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_owned(),
            sink_id: sink_id.to_owned(),
        }
    }
}

/// Shared cache of [`SinkConfig`]s by owner and sink.
///
/// Every mutation publishes the resulting state to the [`EventProducer`]. Publishing never blocks
/// and never fails the mutation.
pub struct SinkCache {
    entries: Mutex<HashMap<SinkKey, SinkConfig>>,
    events: Addr<EventProducer>,
}

impl SinkCache {
    /// Creates an empty cache publishing to the given producer.
    pub fn new(events: Addr<EventProducer>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Returns `true` if the sink is cached.
    pub fn exists(&self, owner_id: &str, sink_id: &str) -> bool {
        self.entries
            .lock()
            .contains_key(&SinkKey::new(owner_id, sink_id))
    }

    /// Returns a copy of the cached configuration.
    pub fn get(&self, owner_id: &str, sink_id: &str) -> Result<SinkConfig, CacheError> {
        self.entries
            .lock()
            .get(&SinkKey::new(owner_id, sink_id))
            .cloned()
            .ok_or_else(|| CacheError::NotFound {
                owner_id: owner_id.to_owned(),
                sink_id: sink_id.to_owned(),
            })
    }

    /// Inserts a configuration, replacing any existing entry.
    ///
    /// Use [`SinkConfig::new`] to add a sink in the `Unknown` state.
    pub fn add(&self, config: SinkConfig) {
        self.insert(config);
    }

    /// Replaces the cached entry of the sink with the given configuration.
    pub fn edit(&self, config: SinkConfig) {
        self.insert(config);
    }

    /// Inserts a configuration, or replaces only the endpoint and credentials of an existing
    /// entry while keeping its health annotations.
    pub fn upsert_endpoint(&self, config: SinkConfig) {
        let key = SinkKey::new(&config.owner_id, &config.sink_id);

        let (event, len) = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(key)
                .and_modify(|entry| {
                    entry.url.clone_from(&config.url);
                    entry.username.clone_from(&config.username);
                    entry.password.clone_from(&config.password);
                })
                .or_insert(config);
            (SinkStateChanged::from(&*entry), entries.len())
        };

        self.publish(event, len);
    }

    /// Evicts the sink and publishes it as [`Idle`](SinkState::Idle).
    pub fn remove(&self, owner_id: &str, sink_id: &str) -> Result<SinkConfig, CacheError> {
        let (removed, len) = {
            let mut entries = self.entries.lock();
            (
                entries.remove(&SinkKey::new(owner_id, sink_id)),
                entries.len(),
            )
        };

        let Some(mut config) = removed else {
            return Err(CacheError::NotFound {
                owner_id: owner_id.to_owned(),
                sink_id: sink_id.to_owned(),
            });
        };

        config.state = SinkState::Idle;
        self.publish(SinkStateChanged::from(&config), len);
        Ok(config)
    }

    /// Evicts the sink if `predicate` holds for the cached entry.
    ///
    /// The predicate is evaluated under the lock, so concurrent updates of the entry are taken
    /// into account. Publishes the sink as [`Idle`](SinkState::Idle) when it was evicted.
    pub fn remove_if<F>(&self, owner_id: &str, sink_id: &str, predicate: F) -> Option<SinkConfig>
    where
        F: FnOnce(&SinkConfig) -> bool,
    {
        let key = SinkKey::new(owner_id, sink_id);

        let (removed, len) = {
            let mut entries = self.entries.lock();
            if !entries.get(&key).is_some_and(predicate) {
                return None;
            }
            (entries.remove(&key), entries.len())
        };

        let mut config = removed?;
        config.state = SinkState::Idle;
        self.publish(SinkStateChanged::from(&config), len);
        Some(config)
    }

    /// Inserts the configuration unless the sink is already cached.
    ///
    /// Returns the cached entry. An event is only published if the configuration was inserted.
    pub fn add_if_absent(&self, config: SinkConfig) -> SinkConfig {
        let key = SinkKey::new(&config.owner_id, &config.sink_id);

        let mut entries = self.entries.lock();
        let config = match entries.entry(key) {
            Entry::Occupied(entry) => return entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(config).clone(),
        };
        let len = entries.len();
        drop(entries);

        self.publish(SinkStateChanged::from(&config), len);
        config
    }

    /// Records the outcome of a delivery at `time` on the cached entry.
    ///
    /// Only the health annotations are written, the endpoint and credentials of the entry are
    /// left as they are. If state and message match the stored ones, nothing is published, and
    /// only an [`Active`](SinkState::Active) sink gets its write time refreshed.
    pub fn set_health(
        &self,
        owner_id: &str,
        sink_id: &str,
        state: SinkState,
        msg: String,
        time: DateTime<Utc>,
    ) -> HealthUpdate {
        let (event, len) = {
            let mut entries = self.entries.lock();
            let len = entries.len();
            let Some(entry) = entries.get_mut(&SinkKey::new(owner_id, sink_id)) else {
                return HealthUpdate::Missing;
            };

            if entry.state == state && entry.msg == msg {
                if state == SinkState::Active {
                    entry.last_remote_write = Some(time);
                }
                return HealthUpdate::Unchanged;
            }

            entry.state = state;
            entry.msg = msg;
            entry.last_remote_write = Some(time);
            (SinkStateChanged::from(&*entry), len)
        };

        self.publish(event, len);
        HealthUpdate::Changed
    }

    /// Returns all cached sinks of an owner, sorted by sink id.
    pub fn get_all(&self, owner_id: &str) -> Vec<SinkConfig> {
        let mut configs: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter(|config| config.owner_id == owner_id)
            .cloned()
            .collect();

        configs.sort_by(|a, b| a.sink_id.cmp(&b.sink_id));
        configs
    }

    /// Returns all owners with at least one cached sink.
    pub fn get_all_owners(&self) -> Vec<String> {
        let owners: BTreeSet<_> = self
            .entries
            .lock()
            .keys()
            .map(|key| key.owner_id.clone())
            .collect();

        owners.into_iter().collect()
    }

    /// Returns the number of cached sinks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no sinks are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, config: SinkConfig) {
        let event = SinkStateChanged::from(&config);
        let key = SinkKey::new(&config.owner_id, &config.sink_id);

        let len = {
            let mut entries = self.entries.lock();
            entries.insert(key, config);
            entries.len()
        };

        self.publish(event, len);
    }

    fn publish(&self, event: SinkStateChanged, len: usize) {
        metric!(gauge(SinkerGauges::CachedSinks) = len as u64);
        self.events.send(event);
    }
}

impl fmt::Debug for SinkCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkCache")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn cache() -> (SinkCache, UnboundedReceiver<EventProducer>) {
        let (addr, rx) = Addr::custom();
        (SinkCache::new(addr), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<EventProducer>) -> Vec<(String, SinkState)> {
        let mut events = Vec::new();
        while let Ok(EventProducer(event)) = rx.try_recv() {
            events.push((event.sink_id, event.state));
        }
        events
    }

    #[test]
    fn test_get_missing() {
        let (cache, _rx) = cache();

        assert!(!cache.exists("o1", "s1"));
        let error = cache.get("o1", "s1").unwrap_err();
        assert_eq!(error.to_string(), "sink s1 of owner o1 not found");
    }

    #[test]
    fn test_add_edit_remove() {
        let (cache, mut rx) = cache();

        cache.add(SinkConfig::new("o1", "s1", "http://sink/api/v1/write"));
        assert!(cache.exists("o1", "s1"));
        assert_eq!(cache.get("o1", "s1").unwrap().state, SinkState::Unknown);

        let mut config = cache.get("o1", "s1").unwrap();
        config.state = SinkState::Error;
        config.msg = "500 Internal Server Error: boom".to_owned();
        cache.edit(config.clone());
        assert_eq!(cache.get("o1", "s1").unwrap(), config);

        let removed = cache.remove("o1", "s1").unwrap();
        assert_eq!(removed.state, SinkState::Idle);
        assert!(cache.is_empty());
        assert!(cache.remove("o1", "s1").is_err());

        assert_eq!(
            drain(&mut rx),
            [
                ("s1".to_owned(), SinkState::Unknown),
                ("s1".to_owned(), SinkState::Error),
                ("s1".to_owned(), SinkState::Idle),
            ]
        );
    }

    #[test]
    fn test_owners_are_isolated() {
        let (cache, _rx) = cache();

        cache.add(SinkConfig::new("o2", "s1", "http://a"));
        cache.add(SinkConfig::new("o1", "s2", "http://b"));
        cache.add(SinkConfig::new("o1", "s1", "http://c"));

        assert_eq!(cache.get_all_owners(), ["o1", "o2"]);
        let sinks: Vec<_> = cache.get_all("o1").into_iter().map(|c| c.url).collect();
        assert_eq!(sinks, ["http://c", "http://b"]);
        assert_eq!(cache.get("o2", "s1").unwrap().url, "http://a");
        assert!(cache.get_all("o3").is_empty());
    }

    #[test]
    fn test_upsert_endpoint_keeps_health() {
        let (cache, mut rx) = cache();

        let mut config = SinkConfig::new("o1", "s1", "http://old");
        config.state = SinkState::Active;
        config.last_remote_write = Some(Utc::now());
        cache.add(config.clone());

        let mut update = SinkConfig::new("o1", "s1", "http://new");
        update.username = "user".to_owned();
        cache.upsert_endpoint(update);

        let cached = cache.get("o1", "s1").unwrap();
        assert_eq!(cached.url, "http://new");
        assert_eq!(cached.username, "user");
        assert_eq!(cached.state, SinkState::Active);
        assert_eq!(cached.last_remote_write, config.last_remote_write);

        cache.upsert_endpoint(SinkConfig::new("o1", "s2", "http://other"));
        assert_eq!(cache.get("o1", "s2").unwrap().state, SinkState::Unknown);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn test_set_health() {
        let (cache, mut rx) = cache();
        let mut config = SinkConfig::new("o1", "s1", "http://sink");
        config.password = "secret".to_owned();
        cache.add(config);
        drain(&mut rx);

        let first = Utc::now();
        let update = cache.set_health("o1", "s1", SinkState::Active, String::new(), first);
        assert_eq!(update, HealthUpdate::Changed);

        // Staying active only refreshes the write time.
        let later = first + chrono::TimeDelta::seconds(5);
        let update = cache.set_health("o1", "s1", SinkState::Active, String::new(), later);
        assert_eq!(update, HealthUpdate::Unchanged);

        let cached = cache.get("o1", "s1").unwrap();
        assert_eq!(cached.last_remote_write, Some(later));
        assert_eq!(cached.password, "secret");

        let update = cache.set_health("o1", "s2", SinkState::Error, "boom".to_owned(), later);
        assert_eq!(update, HealthUpdate::Missing);
        assert!(!cache.exists("o1", "s2"));

        assert_eq!(drain(&mut rx), [("s1".to_owned(), SinkState::Active)]);
    }

    #[test]
    fn test_set_health_repeated_error() {
        let (cache, mut rx) = cache();
        cache.add(SinkConfig::new("o1", "s1", "http://sink"));
        drain(&mut rx);

        let first = Utc::now();
        let later = first + chrono::TimeDelta::seconds(5);
        cache.set_health("o1", "s1", SinkState::Error, "boom".to_owned(), first);
        let update = cache.set_health("o1", "s1", SinkState::Error, "boom".to_owned(), later);

        assert_eq!(update, HealthUpdate::Unchanged);
        assert_eq!(cache.get("o1", "s1").unwrap().last_remote_write, Some(first));
        assert_eq!(drain(&mut rx), [("s1".to_owned(), SinkState::Error)]);
    }

    #[test]
    fn test_add_if_absent_keeps_existing() {
        let (cache, mut rx) = cache();

        let added = cache.add_if_absent(SinkConfig::new("o1", "s1", "http://first"));
        assert_eq!(added.url, "http://first");
        cache.set_health("o1", "s1", SinkState::Active, String::new(), Utc::now());

        let cached = cache.add_if_absent(SinkConfig::new("o1", "s1", "http://second"));
        assert_eq!(cached.url, "http://first");
        assert_eq!(cached.state, SinkState::Active);

        assert_eq!(
            drain(&mut rx),
            [
                ("s1".to_owned(), SinkState::Unknown),
                ("s1".to_owned(), SinkState::Active),
            ]
        );
    }

    #[test]
    fn test_remove_if() {
        let (cache, mut rx) = cache();
        cache.add(SinkConfig::new("o1", "s1", "http://sink"));
        drain(&mut rx);

        assert!(cache.remove_if("o1", "s1", |_| false).is_none());
        assert!(cache.exists("o1", "s1"));
        assert!(cache.remove_if("o1", "s2", |_| true).is_none());

        let removed = cache.remove_if("o1", "s1", |config| config.url == "http://sink");
        assert_eq!(removed.unwrap().state, SinkState::Idle);
        assert!(!cache.exists("o1", "s1"));
        assert_eq!(drain(&mut rx), [("s1".to_owned(), SinkState::Idle)]);
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = SinkConfig::new("o1", "s1", "http://sink");
        config.password = "hunter2".to_owned();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
