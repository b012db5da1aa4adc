use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sinker_redis::RedisConfig;
use url::Url;

use crate::byte_size::ByteSize;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: None,
        }
    }

    #[inline]
    fn wrap<E>(error: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: Some(Box::new(error)),
        }
    }

    #[inline]
    fn for_field<E>(error: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(error, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize + Default {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    ///
    /// A missing file yields the defaults.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path));
            }
        };

        match Self::format() {
            ConfigFormat::Yaml => {
                // An empty file is not a valid YAML document for serde, but a valid config.
                let content = io::read_to_string(io::BufReader::new(f)).map_err(|e| {
                    ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path)
                })?;

                if content.trim().is_empty() {
                    return Ok(Self::default());
                }

                serde_yaml::from_str(&content)
                    .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
            }
        }
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the HTTP server should bind to (network interface).
    pub host: Option<String>,
    /// The port to bind for the HTTP server.
    pub port: Option<String>,
    /// The NATS server url.
    pub nats_url: Option<String>,
    /// The redis server url.
    pub redis_url: Option<String>,
    /// Base url of the fleet service.
    pub fleet_url: Option<String>,
    /// Base url of the policies service.
    pub policies_url: Option<String>,
    /// Base url of the sinks service.
    pub sinks_url: Option<String>,
    /// Shutdown timeout in seconds.
    pub shutdown_timeout: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup").is_ok_and(|s| s.contains("/docker"))
}

/// Default value for the "bind" configuration.
fn default_host() -> IpAddr {
    if is_docker() {
        // Docker images rely on this service being exposed
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }
}

fn local_url(port: u16) -> Url {
    Url::parse(&format!("http://127.0.0.1:{port}/")).expect("local url is valid")
}

/// Sinker specific configuration values.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Sinker {
    /// The host the HTTP server should bind to (network interface).
    pub host: IpAddr,
    /// The port to bind for the HTTP server serving `/metrics` and health checks.
    pub port: u16,
}

impl Default for Sinker {
    fn default() -> Self {
        Sinker {
            host: default_host(),
            port: 9995,
        }
    }
}

/// Connection to the message bus the agents publish to.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Nats {
    /// The url of the NATS server.
    pub url: String,
    /// The subject pattern for agent metrics, `channels.<channel>.be.<backend>.m.<shard>`.
    pub subject: String,
}

impl Default for Nats {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_owned(),
            subject: "channels.*.be.*.m.*".to_owned(),
        }
    }
}

/// Redis stream names and consumer group settings.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Streams {
    /// Stream carrying sink CRUD events from the sinks service.
    pub sinks_stream: String,
    /// Stream this service publishes sink state changes to.
    pub sinker_stream: String,
    /// Consumer group used to read the sinks stream.
    pub consumer_group: String,
    /// Name of this consumer within the group. Defaults to the hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_name: Option<String>,
    /// Approximate maximum length of the state stream.
    pub max_len: usize,
    /// Maximum number of entries read per call.
    pub batch_size: usize,
    /// Milliseconds to block waiting for new entries.
    pub block_ms: u64,
}

impl Default for Streams {
    fn default() -> Self {
        Self {
            sinks_stream: "orb.sinks".to_owned(),
            sinker_stream: "orb.sinker".to_owned(),
            consumer_group: "orb.sinker".to_owned(),
            consumer_name: None,
            max_len: 1000,
            batch_size: 100,
            block_ms: 5000,
        }
    }
}

/// Controls various limits
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Limits {
    /// The maximum payload size of an agent message.
    pub max_message_size: ByteSize,
    /// The maximum number of agent messages handled concurrently.
    pub max_concurrent_messages: usize,
    /// The maximum number of seconds to wait for pending work after receiving a shutdown signal.
    pub shutdown_timeout: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_size: ByteSize::from_kibibytes(100),
            max_concurrent_messages: 256,
            shutdown_timeout: 10,
        }
    }
}

/// Controls the sink state cache.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Cache {
    /// Seconds without a successful remote write after which an active sink is idle.
    pub idle_timeout: u64,
    /// Interval in seconds between two sweeps for idle sinks.
    pub check_interval: u64,
    /// Whether sinks in the error state are evicted after the idle timeout as well.
    pub evict_errored: bool,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            idle_timeout: 1800,
            check_interval: 300,
            evict_errored: false,
        }
    }
}

/// Controls outgoing HTTP requests.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Http {
    /// Timeout for remote write and collaborator requests in seconds.
    pub timeout: u64,
    /// Timeout for establishing connections in seconds.
    pub connection_timeout: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout: 30,
            connection_timeout: 10,
        }
    }
}

/// Base urls of the services holding fleets, policies and sinks.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Collaborators {
    /// Resolves agents by their message bus channel.
    pub fleet_url: Url,
    /// Resolves datasets to sink ids.
    pub policies_url: Url,
    /// Holds sink configurations and credentials.
    pub sinks_url: Url,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            fleet_url: local_url(8203),
            policies_url: local_url(8202),
            sinks_url: local_url(8201),
        }
    }
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Metrics {
    /// Prefix for all metrics.
    pub prefix: String,
    /// Default tags to apply to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            prefix: "sinker".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    sinker: Sinker,
    #[serde(default)]
    nats: Nats,
    #[serde(default)]
    redis: RedisConfig,
    #[serde(default)]
    streams: Streams,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    cache: Cache,
    #[serde(default)]
    http: Http,
    #[serde(default)]
    collaborators: Collaborators,
    #[serde(default)]
    logging: sinker_log::LogConfig,
    #[serde(default)]
    sentry: sinker_log::SentryConfig,
    #[serde(default)]
    metrics: Metrics,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let sinker = &mut self.values.sinker;

        if let Some(host) = overrides.host {
            sinker.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            sinker.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(nats_url) = overrides.nats_url {
            self.values.nats.url = nats_url;
        }

        if let Some(redis_url) = overrides.redis_url {
            self.values.redis = self.values.redis.with_server(redis_url);
        }

        let collaborators = &mut self.values.collaborators;
        if let Some(fleet_url) = overrides.fleet_url {
            collaborators.fleet_url = fleet_url
                .parse()
                .map_err(|err| ConfigError::for_field(err, "fleet_url"))?;
        }

        if let Some(policies_url) = overrides.policies_url {
            collaborators.policies_url = policies_url
                .parse()
                .map_err(|err| ConfigError::for_field(err, "policies_url"))?;
        }

        if let Some(sinks_url) = overrides.sinks_url {
            collaborators.sinks_url = sinks_url
                .parse()
                .map_err(|err| ConfigError::for_field(err, "sinks_url"))?;
        }

        if let Some(shutdown_timeout) = overrides.shutdown_timeout {
            self.values.limits.shutdown_timeout = shutdown_timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shutdown_timeout"))?;
        }

        if let Some(log_level) = overrides.log_level {
            self.values.logging.level = log_level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        (self.values.sinker.host, self.values.sinker.port).into()
    }

    /// Returns the url of the NATS server.
    pub fn nats_url(&self) -> &str {
        &self.values.nats.url
    }

    /// Returns the subject pattern agents publish metrics on.
    pub fn nats_subject(&self) -> &str {
        &self.values.nats.subject
    }

    /// Returns the redis configuration for the event streams.
    pub fn redis(&self) -> &RedisConfig {
        &self.values.redis
    }

    /// Returns the name of the stream carrying sink CRUD events.
    pub fn sinks_stream(&self) -> &str {
        &self.values.streams.sinks_stream
    }

    /// Returns the name of the stream receiving sink state changes.
    pub fn sinker_stream(&self) -> &str {
        &self.values.streams.sinker_stream
    }

    /// Returns the consumer group reading the sinks stream.
    pub fn consumer_group(&self) -> &str {
        &self.values.streams.consumer_group
    }

    /// Returns the name of this consumer within the group.
    ///
    /// Falls back to the hostname, or `sinker` if it cannot be determined.
    pub fn consumer_name(&self) -> String {
        if let Some(name) = &self.values.streams.consumer_name {
            return name.clone();
        }

        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "sinker".to_owned())
    }

    /// Returns the approximate maximum length of the state stream.
    pub fn stream_max_len(&self) -> usize {
        self.values.streams.max_len
    }

    /// Returns the maximum number of stream entries read at once.
    pub fn stream_batch_size(&self) -> usize {
        self.values.streams.batch_size
    }

    /// Returns how long a stream read blocks waiting for new entries.
    pub fn stream_block(&self) -> Duration {
        Duration::from_millis(self.values.streams.block_ms)
    }

    /// Returns the maximum size of an agent message payload in bytes.
    pub fn max_message_size(&self) -> usize {
        self.values.limits.max_message_size.as_bytes()
    }

    /// Returns the maximum number of agent messages handled concurrently.
    pub fn max_concurrent_messages(&self) -> usize {
        self.values.limits.max_concurrent_messages
    }

    /// Returns the maximum time to wait for pending work on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }

    /// Returns the time without successful writes after which an active sink is idle.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.values.cache.idle_timeout)
    }

    /// Returns the interval between two idle sweeps.
    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.values.cache.check_interval)
    }

    /// Returns `true` if errored sinks are evicted after the idle timeout as well.
    pub fn evict_errored(&self) -> bool {
        self.values.cache.evict_errored
    }

    /// Returns the timeout for outgoing HTTP requests.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.timeout)
    }

    /// Returns the timeout for establishing outgoing HTTP connections.
    pub fn http_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.connection_timeout)
    }

    /// Returns the base url of the fleet service.
    pub fn fleet_url(&self) -> &Url {
        &self.values.collaborators.fleet_url
    }

    /// Returns the base url of the policies service.
    pub fn policies_url(&self) -> &Url {
        &self.values.collaborators.policies_url
    }

    /// Returns the base url of the sinks service.
    pub fn sinks_url(&self) -> &Url {
        &self.values.collaborators.sinks_url
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &sinker_log::LogConfig {
        &self.values.logging
    }

    /// Returns the Sentry configuration.
    pub fn sentry(&self) -> &sinker_log::SentryConfig {
        &self.values.sentry
    }

    /// Returns the prefix for internal metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for internal metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.listen_addr().port(), 9995);
        assert_eq!(config.nats_subject(), "channels.*.be.*.m.*");
        assert_eq!(config.sinks_stream(), "orb.sinks");
        assert_eq!(config.sinker_stream(), "orb.sinker");
        assert_eq!(config.max_message_size(), 102_400);
        assert_eq!(config.idle_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.idle_check_interval(), Duration::from_secs(5 * 60));
        assert!(!config.evict_errored());
        assert_eq!(config.fleet_url().as_str(), "http://127.0.0.1:8203/");
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("config.yml")).unwrap();
        writeln!(
            file,
            r#"
sinker:
  port: 9000
limits:
  max_message_size: 64KiB
cache:
  idle_timeout: 60
  evict_errored: true
collaborators:
  sinks_url: "http://sinks:8201/api/"
streams:
  consumer_name: replica-1
"#
        )
        .unwrap();

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.max_message_size(), 65_536);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert!(config.evict_errored());
        assert_eq!(config.sinks_url().as_str(), "http://sinks:8201/api/");
        assert_eq!(config.consumer_name(), "replica-1");
        // Untouched sections keep their defaults.
        assert_eq!(config.sinker_stream(), "orb.sinker");
    }

    #[test]
    fn test_missing_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Config::config_exists(dir.path()));
        assert!(Config::from_path(dir.path()).is_ok());

        fs::File::create(dir.path().join("config.yml")).unwrap();
        assert!(Config::config_exists(dir.path()));
        assert!(Config::from_path(dir.path()).is_ok());
    }

    #[test]
    fn test_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yml"), "limits: [1, 2").unwrap();

        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.to_string().contains("config.yml"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                host: Some("0.0.0.0".to_owned()),
                port: Some("8080".to_owned()),
                redis_url: Some("redis://redis:6379".to_owned()),
                fleet_url: Some("http://fleet:8203".to_owned()),
                shutdown_timeout: Some("3".to_owned()),
                log_level: Some("debug".to_owned()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.listen_addr(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(
            config.redis(),
            &RedisConfig::Single("redis://redis:6379".to_owned())
        );
        assert_eq!(config.fleet_url().as_str(), "http://fleet:8203/");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(3));
        assert_eq!(config.logging().level, sinker_log::Level::Debug);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                port: Some("not-a-port".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field port)");
    }

    #[test]
    fn test_from_json_value() {
        let config = Config::from_json_value(serde_json::json!({
            "nats": {"url": "nats://bus:4222"},
            "metrics": {"prefix": "sinker_test"}
        }))
        .unwrap();

        assert_eq!(config.nats_url(), "nats://bus:4222");
        assert_eq!(config.metrics_prefix(), "sinker_test");
    }

    #[test]
    fn test_yaml_roundtrip_of_defaults() {
        let yaml = Config::default().to_yaml_string().unwrap();
        assert!(yaml.contains("sinks_stream: orb.sinks"));
        assert!(yaml.contains("max_message_size: 100KiB"));
    }
}
