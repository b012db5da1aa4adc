use anyhow::Result;
use sinker_config::Config;
use sinker_stats::MetricsClientConfig;

/// Validates limits that would stall the pipeline if misconfigured.
pub fn check_config(config: &Config) -> Result<()> {
    if config.max_concurrent_messages() == 0 {
        anyhow::bail!("`limits.max_concurrent_messages` must be greater than 0");
    }

    if config.max_message_size() == 0 {
        anyhow::bail!("`limits.max_message_size` must be greater than 0");
    }

    if config.stream_batch_size() == 0 {
        anyhow::bail!("`streams.batch_size` must be greater than 0");
    }

    if config.idle_check_interval().is_zero() {
        anyhow::bail!("`cache.check_interval` must be greater than 0");
    }

    Ok(())
}

/// Initialize the logging system and error reporting.
pub fn init_logging(config: &Config) {
    sinker_log::init(config.logging(), config.sentry());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        sinker_log::info!("launching sinker without config folder");
    } else {
        sinker_log::info!(
            "launching sinker from config folder {}",
            config.path().display()
        );
    }
    sinker_log::info!("  listen address: {}", config.listen_addr());
    sinker_log::info!("  nats: {} ({})", config.nats_url(), config.nats_subject());
    sinker_log::info!("  consumer: {}", config.consumer_name());
    sinker_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) {
    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    sinker_stats::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        default_tags,
    });
}
