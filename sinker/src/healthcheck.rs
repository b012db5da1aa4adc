use std::time::Duration;

use anyhow::{Result, format_err};
use reqwest::blocking::Client;
use sinker_config::Config;

use crate::cliapp::HealthcheckArgs;

/// Queries the health endpoint of a running sinker.
///
/// Fails if the sinker cannot be reached or reports itself as unhealthy.
pub fn healthcheck(config: &Config, args: &HealthcheckArgs) -> Result<()> {
    let addr = args.addr.unwrap_or_else(|| config.listen_addr());

    let client = Client::builder()
        .timeout(Some(Duration::from_secs(args.timeout)))
        .build()
        .unwrap_or_default();

    let response = client
        .get(format!("http://{addr}/health/{}", args.mode.as_str()))
        .send();

    match response {
        Ok(response) => {
            if response.status().is_success() {
                Ok(())
            } else {
                sinker_log::error!("sinker is unhealthy. Status code: {}", response.status());
                Err(format_err!(
                    "sinker is unhealthy. Status code: {}",
                    response.status()
                ))
            }
        }
        Err(err) => {
            sinker_log::error!("sinker is unhealthy. Error: {err}");
            Err(err.into())
        }
    }
}
