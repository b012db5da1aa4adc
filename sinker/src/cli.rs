use anyhow::{Context, Result};
use clap::Parser;
use sinker_config::{Config, OverridableConfig};

use crate::cliapp::{Cli, Command, ConfigCommand, ConfigFormat, RunArgs};
use crate::{healthcheck, setup};

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_path(&cli.config)
        .with_context(|| format!("could not load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            config.apply_override(extract_overrides(args))?;
            run(config)
        }
        Command::Config(ConfigCommand::Show { format, overrides }) => {
            config.apply_override(extract_overrides(overrides))?;
            show_config(&config, format)
        }
        Command::Healthcheck(args) => {
            // Only errors are logged, they end up on stderr next to the exit code.
            sinker_log::init(config.logging(), &Default::default());
            healthcheck::healthcheck(&config, &args)
        }
    }
}

/// Converts the override arguments into the structure understood by the config.
fn extract_overrides(args: RunArgs) -> OverridableConfig {
    let RunArgs {
        host,
        port,
        nats_url,
        redis_url,
        fleet_url,
        policies_url,
        sinks_url,
        shutdown_timeout,
        log_level,
    } = args;

    OverridableConfig {
        host,
        port,
        nats_url,
        redis_url,
        fleet_url,
        policies_url,
        sinks_url,
        shutdown_timeout,
        log_level,
    }
}

#[allow(clippy::print_stdout, reason = "prints the config on request")]
fn show_config(config: &Config, format: ConfigFormat) -> Result<()> {
    match format {
        ConfigFormat::Yaml => print!("{}", config.to_yaml_string()?),
        ConfigFormat::Debug => println!("{config:#?}"),
    }

    Ok(())
}

pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config);

    sinker_server::run(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let args = RunArgs {
            port: Some("9000".to_owned()),
            nats_url: Some("nats://bus:4222".to_owned()),
            ..Default::default()
        };

        let mut config = Config::default();
        config.apply_override(extract_overrides(args)).unwrap();

        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.nats_url(), "nats://bus:4222");
    }

    #[test]
    fn test_invalid_override() {
        let args = RunArgs {
            port: Some("not-a-port".to_owned()),
            ..Default::default()
        };

        let mut config = Config::default();
        assert!(config.apply_override(extract_overrides(args)).is_err());
    }
}
