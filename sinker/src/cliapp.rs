//! This module implements the definition of the command line app.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Forwards fleet agent metrics to Prometheus remote-write sinks.
#[derive(Debug, Parser)]
#[command(name = "sinker", version, about)]
pub struct Cli {
    /// The path to the config folder.
    #[arg(short, long, global = true, env = "SINKER_CONFIG", default_value = ".sinker")]
    pub config: PathBuf,

    /// The command to execute. Defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the sinker.
    Run(RunArgs),
    /// Manage the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Check the health of a running sinker.
    Healthcheck(HealthcheckArgs),
}

/// Options overriding values of the config file.
#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// The host the HTTP server binds to.
    #[arg(long, env = "SINKER_HOST", value_name = "HOST")]
    pub host: Option<String>,
    /// The port the HTTP server binds to.
    #[arg(long, env = "SINKER_PORT", value_name = "PORT")]
    pub port: Option<String>,
    /// The url of the NATS server.
    #[arg(long, env = "SINKER_NATS_URL", value_name = "URL")]
    pub nats_url: Option<String>,
    /// The url of the redis server.
    #[arg(long, env = "SINKER_REDIS_URL", value_name = "URL")]
    pub redis_url: Option<String>,
    /// The base url of the fleet service.
    #[arg(long, env = "SINKER_FLEET_URL", value_name = "URL")]
    pub fleet_url: Option<String>,
    /// The base url of the policies service.
    #[arg(long, env = "SINKER_POLICIES_URL", value_name = "URL")]
    pub policies_url: Option<String>,
    /// The base url of the sinks service.
    #[arg(long, env = "SINKER_SINKS_URL", value_name = "URL")]
    pub sinks_url: Option<String>,
    /// Seconds to wait for in-flight work on shutdown.
    #[arg(long, env = "SINKER_SHUTDOWN_TIMEOUT", value_name = "SECONDS")]
    pub shutdown_timeout: Option<String>,
    /// The log level.
    #[arg(long, env = "SINKER_LOG_LEVEL", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the entire effective config.
    Show {
        /// The output format.
        #[arg(short, long, value_enum, default_value_t = ConfigFormat::Yaml)]
        format: ConfigFormat,
        #[command(flatten)]
        overrides: RunArgs,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Debug,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HealthMode {
    Live,
    Ready,
}

impl HealthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Ready => "ready",
        }
    }
}

#[derive(Debug, Args)]
pub struct HealthcheckArgs {
    /// The kind of health check.
    #[arg(short, long, value_enum, default_value_t = HealthMode::Ready)]
    pub mode: HealthMode,
    /// Request timeout in seconds.
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
    /// The address of the sinker. Defaults to the listen address of the config.
    #[arg(long, value_name = "ADDR")]
    pub addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_verify_app() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command() {
        let cli = Cli::try_parse_from(["sinker"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "sinker",
            "--config",
            "/etc/sinker",
            "run",
            "--port",
            "9000",
            "--nats-url",
            "nats://bus:4222",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/sinker"));
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.port.as_deref(), Some("9000"));
        assert_eq!(args.nats_url.as_deref(), Some("nats://bus:4222"));
        assert_eq!(args.host, None);
    }

    #[test]
    fn test_healthcheck_defaults() {
        let cli = Cli::try_parse_from(["sinker", "healthcheck", "--mode", "live"]).unwrap();
        let Some(Command::Healthcheck(args)) = cli.command else {
            panic!("expected healthcheck command");
        };
        assert_eq!(args.mode, HealthMode::Live);
        assert_eq!(args.timeout, 5);
        assert!(args.addr.is_none());
    }

    #[test]
    fn test_config_show_format() {
        let cli = Cli::try_parse_from(["sinker", "config", "show", "--format", "debug"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Show {
                format: ConfigFormat::Debug,
                ..
            }))
        ));
    }
}
