//! The sinker binary.
//!
//! The sinker subscribes to the metrics published by fleet agents and writes them to the
//! Prometheus remote-write sinks configured by their owners. This binary wraps the
//! [`sinker_server`] crate in a command line interface.
//!
//! # Usage
//!
//! ```text
//! sinker [--config <dir>] <command>
//! ```
//!
//! The configuration is read from `<dir>/config.yml`. Missing files yield the defaults, and most
//! connection settings can be overridden with `SINKER_*` environment variables.
//!
//! - `run`: starts the sinker and blocks until it is shut down. This is the default command.
//! - `config show`: prints the effective configuration.
//! - `healthcheck`: queries the health endpoints of a running sinker.
#![warn(missing_docs)]

mod cli;
mod cliapp;
mod healthcheck;
mod setup;

use std::process;

use sinker_log::Hub;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            sinker_log::ensure_error(&err);
            1
        }
    };

    Hub::current().client().map(|x| x.close(None));
    process::exit(exit_code);
}
