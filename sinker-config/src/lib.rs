//! Configuration for the sinker CLI and server.
//!
//! The configuration is read from `config.yml` inside a config folder. Every section is optional
//! and falls back to defaults, so an empty or missing file yields a working local setup. Values
//! can further be overridden from the command line or environment through [`OverridableConfig`].
#![warn(missing_docs)]

mod byte_size;
mod config;

pub use self::byte_size::*;
pub use self::config::*;
