//! Error reporting and logging facade for the sinker.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with [`logging`](LogConfig) and
//! [`sentry`](SentryConfig) configuration. The configuration implements `serde` traits, so it can
//! be obtained from configuration files.
//!
//! ```ignore
//! use sinker_log::{LogConfig, SentryConfig};
//!
//! let log_config = LogConfig {
//!     enable_backtraces: true,
//!     ..LogConfig::default()
//! };
//!
//! let sentry_config = SentryConfig::default();
//!
//! sinker_log::init(&log_config, &sentry_config);
//! ```
//!
//! # Logging
//!
//! Logging goes through the five `tracing` macros re-exported here: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`]. Structured fields are preferred over formatting values
//! into the message.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior. This will also be reported to Sentry.
//! - [`warn!`] for undesirable behavior, such as dropped agent messages.
//! - [`info!`] for messages relevant to the average operator.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Logging Error Types
//!
//! Errors are attached as a field so that the full chain of causes ends up in the output:
//!
//! ```
//! use std::io::{Error, ErrorKind};
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! sinker_log::error!(error = &custom_error as &dyn std::error::Error, "operation failed");
//! ```
//!
//! For plain formatting, [`LogError`] prints an error together with its causes.
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It enables test mode of the logger and customizes log levels
//! for the current crate.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     sinker_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{
    Instrument, debug, debug_span, error, error_span, info, info_span, trace, warn,
};

// Expose the minimal error reporting API.
#[cfg(feature = "init")]
#[doc(inline)]
pub use sentry::{Hub, capture_error};
