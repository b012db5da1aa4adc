//! Abstraction over Redis, used for the sink event streams.
//!
//! Both single instances and clusters are supported through [`AsyncRedisPool`]. Connections are
//! pooled and implement [`redis::aio::ConnectionLike`], so they can be passed to any command.
#![warn(missing_docs)]

mod config;
mod pool;

pub use self::config::*;
pub use self::pool::*;
