//! Metric model and conversion for agent telemetry.
//!
//! Agents run measurement backends and publish their metrics as RPC envelopes on the message bus.
//! This crate defines the types of that protocol ([`MetricsEnvelope`], [`PolicyMetrics`]), the
//! canonical model every backend payload is converted into ([`TimeSeries`]), the registry of
//! backend converters ([`BackendRegistry`]), and the Prometheus remote-write encoding of converted
//! series ([`remote_write`]).
//!
//! # Conversion
//!
//! A converter turns the raw payload of one policy into a flat list of time series. Converters
//! are stateless and are invoked concurrently for different payloads:
//!
//! ```
//! use sinker_metrics::{AgentIdentity, BackendRegistry, PolicyMetrics};
//!
//! let registry = BackendRegistry::with_default_backends();
//! let converter = registry.get_backend("pktvisor").unwrap();
//!
//! let agent = AgentIdentity {
//!     thing_id: "agent-1".to_owned(),
//!     name: "edge-01".to_owned(),
//!     ..Default::default()
//! };
//!
//! let payload = PolicyMetrics {
//!     policy_id: "policy-1".to_owned(),
//!     policy_name: "dns".to_owned(),
//!     format: "json".to_owned(),
//!     data: br#"{"policy_dns": {"dns": {"wire_packets": {"total": 9}}}}"#.to_vec(),
//!     ..Default::default()
//! };
//!
//! let series = converter.process_metrics(&agent, "agent-1", &payload).unwrap();
//! assert_eq!(series[0].name(), Some("dns_wire_packets_total"));
//! ```
#![warn(missing_docs)]

mod backend;
mod error_boundary;
mod model;
mod pktvisor;
mod protocol;
mod statsd;

pub mod remote_write;

pub use self::backend::*;
pub use self::error_boundary::*;
pub use self::model::*;
pub use self::pktvisor::*;
pub use self::protocol::*;
