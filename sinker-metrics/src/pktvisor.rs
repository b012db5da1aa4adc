use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};
use sinker_stats::metric;

use crate::statsd::{MetricCounters, MetricHistograms};
use crate::{
    AgentIdentity, BackendConverter, ConvertError, Datapoint, Label, METRIC_NAME_LABEL,
    PolicyMetrics, TimeSeries,
};

/// Metadata about the collection window, never emitted as a series.
const PERIOD_KEY: &str = "period";

const DEVICES_KEY: &str = "devices";
const INTERFACES_KEY: &str = "interfaces";

/// Percentile keys and the value of their `quantile` label, in emission order.
const QUANTILES: [(&str, &str); 4] = [
    ("p50", "0.5"),
    ("p90", "0.9"),
    ("p95", "0.95"),
    ("p99", "0.99"),
];

/// Labels set by the converter that tags may not override.
const RESERVED_LABELS: &[&str] = &[
    METRIC_NAME_LABEL,
    "instance",
    "agent_id",
    "agent",
    "policy_id",
    "policy",
    "handler",
    "quantile",
    "device",
    "device_interface",
];

/// Converter for pktvisor style payloads.
///
/// The payload is a JSON object keyed by handler. Each handler holds an arbitrarily nested object
/// that is flattened into one series per numeric leaf:
///
///  - Scalars become a series named after their path below the handler, joined by `_`.
///  - Top-K lists (`top_*` lists of `{name, estimate}`) become one series per element, with an
///    extra label keyed by the kind of the list.
///  - Percentile objects (`{p50, p90, p95, p99}`) become one series per percentile with a
///    `quantile` label.
///  - `devices.<device>.interfaces.<interface>` nesting is removed from the name and recorded in
///    the `device` and `device_interface` labels instead.
///
/// Merged agent and fleet tags are appended to every series. Fleet tags win on collision.
#[derive(Clone, Copy, Debug, Default)]
pub struct PktvisorConverter;

impl BackendConverter for PktvisorConverter {
    fn process_metrics(
        &self,
        agent: &AgentIdentity,
        agent_id: &str,
        payload: &PolicyMetrics,
    ) -> Result<Vec<TimeSeries>, ConvertError> {
        let series = convert(agent, agent_id, payload, Utc::now().timestamp_millis())?;
        metric!(
            histogram(MetricHistograms::SeriesPerPayload) = series.len() as f64,
            backend = "pktvisor"
        );
        Ok(series)
    }
}

fn convert(
    agent: &AgentIdentity,
    agent_id: &str,
    payload: &PolicyMetrics,
    timestamp: i64,
) -> Result<Vec<TimeSeries>, ConvertError> {
    if payload.format != "json" {
        return Err(ConvertError::UnsupportedFormat(payload.format.clone()));
    }

    let Value::Object(handlers) = serde_json::from_slice(&payload.data)? else {
        return Err(ConvertError::NotAnObject);
    };

    let tags = merge_tags(agent);
    let mut flattener = Flattener {
        base: Vec::new(),
        tags: &tags,
        timestamp,
        series: Vec::new(),
    };

    for (handler, metrics) in &handlers {
        let Value::Object(metrics) = metrics else {
            metric!(counter(MetricCounters::HandlerSkipped) += 1, backend = "pktvisor");
            sinker_log::debug!(
                handler = handler.as_str(),
                "skipping handler without metric object"
            );
            continue;
        };

        flattener.base = vec![
            Label::new("instance", &agent.name),
            Label::new("agent_id", agent_id),
            Label::new("agent", &agent.name),
            Label::new("policy_id", &payload.policy_id),
            Label::new("policy", &payload.policy_name),
            Label::new("handler", handler),
        ];
        flattener.walk(&mut Vec::new(), None, metrics);
    }

    Ok(flattener.series)
}

/// Merges agent tags and fleet tags into labels sorted by name.
fn merge_tags(agent: &AgentIdentity) -> Vec<Label> {
    let mut tags = BTreeMap::new();
    for (key, value) in agent.agent_tags.iter().chain(&agent.orb_tags) {
        tags.insert(sanitize_name(key), value);
    }

    tags.into_iter()
        .filter(|(key, _)| !RESERVED_LABELS.contains(&key.as_str()))
        .map(|(key, value)| Label::new(key, value))
        .collect()
}

#[derive(Clone, Copy, Debug)]
struct Device<'a> {
    name: &'a str,
    interface: Option<&'a str>,
}

struct Flattener<'t> {
    base: Vec<Label>,
    tags: &'t [Label],
    timestamp: i64,
    series: Vec<TimeSeries>,
}

impl Flattener<'_> {
    fn walk<'a>(
        &mut self,
        path: &mut Vec<&'a str>,
        device: Option<Device<'a>>,
        object: &'a Map<String, Value>,
    ) {
        for (key, value) in object {
            if key == PERIOD_KEY {
                continue;
            }

            match value {
                Value::Number(number) => {
                    let Some(value) = number.as_f64() else {
                        continue;
                    };
                    path.push(key);
                    self.push(path, device, None, value);
                    path.pop();
                }
                Value::Object(devices) if key == DEVICES_KEY && device.is_none() => {
                    for (name, metrics) in devices {
                        if let Value::Object(metrics) = metrics {
                            let device = Device {
                                name: name.as_str(),
                                interface: None,
                            };
                            self.walk(path, Some(device), metrics);
                        }
                    }
                }
                Value::Object(interfaces)
                    if key == INTERFACES_KEY
                        && device.is_some_and(|d| d.interface.is_none()) =>
                {
                    let Some(device) = device else { continue };
                    for (interface, metrics) in interfaces {
                        if let Value::Object(metrics) = metrics {
                            let device = Device {
                                name: device.name,
                                interface: Some(interface.as_str()),
                            };
                            self.walk(path, Some(device), metrics);
                        }
                    }
                }
                Value::Object(inner) => {
                    path.push(key);
                    match quantiles(inner) {
                        Some(quantiles) => {
                            for (quantile, value) in quantiles {
                                let label = Label::new("quantile", quantile);
                                self.push(path, device, Some(label), value);
                            }
                        }
                        None => self.walk(path, device, inner),
                    }
                    path.pop();
                }
                Value::Array(items) if key.starts_with("top_") => {
                    let label_name = top_k_label(key);
                    path.push(key);
                    for (name, estimate) in items.iter().filter_map(top_k_entry) {
                        let label = Label::new(label_name.as_ref(), name);
                        self.push(path, device, Some(label), estimate);
                    }
                    path.pop();
                }
                // Strings, booleans, nulls and plain lists carry no samples.
                _ => (),
            }
        }
    }

    fn push(&mut self, path: &[&str], device: Option<Device<'_>>, extra: Option<Label>, value: f64) {
        let mut labels = Vec::with_capacity(self.base.len() + self.tags.len() + 4);
        labels.push(Label::new(METRIC_NAME_LABEL, sanitize_name(&path.join("_"))));
        labels.extend_from_slice(&self.base);

        if let Some(device) = device {
            labels.push(Label::new("device", device.name));
            if let Some(interface) = device.interface {
                let composite = format!("{}|{}", device.name, interface);
                labels.push(Label::new("device_interface", composite));
            }
        }

        labels.extend(extra);
        labels.extend_from_slice(self.tags);

        self.series.push(TimeSeries {
            labels,
            datapoint: Datapoint {
                value,
                timestamp: self.timestamp,
            },
        });
    }
}

/// Returns the percentiles of an object consisting only of numeric percentile keys.
fn quantiles(object: &Map<String, Value>) -> Option<Vec<(&'static str, f64)>> {
    if object.is_empty() {
        return None;
    }

    let only_quantiles = object
        .keys()
        .all(|key| QUANTILES.iter().any(|(name, _)| *name == key.as_str()));
    if !only_quantiles {
        return None;
    }

    QUANTILES
        .iter()
        .filter_map(|&(key, quantile)| object.get(key).map(|v| Some((quantile, v.as_f64()?))))
        .collect()
}

fn top_k_entry(item: &Value) -> Option<(String, f64)> {
    let estimate = item.get("estimate")?.as_f64()?;
    let name = match item.get("name")? {
        Value::String(name) => name.clone(),
        Value::Number(name) => name.to_string(),
        _ => return None,
    };
    Some((name, estimate))
}

/// Returns the label name for the elements of a top-K list.
fn top_k_label(field: &str) -> Cow<'static, str> {
    let name = match field {
        "top_ASN" => "asn",
        "top_geoLoc" => "geo_loc",
        "top_qname2" | "top_qname3" | "top_nxdomain" | "top_refused" | "top_srvfail"
        | "top_noerror" | "top_nodata" | "top_slow_xacts" | "top_qname_by_resp_bytes" => "qname",
        "top_qtype" => "qtype",
        "top_rcode" => "rcode",
        "top_udp_ports" | "top_tcp_ports" | "top_ports" => "port",
        "top_ipv4" | "top_ipv6" => "ip",
        "top_mac" => "mac",
        "top_vendor" => "vendor",
        _ => return guess_top_k_label(field),
    };

    Cow::Borrowed(name)
}

fn guess_top_k_label(field: &str) -> Cow<'static, str> {
    let stripped = field.strip_prefix("top_").unwrap_or(field);
    let lower = stripped.to_ascii_lowercase();
    let tokens: Vec<&str> = lower.split('_').collect();
    let any = |matches: fn(&str) -> bool| tokens.iter().any(|token| matches(token));

    let name = if any(|t| t.contains("asn")) {
        "asn"
    } else if any(|t| t.starts_with("geo")) {
        "geo_loc"
    } else if any(|t| t.starts_with("port")) {
        "port"
    } else if any(|t| t == "ip" || t == "ips" || t.starts_with("ipv")) {
        "ip"
    } else if any(|t| t.starts_with("mac")) {
        "mac"
    } else if any(|t| t.starts_with("interface")) {
        "interface"
    } else if any(|t| t.starts_with("qname")) {
        "qname"
    } else {
        return Cow::Owned(sanitize_name(stripped));
    };

    Cow::Borrowed(name)
}

/// Maps a name to the Prometheus charset `[a-zA-Z0-9_]`.
///
/// Other characters are replaced with `_` and a leading digit is prefixed with `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.push('_');
    }

    sanitized.extend(name.chars().map(|c| match c {
        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => c,
        _ => '_',
    }));

    sanitized
}
