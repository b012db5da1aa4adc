use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the label carrying the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single name-value pair attached to a [`TimeSeries`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Label {
    /// The label name.
    pub name: String,
    /// The label value.
    pub value: String,
}

impl Label {
    /// Creates a new label.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}

/// A value observed at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Datapoint {
    /// The observed value.
    pub value: f64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
}

/// One sample of a labelled metric.
///
/// Label order is significant and preserved. The first label is conventionally
/// [`METRIC_NAME_LABEL`]. Labels are not deduplicated, converters ensure every name occurs once.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TimeSeries {
    /// Ordered labels of this series.
    pub labels: Vec<Label>,
    /// The sample.
    pub datapoint: Datapoint,
}

impl TimeSeries {
    /// Returns the value of the first label with the given name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.value.as_str())
    }

    /// Returns the metric name of this series.
    pub fn name(&self) -> Option<&str> {
        self.label(METRIC_NAME_LABEL)
    }
}

impl fmt::Display for TimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, label) in self.labels.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{label}")?;
        }
        write!(f, "}} {} @{}", self.datapoint.value, self.datapoint.timestamp)
    }
}
