use std::error::Error;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Keeps a deserialization failure local to one entry of a larger document.
///
/// The surrounding document still has to be valid JSON. Only a value that does not match the
/// schema of `T` ends up as [`ErrorBoundary::Err`].
#[derive(Clone, Debug)]
pub enum ErrorBoundary<T> {
    /// The entry did not match the expected schema.
    Err(Arc<dyn Error + Send + Sync + 'static>),
    /// The decoded entry.
    Ok(T),
}

impl<T> ErrorBoundary<T> {
    /// Returns the decoded entry as a reference, or the error it failed with.
    pub fn as_result(&self) -> Result<&T, &(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(error) => Err(error.as_ref()),
        }
    }

    /// Converts into an [`Option`], discarding the error.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Err(_) => None,
        }
    }
}

impl<T> From<T> for ErrorBoundary<T> {
    fn from(value: T) -> Self {
        Self::Ok(value)
    }
}

impl<'de, T> Deserialize<'de> for ErrorBoundary<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match T::deserialize(value) {
            Ok(t) => Self::Ok(t),
            Err(error) => Self::Err(Arc::new(error)),
        })
    }
}

impl<T> Serialize for ErrorBoundary<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Ok(value) => value.serialize(serializer),
            Self::Err(_) => serializer.serialize_none(),
        }
    }
}
