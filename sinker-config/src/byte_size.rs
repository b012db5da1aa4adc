use std::fmt;
use std::str;

use human_size::{Byte, Kibibyte, Kilobyte, Mebibyte, Megabyte, Size, SpecificSize};
use serde::{Serialize, de, ser::Serializer};

pub use human_size::ParsingError as ByteSizeParseError;

/// Represents a size in bytes.
///
/// Accepts plain integers as bytes or human readable sizes such as `100KiB` or `1MB`.
#[derive(Clone, Copy)]
pub struct ByteSize(Size);

impl ByteSize {
    /// Create a byte size from bytes.
    pub fn from_bytes(value: u64) -> ByteSize {
        let bytes = SpecificSize::new(value as f64, Byte)
            .expect("unsigned byte counts are always valid sizes");

        macro_rules! try_multiple {
            ($ty:ty) => {
                let v: SpecificSize<$ty> = bytes.into();
                #[allow(clippy::float_cmp)]
                {
                    if v.value() >= 1.0 && v.value() == v.value().trunc() {
                        return ByteSize(v.into());
                    }
                }
            };
        }

        try_multiple!(Megabyte);
        try_multiple!(Mebibyte);
        try_multiple!(Kilobyte);
        try_multiple!(Kibibyte);
        ByteSize(bytes.into())
    }

    /// Create a byte size from kibibytes.
    pub fn from_kibibytes(value: u64) -> ByteSize {
        ByteSize::from_bytes(value * 1024)
    }

    /// Return the value in bytes.
    pub fn as_bytes(&self) -> usize {
        let size: SpecificSize<Byte> = self.0.into();
        size.value() as usize
    }
}

impl str::FromStr for ByteSize {
    type Err = ByteSizeParseError;

    fn from_str(value: &str) -> Result<ByteSize, Self::Err> {
        if let Ok(value) = value.parse::<u64>() {
            return Ok(ByteSize::from_bytes(value));
        }
        value.parse().map(ByteSize)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0.value(), self.0.multiple())
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteSize({self})")
    }
}

impl From<u64> for ByteSize {
    fn from(value: u64) -> ByteSize {
        ByteSize::from_bytes(value)
    }
}

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> de::Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct V;

        impl de::Visitor<'_> for V {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("data size")
            }

            fn visit_u64<E>(self, value: u64) -> Result<ByteSize, E>
            where
                E: de::Error,
            {
                Ok(ByteSize::from_bytes(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<ByteSize, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(ByteSize::from_bytes)
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Signed(value), &self))
            }

            fn visit_str<E>(self, value: &str) -> Result<ByteSize, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size() {
        let size: ByteSize = "42MiB".parse().unwrap();
        assert_eq!(size.as_bytes(), 44_040_192);
        assert_eq!(size.to_string(), "42MiB");

        let size = ByteSize::from_kibibytes(100);
        assert_eq!(size.as_bytes(), 102_400);
        assert_eq!(size.to_string(), "100KiB");
    }

    #[test]
    fn test_plain_bytes() {
        let size: ByteSize = "102400".parse().unwrap();
        assert_eq!(size.as_bytes(), 102_400);

        let size = ByteSize::from_bytes(1500);
        assert_eq!(size.as_bytes(), 1500);
        assert_eq!(size.to_string(), "1500B");
    }

    #[test]
    fn test_deserialize_number_and_string() {
        let size: ByteSize = serde_json::from_str("2048").unwrap();
        assert_eq!(size.as_bytes(), 2048);

        let size: ByteSize = serde_json::from_str(r#""1MB""#).unwrap();
        assert_eq!(size.as_bytes(), 1_000_000);
    }
}
