//! Dynamically-typed column values and their tag rendering.

use std::fmt::{self, Write as _};

/// A single decoded result column.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// SQL NULL.
    Null,
    /// Any integral column type.
    Integer(i64),
    /// Any floating point or decimal column type.
    Float(f64),
    /// Boolean / bit columns.
    Boolean(bool),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Canonical tag-value rendering.
    ///
    /// `Null` renders empty, floats use the shortest round-trip form, and
    /// bytes render as UTF-8 when valid or lowercase hex otherwise.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_owned(),
                Err(_) => hex_lower(bytes),
            },
        }
    }

    /// Short type label for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.render())
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn renders_each_variant() {
        assert_eq!(ScalarValue::Null.render(), "");
        assert_eq!(ScalarValue::Integer(-42).render(), "-42");
        assert_eq!(ScalarValue::Float(3.0).render(), "3");
        assert_eq!(ScalarValue::Float(2.5).render(), "2.5");
        assert_eq!(ScalarValue::Boolean(true).render(), "true");
        assert_eq!(ScalarValue::Text("sensor-a".to_owned()).render(), "sensor-a");
        assert_eq!(ScalarValue::Bytes(b"rack-7".to_vec()).render(), "rack-7");
        assert_eq!(ScalarValue::Bytes(vec![0xff, 0x00, 0x1a]).render(), "ff001a");
    }

    #[test]
    fn display_matches_render() {
        let value = ScalarValue::Integer(7);
        assert_eq!(value.to_string(), value.render());
        assert_eq!(value.type_name(), "integer");
    }

    proptest! {
        #[test]
        fn integer_rendering_parses_back(value in any::<i64>()) {
            let rendered = ScalarValue::Integer(value).render();
            prop_assert_eq!(rendered.parse::<i64>().ok(), Some(value));
        }

        #[test]
        fn finite_float_rendering_round_trips(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
            let rendered = ScalarValue::Float(value).render();
            prop_assert_eq!(rendered.parse::<f64>().ok(), Some(value));
        }
    }
}
