use serde_json::{Number, Value};

/// A single tabular value, as submitted or as derived.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Returns `true` for absent values and for `NaN` numbers.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Number(value) => value.is_nan(),
            Self::Text(_) => false,
        }
    }

    /// Returns the numeric value, treating `NaN` as absent.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) if !value.is_nan() => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Renders the cell as JSON. Non-finite numbers become `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(value) => json_number(*value),
            Self::Text(value) => Value::String(value.clone()),
            Self::Missing => Value::Null,
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Converts a float into a JSON value, mapping `NaN` and infinities to `null`.
#[must_use]
pub fn json_number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
