use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::Cell;

/// One applicant's attributes as submitted.
///
/// Field typing and sanitation happen when the record is parsed against a
/// feature schema; this type only carries the resulting cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    values: BTreeMap<String, Cell>,
    /// Integers as submitted, so snapshots keep their exact value.
    integers: BTreeMap<String, Number>,
}

impl RawRecord {
    #[must_use]
    pub const fn new(values: BTreeMap<String, Cell>) -> Self {
        Self {
            values,
            integers: BTreeMap::new(),
        }
    }

    /// Attaches the submitted integer literals of numeric cells.
    #[must_use]
    pub fn with_integers(mut self, integers: BTreeMap<String, Number>) -> Self {
        self.integers = integers;
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.values.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.values.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    /// JSON-safe snapshot of the record. Submitted integers are rendered
    /// verbatim.
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(name, cell)| {
                let value = match (cell, self.integers.get(name)) {
                    (Cell::Number(_), Some(integer)) => Value::Number(integer.clone()),
                    _ => cell.to_json(),
                };
                (name.to_owned(), value)
            })
            .collect()
    }
}

impl FromIterator<(String, Cell)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, Cell)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A complete, typed feature vector in contract order.
///
/// Built by the feature extractor, which guarantees that every contract
/// column is present and that no cell is missing or non-finite.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    columns: Vec<(String, Cell)>,
}

impl FeatureVector {
    #[must_use]
    pub const fn new(columns: Vec<(String, Cell)>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .find_map(|(name, cell)| (name == column).then_some(cell))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.columns.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(name, cell)| (name.to_owned(), cell.to_json()))
            .collect()
    }
}

/// What a classifier is fed for one record.
///
/// `Raw` is the degraded path used when feature derivation is unavailable.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    Features(FeatureVector),
    Raw(RawRecord),
}

impl ModelInput {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Cell> {
        match self {
            Self::Features(features) => features.get(column),
            Self::Raw(raw) => raw.get(column),
        }
    }

    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self, Self::Features(_))
    }

    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        match self {
            Self::Features(features) => features.to_json(),
            Self::Raw(raw) => raw.to_json(),
        }
    }
}
