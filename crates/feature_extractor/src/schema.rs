//! The versioned feature contract and the column lists that drive derivation.

use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use scoring_structs::{Cell, RawRecord};
use serde_json::{Map, Value};

use crate::{FeatureError, RecordError};

/// Contract version of [`FeatureSchema::credit_v1`].
pub const CREDIT_V1: &str = "credit-v1";

/// Sentinel written in place of "days employed" when it is unknown.
pub const DAYS_EMPLOYED_SENTINEL: f64 = 365_243.0;

/// Placeholder for categorical values that were never observed.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Longest text value kept from a submitted record.
pub const MAX_TEXT_LEN: usize = 255;

/// Identifier column that every record must carry.
pub const ID_COLUMN: &str = "SK_ID_CURR";

const NUMERIC_COLUMNS: &[&str] = &[
    "SK_ID_CURR",
    "CNT_CHILDREN",
    "AMT_INCOME_TOTAL",
    "AMT_CREDIT",
    "AMT_ANNUITY",
    "AMT_GOODS_PRICE",
    "REGION_POPULATION_RELATIVE",
    "DAYS_BIRTH",
    "DAYS_EMPLOYED",
    "DAYS_REGISTRATION",
    "DAYS_ID_PUBLISH",
    "OWN_CAR_AGE",
    "FLAG_MOBIL",
    "FLAG_EMP_PHONE",
    "FLAG_WORK_PHONE",
    "FLAG_CONT_MOBILE",
    "FLAG_PHONE",
    "FLAG_EMAIL",
    "CNT_FAM_MEMBERS",
    "REGION_RATING_CLIENT",
    "REGION_RATING_CLIENT_W_CITY",
    "HOUR_APPR_PROCESS_START",
    "REG_REGION_NOT_LIVE_REGION",
    "REG_REGION_NOT_WORK_REGION",
    "LIVE_REGION_NOT_WORK_REGION",
    "REG_CITY_NOT_LIVE_CITY",
    "REG_CITY_NOT_WORK_CITY",
    "LIVE_CITY_NOT_WORK_CITY",
    "EXT_SOURCE_1",
    "EXT_SOURCE_2",
    "EXT_SOURCE_3",
    "APARTMENTS_AVG",
    "BASEMENTAREA_AVG",
    "YEARS_BEGINEXPLUATATION_AVG",
    "YEARS_BUILD_AVG",
    "COMMONAREA_AVG",
    "ELEVATORS_AVG",
    "ENTRANCES_AVG",
    "FLOORSMAX_AVG",
    "FLOORSMIN_AVG",
    "LANDAREA_AVG",
    "LIVINGAPARTMENTS_AVG",
    "LIVINGAREA_AVG",
    "NONLIVINGAPARTMENTS_AVG",
    "NONLIVINGAREA_AVG",
    "TOTALAREA_MODE",
    "OBS_30_CNT_SOCIAL_CIRCLE",
    "DEF_30_CNT_SOCIAL_CIRCLE",
    "OBS_60_CNT_SOCIAL_CIRCLE",
    "DEF_60_CNT_SOCIAL_CIRCLE",
    "DAYS_LAST_PHONE_CHANGE",
    "FLAG_DOCUMENT_2",
    "FLAG_DOCUMENT_3",
    "FLAG_DOCUMENT_4",
    "FLAG_DOCUMENT_5",
    "FLAG_DOCUMENT_6",
    "FLAG_DOCUMENT_7",
    "FLAG_DOCUMENT_8",
    "FLAG_DOCUMENT_9",
    "FLAG_DOCUMENT_10",
    "FLAG_DOCUMENT_11",
    "FLAG_DOCUMENT_12",
    "FLAG_DOCUMENT_13",
    "FLAG_DOCUMENT_14",
    "FLAG_DOCUMENT_15",
    "FLAG_DOCUMENT_16",
    "FLAG_DOCUMENT_17",
    "FLAG_DOCUMENT_18",
    "FLAG_DOCUMENT_19",
    "FLAG_DOCUMENT_20",
    "FLAG_DOCUMENT_21",
    "AMT_REQ_CREDIT_BUREAU_HOUR",
    "AMT_REQ_CREDIT_BUREAU_DAY",
    "AMT_REQ_CREDIT_BUREAU_WEEK",
    "AMT_REQ_CREDIT_BUREAU_MON",
    "AMT_REQ_CREDIT_BUREAU_QRT",
    "AMT_REQ_CREDIT_BUREAU_YEAR",
    "nb_loans",
    "sum_debt",
    "AGE",
    "CHILDREN_RATIO",
    "INCOME_PER_PERSON",
    "AGE_PER_MEMBER",
    "DAYS_EMPLOYED_PERC",
    "INCOME_CREDIT_PERC",
    "ANNUITY_INCOME_PERC",
    "PAYMENT_RATE",
];

const CATEGORICAL_COLUMNS: &[&str] = &[
    "NAME_CONTRACT_TYPE",
    "CODE_GENDER",
    "FLAG_OWN_CAR",
    "FLAG_OWN_REALTY",
    "NAME_TYPE_SUITE",
    "NAME_INCOME_TYPE",
    "NAME_EDUCATION_TYPE",
    "NAME_FAMILY_STATUS",
    "NAME_HOUSING_TYPE",
    "OCCUPATION_TYPE",
    "WEEKDAY_APPR_PROCESS_START",
    "ORGANIZATION_TYPE",
    "FONDKAPREMONT_MODE",
    "HOUSETYPE_MODE",
    "WALLSMATERIAL_MODE",
    "EMERGENCYSTATE_MODE",
    "CNT_CHILDREN_BIN",
];

/// Near-duplicate building statistics dropped before anything else runs.
const DROPPED_COLUMNS: &[&str] = &[
    "COMMONAREA_MODE",
    "COMMONAREA_MEDI",
    "NONLIVINGAPARTMENTS_MODE",
    "NONLIVINGAPARTMENTS_MEDI",
    "LIVINGAPARTMENTS_MODE",
    "LIVINGAPARTMENTS_MEDI",
    "FLOORSMIN_MODE",
    "FLOORSMIN_MEDI",
    "YEARS_BUILD_MODE",
    "YEARS_BUILD_MEDI",
    "LANDAREA_MODE",
    "LANDAREA_MEDI",
    "BASEMENTAREA_MODE",
    "BASEMENTAREA_MEDI",
    "ELEVATORS_MODE",
    "ELEVATORS_MEDI",
];

/// Columns whose absence is itself a signal.
const MISSINGNESS_COLUMNS: &[&str] = &[
    "EXT_SOURCE_1",
    "EXT_SOURCE_2",
    "EXT_SOURCE_3",
    "OWN_CAR_AGE",
    "COMMONAREA_AVG",
    "NONLIVINGAPARTMENTS_AVG",
    "LIVINGAPARTMENTS_AVG",
    "FLOORSMIN_AVG",
    "YEARS_BUILD_AVG",
    "LANDAREA_AVG",
    "BASEMENTAREA_AVG",
    "NONLIVINGAREA_AVG",
    "ELEVATORS_AVG",
    "FONDKAPREMONT_MODE",
];

const NON_NEGATIVE_COLUMNS: &[&str] = &[
    "AMT_INCOME_TOTAL",
    "AMT_CREDIT",
    "AMT_ANNUITY",
    "AMT_GOODS_PRICE",
];

/// How missing numeric values are filled before schema completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImputationPolicy {
    /// Fill with zero.
    #[default]
    Zero,
    /// Fill with the median of the column over the batch (zero if the
    /// column has no observed value).
    Median,
}

impl FromStr for ImputationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zero" => Ok(Self::Zero),
            "median" => Ok(Self::Median),
            other => Err(format!(
                "unknown imputation policy '{other}', expected 'zero' or 'median'"
            )),
        }
    }
}

/// Kind of a contract column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Explicit feature contract: which columns exist, how they are typed and
/// which raw columns feed derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    pub version: String,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub missingness_columns: Vec<String>,
    pub non_negative_columns: Vec<String>,
    pub imputation: ImputationPolicy,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::credit_v1()
    }
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|&c| c.to_owned()).collect()
}

impl FeatureSchema {
    /// The credit-scoring contract the deployed classifiers were trained on.
    #[must_use]
    pub fn credit_v1() -> Self {
        Self {
            version: CREDIT_V1.to_owned(),
            numeric_columns: owned(NUMERIC_COLUMNS),
            categorical_columns: owned(CATEGORICAL_COLUMNS),
            dropped_columns: owned(DROPPED_COLUMNS),
            missingness_columns: owned(MISSINGNESS_COLUMNS),
            non_negative_columns: owned(NON_NEGATIVE_COLUMNS),
            imputation: ImputationPolicy::Zero,
        }
    }

    #[must_use]
    pub const fn with_imputation(mut self, imputation: ImputationPolicy) -> Self {
        self.imputation = imputation;
        self
    }

    /// Contract columns in output order: numeric first, then categorical.
    pub fn contract(&self) -> impl Iterator<Item = (&str, ColumnKind)> {
        self.numeric_columns
            .iter()
            .map(|c| (c.as_str(), ColumnKind::Numeric))
            .chain(
                self.categorical_columns
                    .iter()
                    .map(|c| (c.as_str(), ColumnKind::Categorical)),
            )
    }

    #[must_use]
    pub fn contract_len(&self) -> usize {
        self.numeric_columns.len() + self.categorical_columns.len()
    }

    #[must_use]
    pub fn kind_of(&self, column: &str) -> Option<ColumnKind> {
        if self.numeric_columns.iter().any(|c| c == column) {
            Some(ColumnKind::Numeric)
        } else if self.categorical_columns.iter().any(|c| c == column) {
            Some(ColumnKind::Categorical)
        } else {
            None
        }
    }

    /// Checks that the contract is non-empty and that no column is declared
    /// twice.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError`] describing the first inconsistency found.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.contract_len() == 0 {
            return Err(FeatureError::EmptyContract);
        }

        let mut seen = BTreeSet::new();
        for (column, _) in self.contract() {
            if !seen.insert(column) {
                return Err(FeatureError::DuplicateColumn(column.to_owned()));
            }
        }

        Ok(())
    }

    /// Parses one submitted JSON object into a [`RawRecord`].
    ///
    /// Contract columns are typed; unknown columns are kept with the type
    /// their JSON value implies. Text is trimmed and capped at
    /// [`MAX_TEXT_LEN`] characters.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the identifier is absent, a value has the
    /// wrong type, or an amount is negative.
    pub fn parse_record(&self, object: &Map<String, Value>) -> Result<RawRecord, RecordError> {
        let mut values = BTreeMap::new();
        let mut integers = BTreeMap::new();

        for (column, value) in object {
            let cell = match self.kind_of(column) {
                Some(ColumnKind::Numeric) => parse_numeric(column, value)?,
                Some(ColumnKind::Categorical) => parse_categorical(column, value)?,
                None => parse_untyped(column, value)?,
            };

            if let Some(amount) = cell.as_number()
                && amount < 0.0
                && self.non_negative_columns.iter().any(|c| c == column)
            {
                return Err(RecordError::Negative {
                    column: column.clone(),
                    value: amount,
                });
            }

            if let (Cell::Number(_), Value::Number(number)) = (&cell, value)
                && (number.is_i64() || number.is_u64())
            {
                integers.insert(column.clone(), number.clone());
            }

            values.insert(column.clone(), cell);
        }

        if values.get(ID_COLUMN).is_none_or(Cell::is_missing) {
            return Err(RecordError::MissingField(ID_COLUMN.to_owned()));
        }

        Ok(RawRecord::new(values).with_integers(integers))
    }
}

fn sanitize_text(text: &str) -> String {
    text.trim().chars().take(MAX_TEXT_LEN).collect()
}

fn parse_numeric(column: &str, value: &Value) -> Result<Cell, RecordError> {
    match value {
        Value::Null => Ok(Cell::Missing),
        Value::Bool(flag) => Ok(Cell::Number(if *flag { 1.0 } else { 0.0 })),
        Value::Number(number) => number
            .as_f64()
            .map(Cell::Number)
            .ok_or_else(|| RecordError::type_mismatch(column, "a number", value)),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(Cell::Missing);
            }
            text.parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Cell::Number)
                .ok_or_else(|| RecordError::type_mismatch(column, "a number", value))
        }
        Value::Array(_) | Value::Object(_) => {
            Err(RecordError::type_mismatch(column, "a number", value))
        }
    }
}

fn parse_categorical(column: &str, value: &Value) -> Result<Cell, RecordError> {
    match value {
        Value::Null => Ok(Cell::Missing),
        Value::String(text) => Ok(Cell::Text(sanitize_text(text))),
        _ => Err(RecordError::type_mismatch(column, "a string", value)),
    }
}

fn parse_untyped(column: &str, value: &Value) -> Result<Cell, RecordError> {
    match value {
        Value::Null => Ok(Cell::Missing),
        Value::Bool(flag) => Ok(Cell::Number(if *flag { 1.0 } else { 0.0 })),
        Value::Number(number) => Ok(number.as_f64().map_or(Cell::Missing, Cell::Number)),
        Value::String(text) => Ok(Cell::Text(sanitize_text(text))),
        Value::Array(_) | Value::Object(_) => {
            Err(RecordError::type_mismatch(column, "a scalar", value))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_credit_v1_is_consistent() {
        let schema = FeatureSchema::credit_v1();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.contract_len(), 104);
        assert_eq!(schema.kind_of("PAYMENT_RATE"), Some(ColumnKind::Numeric));
        assert_eq!(schema.kind_of("CODE_GENDER"), Some(ColumnKind::Categorical));
        assert_eq!(schema.kind_of("COMMONAREA_MODE"), None);
    }

    #[test]
    fn test_duplicate_column_is_rejected() {
        let mut schema = FeatureSchema::credit_v1();
        schema.categorical_columns.push("AMT_CREDIT".to_owned());
        assert!(matches!(
            schema.validate(),
            Err(FeatureError::DuplicateColumn(column)) if column == "AMT_CREDIT"
        ));
    }

    #[test]
    fn test_parse_record_types_and_sanitizes() {
        let schema = FeatureSchema::credit_v1();
        let long = "x".repeat(300);
        let record = schema
            .parse_record(&object(json!({
                "SK_ID_CURR": 100_005,
                "AMT_CREDIT": "222768.5",
                "CODE_GENDER": "  M ",
                "OCCUPATION_TYPE": long,
                "FLAG_MOBIL": true,
                "OWN_CAR_AGE": null,
                "EXTRA_NOTE": "kept",
            })))
            .expect("record should parse");

        assert_eq!(record.get("AMT_CREDIT"), Some(&Cell::Number(222_768.5)));
        assert_eq!(record.get("CODE_GENDER"), Some(&Cell::from("M")));
        assert_eq!(
            record.get("OCCUPATION_TYPE").and_then(Cell::as_text).map(str::len),
            Some(MAX_TEXT_LEN)
        );
        assert_eq!(record.get("FLAG_MOBIL"), Some(&Cell::Number(1.0)));
        assert_eq!(record.get("OWN_CAR_AGE"), Some(&Cell::Missing));
        assert_eq!(record.get("EXTRA_NOTE"), Some(&Cell::from("kept")));
    }

    #[test]
    fn test_parse_record_keeps_integer_snapshot() {
        let schema = FeatureSchema::credit_v1();
        let record = schema
            .parse_record(&object(json!({
                "SK_ID_CURR": 9_007_199_254_740_993_u64,
                "CNT_CHILDREN": 2,
                "AMT_CREDIT": 1000.5,
                "AMT_ANNUITY": "250",
            })))
            .expect("record should parse");

        let snapshot = record.to_json();
        assert_eq!(snapshot["SK_ID_CURR"], json!(9_007_199_254_740_993_u64));
        assert_eq!(snapshot["CNT_CHILDREN"], json!(2));
        assert_eq!(snapshot["AMT_CREDIT"], json!(1000.5));
        assert_eq!(snapshot["AMT_ANNUITY"], json!(250.0));
    }

    #[test]
    fn test_parse_record_rejects_bad_input() {
        let schema = FeatureSchema::credit_v1();

        let missing_id = schema.parse_record(&object(json!({"AMT_CREDIT": 1.0})));
        assert!(matches!(missing_id, Err(RecordError::MissingField(_))));

        let negative = schema.parse_record(&object(json!({"SK_ID_CURR": 1, "AMT_CREDIT": -5.0})));
        assert!(matches!(negative, Err(RecordError::Negative { .. })));

        let wrong_type = schema.parse_record(&object(json!({"SK_ID_CURR": 1, "CODE_GENDER": 3})));
        assert!(matches!(wrong_type, Err(RecordError::TypeMismatch { .. })));

        let not_a_number =
            schema.parse_record(&object(json!({"SK_ID_CURR": 1, "AMT_CREDIT": "lots"})));
        assert!(matches!(not_a_number, Err(RecordError::TypeMismatch { .. })));
    }

    #[test]
    fn test_imputation_policy_from_str() {
        assert_eq!("zero".parse(), Ok(ImputationPolicy::Zero));
        assert_eq!(" Median ".parse(), Ok(ImputationPolicy::Median));
        assert!("mean".parse::<ImputationPolicy>().is_err());
    }
}
