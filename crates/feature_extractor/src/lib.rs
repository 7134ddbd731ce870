//! Feature extractor crate for the credit-scoring model.
//!
//! This crate transforms raw applicant records into complete, typed feature
//! vectors matching a versioned [`FeatureSchema`]. Derivation is pure: the
//! same batch always yields the same vectors.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use scoring_structs::{Cell, FeatureVector, RawRecord};
use serde_json::Value;

mod schema;

pub use schema::*;

/// Errors raised by an unusable schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeatureError {
    #[error("feature contract is empty")]
    EmptyContract,
    #[error("column '{0}' is declared more than once in the feature contract")]
    DuplicateColumn(String),
}

/// Errors raised while parsing a submitted record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("field '{0}' is required")]
    MissingField(String),
    #[error("field '{column}' must be {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },
    #[error("field '{column}' must be greater than or equal to 0, got {value}")]
    Negative { column: String, value: f64 },
}

impl RecordError {
    fn type_mismatch(column: &str, expected: &'static str, found: &Value) -> Self {
        Self::TypeMismatch {
            column: column.to_owned(),
            expected,
            found: found.to_string(),
        }
    }
}

/// Working frame: one map per record over the batch's column set.
type Frame = Vec<BTreeMap<String, Cell>>;

/// Derives the feature vector of a single record.
///
/// # Errors
///
/// Returns [`FeatureError`] if the schema is inconsistent.
pub fn derive(raw: &RawRecord, schema: &FeatureSchema) -> Result<FeatureVector, FeatureError> {
    let mut vectors = derive_batch(core::slice::from_ref(raw), schema)?;
    Ok(vectors.pop().unwrap_or_else(|| complete(BTreeMap::new(), schema)))
}

/// Derives feature vectors for a whole batch, in input order.
///
/// Imputation statistics (categorical mode, numeric median) are computed
/// over the batch, so a record's vector can depend on its neighbours.
///
/// # Errors
///
/// Returns [`FeatureError`] if the schema is inconsistent.
pub fn derive_batch(
    records: &[RawRecord],
    schema: &FeatureSchema,
) -> Result<Vec<FeatureVector>, FeatureError> {
    schema.validate()?;

    let mut frame = build_frame(records, schema);
    recode_sentinels(&mut frame);
    add_missingness_flags(&mut frame, schema);
    add_ratios(&mut frame);
    impute(&mut frame, schema);

    Ok(frame.into_iter().map(|row| complete(row, schema)).collect())
}

/// Aligns every record on the batch's column set, minus pruned columns.
fn build_frame(records: &[RawRecord], schema: &FeatureSchema) -> Frame {
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(RawRecord::columns)
        .filter(|column| !schema.dropped_columns.iter().any(|d| d == column))
        .collect();

    records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|&column| {
                    let cell = record.get(column).cloned().unwrap_or(Cell::Missing);
                    (column.to_owned(), cell)
                })
                .collect()
        })
        .collect()
}

fn has_column(frame: &Frame, column: &str) -> bool {
    frame.first().is_some_and(|row| row.contains_key(column))
}

fn number(row: &BTreeMap<String, Cell>, column: &str) -> Option<f64> {
    row.get(column).and_then(Cell::as_number)
}

fn recode_sentinels(frame: &mut Frame) {
    for row in frame.iter_mut() {
        if let Some(cell) = row.get_mut("DAYS_EMPLOYED")
            && cell.as_number() == Some(DAYS_EMPLOYED_SENTINEL)
        {
            *cell = Cell::Missing;
        }
    }
}

fn add_missingness_flags(frame: &mut Frame, schema: &FeatureSchema) {
    for column in &schema.missingness_columns {
        if !has_column(frame, column) {
            continue;
        }
        let flag = format!("{column}_ISNA");
        for row in frame.iter_mut() {
            let missing = row.get(column).is_none_or(Cell::is_missing);
            row.insert(flag.clone(), Cell::Number(if missing { 1.0 } else { 0.0 }));
        }
    }
}

/// Division where a zero denominator yields 0 and a missing operand
/// yields a missing value.
fn safe_div(numerator: Option<f64>, denominator: Option<f64>) -> Cell {
    match (numerator, denominator) {
        (_, Some(d)) if d == 0.0 => Cell::Number(0.0),
        (Some(n), Some(d)) => Cell::Number(n / d),
        _ => Cell::Missing,
    }
}

fn add_ratio(frame: &mut Frame, target: &str, numerator: &str, denominator: &str) {
    if !has_column(frame, numerator) || !has_column(frame, denominator) {
        return;
    }
    for row in frame.iter_mut() {
        let value = safe_div(number(row, numerator), number(row, denominator));
        row.insert(target.to_owned(), value);
    }
}

fn add_ratios(frame: &mut Frame) {
    add_ratio(frame, "CHILDREN_RATIO", "CNT_CHILDREN", "CNT_FAM_MEMBERS");
    add_ratio(frame, "INCOME_PER_PERSON", "AMT_INCOME_TOTAL", "CNT_FAM_MEMBERS");

    if has_column(frame, "DAYS_BIRTH") {
        for row in frame.iter_mut() {
            let age = number(row, "DAYS_BIRTH").map_or(Cell::Missing, |days| {
                Cell::Number(-days / 365.25)
            });
            row.insert("AGE".to_owned(), age);
        }
        add_ratio(frame, "AGE_PER_MEMBER", "AGE", "CNT_FAM_MEMBERS");
    }

    add_ratio(frame, "DAYS_EMPLOYED_PERC", "DAYS_EMPLOYED", "DAYS_BIRTH");
    add_ratio(frame, "INCOME_CREDIT_PERC", "AMT_INCOME_TOTAL", "AMT_CREDIT");
    add_ratio(frame, "ANNUITY_INCOME_PERC", "AMT_ANNUITY", "AMT_INCOME_TOTAL");
    add_ratio(frame, "PAYMENT_RATE", "AMT_ANNUITY", "AMT_CREDIT");
}

/// A column is categorical if the contract says so, or, for columns outside
/// the contract, if it holds text anywhere in the batch.
fn is_categorical(frame: &Frame, schema: &FeatureSchema, column: &str) -> bool {
    match schema.kind_of(column) {
        Some(ColumnKind::Categorical) => true,
        Some(ColumnKind::Numeric) => false,
        None => frame
            .iter()
            .any(|row| matches!(row.get(column), Some(Cell::Text(_)))),
    }
}

fn impute(frame: &mut Frame, schema: &FeatureSchema) {
    let Some(columns) = frame
        .first()
        .map(|row| row.keys().cloned().collect::<Vec<_>>())
    else {
        return;
    };

    for column in &columns {
        let fill = if is_categorical(frame, schema, column) {
            Cell::Text(mode(frame, column).unwrap_or_else(|| UNKNOWN_CATEGORY.to_owned()))
        } else {
            match schema.imputation {
                ImputationPolicy::Zero => Cell::Number(0.0),
                ImputationPolicy::Median => Cell::Number(median(frame, column).unwrap_or(0.0)),
            }
        };

        for row in frame.iter_mut() {
            if let Some(cell) = row.get_mut(column)
                && cell.is_missing()
            {
                *cell = fill.clone();
            }
        }
    }
}

/// Most frequent observed value; ties go to the smallest value.
fn mode(frame: &Frame, column: &str) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for cell in frame.iter().filter_map(|row| row.get(column)) {
        if !cell.is_missing() {
            *counts.entry(as_category(cell)).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(a, a_count), (b, b_count)| a_count.cmp(b_count).then_with(|| b.cmp(a)))
        .map(|(value, _)| value)
}

fn median(frame: &Frame, column: &str) -> Option<f64> {
    let mut values: Vec<f64> = frame
        .iter()
        .filter_map(|row| row.get(column).and_then(Cell::as_number))
        .filter(|value| value.is_finite())
        .collect();

    if values.is_empty() {
        return None;
    }

    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(f64::midpoint(values[mid - 1], values[mid]))
    } else {
        Some(values[mid])
    }
}

/// Text form of a categorical cell; whole numbers render without a fraction.
fn as_category(cell: &Cell) -> String {
    match cell {
        Cell::Text(text) => text.clone(),
        #[expect(clippy::cast_possible_truncation, reason = "guarded by the range check")]
        Cell::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            (*value as i64).to_string()
        }
        Cell::Number(value) => value.to_string(),
        Cell::Missing => UNKNOWN_CATEGORY.to_owned(),
    }
}

fn as_feature_number(cell: &Cell) -> f64 {
    let value = match cell {
        Cell::Number(value) => *value,
        Cell::Text(text) => text.trim().parse().unwrap_or(0.0),
        Cell::Missing => 0.0,
    };
    if value.is_finite() { value } else { 0.0 }
}

/// Back-fills absent contract columns, coerces types and restricts the row
/// to the contract in contract order.
fn complete(mut row: BTreeMap<String, Cell>, schema: &FeatureSchema) -> FeatureVector {
    let columns = schema
        .contract()
        .map(|(column, kind)| {
            let cell = row.remove(column);
            let value = match kind {
                ColumnKind::Numeric => {
                    Cell::Number(cell.as_ref().map_or(0.0, as_feature_number))
                }
                ColumnKind::Categorical => Cell::Text(match cell {
                    Some(cell) if !cell.is_missing() => as_category(&cell),
                    _ => UNKNOWN_CATEGORY.to_owned(),
                }),
            };
            (column.to_owned(), value)
        })
        .collect();

    FeatureVector::new(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cells: &[(&str, Cell)]) -> RawRecord {
        cells
            .iter()
            .map(|(name, cell)| ((*name).to_owned(), cell.clone()))
            .collect()
    }

    fn numeric(features: &FeatureVector, column: &str) -> f64 {
        features
            .get(column)
            .and_then(Cell::as_number)
            .unwrap_or_else(|| panic!("{column} should be numeric"))
    }

    fn text<'a>(features: &'a FeatureVector, column: &str) -> &'a str {
        features
            .get(column)
            .and_then(Cell::as_text)
            .unwrap_or_else(|| panic!("{column} should be text"))
    }

    fn assert_complete(features: &FeatureVector, schema: &FeatureSchema) {
        assert_eq!(features.len(), schema.contract_len());
        for ((name, cell), (column, kind)) in features.iter().zip(schema.contract()) {
            assert_eq!(name, column);
            match kind {
                ColumnKind::Numeric => {
                    assert!(cell.as_number().is_some_and(f64::is_finite), "{name}: {cell:?}");
                }
                ColumnKind::Categorical => assert!(cell.as_text().is_some(), "{name}: {cell:?}"),
            }
        }
    }

    #[test]
    fn test_empty_record_yields_complete_vector() {
        let schema = FeatureSchema::credit_v1();
        let features = derive(&RawRecord::default(), &schema).expect("derivation should succeed");

        assert_complete(&features, &schema);
        assert!((numeric(&features, "PAYMENT_RATE")).abs() < f64::EPSILON);
        assert_eq!(text(&features, "CODE_GENDER"), UNKNOWN_CATEGORY);
    }

    #[test]
    fn test_ratios() {
        let schema = FeatureSchema::credit_v1();
        let raw = record(&[
            ("CNT_CHILDREN", Cell::Number(1.0)),
            ("CNT_FAM_MEMBERS", Cell::Number(4.0)),
            ("AMT_INCOME_TOTAL", Cell::Number(100_000.0)),
            ("AMT_CREDIT", Cell::Number(200_000.0)),
            ("AMT_ANNUITY", Cell::Number(10_000.0)),
            ("DAYS_BIRTH", Cell::Number(-14_610.0)),
            ("DAYS_EMPLOYED", Cell::Number(-1_461.0)),
        ]);
        let features = derive(&raw, &schema).expect("derivation should succeed");

        assert!((numeric(&features, "CHILDREN_RATIO") - 0.25).abs() < 1e-12);
        assert!((numeric(&features, "INCOME_PER_PERSON") - 25_000.0).abs() < 1e-9);
        assert!((numeric(&features, "AGE") - 40.0).abs() < 1e-12);
        assert!((numeric(&features, "AGE_PER_MEMBER") - 10.0).abs() < 1e-12);
        assert!((numeric(&features, "DAYS_EMPLOYED_PERC") - 0.1).abs() < 1e-12);
        assert!((numeric(&features, "INCOME_CREDIT_PERC") - 0.5).abs() < 1e-12);
        assert!((numeric(&features, "ANNUITY_INCOME_PERC") - 0.1).abs() < 1e-12);
        assert!((numeric(&features, "PAYMENT_RATE") - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_zero_denominator_yields_zero() {
        let schema = FeatureSchema::credit_v1();
        let raw = record(&[
            ("CNT_CHILDREN", Cell::Number(2.0)),
            ("CNT_FAM_MEMBERS", Cell::Number(0.0)),
            ("AMT_INCOME_TOTAL", Cell::Number(0.0)),
            ("AMT_ANNUITY", Cell::Number(5_000.0)),
            ("AMT_CREDIT", Cell::Number(0.0)),
        ]);
        let features = derive(&raw, &schema).expect("derivation should succeed");

        assert_complete(&features, &schema);
        for column in [
            "CHILDREN_RATIO",
            "INCOME_PER_PERSON",
            "INCOME_CREDIT_PERC",
            "ANNUITY_INCOME_PERC",
            "PAYMENT_RATE",
        ] {
            assert!(numeric(&features, column).abs() < f64::EPSILON, "{column}");
        }
    }

    #[test]
    fn test_days_employed_sentinel_is_unknown() {
        let schema = FeatureSchema::credit_v1();
        let raw = record(&[
            ("DAYS_EMPLOYED", Cell::Number(DAYS_EMPLOYED_SENTINEL)),
            ("DAYS_BIRTH", Cell::Number(-10_000.0)),
        ]);
        let features = derive(&raw, &schema).expect("derivation should succeed");

        assert!(numeric(&features, "DAYS_EMPLOYED").abs() < f64::EPSILON);
        assert!(numeric(&features, "DAYS_EMPLOYED_PERC").abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_finite_values_become_zero() {
        let schema = FeatureSchema::credit_v1();
        let raw = record(&[
            ("AMT_CREDIT", Cell::Number(f64::INFINITY)),
            ("EXT_SOURCE_1", Cell::Number(f64::NAN)),
            ("AMT_GOODS_PRICE", Cell::from("not a number")),
        ]);
        let features = derive(&raw, &schema).expect("derivation should succeed");

        assert_complete(&features, &schema);
        assert!(numeric(&features, "AMT_CREDIT").abs() < f64::EPSILON);
        assert!(numeric(&features, "EXT_SOURCE_1").abs() < f64::EPSILON);
        assert!(numeric(&features, "AMT_GOODS_PRICE").abs() < f64::EPSILON);
    }

    #[test]
    fn test_categorical_mode_over_batch() {
        let schema = FeatureSchema::credit_v1();
        let batch = vec![
            record(&[("NAME_INCOME_TYPE", Cell::from("Working"))]),
            record(&[("NAME_INCOME_TYPE", Cell::from("Pensioner"))]),
            record(&[("NAME_INCOME_TYPE", Cell::from("Working"))]),
            record(&[("NAME_INCOME_TYPE", Cell::Missing)]),
        ];
        let features = derive_batch(&batch, &schema).expect("derivation should succeed");

        assert_eq!(features.len(), 4);
        assert_eq!(text(&features[3], "NAME_INCOME_TYPE"), "Working");
        assert_eq!(text(&features[1], "NAME_INCOME_TYPE"), "Pensioner");
    }

    #[test]
    fn test_median_imputation() {
        let schema = FeatureSchema::credit_v1().with_imputation(ImputationPolicy::Median);
        let batch = vec![
            record(&[("EXT_SOURCE_2", Cell::Number(0.2))]),
            record(&[("EXT_SOURCE_2", Cell::Number(0.6))]),
            record(&[("EXT_SOURCE_2", Cell::Number(0.4))]),
            record(&[("EXT_SOURCE_2", Cell::Missing)]),
        ];
        let features = derive_batch(&batch, &schema).expect("derivation should succeed");
        assert!((numeric(&features[3], "EXT_SOURCE_2") - 0.4).abs() < 1e-12);

        let zero = derive_batch(&batch, &FeatureSchema::credit_v1())
            .expect("derivation should succeed");
        assert!(numeric(&zero[3], "EXT_SOURCE_2").abs() < f64::EPSILON);
    }

    #[test]
    fn test_missingness_flags_and_pruning() {
        let mut schema = FeatureSchema::credit_v1();
        schema.numeric_columns.push("EXT_SOURCE_1_ISNA".to_owned());
        schema.numeric_columns.push("COMMONAREA_MODE".to_owned());

        let batch = vec![
            record(&[
                ("EXT_SOURCE_1", Cell::Missing),
                ("COMMONAREA_MODE", Cell::Number(3.0)),
            ]),
            record(&[("EXT_SOURCE_1", Cell::Number(0.7))]),
        ];
        let features = derive_batch(&batch, &schema).expect("derivation should succeed");

        assert!((numeric(&features[0], "EXT_SOURCE_1_ISNA") - 1.0).abs() < f64::EPSILON);
        assert!(numeric(&features[1], "EXT_SOURCE_1_ISNA").abs() < f64::EPSILON);
        // Pruned before completion, so only the back-fill remains.
        assert!(numeric(&features[0], "COMMONAREA_MODE").abs() < f64::EPSILON);
    }

    #[test]
    fn test_output_excludes_non_contract_columns() {
        let schema = FeatureSchema::credit_v1();
        let raw = record(&[("FREE_TEXT", Cell::from("hello"))]);
        let features = derive(&raw, &schema).expect("derivation should succeed");
        assert!(features.get("FREE_TEXT").is_none());
        assert_complete(&features, &schema);
    }

    #[test]
    fn test_numeric_categorical_renders_as_text() {
        let schema = FeatureSchema::credit_v1();
        let raw = record(&[("CNT_CHILDREN_BIN", Cell::Number(2.0))]);
        let features = derive(&raw, &schema).expect("derivation should succeed");
        assert_eq!(text(&features, "CNT_CHILDREN_BIN"), "2");
    }

    #[test]
    fn test_inconsistent_schema_is_an_error() {
        let mut schema = FeatureSchema::credit_v1();
        schema.numeric_columns.clear();
        schema.categorical_columns.clear();
        assert_eq!(
            derive_batch(&[RawRecord::default()], &schema),
            Err(FeatureError::EmptyContract)
        );
    }
}
