//! Turns raw house records into the feature matrix the model was trained on:
//! join demographics by zipcode, check the required columns, then project
//! them in feature-list order.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::table::{region_code, DemographicsTable, Record, Table, JOIN_KEY};

/// Ordered column names the model consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSpec(Vec<String>);

impl FeatureSpec {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn from_path(path: &Path) -> Result<Self, serde_json::Error> {
        let raw = fs::read(path).map_err(serde_json::Error::io)?;
        serde_json::from_slice(&raw)
    }

    pub fn save(&self, path: &Path) -> Result<(), serde_json::Error> {
        let raw = serde_json::to_vec(self)?;
        fs::write(path, raw).map_err(serde_json::Error::io)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Row-major matrix, one row per input record, columns aligned to a
/// [`FeatureSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    width: usize,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }
}

/// Left-joins a demographics row onto a record. On a name collision the
/// demographics value replaces the record's.
pub fn merge_row(record: &Record, demographics: &Record) -> Record {
    let mut merged = record.clone();
    for (name, value) in demographics {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// `merge_row` with the join key rewritten to its normalized region code, so
/// a zipcode sent as `"98001"` projects the same as `98001`.
pub fn join_row(record: &Record, zipcode: i64, demographics: &Record) -> Record {
    let mut joined = merge_row(record, demographics);
    joined.insert(JOIN_KEY.to_owned(), Value::from(zipcode));
    joined
}

/// Numeric view of a cell; booleans count as 0/1.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

pub struct Vectorizer<'a> {
    features: &'a FeatureSpec,
    demographics: &'a DemographicsTable,
}

impl<'a> Vectorizer<'a> {
    pub fn new(features: &'a FeatureSpec, demographics: &'a DemographicsTable) -> Self {
        Self {
            features,
            demographics,
        }
    }

    pub fn vectorize_one(&self, record: &Record) -> Result<FeatureMatrix, ApiError> {
        let zipcode = record
            .get(JOIN_KEY)
            .and_then(region_code)
            .ok_or_else(|| {
                ApiError::InvalidInput(format!("{JOIN_KEY} is required and must be a positive integer"))
            })?;
        let demographics = self
            .demographics
            .get(zipcode)
            .ok_or_else(|| ApiError::UnknownRegion(vec![zipcode]))?;

        let merged = join_row(record, zipcode, demographics);
        self.check_columns(|name| merged.contains_key(name))?;

        Ok(FeatureMatrix {
            width: self.features.len(),
            rows: vec![self.project(&merged, None)?],
        })
    }

    /// Whole-batch policy: any row with a bad or unknown zipcode rejects the
    /// batch, so no row is ever predicted from partial demographics.
    pub fn vectorize_batch(&self, table: &Table) -> Result<FeatureMatrix, ApiError> {
        if !table.has_column(JOIN_KEY) {
            return Err(ApiError::InvalidInput(format!(
                "{JOIN_KEY} column is required in the CSV"
            )));
        }

        let mut invalid_rows = Vec::new();
        let mut unknown = BTreeSet::new();
        let mut matched = Vec::with_capacity(table.len());
        for (index, row) in table.rows.iter().enumerate() {
            match row.get(JOIN_KEY).and_then(region_code) {
                None => invalid_rows.push(index + 1),
                Some(zipcode) => match self.demographics.get(zipcode) {
                    Some(demographics) => matched.push((zipcode, demographics)),
                    None => {
                        unknown.insert(zipcode);
                    }
                },
            }
        }
        if !invalid_rows.is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "rows without a valid {JOIN_KEY}: {invalid_rows:?}"
            )));
        }
        if !unknown.is_empty() {
            return Err(ApiError::UnknownRegion(unknown.into_iter().collect()));
        }

        let available: HashSet<&str> = table
            .columns
            .iter()
            .chain(self.demographics.columns())
            .map(String::as_str)
            .collect();
        self.check_columns(|name| available.contains(name))?;

        let rows = table
            .rows
            .iter()
            .zip(matched)
            .enumerate()
            .map(|(index, (row, (zipcode, demographics)))| {
                self.project(&join_row(row, zipcode, demographics), Some(index + 1))
            })
            .collect::<Result<_, _>>()?;

        Ok(FeatureMatrix {
            width: self.features.len(),
            rows,
        })
    }

    fn check_columns(&self, present: impl Fn(&str) -> bool) -> Result<(), ApiError> {
        let missing: Vec<String> = self
            .features
            .names()
            .iter()
            .filter(|name| !present(name.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ApiError::MissingFeatures(missing))
        }
    }

    fn project(&self, merged: &Record, row: Option<usize>) -> Result<Vec<f64>, ApiError> {
        self.features
            .names()
            .iter()
            .map(|name| {
                merged.get(name).and_then(numeric).ok_or_else(|| {
                    let at = row.map(|r| format!(" in row {r}")).unwrap_or_default();
                    ApiError::InvalidInput(format!("feature `{name}` must be numeric{at}"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demographics(csv: &str) -> DemographicsTable {
        DemographicsTable::from_table(Table::from_reader(csv.as_bytes()).unwrap()).unwrap()
    }

    fn spec(names: &[&str]) -> FeatureSpec {
        FeatureSpec::new(names.iter().map(|s| s.to_string()).collect())
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn projects_joined_columns_in_feature_order() {
        let demos = demographics("zipcode,population,income\n98001,12000,55000\n");
        let features = spec(&["bedrooms", "sqft_living", "population"]);
        let input = record(json!({"sqft_living": 1180, "zipcode": 98001, "bedrooms": 3, "floors": 1}));

        let matrix = Vectorizer::new(&features, &demos).vectorize_one(&input).unwrap();
        assert_eq!(matrix.width(), 3);
        assert_eq!(matrix.into_rows(), vec![vec![3.0, 1180.0, 12000.0]]);
    }

    #[test]
    fn string_zipcode_projects_as_its_number() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["zipcode", "population"]);
        let input = record(json!({"zipcode": "98001"}));

        let matrix = Vectorizer::new(&features, &demos).vectorize_one(&input).unwrap();
        assert_eq!(matrix.into_rows(), vec![vec![98001.0, 12000.0]]);
    }

    #[test]
    fn missing_features_are_all_named() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["income", "bedrooms", "grade"]);
        let input = record(json!({"zipcode": 98001, "bedrooms": 3}));

        let err = Vectorizer::new(&features, &demos).vectorize_one(&input).unwrap_err();
        match err {
            ApiError::MissingFeatures(missing) => assert_eq!(missing, ["income", "grade"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_zipcode_is_rejected() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["population"]);
        let input = record(json!({"zipcode": 98999}));

        let err = Vectorizer::new(&features, &demos).vectorize_one(&input).unwrap_err();
        assert!(matches!(err, ApiError::UnknownRegion(codes) if codes == [98999]));
    }

    #[test]
    fn missing_zipcode_is_invalid_input() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["population"]);

        let err = Vectorizer::new(&features, &demos)
            .vectorize_one(&record(json!({"bedrooms": 3})))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn demographics_win_name_collisions() {
        let demos = demographics("zipcode,population,sqft_living\n98001,12000,999\n");
        let features = spec(&["sqft_living", "population"]);
        let input = record(json!({"zipcode": 98001, "sqft_living": 1180}));

        let matrix = Vectorizer::new(&features, &demos).vectorize_one(&input).unwrap();
        assert_eq!(matrix.into_rows(), vec![vec![999.0, 12000.0]]);
    }

    #[test]
    fn merge_keeps_record_field_order() {
        let merged = merge_row(
            &record(json!({"zipcode": 98001, "bedrooms": 3})),
            &record(json!({"population": 12000})),
        );
        let keys: Vec<&str> = merged.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zipcode", "bedrooms", "population"]);
    }

    #[test]
    fn non_numeric_feature_is_invalid_input() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["bedrooms", "population"]);
        let input = record(json!({"zipcode": 98001, "bedrooms": "three"}));

        let err = Vectorizer::new(&features, &demos).vectorize_one(&input).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(msg) if msg.contains("bedrooms")));
    }

    #[test]
    fn batch_preserves_row_order() {
        let demos = demographics("zipcode,population\n98001,12000\n98002,8000\n");
        let features = spec(&["bedrooms", "population"]);
        let table = Table::from_reader("bedrooms,zipcode\n1,98002\n2,98001\n3,98002\n".as_bytes()).unwrap();

        let matrix = Vectorizer::new(&features, &demos).vectorize_batch(&table).unwrap();
        assert_eq!(
            matrix.into_rows(),
            vec![vec![1.0, 8000.0], vec![2.0, 12000.0], vec![3.0, 8000.0]]
        );
    }

    #[test]
    fn batch_with_an_unknown_zipcode_is_rejected_whole() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["population"]);
        let table = Table::from_reader("zipcode\n98001\n98005\n98001\n98004\n98005\n".as_bytes()).unwrap();

        let err = Vectorizer::new(&features, &demos).vectorize_batch(&table).unwrap_err();
        assert!(matches!(err, ApiError::UnknownRegion(codes) if codes == [98004, 98005]));
    }

    #[test]
    fn batch_without_zipcode_column_is_invalid() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["population"]);
        let table = Table::from_reader("bedrooms\n3\n".as_bytes()).unwrap();

        let err = Vectorizer::new(&features, &demos).vectorize_batch(&table).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(msg) if msg.contains("zipcode")));
    }

    #[test]
    fn batch_names_rows_with_blank_zipcode() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["population"]);
        let table = Table::from_reader("zipcode,bedrooms\n98001,1\n,2\n".as_bytes()).unwrap();

        let err = Vectorizer::new(&features, &demos).vectorize_batch(&table).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(msg) if msg.contains("[2]")));
    }

    #[test]
    fn empty_batch_yields_empty_matrix() {
        let demos = demographics("zipcode,population\n98001,12000\n");
        let features = spec(&["population"]);
        let table = Table::from_reader("zipcode\n".as_bytes()).unwrap();

        let matrix = Vectorizer::new(&features, &demos).vectorize_batch(&table).unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.width(), 1);
    }
}
