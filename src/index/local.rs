//! In-memory roster index keyed by identifying number

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{GatewayError, GatewayResult};
use crate::model::{normalize_number, PersonRecord};

/// Roster entry as it appears in the source file. Only the identifying
/// number is required; it may be written as a string or a bare number.
#[derive(Debug, Deserialize)]
struct RawPersonRecord {
    #[serde(default)]
    identifying_number: Option<serde_json::Value>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    neighborhood: Option<String>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    coordinator: Option<String>,
    #[serde(default)]
    leader: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

impl RawPersonRecord {
    fn into_record(self) -> Option<PersonRecord> {
        let raw = match self.identifying_number? {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        // digits only; exponent-formatted numbers are rejected here too
        let number = normalize_number(&raw).ok()?;

        Some(PersonRecord {
            identifying_number: number,
            full_name: self.full_name.unwrap_or_default().trim().to_string(),
            group: self.group,
            neighborhood: self.neighborhood,
            gender: self.gender,
            coordinator: self.coordinator,
            leader: self.leader,
            address: self.address,
        })
    }
}

/// Outcome of a roster load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries in the source array
    pub total: usize,
    /// Distinct identifying numbers indexed
    pub indexed: usize,
    /// Entries dropped because they were malformed or had no identifying number
    pub skipped: usize,
    /// Entries that replaced an earlier entry with the same number
    pub duplicates: usize,
}

/// Read-only roster index.
///
/// Lookups by identifying number are a single hash probe. Name search is a
/// linear scan over a lowercased copy of every full name.
#[derive(Debug, Default)]
pub struct LocalIndex {
    by_number: HashMap<String, Arc<PersonRecord>>,
    /// (lowercased full name, record)
    names: Vec<(String, Arc<PersonRecord>)>,
}

impl LocalIndex {
    /// Load the roster from a JSON file.
    ///
    /// Fails with `DataLoad` if the file is missing or is not a JSON array.
    /// Individual malformed entries are skipped.
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();

        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::data_load(&source, e.to_string()))?;

        let (index, report) = Self::from_json(&content, &source)?;

        tracing::info!(
            path = %source,
            total = report.total,
            indexed = report.indexed,
            skipped = report.skipped,
            duplicates = report.duplicates,
            "Local roster loaded"
        );

        Ok(index)
    }

    /// Build from JSON text. `source` names the origin in error messages.
    pub fn from_json(content: &str, source: &str) -> GatewayResult<(Self, LoadReport)> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| GatewayError::data_load(source, format!("invalid JSON: {}", e)))?;

        let entries = match value {
            serde_json::Value::Array(entries) => entries,
            other => {
                return Err(GatewayError::data_load(
                    source,
                    format!("expected an array of person records, found {}", kind_of(&other)),
                ))
            }
        };

        let mut report = LoadReport {
            total: entries.len(),
            ..LoadReport::default()
        };

        let mut records = Vec::with_capacity(entries.len());
        for (position, entry) in entries.into_iter().enumerate() {
            let record = serde_json::from_value::<RawPersonRecord>(entry)
                .ok()
                .and_then(RawPersonRecord::into_record);
            match record {
                Some(record) => records.push(record),
                None => {
                    tracing::debug!(position, "Skipping malformed roster entry");
                    report.skipped += 1;
                }
            }
        }

        let (index, duplicates) = Self::build(records);
        report.duplicates = duplicates;
        report.indexed = index.len();
        Ok((index, report))
    }

    /// Build from already-parsed records. Later duplicates replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = PersonRecord>) -> Self {
        Self::build(records).0
    }

    fn build(records: impl IntoIterator<Item = PersonRecord>) -> (Self, usize) {
        let mut by_number: HashMap<String, Arc<PersonRecord>> = HashMap::new();
        let mut duplicates = 0;

        for mut record in records {
            record.identifying_number = record.identifying_number.trim().to_string();
            if record.identifying_number.is_empty() {
                continue;
            }
            let key = record.identifying_number.clone();
            if by_number.insert(key, Arc::new(record)).is_some() {
                duplicates += 1;
            }
        }

        let names = by_number
            .values()
            .map(|record| (record.full_name.to_lowercase(), Arc::clone(record)))
            .collect();

        (Self { by_number, names }, duplicates)
    }

    /// Exact lookup by identifying number
    pub fn get_by_number(&self, number: &str) -> Option<Arc<PersonRecord>> {
        self.by_number.get(number.trim()).cloned()
    }

    /// Case-insensitive substring match on the full name.
    ///
    /// Unordered; one result per identifying number.
    pub fn search_by_name(&self, fragment: &str) -> Vec<Arc<PersonRecord>> {
        let needle = fragment.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.names
            .iter()
            .filter(|(name, _)| name.contains(&needle))
            .map(|(_, record)| Arc::clone(record))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_index() -> LocalIndex {
        LocalIndex::from_records(vec![
            PersonRecord::new("123", "ANA RUIZ"),
            PersonRecord::new("456", "JOHN SMITH"),
            PersonRecord::new("789", "Johnny Walker"),
        ])
    }

    #[test]
    fn test_get_by_number() {
        let index = sample_index();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get_by_number("123").unwrap().full_name, "ANA RUIZ");
        assert_eq!(index.get_by_number(" 456 ").unwrap().full_name, "JOHN SMITH");
        assert!(index.get_by_number("999").is_none());
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let index = sample_index();

        for fragment in ["john", "SMITH", "n sm"] {
            let hits = index.search_by_name(fragment);
            assert!(
                hits.iter().any(|r| r.identifying_number == "456"),
                "fragment {:?} should match JOHN SMITH",
                fragment
            );
        }

        let mut johns: Vec<_> = index
            .search_by_name("JOHN")
            .into_iter()
            .map(|r| r.identifying_number.clone())
            .collect();
        johns.sort();
        assert_eq!(johns, vec!["456", "789"]);

        assert!(index.search_by_name("zzz").is_empty());
    }

    #[test]
    fn test_from_json_skips_bad_entries() {
        let json = r#"[
            {"identifying_number": "123", "full_name": "ANA RUIZ", "group": "A"},
            {"full_name": "NO NUMBER"},
            {"identifying_number": "   ", "full_name": "BLANK NUMBER"},
            {"identifying_number": 456, "full_name": "NUMERIC ID"},
            {"identifying_number": "789", "full_name": "BAD GROUP", "group": 12},
            "not an object",
            {"identifying_number": " 123 ", "full_name": "ANA RUIZ DUPLICATE"}
        ]"#;

        let (index, report) = LocalIndex::from_json(json, "inline").unwrap();
        assert_eq!(report.total, 7);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.indexed, 2);

        assert_eq!(index.get_by_number("456").unwrap().full_name, "NUMERIC ID");
        // last entry wins
        assert_eq!(
            index.get_by_number("123").unwrap().full_name,
            "ANA RUIZ DUPLICATE"
        );
        assert_eq!(index.search_by_name("ruiz").len(), 1);
    }

    #[test]
    fn test_non_digit_numbers_are_skipped() {
        let json = r#"[
            {"identifying_number": "ABC", "full_name": "LETTERS"},
            {"identifying_number": 12345678901234567890123, "full_name": "TOO BIG"},
            {"identifying_number": -5, "full_name": "NEGATIVE"},
            {"identifying_number": 12.5, "full_name": "FRACTION"},
            {"identifying_number": 18446744073709551615, "full_name": "U64 MAX"}
        ]"#;

        let (index, report) = LocalIndex::from_json(json, "inline").unwrap();
        assert_eq!(report.skipped, 4);
        assert_eq!(report.indexed, 1);
        assert!(index.get_by_number("18446744073709551615").is_some());
        assert!(index.search_by_name("letters").is_empty());
        assert!(index.search_by_name("too big").is_empty());
    }

    #[test]
    fn test_structural_errors_fail_load() {
        let err = LocalIndex::from_json(r#"{"identifying_number": "1"}"#, "inline").unwrap_err();
        assert!(matches!(err, GatewayError::DataLoad { .. }));

        let err = LocalIndex::from_json("[{", "inline").unwrap_err();
        assert!(matches!(err, GatewayError::DataLoad { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"identifying_number": "1046346406", "full_name": "MARIA LOPEZ"}}]"#
        )
        .unwrap();

        let index = LocalIndex::load(file.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get_by_number("1046346406").is_some());
    }

    #[test]
    fn test_missing_file_is_data_load_error() {
        let err = LocalIndex::load("/nonexistent/people.json").unwrap_err();
        assert!(matches!(err, GatewayError::DataLoad { .. }));
    }
}
