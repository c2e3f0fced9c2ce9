//! Domain types shared by the index, the store client and the coordinator

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// A registered person from the local roster.
///
/// Immutable after load; the `LocalIndex` owns every instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub identifying_number: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl PersonRecord {
    pub fn new(identifying_number: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            identifying_number: identifying_number.into(),
            full_name: full_name.into(),
            group: None,
            neighborhood: None,
            gender: None,
            coordinator: None,
            leader: None,
            address: None,
        }
    }
}

/// Polling-site assignment held by the external store.
///
/// Every field defaults to an empty string when the store has no value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAssignment {
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub site_name: String,
    #[serde(default)]
    pub site_address: String,
    #[serde(default)]
    pub table_number: String,
}

/// Which sub-source supplied a half of a merged result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Local,
    External,
}

/// The answer to a `resolve` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedResult {
    pub person: Option<Arc<PersonRecord>>,
    pub site: Option<SiteAssignment>,
    pub provenance: Vec<Provenance>,
}

impl MergedResult {
    /// Merge the two halves; provenance lists the sources that contributed.
    pub fn merge(person: Option<Arc<PersonRecord>>, site: Option<SiteAssignment>) -> Self {
        let mut provenance = Vec::with_capacity(2);
        if person.is_some() {
            provenance.push(Provenance::Local);
        }
        if site.is_some() {
            provenance.push(Provenance::External);
        }
        Self {
            person,
            site,
            provenance,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.person.is_none() && self.site.is_none()
    }

    /// Site assignment without a registered person: a distinct, legitimate outcome.
    pub fn is_external_only(&self) -> bool {
        self.person.is_none() && self.site.is_some()
    }
}

/// An already-authenticated caller, as handed to the core by the boundary layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: String,
    pub display_name: String,
    pub role: String,
}

impl CallerIdentity {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: role.into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Kind of lookup recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    ByNumber,
    ByName,
}

/// Trim an identifying number and check it is a non-empty string of ASCII digits.
pub fn normalize_number(raw: &str) -> GatewayResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::invalid_query("identifying number is empty"));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::invalid_query(format!(
            "identifying number must contain only digits: '{}'",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number(" 123 ").unwrap(), "123");
        assert!(normalize_number("").is_err());
        assert!(normalize_number("   ").is_err());
        assert!(normalize_number("12a3").is_err());
        assert!(normalize_number("1.234").is_err());
        assert!(normalize_number("-12").is_err());
    }

    #[test]
    fn test_merge_provenance() {
        let person = Arc::new(PersonRecord::new("1", "ANA RUIZ"));

        let both = MergedResult::merge(Some(person.clone()), Some(SiteAssignment::default()));
        assert_eq!(both.provenance, vec![Provenance::Local, Provenance::External]);

        let local = MergedResult::merge(Some(person), None);
        assert_eq!(local.provenance, vec![Provenance::Local]);
        assert!(!local.is_external_only());

        let external = MergedResult::merge(None, Some(SiteAssignment::default()));
        assert_eq!(external.provenance, vec![Provenance::External]);
        assert!(external.is_external_only());

        let none = MergedResult::merge(None, None);
        assert!(none.is_empty());
        assert!(none.provenance.is_empty());
    }

    #[test]
    fn test_site_assignment_defaults_missing_fields() {
        let site: SiteAssignment = serde_json::from_str(r#"{"zone":"02"}"#).unwrap();
        assert_eq!(site.zone, "02");
        assert_eq!(site.department, "");
        assert_eq!(site.table_number, "");
    }
}
