//! Capability shared by every entity the audit and filter pipeline works on.

use std::{collections::HashMap, fmt::Debug, hash::Hash};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use db::models::customer::{Customer, CustomerPatch};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Field names understood by [`AuditableRecord::field`].
pub mod fields {
    pub const REFERENCE_NUMBER: &str = "reference_number";
    pub const COMPANY_NAME: &str = "company_name";
    pub const CONTACT_PERSON: &str = "contact_person";
    pub const CONTACT_NUMBER: &str = "contact_number";
    pub const EMAIL_ADDRESS: &str = "email_address";
    pub const ADDRESS: &str = "address";
    pub const REGION: &str = "region";
    pub const TYPE_CLIENT: &str = "type_client";
    pub const STATUS: &str = "status";
    pub const TSA: &str = "tsa";
    pub const TSM: &str = "tsm";
    pub const MANAGER: &str = "manager";
    pub const REMARKS: &str = "remarks";
    pub const CREATED_AT: &str = "created_at";
}

pub trait AuditableRecord: Clone + Debug + Send + Sync {
    type Id: Clone + Eq + Hash + Ord + Debug + Send + Sync;
    type Patch: Clone + Debug + Send + Sync;

    fn record_id(&self) -> Self::Id;

    fn status(&self) -> Option<&str>;

    fn type_client(&self) -> Option<&str>;

    /// Free-text field by name; `None` when the record has no such field.
    fn field(&self, name: &str) -> Option<&str>;

    /// Creation timestamp, `None` when absent or unparsable.
    fn created_at(&self) -> Option<DateTime<Utc>>;

    fn apply_patch(&mut self, patch: &Self::Patch);
}

impl AuditableRecord for Customer {
    type Id = i64;
    type Patch = CustomerPatch;

    fn record_id(&self) -> i64 {
        self.id
    }

    fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn type_client(&self) -> Option<&str> {
        self.type_client.as_deref()
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            fields::REFERENCE_NUMBER => self.reference_number.as_deref(),
            fields::COMPANY_NAME => Some(&self.company_name),
            fields::CONTACT_PERSON => Some(&self.contact_person),
            fields::CONTACT_NUMBER => Some(&self.contact_number),
            fields::EMAIL_ADDRESS => Some(&self.email_address),
            fields::ADDRESS => Some(&self.address),
            fields::REGION => Some(&self.region),
            fields::TYPE_CLIENT => self.type_client.as_deref(),
            fields::STATUS => self.status.as_deref(),
            fields::TSA => self.tsa.as_deref(),
            fields::TSM => self.tsm.as_deref(),
            fields::MANAGER => self.manager.as_deref(),
            fields::REMARKS => self.remarks.as_deref(),
            _ => None,
        }
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn apply_patch(&mut self, patch: &CustomerPatch) {
        Customer::apply_patch(self, patch);
    }
}

/// Loosely-shaped record for the asset, inquiry and activity screens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, PartialEq)]
pub struct GenericRecord {
    pub id: String,
    pub status: Option<String>,
    pub type_client: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, PartialEq)]
pub struct GenericPatch {
    pub status: Option<String>,
    pub type_client: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

impl AuditableRecord for GenericRecord {
    type Id = String;
    type Patch = GenericPatch;

    fn record_id(&self) -> String {
        self.id.clone()
    }

    fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn type_client(&self) -> Option<&str> {
        self.type_client.as_deref()
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            fields::STATUS => self.status.as_deref(),
            fields::TYPE_CLIENT => self.type_client.as_deref(),
            _ => self.fields.get(name).map(String::as_str),
        }
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    fn apply_patch(&mut self, patch: &GenericPatch) {
        if let Some(status) = &patch.status {
            self.status = Some(status.clone());
        }
        if let Some(type_client) = &patch.type_client {
            self.type_client = Some(type_client.clone());
        }
        for (key, value) in &patch.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn parses_supported_timestamp_shapes() {
        let rfc = parse_timestamp("2024-03-05T10:15:00+08:00").unwrap();
        assert_eq!(rfc.hour(), 2);

        let spaced = parse_timestamp("2024-03-05 10:15:00").unwrap();
        assert_eq!(spaced.hour(), 10);

        let date = parse_timestamp(" 2024-03-05 ").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 5));
    }

    #[test]
    fn rejects_unparsable_timestamps() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("03/05/2024").is_none());
    }

    #[test]
    fn generic_record_reads_status_and_extra_fields() {
        let mut record = GenericRecord {
            id: "asset-7".to_string(),
            status: Some("Active".to_string()),
            fields: HashMap::from([("company_name".to_string(), "Acme".to_string())]),
            ..Default::default()
        };
        assert_eq!(record.field(fields::STATUS), Some("Active"));
        assert_eq!(record.field(fields::COMPANY_NAME), Some("Acme"));
        assert_eq!(record.field("serial"), None);

        record.apply_patch(&GenericPatch {
            type_client: Some("Laptop".to_string()),
            fields: HashMap::from([("serial".to_string(), "SN-1".to_string())]),
            ..Default::default()
        });
        assert_eq!(record.type_client(), Some("Laptop"));
        assert_eq!(record.field("serial"), Some("SN-1"));
        assert_eq!(record.status(), Some("Active"));
    }
}
