//! Filter and sort pipeline producing the working set shown to the user.
//!
//! [`compute_working_set`] is a pure function of its inputs. Each stage is also
//! exposed on its own so callers can compose a subset.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use utils::text::{eq_folded, fold};

use super::{
    completeness::{AuditCategory, AuditReport},
    record::{AuditableRecord, fields},
};

/// Sentinel accepted by every enumerated filter.
pub const ALL: &str = "all";

/// Fields matched by free-text search.
pub const SEARCH_FIELDS: [&str; 7] = [
    fields::COMPANY_NAME,
    fields::CONTACT_PERSON,
    fields::EMAIL_ADDRESS,
    fields::REGION,
    fields::TSA,
    fields::TSM,
    fields::MANAGER,
];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SortKey {
    #[default]
    CompanyName,
    ContactPerson,
    Region,
    TypeClient,
    Status,
    ReferenceNumber,
    CreatedAt,
}

impl SortKey {
    fn field_name(self) -> &'static str {
        match self {
            SortKey::CompanyName => fields::COMPANY_NAME,
            SortKey::ContactPerson => fields::CONTACT_PERSON,
            SortKey::Region => fields::REGION,
            SortKey::TypeClient => fields::TYPE_CLIENT,
            SortKey::Status => fields::STATUS,
            SortKey::ReferenceNumber => fields::REFERENCE_NUMBER,
            SortKey::CreatedAt => fields::CREATED_AT,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Inclusive day range on the creation timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_set(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct FilterState {
    pub search_text: String,
    pub type_filter: String,
    pub status_filter: String,
    /// Matches the owning sales agent (`tsa`).
    pub owner_filter: String,
    pub date_range: DateRange,
    /// `Some` only while the audit view is active.
    pub audit_category: Option<AuditCategory>,
    pub sort_key: SortKey,
    pub sort_direction: SortDirection,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            search_text: String::new(),
            type_filter: ALL.to_string(),
            status_filter: ALL.to_string(),
            owner_filter: ALL.to_string(),
            date_range: DateRange::default(),
            audit_category: None,
            sort_key: SortKey::default(),
            sort_direction: SortDirection::default(),
        }
    }
}

fn is_unset(filter: &str) -> bool {
    let filter = filter.trim();
    filter.is_empty() || filter.eq_ignore_ascii_case(ALL)
}

pub fn matches_search<R: AuditableRecord>(record: &R, search_text: &str) -> bool {
    let term = fold(search_text);
    if term.is_empty() {
        return true;
    }
    SEARCH_FIELDS
        .iter()
        .filter_map(|name| record.field(name))
        .any(|value| value.to_lowercase().contains(&term))
}

pub fn matches_enumerated<R: AuditableRecord>(record: &R, filter: &FilterState) -> bool {
    let exact = |wanted: &str, actual: Option<&str>| {
        is_unset(wanted) || actual.is_some_and(|a| a.trim() == wanted.trim())
    };
    let owner_ok = is_unset(&filter.owner_filter)
        || record
            .field(fields::TSA)
            .is_some_and(|owner| eq_folded(owner, &filter.owner_filter));

    exact(&filter.type_filter, record.type_client())
        && exact(&filter.status_filter, record.status())
        && owner_ok
}

/// With any bound set, records without a parsable creation time are dropped.
pub fn matches_date_range<R: AuditableRecord>(record: &R, range: &DateRange) -> bool {
    if !range.is_set() {
        return true;
    }
    let Some(created) = record.created_at() else {
        return false;
    };
    let day = created.date_naive();
    range.start.is_none_or(|start| day >= start) && range.end.is_none_or(|end| day <= end)
}

/// Passes everything when not in the audit view or no audit has been run.
pub fn matches_audit<R: AuditableRecord>(
    record: &R,
    category: Option<AuditCategory>,
    audit: Option<&AuditReport<R::Id>>,
) -> bool {
    match (category, audit) {
        (Some(category), Some(report)) => report.in_category(&record.record_id(), category),
        _ => true,
    }
}

fn compare<R: AuditableRecord>(a: &R, b: &R, key: SortKey) -> Ordering {
    if key == SortKey::CreatedAt {
        return a.created_at().cmp(&b.created_at());
    }
    let name = key.field_name();
    let a = a.field(name).unwrap_or_default().to_lowercase();
    let b = b.field(name).unwrap_or_default().to_lowercase();
    a.cmp(&b)
}

/// Stable: records with equal keys keep their relative order in either direction.
pub fn sort_records<R: AuditableRecord>(
    records: &mut [&R],
    key: SortKey,
    direction: SortDirection,
) {
    records.sort_by(|a, b| {
        let ordering = compare(*a, *b, key);
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

pub fn compute_working_set<'a, R: AuditableRecord>(
    records: &'a [R],
    filter: &FilterState,
    audit: Option<&AuditReport<R::Id>>,
) -> Vec<&'a R> {
    let mut working: Vec<&R> = records
        .iter()
        .filter(|r| matches_search(*r, &filter.search_text))
        .filter(|r| matches_enumerated(*r, filter))
        .filter(|r| matches_date_range(*r, &filter.date_range))
        .filter(|r| matches_audit(*r, filter.audit_category, audit))
        .collect();
    sort_records(&mut working, filter.sort_key, filter.sort_direction);
    working
}
