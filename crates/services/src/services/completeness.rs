//! Completeness checks and the combined audit report.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use utils::text::is_blank;

use super::{
    duplicates::{DuplicateReport, find_duplicates},
    record::AuditableRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IssueKind {
    Duplicate,
    MissingType,
    MissingStatus,
}

/// Which slice of the audit the working set is narrowed to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AuditCategory {
    #[default]
    All,
    Duplicates,
    MissingType,
    MissingStatus,
}

/// Type is blank while status is filled in. A record with both blank is not reported.
pub fn is_missing_type<R: AuditableRecord>(record: &R) -> bool {
    is_blank(record.type_client()) && !is_blank(record.status())
}

/// Mirror of [`is_missing_type`].
pub fn is_missing_status<R: AuditableRecord>(record: &R) -> bool {
    is_blank(record.status()) && !is_blank(record.type_client())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, PartialEq, Eq)]
pub struct AuditSummary {
    pub total_records: usize,
    pub audited: usize,
    pub duplicates: usize,
    pub duplicate_groups: usize,
    pub missing_type: usize,
    pub missing_status: usize,
}

#[derive(Debug, Clone)]
pub struct AuditReport<Id> {
    duplicates: DuplicateReport<Id>,
    missing_type: HashSet<Id>,
    missing_status: HashSet<Id>,
    total_records: usize,
}

impl<Id: Clone + Eq + std::hash::Hash> AuditReport<Id> {
    pub fn run<R, F>(records: &[R], key_of: F) -> Self
    where
        R: AuditableRecord<Id = Id>,
        F: Fn(&R) -> String,
    {
        let duplicates = find_duplicates(records, key_of);
        let missing_type = records
            .iter()
            .filter(|r| is_missing_type(*r))
            .map(|r| r.record_id())
            .collect();
        let missing_status = records
            .iter()
            .filter(|r| is_missing_status(*r))
            .map(|r| r.record_id())
            .collect();

        Self {
            duplicates,
            missing_type,
            missing_status,
            total_records: records.len(),
        }
    }

    pub fn duplicates(&self) -> &DuplicateReport<Id> {
        &self.duplicates
    }

    pub fn missing_type(&self) -> &HashSet<Id> {
        &self.missing_type
    }

    pub fn missing_status(&self) -> &HashSet<Id> {
        &self.missing_status
    }

    pub fn issues_for(&self, id: &Id) -> Vec<IssueKind> {
        let mut issues = Vec::new();
        if self.duplicates.is_duplicate(id) {
            issues.push(IssueKind::Duplicate);
        }
        if self.missing_type.contains(id) {
            issues.push(IssueKind::MissingType);
        }
        if self.missing_status.contains(id) {
            issues.push(IssueKind::MissingStatus);
        }
        issues
    }

    pub fn is_audited(&self, id: &Id) -> bool {
        self.duplicates.is_duplicate(id)
            || self.missing_type.contains(id)
            || self.missing_status.contains(id)
    }

    pub fn in_category(&self, id: &Id, category: AuditCategory) -> bool {
        match category {
            AuditCategory::All => self.is_audited(id),
            AuditCategory::Duplicates => self.duplicates.is_duplicate(id),
            AuditCategory::MissingType => self.missing_type.contains(id),
            AuditCategory::MissingStatus => self.missing_status.contains(id),
        }
    }

    /// Audited records in original order.
    pub fn audited_records<'a, R>(&self, records: &'a [R]) -> Vec<&'a R>
    where
        R: AuditableRecord<Id = Id>,
    {
        records
            .iter()
            .filter(|r| self.is_audited(&r.record_id()))
            .collect()
    }

    pub fn summary(&self) -> AuditSummary {
        let audited: HashSet<&Id> = self
            .duplicates
            .duplicate_ids()
            .iter()
            .chain(&self.missing_type)
            .chain(&self.missing_status)
            .collect();

        AuditSummary {
            total_records: self.total_records,
            audited: audited.len(),
            duplicates: self.duplicates.len(),
            duplicate_groups: self.duplicates.groups().len(),
            missing_type: self.missing_type.len(),
            missing_status: self.missing_status.len(),
        }
    }
}
