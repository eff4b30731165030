//! Composite-key duplicate detection.
//!
//! Every record sharing a key with another record is reported, including the
//! first one seen. Records whose key fields are all blank share the key `"||"`
//! and are therefore reported as duplicates of each other.

use std::collections::{HashMap, HashSet};

use utils::text::fold;

use super::record::{AuditableRecord, fields};

pub const KEY_SEPARATOR: &str = "|";

/// Default customer identity: company name, contact number, contact person.
pub fn customer_identity_key<R: AuditableRecord>(record: &R) -> String {
    [
        fields::COMPANY_NAME,
        fields::CONTACT_NUMBER,
        fields::CONTACT_PERSON,
    ]
    .iter()
    .map(|name| fold(record.field(name).unwrap_or_default()))
    .collect::<Vec<_>>()
    .join(KEY_SEPARATOR)
}

#[derive(Debug, Clone)]
pub struct DuplicateReport<Id> {
    duplicate_ids: HashSet<Id>,
    /// Groups of ids sharing a key, each in original record order.
    groups: Vec<Vec<Id>>,
}

impl<Id> Default for DuplicateReport<Id> {
    fn default() -> Self {
        Self {
            duplicate_ids: HashSet::new(),
            groups: Vec::new(),
        }
    }
}

impl<Id: Clone + Eq + std::hash::Hash> DuplicateReport<Id> {
    pub fn is_duplicate(&self, id: &Id) -> bool {
        self.duplicate_ids.contains(id)
    }

    pub fn duplicate_ids(&self) -> &HashSet<Id> {
        &self.duplicate_ids
    }

    pub fn groups(&self) -> &[Vec<Id>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.duplicate_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.duplicate_ids.is_empty()
    }

    /// Every group member except the first seen; the candidates for removal.
    pub fn redundant_ids(&self) -> Vec<Id> {
        self.groups
            .iter()
            .flat_map(|group| group.iter().skip(1).cloned())
            .collect()
    }
}

pub fn find_duplicates<R, F>(records: &[R], key_of: F) -> DuplicateReport<R::Id>
where
    R: AuditableRecord,
    F: Fn(&R) -> String,
{
    // key -> index into `groups`
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<R::Id>> = Vec::new();

    for record in records {
        let key = key_of(record);
        match first_seen.get(&key) {
            Some(&group) => groups[group].push(record.record_id()),
            None => {
                first_seen.insert(key, groups.len());
                groups.push(vec![record.record_id()]);
            }
        }
    }

    groups.retain(|group| group.len() > 1);
    let duplicate_ids = groups.iter().flatten().cloned().collect();

    DuplicateReport {
        duplicate_ids,
        groups,
    }
}

/// Split records into `(unique, duplicates)`, both in original order.
pub fn partition<'a, R: AuditableRecord>(
    records: &'a [R],
    report: &DuplicateReport<R::Id>,
) -> (Vec<&'a R>, Vec<&'a R>) {
    records
        .iter()
        .partition(|r| !report.is_duplicate(&r.record_id()))
}
