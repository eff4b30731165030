//! In-memory collection of records, mutated only through [`Mutation`].

use std::collections::HashSet;

use tracing::debug;

use super::record::AuditableRecord;

#[derive(Debug, Clone)]
pub enum Mutation<R: AuditableRecord> {
    /// Appends new records; a record whose id is already held replaces it in place.
    InsertMany(Vec<R>),
    UpdateMany { ids: Vec<R::Id>, patch: R::Patch },
    RemoveMany(Vec<R::Id>),
}

type Observer<R> = Box<dyn Fn(&[R]) + Send + Sync>;

pub struct RecordStore<R: AuditableRecord> {
    records: Vec<R>,
    observers: Vec<Observer<R>>,
}

impl<R: AuditableRecord> Default for RecordStore<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            observers: Vec::new(),
        }
    }
}

impl<R: AuditableRecord> RecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection.
    pub fn load(&mut self, records: Vec<R>) -> &[R] {
        debug!(count = records.len(), "Record store loaded");
        self.records = records;
        self.notify();
        &self.records
    }

    /// Ids that are not held are ignored.
    pub fn apply(&mut self, mutation: Mutation<R>) -> &[R] {
        match mutation {
            Mutation::InsertMany(new_records) => {
                for record in new_records {
                    let id = record.record_id();
                    match self.records.iter_mut().find(|r| r.record_id() == id) {
                        Some(existing) => *existing = record,
                        None => self.records.push(record),
                    }
                }
            }
            Mutation::UpdateMany { ids, patch } => {
                let ids: HashSet<R::Id> = ids.into_iter().collect();
                for record in self
                    .records
                    .iter_mut()
                    .filter(|r| ids.contains(&r.record_id()))
                {
                    record.apply_patch(&patch);
                }
            }
            Mutation::RemoveMany(ids) => {
                let ids: HashSet<R::Id> = ids.into_iter().collect();
                self.records.retain(|r| !ids.contains(&r.record_id()));
            }
        }
        self.notify();
        &self.records
    }

    /// Register a callback invoked with the full collection after every load or mutation.
    pub fn subscribe(&mut self, observer: impl Fn(&[R]) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.records.iter().find(|r| &r.record_id() == id)
    }

    pub fn contains(&self, id: &R::Id) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> HashSet<R::Id> {
        self.records.iter().map(|r| r.record_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn notify(&self) {
        for observer in &self.observers {
            observer(&self.records);
        }
    }
}
