//! Reconciliation session: the record store plus everything the screens derive from it.

use std::collections::HashSet;

use tracing::{debug, info};

use super::{
    completeness::AuditReport,
    duplicates::customer_identity_key,
    pagination::{Page, paginate},
    record::AuditableRecord,
    record_store::{Mutation, RecordStore},
    working_set::{FilterState, compute_working_set},
};

/// Ids chosen for a bulk operation, in the order they were selected.
#[derive(Debug, Clone)]
pub struct SelectionSet<Id> {
    order: Vec<Id>,
    members: HashSet<Id>,
}

impl<Id> Default for SelectionSet<Id> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            members: HashSet::new(),
        }
    }
}

impl<Id: Clone + Eq + std::hash::Hash> SelectionSet<Id> {
    pub fn insert(&mut self, id: Id) -> bool {
        if self.members.insert(id.clone()) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: &Id) -> bool {
        if self.members.remove(id) {
            self.order.retain(|i| i != id);
            true
        } else {
            false
        }
    }

    pub fn remove_many(&mut self, ids: &[Id]) {
        let gone: HashSet<&Id> = ids.iter().collect();
        self.members.retain(|id| !gone.contains(id));
        self.order.retain(|id| !gone.contains(id));
    }

    pub fn retain(&mut self, keep: impl Fn(&Id) -> bool) {
        self.order.retain(|id| keep(id));
        self.members.retain(|id| keep(id));
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.members.contains(id)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    /// Ids in selection order.
    pub fn ids(&self) -> &[Id] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

type IdentityKey<R> = Box<dyn Fn(&R) -> String + Send + Sync>;

pub struct ReconciliationSession<R: AuditableRecord> {
    store: RecordStore<R>,
    selection: SelectionSet<R::Id>,
    filter: FilterState,
    page: usize,
    audit: Option<AuditReport<R::Id>>,
    identity_key: IdentityKey<R>,
}

impl<R: AuditableRecord + 'static> Default for ReconciliationSession<R> {
    fn default() -> Self {
        Self::with_identity_key(customer_identity_key::<R>)
    }
}

impl<R: AuditableRecord> ReconciliationSession<R> {
    pub fn with_identity_key(key: impl Fn(&R) -> String + Send + Sync + 'static) -> Self {
        Self {
            store: RecordStore::new(),
            selection: SelectionSet::default(),
            filter: FilterState::default(),
            page: 1,
            audit: None,
            identity_key: Box::new(key),
        }
    }

    /// Replace every record. The previous audit no longer describes the data and is dropped.
    pub fn load(&mut self, records: Vec<R>) {
        self.store.load(records);
        self.audit = None;
        self.prune_selection();
    }

    pub fn apply(&mut self, mutation: Mutation<R>) {
        self.store.apply(mutation);
        self.prune_selection();
    }

    pub fn store(&self) -> &RecordStore<R> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore<R> {
        &mut self.store
    }

    pub fn records(&self) -> &[R] {
        self.store.records()
    }

    pub fn selection(&self) -> &SelectionSet<R::Id> {
        &self.selection
    }

    /// Selects the given ids that exist in the store; returns how many were added.
    pub fn select<I: IntoIterator<Item = R::Id>>(&mut self, ids: I) -> usize {
        let mut added = 0;
        for id in ids {
            if self.store.contains(&id) && self.selection.insert(id) {
                added += 1;
            }
        }
        added
    }

    pub fn deselect(&mut self, ids: &[R::Id]) {
        self.selection.remove_many(ids);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Select every record in the current working set.
    pub fn select_working_set(&mut self) -> usize {
        let ids: Vec<R::Id> = self.working_set().iter().map(|r| r.record_id()).collect();
        self.select(ids)
    }

    fn prune_selection(&mut self) {
        let present = self.store.ids();
        let before = self.selection.len();
        self.selection.retain(|id| present.contains(id));
        if self.selection.len() != before {
            debug!(
                dropped = before - self.selection.len(),
                "Pruned selection of ids no longer in the store"
            );
        }
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Any filter change returns the view to page 1.
    pub fn set_filter(&mut self, filter: FilterState) {
        self.filter = filter;
        self.page = 1;
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    pub fn run_audit(&mut self) -> &AuditReport<R::Id> {
        let report = AuditReport::run(self.store.records(), &self.identity_key);
        let summary = report.summary();
        info!(
            total = summary.total_records,
            audited = summary.audited,
            duplicates = summary.duplicates,
            missing_type = summary.missing_type,
            missing_status = summary.missing_status,
            "Audit complete"
        );
        self.audit.insert(report)
    }

    pub fn audit(&self) -> Option<&AuditReport<R::Id>> {
        self.audit.as_ref()
    }

    pub fn working_set(&self) -> Vec<&R> {
        compute_working_set(self.store.records(), &self.filter, self.audit.as_ref())
    }

    pub fn current_page(&self, page_size: usize) -> Page<R> {
        let working: Vec<R> = self.working_set().into_iter().cloned().collect();
        paginate(&working, page_size, self.page)
    }
}
