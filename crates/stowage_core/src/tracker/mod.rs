//! Change tracking for entities owned by one unit of work.
//!
//! # Responsibility
//! - Keep the identity map: at most one tracked instance per entity key.
//! - Record each tracked instance's state, original values and dirty fields.
//! - Produce the ordered list of pending writes for a save.
//!
//! # Invariants
//! - Entries are kept in first-tracked order; saves apply writes in it.
//! - `original` is `None` only for entries that were never `Unchanged`
//!   or `Modified`, i.e. pending inserts.
//! - `Detached` is never stored; detaching removes the entry.
//!
//! # See also
//! - src/tracker/attach.rs

mod attach;

pub use attach::{attach, AttachOutcome, Attached};

use crate::model::{EntityKey, ErasedEntity, FieldValues};
use rusqlite::types::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Lifecycle state of an instance relative to one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    Detached,
    Unchanged,
    Modified,
    Added,
    Deleted,
}

impl EntityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Unchanged => "unchanged",
            Self::Modified => "modified",
            Self::Added => "added",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedEntry {
    instance: ErasedEntity,
    state: EntityState,
    original: Option<FieldValues>,
    dirty: BTreeSet<&'static str>,
}

impl TrackedEntry {
    pub fn instance(&self) -> &ErasedEntity {
        &self.instance
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn original(&self) -> Option<&FieldValues> {
        self.original.as_ref()
    }

    fn changed_fields(&self) -> BTreeSet<&'static str> {
        let Some(original) = &self.original else {
            return BTreeSet::new();
        };
        let current = self.instance.snapshot();
        current
            .iter()
            .filter(|(name, value)| original.get(*name) != Some(*value))
            .map(|(name, _)| *name)
            .collect()
    }

    fn enter(&mut self, state: EntityState) {
        match state {
            EntityState::Unchanged => {
                self.original = Some(self.instance.snapshot());
                self.dirty.clear();
            }
            EntityState::Modified => {
                if self.original.is_none() {
                    self.original = Some(self.instance.snapshot());
                }
                self.dirty = self.instance.fields().iter().map(|field| field.name).collect();
            }
            EntityState::Added | EntityState::Deleted | EntityState::Detached => {}
        }
        self.state = state;
    }
}

/// Kind of row write produced by a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// One row write, in save order.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub kind: WriteKind,
    pub instance: ErasedEntity,
    /// Columns to write, excluding `id`; empty for deletes.
    pub columns: Vec<(&'static str, Value)>,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    next_seq: u64,
    entries: BTreeMap<u64, TrackedEntry>,
    index: HashMap<EntityKey, u64>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &EntityKey) -> Option<&TrackedEntry> {
        self.index.get(key).and_then(|seq| self.entries.get(seq))
    }

    fn entry_mut(&mut self, key: &EntityKey) -> Option<&mut TrackedEntry> {
        let seq = self.index.get(key)?;
        self.entries.get_mut(seq)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.values()
    }

    pub fn tracked_instance(&self, key: &EntityKey) -> Option<&ErasedEntity> {
        self.entry(key).map(TrackedEntry::instance)
    }

    /// State of this exact instance; `Detached` when another instance
    /// (or none) is tracked under its key.
    pub fn state_of(&self, instance: &ErasedEntity) -> EntityState {
        match self.entry(&instance.key()) {
            Some(entry) if entry.instance.ptr_eq(instance) => entry.state,
            _ => EntityState::Detached,
        }
    }

    pub fn states(&self) -> HashMap<EntityKey, EntityState> {
        self.index
            .iter()
            .filter_map(|(key, seq)| self.entries.get(seq).map(|entry| (*key, entry.state)))
            .collect()
    }

    /// Starts tracking `instance`, or moves its existing entry to `state`.
    pub fn track(&mut self, instance: ErasedEntity, state: EntityState) {
        let key = instance.key();
        if state == EntityState::Detached {
            self.detach(&key);
            return;
        }
        if let Some(entry) = self.entry_mut(&key) {
            entry.enter(state);
            return;
        }

        let mut entry = TrackedEntry {
            instance,
            state: EntityState::Added,
            original: None,
            dirty: BTreeSet::new(),
        };
        entry.enter(state);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(seq, entry);
        self.index.insert(key, seq);
    }

    /// Moves a tracked entry to `state`; returns `false` when untracked.
    pub fn set_state(&mut self, key: &EntityKey, state: EntityState) -> bool {
        if state == EntityState::Detached {
            return self.detach(key);
        }
        match self.entry_mut(key) {
            Some(entry) => {
                entry.enter(state);
                true
            }
            None => false,
        }
    }

    /// Overwrites the state flag only, keeping original values and dirty set.
    fn restore_state(&mut self, key: &EntityKey, state: EntityState) {
        if let Some(entry) = self.entry_mut(key) {
            entry.state = state;
        }
    }

    /// Tracks `root` as `Added` together with every reachable untracked
    /// instance. Already-tracked instances keep their state.
    ///
    /// Returns the conflicting key when a different instance is already
    /// tracked under an id in the graph.
    pub fn add_graph(&mut self, root: &ErasedEntity) -> Result<(), EntityKey> {
        let graph = collect_graph(root);
        if let Some(conflict) = graph.iter().find(|node| {
            self.tracked_instance(&node.key())
                .is_some_and(|tracked| !tracked.ptr_eq(node))
        }) {
            return Err(conflict.key());
        }

        for node in graph {
            let key = node.key();
            let is_root = node.ptr_eq(root);
            match self.entry(&key).map(TrackedEntry::state) {
                None => self.track(node, EntityState::Added),
                Some(_) if is_root => self.track(node, EntityState::Added),
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Removes a pending insert entirely, or marks the entry `Deleted`.
    pub fn mark_deleted(&mut self, key: &EntityKey) -> bool {
        match self.entry(key).map(TrackedEntry::state) {
            Some(EntityState::Added) => self.detach(key),
            Some(_) => self.set_state(key, EntityState::Deleted),
            None => false,
        }
    }

    pub fn detach(&mut self, key: &EntityKey) -> bool {
        match self.index.remove(key) {
            Some(seq) => self.entries.remove(&seq).is_some(),
            None => false,
        }
    }

    /// Records an explicit field write; an `Unchanged` entry becomes `Modified`.
    pub fn mark_field_modified(&mut self, key: &EntityKey, field: &'static str) {
        if let Some(entry) = self.entry_mut(key) {
            match entry.state {
                EntityState::Unchanged | EntityState::Modified => {
                    entry.dirty.insert(field);
                    entry.state = EntityState::Modified;
                }
                EntityState::Added | EntityState::Deleted | EntityState::Detached => {}
            }
        }
    }

    /// Compares every `Unchanged`/`Modified` entry with its original values.
    pub fn detect_changes(&mut self) {
        for entry in self.entries.values_mut() {
            if !matches!(entry.state, EntityState::Unchanged | EntityState::Modified) {
                continue;
            }
            let changed = entry.changed_fields();
            if changed.is_empty() {
                continue;
            }
            entry.dirty.extend(changed);
            entry.state = EntityState::Modified;
        }
    }

    /// Dirty fields of a tracked entry, in declaration order.
    pub fn modified_fields(&self, key: &EntityKey) -> Vec<&'static str> {
        let Some(entry) = self.entry(key) else {
            return Vec::new();
        };
        if !matches!(entry.state, EntityState::Unchanged | EntityState::Modified) {
            return Vec::new();
        }
        let mut dirty = entry.dirty.clone();
        dirty.extend(entry.changed_fields());
        entry
            .instance
            .fields()
            .iter()
            .map(|field| field.name)
            .filter(|name| dirty.contains(name))
            .collect()
    }

    pub fn original_value(&self, key: &EntityKey, field: &str) -> Option<&Value> {
        self.entry(key)
            .filter(|entry| entry.state != EntityState::Added)
            .and_then(|entry| entry.original.as_ref())
            .and_then(|original| original.get(field))
    }

    /// Writes needed to persist every pending change, in tracking order.
    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        self.entries
            .values()
            .filter_map(|entry| {
                let kind = match entry.state {
                    EntityState::Added => WriteKind::Insert,
                    EntityState::Modified if !entry.dirty.is_empty() => WriteKind::Update,
                    EntityState::Deleted => WriteKind::Delete,
                    _ => return None,
                };
                let columns = match kind {
                    WriteKind::Insert => entry.instance.snapshot().into_iter().collect(),
                    WriteKind::Update => {
                        let mut current = entry.instance.snapshot();
                        entry
                            .instance
                            .fields()
                            .iter()
                            .filter(|field| entry.dirty.contains(field.name))
                            .filter_map(|field| {
                                current.remove(field.name).map(|value| (field.name, value))
                            })
                            .collect()
                    }
                    WriteKind::Delete => Vec::new(),
                };
                Some(PendingWrite {
                    kind,
                    instance: entry.instance.clone(),
                    columns,
                })
            })
            .collect()
    }

    /// Applies a successful save: deleted entries are dropped and every
    /// other entry becomes `Unchanged` with fresh original values.
    pub fn accept_changes(&mut self) {
        let deleted: Vec<EntityKey> = self
            .entries
            .values()
            .filter(|entry| entry.state == EntityState::Deleted)
            .map(|entry| entry.instance.key())
            .collect();
        for key in deleted {
            self.detach(&key);
        }
        for entry in self.entries.values_mut() {
            entry.enter(EntityState::Unchanged);
        }
    }
}

/// `root` followed by every instance reachable through navigations,
/// each instance once.
fn collect_graph(root: &ErasedEntity) -> Vec<ErasedEntity> {
    let mut visited: Vec<ErasedEntity> = Vec::new();
    let mut pending = vec![root.clone()];
    while let Some(node) = pending.pop() {
        if visited.iter().any(|seen| seen.ptr_eq(&node)) {
            continue;
        }
        let mut children = node.navigations();
        children.reverse();
        pending.extend(children);
        visited.push(node);
    }
    visited
}


#[cfg(test)]
mod tests {
    use super::test_support::part;
    use super::*;

    #[test]
    fn detect_changes_promotes_unchanged_entries() {
        let item = part("bolt");
        let mut tracker = ChangeTracker::new();
        tracker.track(item.erase(), EntityState::Unchanged);

        item.borrow_mut().label = "nut".to_string();
        assert_eq!(tracker.state_of(&item.erase()), EntityState::Unchanged);
        tracker.detect_changes();

        assert_eq!(tracker.state_of(&item.erase()), EntityState::Modified);
        assert_eq!(tracker.modified_fields(&item.key()), vec!["label"]);
        assert_eq!(
            tracker.original_value(&item.key(), "label"),
            Some(&Value::Text("bolt".to_string()))
        );
    }

    #[test]
    fn pending_writes_follow_tracking_order() {
        let first = part("first");
        let second = part("second");
        let third = part("third");
        let mut tracker = ChangeTracker::new();
        tracker.track(first.erase(), EntityState::Unchanged);
        tracker.track(second.erase(), EntityState::Added);
        tracker.track(third.erase(), EntityState::Unchanged);
        tracker.mark_deleted(&first.key());
        tracker.mark_field_modified(&third.key(), "label");

        let kinds: Vec<WriteKind> = tracker.pending_writes().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WriteKind::Delete, WriteKind::Insert, WriteKind::Update]);
    }

    #[test]
    fn deleting_a_pending_insert_untracks_it() {
        let item = part("draft");
        let mut tracker = ChangeTracker::new();
        tracker.track(item.erase(), EntityState::Added);

        assert!(tracker.mark_deleted(&item.key()));
        assert!(tracker.is_empty());
    }

    #[test]
    fn accept_changes_drops_deleted_and_resets_the_rest() {
        let kept = part("kept");
        let gone = part("gone");
        let mut tracker = ChangeTracker::new();
        tracker.track(kept.erase(), EntityState::Added);
        tracker.track(gone.erase(), EntityState::Unchanged);
        tracker.mark_deleted(&gone.key());

        tracker.accept_changes();

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.state_of(&kept.erase()), EntityState::Unchanged);
        assert!(tracker.pending_writes().is_empty());
    }

    #[test]
    fn add_graph_rejects_a_second_instance_for_a_tracked_id() {
        let tracked = part("tracked");
        let copy = tracked.detached_copy();
        let mut tracker = ChangeTracker::new();
        tracker.track(tracked.erase(), EntityState::Unchanged);

        assert_eq!(tracker.add_graph(&copy.erase()), Err(copy.key()));
    }

    #[test]
    fn add_graph_keeps_tracked_navigations_in_place() {
        let parent = part("parent");
        let child = part("child");
        child.borrow_mut().parent = Some(parent.clone());
        let mut tracker = ChangeTracker::new();
        tracker.track(parent.erase(), EntityState::Unchanged);

        tracker.add_graph(&child.erase()).unwrap();

        assert_eq!(tracker.state_of(&child.erase()), EntityState::Added);
        assert_eq!(tracker.state_of(&parent.erase()), EntityState::Unchanged);
    }
}
