//! State reconciliation when an instance is attached to a tracker.
//!
//! Attaching goes through "add the graph, then set the target state", which
//! drags every reachable tracked instance into `Added`. The prior state of
//! each of those instances is captured first and restored afterwards, so
//! only the attached instance and genuinely new instances change state.
//!
//! # Invariants
//! - The input tracker is never mutated; a new tracker is returned only
//!   when the outcome is `Attached`.
//! - An instance already tracked in the target state is a no-op.
//! - An instance pending insertion (`Added`) stays `Added`.
//! - A detached instance whose key is tracked resolves to the tracked one.

use super::{collect_graph, ChangeTracker, EntityState};
use crate::model::ErasedEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The instance was already tracked in a compatible state.
    AlreadyTracked,
    /// Another instance with the same key is tracked and was returned.
    ResolvedExisting,
    /// The tracker changed.
    Attached,
}

#[derive(Debug, Clone)]
pub struct Attached {
    /// The reconciled tracker; `None` when the input tracker is unchanged.
    pub tracker: Option<ChangeTracker>,
    /// The instance callers should continue working with.
    pub resolved: ErasedEntity,
    pub outcome: AttachOutcome,
}

/// Attaches `incoming` in `target` state, returning the resulting tracker.
pub fn attach(tracker: &ChangeTracker, incoming: &ErasedEntity, target: EntityState) -> Attached {
    let key = incoming.key();

    match tracker.state_of(incoming) {
        EntityState::Detached => {
            if let Some(existing) = tracker.tracked_instance(&key) {
                return Attached {
                    tracker: None,
                    resolved: existing.clone(),
                    outcome: AttachOutcome::ResolvedExisting,
                };
            }
        }
        state if state == target || state == EntityState::Added => {
            return Attached {
                tracker: None,
                resolved: incoming.clone(),
                outcome: AttachOutcome::AlreadyTracked,
            };
        }
        _ => {}
    }

    let prior = tracker.states();
    let mut next = tracker.clone();

    for node in collect_graph(incoming) {
        let node_key = node.key();
        if next.entry(&node_key).is_some() {
            next.restore_state(&node_key, EntityState::Added);
        } else {
            next.track(node, EntityState::Added);
        }
    }

    next.set_state(&key, target);

    let cascaded: Vec<_> = next
        .entries()
        .filter(|entry| entry.state() == EntityState::Added)
        .map(|entry| entry.instance().key())
        .filter(|entry_key| *entry_key != key)
        .collect();
    for entry_key in cascaded {
        if let Some(&state) = prior.get(&entry_key) {
            if state != EntityState::Added {
                next.restore_state(&entry_key, state);
            }
        }
    }

    Attached {
        tracker: Some(next),
        resolved: incoming.clone(),
        outcome: AttachOutcome::Attached,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::part;
    use super::*;

    #[test]
    fn attaching_with_tracked_navigation_keeps_its_state() {
        let parent = part("parent");
        let sibling = part("sibling");
        let child = part("child");
        child.borrow_mut().parent = Some(parent.clone());

        let mut tracker = ChangeTracker::new();
        tracker.track(parent.erase(), EntityState::Unchanged);
        tracker.track(sibling.erase(), EntityState::Added);

        let result = attach(&tracker, &child.erase(), EntityState::Modified);
        assert_eq!(result.outcome, AttachOutcome::Attached);
        let next = result.tracker.unwrap();

        assert_eq!(next.state_of(&child.erase()), EntityState::Modified);
        assert_eq!(next.state_of(&parent.erase()), EntityState::Unchanged);
        assert_eq!(next.state_of(&sibling.erase()), EntityState::Added);
    }

    #[test]
    fn modified_navigation_keeps_its_dirty_fields() {
        let parent = part("parent");
        let child = part("child");
        child.borrow_mut().parent = Some(parent.clone());

        let mut tracker = ChangeTracker::new();
        tracker.track(parent.erase(), EntityState::Unchanged);
        parent.borrow_mut().label = "renamed".to_string();
        tracker.mark_field_modified(&parent.key(), "label");

        let next = attach(&tracker, &child.erase(), EntityState::Unchanged)
            .tracker
            .unwrap();

        assert_eq!(next.state_of(&parent.erase()), EntityState::Modified);
        assert_eq!(next.modified_fields(&parent.key()), vec!["label"]);
    }

    #[test]
    fn untracked_navigation_becomes_added() {
        let parent = part("parent");
        let child = part("child");
        child.borrow_mut().parent = Some(parent.clone());

        let next = attach(&ChangeTracker::new(), &child.erase(), EntityState::Unchanged)
            .tracker
            .unwrap();

        assert_eq!(next.state_of(&child.erase()), EntityState::Unchanged);
        assert_eq!(next.state_of(&parent.erase()), EntityState::Added);
    }

    #[test]
    fn attach_is_idempotent_for_the_same_target() {
        let item = part("item");
        let first = attach(&ChangeTracker::new(), &item.erase(), EntityState::Modified)
            .tracker
            .unwrap();
        let second = attach(&first, &item.erase(), EntityState::Modified);

        assert_eq!(second.outcome, AttachOutcome::AlreadyTracked);
        assert!(second.tracker.is_none());
    }

    #[test]
    fn detached_copy_resolves_to_tracked_instance() {
        let tracked = part("tracked");
        let mut tracker = ChangeTracker::new();
        tracker.track(tracked.erase(), EntityState::Unchanged);

        let copy = tracked.detached_copy();
        let result = attach(&tracker, &copy.erase(), EntityState::Modified);

        assert_eq!(result.outcome, AttachOutcome::ResolvedExisting);
        assert!(result.resolved.ptr_eq(&tracked.erase()));
        assert!(result.tracker.is_none());
        assert_eq!(tracker.state_of(&tracked.erase()), EntityState::Unchanged);
    }

    #[test]
    fn cascaded_copy_does_not_replace_tracked_instance() {
        let parent = part("parent");
        let parent_copy = parent.detached_copy();
        let child = part("child");
        child.borrow_mut().parent = Some(parent_copy.clone());

        let mut tracker = ChangeTracker::new();
        tracker.track(parent.erase(), EntityState::Unchanged);

        let next = attach(&tracker, &child.erase(), EntityState::Unchanged)
            .tracker
            .unwrap();

        assert_eq!(next.state_of(&parent.erase()), EntityState::Unchanged);
        assert_eq!(next.state_of(&parent_copy.erase()), EntityState::Detached);
    }

    #[test]
    fn input_tracker_is_left_untouched() {
        let item = part("item");
        let tracker = ChangeTracker::new();
        let result = attach(&tracker, &item.erase(), EntityState::Unchanged);

        assert!(tracker.is_empty());
        assert_eq!(result.tracker.map(|next| next.len()), Some(1));
    }
}
