//! Player problem manager
//!
//! De-duplicated, keyed collection of non-fatal problems surfaced to the UI
//! without interrupting playback. At most one live problem per id; re-adding
//! an id overwrites. Severity is advisory only; escalation to a fatal
//! presence state is the controller's decision, never this component's.

use bagdeck_common::PlayerProblem;
use std::collections::HashMap;
use std::sync::Arc;

/// Keyed problem collection with a referentially-stable snapshot
///
/// `problems()` hands out the same `Arc` until the next mutation, so
/// consumers detect "nothing changed" with a pointer comparison instead of
/// a deep one.
#[derive(Debug, Default)]
pub struct PlayerProblemManager {
    /// Insertion order of problem ids
    order: Vec<String>,
    by_id: HashMap<String, PlayerProblem>,
    snapshot: Option<Arc<[PlayerProblem]>>,
}

impl PlayerProblemManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the problem stored under `id`
    pub fn add_problem(&mut self, id: impl Into<String>, problem: PlayerProblem) {
        let id = id.into();
        match self.by_id.get(&id) {
            // Identical re-add: nothing observable changed, keep the snapshot
            Some(existing) if *existing == problem => return,
            Some(_) => {}
            None => self.order.push(id.clone()),
        }
        self.by_id.insert(id, problem);
        self.snapshot = None;
    }

    /// Remove the problem stored under `id`; true if one was present
    pub fn remove_problem(&mut self, id: &str) -> bool {
        if self.by_id.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
            self.snapshot = None;
            true
        } else {
            false
        }
    }

    /// Remove every problem whose id matches `predicate`; true if any did
    pub fn remove_problems(&mut self, predicate: impl Fn(&str) -> bool) -> bool {
        let before = self.order.len();
        self.order.retain(|id| {
            if predicate(id) {
                self.by_id.remove(id);
                false
            } else {
                true
            }
        });
        let removed = self.order.len() != before;
        if removed {
            self.snapshot = None;
        }
        removed
    }

    /// Drop all problems
    pub fn clear(&mut self) {
        if !self.order.is_empty() {
            self.order.clear();
            self.by_id.clear();
            self.snapshot = None;
        }
    }

    /// Live problems in insertion order; the same `Arc` until the next
    /// add/remove
    pub fn problems(&mut self) -> Arc<[PlayerProblem]> {
        match &self.snapshot {
            Some(snapshot) => Arc::clone(snapshot),
            None => {
                let snapshot: Arc<[PlayerProblem]> = self
                    .order
                    .iter()
                    .map(|id| self.by_id[id].clone())
                    .collect();
                self.snapshot = Some(Arc::clone(&snapshot));
                snapshot
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
