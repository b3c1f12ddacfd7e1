//! Append-only dependency DAG of accepted lemmas.
//!
//! Ids are assigned in acceptance order and every dependency must already be
//! stored, so ascending id order is always a valid dependency-first order and
//! the graph cannot contain cycles. Each lemma's ancestor set is computed once
//! at acceptance and never changes afterwards.

use std::collections::{BTreeMap, BTreeSet};

use lemmaloop_types::{Candidate, Lemma, LemmaId};

use crate::error::DependencyError;

#[derive(Debug, Clone)]
struct Entry {
    lemma: Lemma,
    /// Every direct and indirect dependency, ascending. Excludes the lemma itself.
    ancestors: Vec<LemmaId>,
}

#[derive(Debug, Clone)]
pub struct LemmaStore {
    entries: BTreeMap<LemmaId, Entry>,
    /// `None` once the largest possible id is stored.
    next_id: Option<LemmaId>,
}

impl Default for LemmaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LemmaStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: Some(LemmaId::FIRST),
        }
    }

    /// Rebuild a store from previously accepted lemmas.
    ///
    /// Ids must be strictly increasing and every dependency must reference an
    /// earlier lemma of the same list. Ids need not be contiguous; new lemmas
    /// continue after the largest seeded id.
    pub fn seed(lemmas: impl IntoIterator<Item = Lemma>) -> Result<Self, DependencyError> {
        let mut store = Self::new();
        for lemma in lemmas {
            let id = lemma.id();
            if let Some(previous) = store.last_id()
                && id <= previous
            {
                return Err(DependencyError::OutOfOrder { id, previous });
            }
            if let Some(dependency) = lemma
                .dependencies()
                .iter()
                .copied()
                .find(|dep| !store.contains(*dep))
            {
                return Err(DependencyError::NotEarlier { id, dependency });
            }
            store.insert(lemma)?;
        }
        Ok(store)
    }

    /// Commit a verified candidate under the next sequential id.
    pub fn accept(&mut self, candidate: Candidate, round: u32) -> Result<Lemma, DependencyError> {
        let Some(id) = self.next_id else {
            return Err(DependencyError::IdSpaceExhausted {
                last: self.last_id().unwrap_or(LemmaId::new(u64::MAX)),
            });
        };
        if let Some(missing) = candidate
            .dependencies()
            .iter()
            .copied()
            .find(|dep| !self.contains(*dep))
        {
            return Err(DependencyError::Unknown { missing });
        }

        let lemma = Lemma::new(id, candidate, round);
        self.insert(lemma.clone())?;
        tracing::debug!(
            lemma_id = %lemma.id(),
            dependencies = lemma.dependencies().len(),
            "Lemma accepted"
        );
        Ok(lemma)
    }

    fn insert(&mut self, lemma: Lemma) -> Result<(), DependencyError> {
        let id = lemma.id();
        if self.contains(id) {
            return Err(DependencyError::Duplicate { id });
        }
        let mut ancestors = BTreeSet::new();
        for dep in lemma.dependencies() {
            ancestors.insert(*dep);
            if let Some(entry) = self.entries.get(dep) {
                ancestors.extend(entry.ancestors.iter().copied());
            }
        }
        self.next_id = id.next();
        self.entries.insert(
            id,
            Entry {
                lemma,
                ancestors: ancestors.into_iter().collect(),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, id: LemmaId) -> bool {
        self.entries.contains_key(&id)
    }

    #[must_use]
    pub fn get(&self, id: LemmaId) -> Option<&Lemma> {
        self.entries.get(&id).map(|entry| &entry.lemma)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn last_id(&self) -> Option<LemmaId> {
        self.entries.keys().next_back().copied()
    }

    /// The given lemmas plus all their direct and indirect dependencies,
    /// deduplicated, dependency-first. Unknown ids are skipped.
    #[must_use]
    pub fn transitive_closure(&self, ids: &[LemmaId]) -> Vec<&Lemma> {
        let mut wanted = BTreeSet::new();
        for id in ids {
            if let Some(entry) = self.entries.get(id) {
                wanted.insert(*id);
                wanted.extend(entry.ancestors.iter().copied());
            }
        }
        wanted.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Certificate for `id`: the lemma after everything it depends on.
    /// Empty when `id` is unknown.
    #[must_use]
    pub fn path_from(&self, id: LemmaId) -> Vec<&Lemma> {
        self.transitive_closure(&[id])
    }

    /// Every stored lemma, dependency-first.
    #[must_use]
    pub fn full_path(&self) -> Vec<&Lemma> {
        self.entries.values().map(|entry| &entry.lemma).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lemmaloop_types::{CandidateKind, NonEmptyString};

    fn candidate(statement: &str, deps: &[u64]) -> Candidate {
        Candidate::new(
            NonEmptyString::new(statement).unwrap(),
            NonEmptyString::new("proof").unwrap(),
            deps.iter().copied().map(LemmaId::new),
            CandidateKind::Intermediate,
        )
    }

    fn ids(lemmas: &[&Lemma]) -> Vec<u64> {
        lemmas.iter().map(|l| l.id().value()).collect()
    }

    fn chain() -> LemmaStore {
        let mut store = LemmaStore::new();
        store.accept(candidate("a", &[]), 1).unwrap();
        store.accept(candidate("b", &[1]), 2).unwrap();
        store.accept(candidate("c", &[1, 2]), 3).unwrap();
        store
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let store = chain();
        assert_eq!(ids(&store.full_path()), vec![1, 2, 3]);
        assert_eq!(store.get(LemmaId::new(2)).unwrap().round(), 2);
    }

    #[test]
    fn unknown_dependency_is_rejected_without_consuming_an_id() {
        let mut store = chain();
        let err = store.accept(candidate("d", &[7]), 4).unwrap_err();
        assert_eq!(err, DependencyError::Unknown { missing: LemmaId::new(7) });
        assert_eq!(store.len(), 3);
        let next = store.accept(candidate("d", &[3]), 4).unwrap();
        assert_eq!(next.id(), LemmaId::new(4));
    }

    #[test]
    fn self_reference_is_rejected() {
        let mut store = LemmaStore::new();
        assert!(store.accept(candidate("loop", &[1]), 1).is_err());
    }

    #[test]
    fn path_from_orders_dependencies_first() {
        let store = chain();
        assert_eq!(ids(&store.path_from(LemmaId::new(3))), vec![1, 2, 3]);
        assert_eq!(ids(&store.path_from(LemmaId::new(2))), vec![1, 2]);
        assert!(store.path_from(LemmaId::new(42)).is_empty());
    }

    #[test]
    fn closure_excludes_unrelated_lemmas() {
        let mut store = chain();
        store.accept(candidate("unrelated", &[]), 4).unwrap();
        store.accept(candidate("e", &[2]), 5).unwrap();
        assert_eq!(ids(&store.path_from(LemmaId::new(5))), vec![1, 2, 5]);
        assert_eq!(
            ids(&store.transitive_closure(&[LemmaId::new(4), LemmaId::new(2)])),
            vec![1, 2, 4]
        );
    }

    #[test]
    fn closure_is_idempotent() {
        let store = chain();
        let first = ids(&store.transitive_closure(&[LemmaId::new(3)]));
        let second = ids(&store.transitive_closure(&[LemmaId::new(3)]));
        assert_eq!(first, second);
    }

    #[test]
    fn seed_continues_after_largest_id() {
        let seeded = chain();
        let lemmas: Vec<Lemma> = seeded.full_path().into_iter().cloned().collect();
        let mut store = LemmaStore::seed(lemmas).unwrap();
        let next = store.accept(candidate("d", &[3]), 1).unwrap();
        assert_eq!(next.id(), LemmaId::new(4));
        assert_eq!(ids(&store.path_from(next.id())), vec![1, 2, 3, 4]);
    }

    #[test]
    fn seed_rejects_out_of_order_and_forward_references() {
        let lemmas: Vec<Lemma> = chain().full_path().into_iter().cloned().collect();

        let reversed: Vec<Lemma> = lemmas.iter().rev().cloned().collect();
        assert!(matches!(
            LemmaStore::seed(reversed),
            Err(DependencyError::OutOfOrder { .. })
        ));

        let missing_first: Vec<Lemma> = lemmas[1..].to_vec();
        assert_eq!(
            LemmaStore::seed(missing_first).unwrap_err(),
            DependencyError::NotEarlier {
                id: LemmaId::new(2),
                dependency: LemmaId::new(1)
            }
        );
    }

    #[test]
    fn accept_fails_once_ids_run_out() {
        let last = Lemma::new(LemmaId::new(u64::MAX), candidate("last", &[]), 0);
        let mut store = LemmaStore::seed([last]).unwrap();

        let err = store.accept(candidate("more", &[u64::MAX]), 1).unwrap_err();
        assert_eq!(
            err,
            DependencyError::IdSpaceExhausted {
                last: LemmaId::new(u64::MAX)
            }
        );
        assert_eq!(store.len(), 1);
        let kept = store.get(LemmaId::new(u64::MAX)).unwrap();
        assert_eq!(kept.statement().as_str(), "last");
        assert!(kept.dependencies().is_empty());
    }

    #[test]
    fn seed_rejects_repeated_ids() {
        let first = Lemma::new(LemmaId::new(1), candidate("a", &[]), 0);
        let again = Lemma::new(LemmaId::new(1), candidate("b", &[]), 0);
        assert!(matches!(
            LemmaStore::seed([first, again]),
            Err(DependencyError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LemmaStore>();
    }
}
