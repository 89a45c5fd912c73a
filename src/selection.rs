//! Row selection with per-row eligibility and tri-state select-all.
//!
//! The free functions work over any row type given eligibility and
//! membership predicates. [`SelectionSet`] owns the selected keys for one
//! displayed list and never holds a key for an ineligible row.

use std::{collections::HashSet, hash::Hash};

/// Every eligible row is selected and at least one eligible row exists.
pub fn all_selected<T>(
    rows: &[T],
    is_eligible: impl Fn(&T) -> bool,
    is_selected: impl Fn(&T) -> bool,
) -> bool {
    let mut eligible = rows.iter().filter(|row| is_eligible(*row)).peekable();
    eligible.peek().is_some() && eligible.all(|row| is_selected(row))
}

/// At least one eligible row is selected. Drives the indeterminate state of
/// a select-all control.
pub fn some_selected<T>(
    rows: &[T],
    is_eligible: impl Fn(&T) -> bool,
    is_selected: impl Fn(&T) -> bool,
) -> bool {
    rows.iter().any(|row| is_eligible(row) && is_selected(row))
}

/// select_all
///
/// Sets every eligible row to `!all_selected`. Ineligible rows that are
/// marked selected are deselected on the way.
pub fn select_all<T>(
    rows: &[T],
    is_eligible: impl Fn(&T) -> bool,
    is_selected: impl Fn(&T) -> bool,
    mut set_selected: impl FnMut(&T, bool),
) {
    let target = !all_selected(rows, &is_eligible, &is_selected);
    for row in rows {
        if is_eligible(row) {
            set_selected(row, target);
        } else if is_selected(row) {
            set_selected(row, false);
        }
    }
}

/// A row that can appear in a selectable list.
pub trait Selectable {
    type Key: Eq + Hash + Clone;

    fn selection_key(&self) -> Self::Key;

    fn is_selectable(&self) -> bool {
        true
    }
}

/// SelectionSet
///
/// Selected keys of one displayed list. Call [`SelectionSet::reconcile`]
/// whenever the rows or their eligibility change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSet<K: Eq + Hash> {
    keys: HashSet<K>,
}

impl<K: Eq + Hash> Default for SelectionSet<K> {
    fn default() -> Self {
        Self {
            keys: HashSet::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> SelectionSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_selected<R: Selectable<Key = K>>(&self, row: &R) -> bool {
        self.keys.contains(&row.selection_key())
    }

    /// Returns `false` when the row is ineligible and the request was to
    /// select it.
    pub fn set_selected<R: Selectable<Key = K>>(&mut self, row: &R, selected: bool) -> bool {
        if !selected {
            self.keys.remove(&row.selection_key());
            return true;
        }
        if !row.is_selectable() {
            return false;
        }
        self.keys.insert(row.selection_key());
        true
    }

    pub fn all_selected<R: Selectable<Key = K>>(&self, rows: &[R]) -> bool {
        all_selected(rows, R::is_selectable, |row| self.is_selected(row))
    }

    pub fn some_selected<R: Selectable<Key = K>>(&self, rows: &[R]) -> bool {
        some_selected(rows, R::is_selectable, |row| self.is_selected(row))
    }

    pub fn toggle_all<R: Selectable<Key = K>>(&mut self, rows: &[R]) {
        let before = self.keys.clone();
        let keys = &mut self.keys;
        select_all(
            rows,
            R::is_selectable,
            |row| before.contains(&row.selection_key()),
            |row, selected| {
                if selected {
                    keys.insert(row.selection_key());
                } else {
                    keys.remove(&row.selection_key());
                }
            },
        );
    }

    /// Drops keys whose row is gone or no longer eligible.
    pub fn reconcile<R: Selectable<Key = K>>(&mut self, rows: &[R]) {
        let keep: HashSet<K> = rows
            .iter()
            .filter(|row| row.is_selectable())
            .map(Selectable::selection_key)
            .collect();
        self.keys.retain(|key| keep.contains(key));
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone)]
    struct Row {
        id: u32,
        eligible: bool,
    }

    impl Selectable for Row {
        type Key = u32;

        fn selection_key(&self) -> u32 {
            self.id
        }

        fn is_selectable(&self) -> bool {
            self.eligible
        }
    }

    fn rows(flags: &[bool]) -> Vec<Row> {
        flags
            .iter()
            .enumerate()
            .map(|(id, eligible)| Row {
                id: id as u32,
                eligible: *eligible,
            })
            .collect()
    }

    #[test]
    fn no_eligible_rows_is_never_all_selected() {
        let rows = rows(&[false, false]);
        let selection = SelectionSet::new();
        assert!(!selection.all_selected(&rows));
        assert!(!selection.some_selected(&rows));
    }

    #[test]
    fn ineligible_row_cannot_be_selected() {
        let rows = rows(&[true, false]);
        let mut selection = SelectionSet::new();
        assert!(selection.set_selected(&rows[0], true));
        assert!(!selection.set_selected(&rows[1], true));
        assert!(!selection.is_selected(&rows[1]));
        assert!(selection.all_selected(&rows));
    }

    #[test]
    fn partial_selection_is_indeterminate_and_toggles_to_all() {
        let rows = rows(&[true, true, false]);
        let mut selection = SelectionSet::new();
        selection.set_selected(&rows[0], true);
        assert!(selection.some_selected(&rows));
        assert!(!selection.all_selected(&rows));

        selection.toggle_all(&rows);
        assert!(selection.all_selected(&rows));
        assert_eq!(selection.len(), 2);
    }

    #[test]
    fn reconcile_drops_rows_that_became_ineligible_or_vanished() {
        let mut rows = rows(&[true, true, true]);
        let mut selection = SelectionSet::new();
        selection.toggle_all(&rows);

        rows[1].eligible = false;
        rows.pop();
        selection.reconcile(&rows);

        assert_eq!(selection.keys().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn free_select_all_repairs_stale_ineligible_selection() {
        let rows = rows(&[true, false]);
        let mut selected = BTreeMap::from([(0, false), (1, true)]);
        let before = selected.clone();
        select_all(
            &rows,
            |row| row.eligible,
            |row| before[&row.id],
            |row, value| {
                selected.insert(row.id, value);
            },
        );
        assert_eq!(selected, BTreeMap::from([(0, true), (1, false)]));
    }

    proptest! {
        #[test]
        fn toggle_all_twice_restores_none_or_all(
            flags in proptest::collection::vec(any::<bool>(), 0..24),
            start_full in any::<bool>(),
        ) {
            let rows = rows(&flags);
            let mut selection = SelectionSet::new();
            if start_full {
                selection.toggle_all(&rows);
            }
            let before = selection.clone();

            selection.toggle_all(&rows);
            selection.toggle_all(&rows);
            prop_assert_eq!(selection, before);
        }

        #[test]
        fn select_all_never_leaves_ineligible_rows_selected(
            rows in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..24),
        ) {
            let displayed: Vec<Row> = rows
                .iter()
                .enumerate()
                .map(|(id, (eligible, _))| Row { id: id as u32, eligible: *eligible })
                .collect();
            let mut selected: HashSet<u32> = rows
                .iter()
                .enumerate()
                .filter(|(_, (_, on))| *on)
                .map(|(id, _)| id as u32)
                .collect();

            let snapshot = selected.clone();
            select_all(
                &displayed,
                |row| row.eligible,
                |row| snapshot.contains(&row.id),
                |row, value| {
                    if value {
                        selected.insert(row.id);
                    } else {
                        selected.remove(&row.id);
                    }
                },
            );

            for row in displayed.iter().filter(|row| !row.eligible) {
                prop_assert!(!selected.contains(&row.id));
            }
        }
    }
}
