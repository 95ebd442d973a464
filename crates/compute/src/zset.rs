//! Weighted row collections.
//!
//! A [`ZSet`] maps rows to signed weights. A change to a relation is a
//! Z-set (inserts positive, retractions negative) and so is its current
//! contents (all weights positive). Entries are always consolidated: a row
//! whose weight reaches zero is removed.

use std::collections::btree_map::{self, BTreeMap};

use ripple_core::Row;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "Vec<(Row, i64)>")]
pub struct ZSet {
    entries: BTreeMap<Row, i64>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `weight` to `row`.
    pub fn insert(&mut self, row: Row, weight: i64) {
        if weight == 0 {
            return;
        }
        match self.entries.entry(row) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(weight);
            }
            btree_map::Entry::Occupied(mut slot) => {
                let total = *slot.get() + weight;
                if total == 0 {
                    slot.remove();
                } else {
                    *slot.get_mut() = total;
                }
            }
        }
    }

    /// Add every entry of `other`.
    pub fn merge(&mut self, other: &ZSet) {
        for (row, weight) in other.iter() {
            self.insert(row.clone(), weight);
        }
    }

    pub fn weight(&self, row: &Row) -> i64 {
        self.entries.get(row).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Row, i64)> {
        self.entries.iter().map(|(r, w)| (r, *w))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> i64 {
        self.entries.values().sum()
    }

    pub fn negate(&self) -> ZSet {
        ZSet {
            entries: self.entries.iter().map(|(r, w)| (r.clone(), -w)).collect(),
        }
    }

    /// Entries in row order.
    pub fn to_vec(&self) -> Vec<(Row, i64)> {
        self.entries.iter().map(|(r, w)| (r.clone(), *w)).collect()
    }
}

impl From<ZSet> for Vec<(Row, i64)> {
    fn from(set: ZSet) -> Self {
        set.entries.into_iter().collect()
    }
}

impl FromIterator<(Row, i64)> for ZSet {
    fn from_iter<I: IntoIterator<Item = (Row, i64)>>(iter: I) -> Self {
        let mut set = ZSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<(Row, i64)> for ZSet {
    fn extend<I: IntoIterator<Item = (Row, i64)>>(&mut self, iter: I) {
        for (row, weight) in iter {
            self.insert(row, weight);
        }
    }
}

impl IntoIterator for ZSet {
    type Item = (Row, i64);
    type IntoIter = btree_map::IntoIter<Row, i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
