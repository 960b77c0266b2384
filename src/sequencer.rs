//! Per-column manual ordering of order ids.
//!
//! Sequences are seeded once from the first non-empty order list and from
//! then on only change through drag operations. Refreshes from the order
//! backend never re-sort a column; orders the sequencer has not seen yet are
//! shown after the sequenced ones, oldest first.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::models::WorkItem;

/// Status key -> ordered order ids.
pub type ColumnSequence = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default)]
pub struct ColumnSequencer {
    initialized: bool,
    sequences: ColumnSequence,
}

impl ColumnSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Seed sequences from `orders`. Runs once; returns whether it ran.
    ///
    /// An empty list leaves the sequencer uninitialised so a later, populated
    /// list can still seed it.
    pub fn initialize(&mut self, orders: &[WorkItem]) -> bool {
        if self.initialized || orders.is_empty() {
            return false;
        }

        let mut grouped: BTreeMap<String, Vec<&WorkItem>> = BTreeMap::new();
        for order in orders {
            grouped.entry(order.status.clone()).or_default().push(order);
        }

        for (status, mut group) in grouped {
            // sort_by_key is stable: equal timestamps keep input order
            group.sort_by_key(|o| o.sort_time());
            let ids: Vec<String> = group.iter().map(|o| o.id.clone()).collect();
            self.sequences.insert(status, ids);
        }

        self.initialized = true;
        info!(
            orders = orders.len(),
            columns = self.sequences.len(),
            "Column sequences initialized"
        );
        true
    }

    pub fn sequence(&self, status: &str) -> &[String] {
        self.sequences
            .get(status)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn sequences(&self) -> &ColumnSequence {
        &self.sequences
    }

    /// Orders matching `status`, in manual order then unsequenced by age.
    pub fn get_ordered<'a>(&self, status: &str, live_orders: &'a [WorkItem]) -> Vec<&'a WorkItem> {
        let seq = self.sequence(status);
        let rank: HashMap<&str, usize> = seq
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.as_str(), pos))
            .collect();

        let mut sequenced: Vec<(usize, &WorkItem)> = Vec::new();
        let mut unsequenced: Vec<&WorkItem> = Vec::new();
        for order in live_orders.iter().filter(|o| o.status == status) {
            match rank.get(order.id.as_str()) {
                Some(pos) => sequenced.push((*pos, order)),
                None => unsequenced.push(order),
            }
        }

        sequenced.sort_by_key(|(pos, _)| *pos);
        unsequenced.sort_by_key(|o| o.sort_time());

        sequenced
            .into_iter()
            .map(|(_, order)| order)
            .chain(unsequenced)
            .collect()
    }

    /// Replace one column's sequence with the order currently rendered.
    ///
    /// Drop indices refer to rendered positions, which only match stored
    /// positions once stale ids are dropped and unsequenced ids appended.
    pub fn materialize(&mut self, status: &str, rendered: Vec<String>) {
        for (key, seq) in self.sequences.iter_mut() {
            if key != status {
                seq.retain(|id| !rendered.contains(id));
            }
        }
        self.sequences.insert(status.to_string(), rendered);
    }

    /// Move `id` within one column from `from` to `to`.
    ///
    /// Returns whether `id` was already sequenced; it is placed at `to` either way.
    pub fn move_within(&mut self, status: &str, id: &str, from: usize, to: usize) -> bool {
        let seq = self.sequences.entry(status.to_string()).or_default();
        let found = take_at(seq, id, from);
        let to = to.min(seq.len());
        seq.insert(to, id.to_string());
        debug!(status = %status, order_id = %id, from, to, found, "Reordered within column");
        found
    }

    /// Splice `id` out of `from_status` at `from` and into `to_status` at `to`.
    ///
    /// The id is removed from every other sequence as well so it can never sit
    /// in two columns at once. Returns whether it was found in the source.
    pub fn move_across(
        &mut self,
        from_status: &str,
        from: usize,
        to_status: &str,
        to: usize,
        id: &str,
    ) -> bool {
        let removed = {
            let seq = self.sequences.entry(from_status.to_string()).or_default();
            take_at(seq, id, from)
        };
        for seq in self.sequences.values_mut() {
            seq.retain(|existing| existing != id);
        }

        let dest = self.sequences.entry(to_status.to_string()).or_default();
        let to = to.min(dest.len());
        dest.insert(to, id.to_string());
        debug!(
            order_id = %id,
            from_status = %from_status,
            to_status = %to_status,
            from,
            to,
            found_at_source = removed,
            "Moved across columns"
        );
        removed
    }

    pub fn snapshot(&self) -> ColumnSequence {
        self.sequences.clone()
    }

    pub fn restore(&mut self, snapshot: ColumnSequence) {
        self.sequences = snapshot;
    }
}

/// Remove `id` from `seq`, preferring position `index`.
///
/// The rendered index can differ from the stored one when unsequenced orders
/// are shown; fall back to a lookup by id in that case.
fn take_at(seq: &mut Vec<String>, id: &str, index: usize) -> bool {
    if seq.get(index).is_some_and(|existing| existing == id) {
        seq.remove(index);
        return true;
    }
    match seq.iter().position(|existing| existing == id) {
        Some(pos) => {
            seq.remove(pos);
            true
        }
        None => false,
    }
}
