//! Contracts for the order backend and the status catalog.
//!
//! Implementations: [`crate::store::OrderStore`] (local SQLite) and
//! [`crate::remote::RestOrderSource`] (hosted REST backend).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BoardResult;
use crate::models::{DropResult, StatusId, WorkItem};

/// Authoritative order data.
#[async_trait]
pub trait OrderDataSource: Send + Sync {
    /// Current orders with their authoritative status.
    async fn load_orders(&self) -> BoardResult<Vec<WorkItem>>;

    /// Set an order's status. An `Err` means the change did not happen.
    async fn update_status(&self, order_id: &str, status_id: StatusId) -> BoardResult<()>;
}

/// Maps a status name to the backend identifier the update call expects.
pub trait StatusCatalog: Send + Sync {
    fn resolve(&self, status_name: &str) -> Option<StatusId>;
}

/// Told about every committed drop, e.g. to invalidate caches.
pub trait DragCompleteListener: Send + Sync {
    fn on_drag_complete(&self, result: &DropResult);
}

impl<F> DragCompleteListener for F
where
    F: Fn(&DropResult) + Send + Sync,
{
    fn on_drag_complete(&self, result: &DropResult) {
        self(result)
    }
}

/// In-memory catalog; lookups ignore case and surrounding whitespace.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    by_name: HashMap<String, StatusId>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, id: StatusId) {
        self.by_name.insert(normalize(name), id);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl FromIterator<(String, StatusId)> for StatusTable {
    fn from_iter<I: IntoIterator<Item = (String, StatusId)>>(iter: I) -> Self {
        let mut table = StatusTable::new();
        for (name, id) in iter {
            table.insert(&name, id);
        }
        table
    }
}

impl StatusCatalog for StatusTable {
    fn resolve(&self, status_name: &str) -> Option<StatusId> {
        self.by_name.get(&normalize(status_name)).copied()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
