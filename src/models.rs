//! Board data model: orders (work items), status columns and drop payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend identifier of a production status row.
pub type StatusId = i64;

/// Status keys of the six default production stages, in board order.
pub const DEFAULT_STATUS_KEYS: [&str; 6] =
    ["Pending", "Design", "Cek File", "Produksi", "Selesai", "Diambil"];

/// Status key used by the "mark as taken" action.
pub const STATUS_TAKEN: &str = "Diambil";
/// Status key used by the "mark as completed" action.
pub const STATUS_COMPLETED: &str = "Selesai";

/// One line of an order's item list (display only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    #[serde(alias = "product_name")]
    pub product_name: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub subtotal: f64,
}

/// Denormalised status object carried inside an order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLabel {
    #[serde(default)]
    pub id: Option<StatusId>,
    pub name: String,
}

/// A production order tracked on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub status: String,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "customer_name")]
    pub customer_name: String,
    #[serde(default)]
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub designer: Option<String>,
    #[serde(default, alias = "order_date")]
    pub order_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "due_date")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "status_label")]
    pub status_label: Option<StatusLabel>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            created_at: None,
            customer_name: String::new(),
            items: Vec::new(),
            total: 0.0,
            designer: None,
            order_date: None,
            due_date: None,
            status_label: None,
        }
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Creation time used for ordering; orders without one sort as the epoch.
    pub fn sort_time(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Rewrite the status and the nested label together.
    pub fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
        if let Some(label) = self.status_label.as_mut() {
            label.name = status.to_string();
            label.id = None;
        }
    }
}

/// A board lane claiming every order whose status equals `status_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusColumn {
    pub id: String,
    pub title: String,
    #[serde(alias = "status_key")]
    pub status_key: String,
    #[serde(default)]
    pub style: Option<String>,
}

impl StatusColumn {
    pub fn new(id: impl Into<String>, title: impl Into<String>, status_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status_key: status_key.into(),
            style: None,
        }
    }

    /// The six default production columns.
    pub fn defaults() -> Vec<StatusColumn> {
        const STYLES: [&str; 6] = ["slate", "violet", "amber", "blue", "green", "gray"];
        DEFAULT_STATUS_KEYS
            .iter()
            .zip(STYLES)
            .map(|(key, style)| StatusColumn {
                id: column_id_for(key),
                title: (*key).to_string(),
                status_key: (*key).to_string(),
                style: Some(style.to_string()),
            })
            .collect()
    }
}

/// Column id derived from a status key ("Cek File" -> "cek-file").
pub fn column_id_for(status_key: &str) -> String {
    status_key
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Position of a card inside a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropLocation {
    #[serde(alias = "droppableId", alias = "column_id")]
    pub column_id: String,
    pub index: usize,
}

impl DropLocation {
    pub fn new(column_id: impl Into<String>, index: usize) -> Self {
        Self {
            column_id: column_id.into(),
            index,
        }
    }
}

/// Payload of a drag-end gesture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropResult {
    pub source: DropLocation,
    #[serde(default)]
    pub destination: Option<DropLocation>,
    #[serde(alias = "draggableId", alias = "dragged_id")]
    pub dragged_id: String,
}

impl DropResult {
    /// No destination, or dropped back exactly where it started.
    pub fn is_noop(&self) -> bool {
        match &self.destination {
            None => true,
            Some(dest) => *dest == self.source,
        }
    }

    pub fn changes_column(&self) -> bool {
        self.destination
            .as_ref()
            .is_some_and(|dest| dest.column_id != self.source.column_id)
    }
}
