//! Hosted order backend over its REST interface.
//!
//! Orders and statuses live in PostgREST-style tables; the client reads the
//! board's orders with their joined status row and patches `status_id`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{BoardError, BoardResult};
use crate::models::{OrderLine, StatusId, StatusLabel, WorkItem};
use crate::source::{OrderDataSource, StatusTable};

/// Default timeout for backend requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const ORDER_COLUMNS: &str = "id,created_at,customer_name,items,total,designer,order_date,due_date,status:order_statuses(id,name)";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend project URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/rest/v1` segment
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }
    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: &reqwest::Error) -> BoardError {
    let message = if err.is_connect() {
        format!("Cannot reach order backend at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid order backend URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    BoardError::Http(message)
}

fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Not allowed to change this order".to_string(),
        404 => "Order backend endpoint not found".to_string(),
        409 => "Order was changed by someone else".to_string(),
        s if s >= 500 => format!("Order backend server error (HTTP {s})"),
        s => format!("Unexpected response from order backend (HTTP {s})"),
    }
}

/// Build the error for a non-success response, keeping the backend's message.
fn rejection(status: StatusCode, body_text: &str) -> BoardError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status_error(status));
    BoardError::Backend(format!("{message} (HTTP {})", status.as_u16()))
}

// ---------------------------------------------------------------------------
// Wire rows
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusRow {
    id: StatusId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct OrderRow {
    id: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    items: Option<Vec<OrderLine>>,
    #[serde(default)]
    total: Option<f64>,
    #[serde(default)]
    designer: Option<String>,
    #[serde(default)]
    order_date: Option<DateTime<Utc>>,
    #[serde(default)]
    due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    status: Option<StatusRow>,
}

impl From<OrderRow> for WorkItem {
    fn from(row: OrderRow) -> Self {
        let status = row.status.map(|s| StatusLabel {
            id: Some(s.id),
            name: s.name,
        });
        WorkItem {
            id: row.id,
            status: status.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
            created_at: row.created_at,
            customer_name: row.customer_name.unwrap_or_default(),
            items: row.items.unwrap_or_default(),
            total: row.total.unwrap_or_default(),
            designer: row.designer,
            order_date: row.order_date,
            due_date: row.due_date,
            status_label: status,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RestOrderSource {
    base_url: String,
    api_key: String,
    client: Client,
}

impl RestOrderSource {
    pub fn new(base_url: &str, api_key: &str) -> BoardResult<Self> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> BoardResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BoardError::Http(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            api_key: api_key.trim().to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, req: RequestBuilder) -> BoardResult<Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body_text = resp.text().await.unwrap_or_default();
        Err(rejection(status, &body_text))
    }

    async fn fetch_json(&self, req: RequestBuilder) -> BoardResult<Value> {
        let resp = self.send(req).await?;
        let body_text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body_text)?)
    }

    /// Status rows as a catalog for the board.
    pub async fn load_statuses(&self) -> BoardResult<StatusTable> {
        let req = self
            .request(Method::GET, "order_statuses")
            .query(&[("select", "id,name")]);
        let rows: Vec<StatusRow> = serde_json::from_value(self.fetch_json(req).await?)?;
        info!(count = rows.len(), "Order statuses loaded");
        Ok(rows.into_iter().map(|r| (r.name, r.id)).collect())
    }
}

#[async_trait]
impl OrderDataSource for RestOrderSource {
    async fn load_orders(&self) -> BoardResult<Vec<WorkItem>> {
        let req = self
            .request(Method::GET, "orders")
            .query(&[("select", ORDER_COLUMNS), ("order", "created_at.asc")]);
        let rows: Vec<OrderRow> = match self.fetch_json(req).await? {
            Value::Null => Vec::new(),
            body => serde_json::from_value(body)?,
        };
        debug!(count = rows.len(), "Orders loaded from backend");
        Ok(rows.into_iter().map(WorkItem::from).collect())
    }

    async fn update_status(&self, order_id: &str, status_id: StatusId) -> BoardResult<()> {
        let req = self
            .request(Method::PATCH, "orders")
            .query(&[("id", format!("eq.{order_id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "status_id": status_id }));
        let body = self.fetch_json(req).await?;
        // PostgREST answers 200 with no rows when the filter matched nothing.
        if body.as_array().is_some_and(|rows| rows.is_empty()) {
            return Err(BoardError::UnknownOrder(order_id.to_string()));
        }
        info!(order_id = %order_id, status_id, "Order status patched");
        Ok(())
    }
}
