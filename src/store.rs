//! Local SQLite order store.
//!
//! WAL mode, versioned migrations and a `local_settings` table. Serves as an
//! offline [`OrderDataSource`] and [`StatusCatalog`], and publishes every
//! committed status change on a broadcast channel so boards can refresh.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BoardError, BoardResult};
use crate::models::{OrderLine, StatusId, StatusLabel, WorkItem, DEFAULT_STATUS_KEYS};
use crate::source::{OrderDataSource, StatusCatalog, StatusTable};

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A committed status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderChange {
    pub order_id: String,
    pub status_id: StatusId,
    pub status: String,
}

pub struct OrderStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    changes: broadcast::Sender<OrderChange>,
}

impl std::fmt::Debug for OrderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl OrderStore {
    /// Open `{data_dir}/kanban.db`, creating it if needed.
    ///
    /// On open failure the file (and its WAL/SHM companions) is deleted and
    /// opened once more.
    pub fn open(data_dir: &Path) -> BoardResult<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|e| BoardError::Config(format!("create data dir: {e}")))?;

        let db_path = data_dir.join("kanban.db");
        info!("Opening order store at {}", db_path.display());

        let conn = match open_and_configure(&db_path) {
            Ok(c) => c,
            Err(first_err) => {
                warn!(
                    "Order store open failed ({}), deleting and retrying once",
                    first_err
                );
                if db_path.exists() {
                    let _ = fs::remove_file(&db_path);
                    let _ = fs::remove_file(db_path.with_extension("db-wal"));
                    let _ = fs::remove_file(db_path.with_extension("db-shm"));
                }
                open_and_configure(&db_path)?
            }
        };
        run_migrations(&conn)?;
        info!("Order store ready (schema v{CURRENT_SCHEMA_VERSION})");
        Ok(Self::from_conn(conn, Some(db_path)))
    }

    pub fn open_in_memory() -> BoardResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        run_migrations(&conn)?;
        Ok(Self::from_conn(conn, None))
    }

    fn from_conn(conn: Connection, db_path: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            db_path,
            changes,
        }
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> BoardResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| BoardError::Lock(e.to_string()))
    }

    /// Run `f` with the locked connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> BoardResult<T>) -> BoardResult<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Stream of committed status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<OrderChange> {
        self.changes.subscribe()
    }

    pub fn setting(&self, category: &str, key: &str) -> BoardResult<Option<String>> {
        self.with_conn(|conn| Ok(get_setting(conn, category, key)))
    }

    pub fn set_setting(&self, category: &str, key: &str, value: &str) -> BoardResult<()> {
        self.with_conn(|conn| set_setting(conn, category, key, value))
    }

    // -- Statuses -----------------------------------------------------------

    /// All statuses in board order.
    pub fn statuses(&self) -> BoardResult<Vec<StatusLabel>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name FROM order_statuses ORDER BY sort_order, id")?;
            let rows = stmt.query_map([], |row| {
                Ok(StatusLabel {
                    id: Some(row.get(0)?),
                    name: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Snapshot of the status rows as an in-memory catalog.
    pub fn status_table(&self) -> BoardResult<StatusTable> {
        Ok(self
            .statuses()?
            .into_iter()
            .filter_map(|s| s.id.map(|id| (s.name, id)))
            .collect())
    }

    pub fn add_status(&self, name: &str) -> BoardResult<StatusId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO order_statuses (name, sort_order)
                 VALUES (?1, (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM order_statuses))",
                params![name.trim()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    // -- Orders -------------------------------------------------------------

    /// Insert an order under the status named by `order.status`.
    ///
    /// An empty id is replaced with a fresh UUID. Returns the stored id.
    pub fn insert_order(&self, order: &WorkItem) -> BoardResult<String> {
        let id = if order.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            order.id.clone()
        };
        let items_json = serde_json::to_string(&order.items)?;
        let created_at = order.created_at.unwrap_or_else(Utc::now).to_rfc3339();

        self.with_conn(|conn| {
            let status_id = status_id_by_name(conn, &order.status)?
                .ok_or_else(|| BoardError::UnknownStatus(order.status.clone()))?;
            conn.execute(
                "INSERT INTO orders (id, customer_name, status_id, items_json, total,
                                     designer, order_date, due_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))",
                params![
                    id,
                    order.customer_name,
                    status_id,
                    items_json,
                    order.total,
                    order.designer,
                    order.order_date.map(|d| d.to_rfc3339()),
                    order.due_date.map(|d| d.to_rfc3339()),
                    created_at,
                ],
            )?;
            Ok(())
        })?;
        info!(order_id = %id, status = %order.status, "Order inserted");
        Ok(id)
    }

    /// Every order with its authoritative status, oldest first.
    pub fn orders(&self) -> BoardResult<Vec<WorkItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT o.id, s.id, s.name, o.created_at, o.customer_name, o.items_json,
                        o.total, o.designer, o.order_date, o.due_date
                 FROM orders o
                 JOIN order_statuses s ON s.id = o.status_id
                 ORDER BY o.created_at, o.id",
            )?;
            let rows = stmt.query_map([], |row| {
                let status_id: StatusId = row.get(1)?;
                let status: String = row.get(2)?;
                let items_json: String = row.get(5)?;
                let items = serde_json::from_str::<Vec<OrderLine>>(&items_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?;
                Ok(WorkItem {
                    id: row.get(0)?,
                    status: status.clone(),
                    created_at: parse_time(row.get::<_, Option<String>>(3)?),
                    customer_name: row.get(4)?,
                    items,
                    total: row.get(6)?,
                    designer: row.get(7)?,
                    order_date: parse_time(row.get::<_, Option<String>>(8)?),
                    due_date: parse_time(row.get::<_, Option<String>>(9)?),
                    status_label: Some(StatusLabel {
                        id: Some(status_id),
                        name: status,
                    }),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Set an order's status and publish the change.
    pub fn set_order_status(&self, order_id: &str, status_id: StatusId) -> BoardResult<()> {
        let status = self.with_conn(|conn| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT name FROM order_statuses WHERE id = ?1",
                    params![status_id],
                    |row| row.get(0),
                )
                .optional()?;
            let status = status.ok_or_else(|| BoardError::UnknownStatus(status_id.to_string()))?;
            let changed = conn.execute(
                "UPDATE orders SET status_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status_id, order_id],
            )?;
            if changed == 0 {
                return Err(BoardError::UnknownOrder(order_id.to_string()));
            }
            Ok(status)
        })?;

        info!(order_id = %order_id, status = %status, "Order status updated");
        // No subscribers is fine.
        let _ = self.changes.send(OrderChange {
            order_id: order_id.to_string(),
            status_id,
            status,
        });
        Ok(())
    }
}

#[async_trait]
impl OrderDataSource for OrderStore {
    async fn load_orders(&self) -> BoardResult<Vec<WorkItem>> {
        self.orders()
    }

    async fn update_status(&self, order_id: &str, status_id: StatusId) -> BoardResult<()> {
        self.set_order_status(order_id, status_id)
    }
}

impl StatusCatalog for OrderStore {
    fn resolve(&self, status_name: &str) -> Option<StatusId> {
        match self.with_conn(|conn| status_id_by_name(conn, status_name)) {
            Ok(id) => id,
            Err(e) => {
                warn!(status = %status_name, error = %e, "Status lookup failed");
                None
            }
        }
    }
}

fn status_id_by_name(conn: &Connection, name: &str) -> BoardResult<Option<StatusId>> {
    Ok(conn
        .query_row(
            "SELECT id FROM order_statuses WHERE name = ?1 COLLATE NOCASE",
            params![name.trim()],
            |row| row.get(0),
        )
        .optional()?)
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn open_and_configure(path: &Path) -> BoardResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> BoardResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }
    info!("Migrating order store from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    Ok(())
}

/// Migration v1: statuses and orders, with the six production stages seeded.
fn migrate_v1(conn: &Connection) -> BoardResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS order_statuses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            sort_order INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            customer_name TEXT NOT NULL DEFAULT '',
            status_id INTEGER NOT NULL REFERENCES order_statuses(id),
            items_json TEXT NOT NULL DEFAULT '[]',
            total REAL NOT NULL DEFAULT 0,
            designer TEXT,
            order_date TEXT,
            due_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status_id);",
    )?;
    for (pos, name) in DEFAULT_STATUS_KEYS.iter().enumerate() {
        tx.execute(
            "INSERT OR IGNORE INTO order_statuses (name, sort_order) VALUES (?1, ?2)",
            params![name, pos as i64],
        )?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: key/value settings.
fn migrate_v2(conn: &Connection) -> BoardResult<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> BoardResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{DropOutcome, KanbanBoard};
    use crate::config::BoardConfig;
    use crate::models::{DropLocation, DropResult};
    use crate::notify::testing::RecordingSink;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn order(id: &str, status: &str, minute: u32) -> WorkItem {
        let mut item = WorkItem::new(id, status)
            .created(Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap());
        item.customer_name = format!("Customer {id}");
        item.items = vec![OrderLine {
            product_name: "Banner 2x1m".into(),
            quantity: 1.0,
            subtotal: 85000.0,
        }];
        item.total = 85000.0;
        item
    }

    #[test]
    fn migrations_seed_default_statuses() {
        let store = OrderStore::open_in_memory().unwrap();
        let names: Vec<String> = store.statuses().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, DEFAULT_STATUS_KEYS);

        let version: i32 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let store = OrderStore::open_in_memory().unwrap();
        store.with_conn(run_migrations).unwrap();
        assert_eq!(store.statuses().unwrap().len(), 6);
    }

    #[test]
    fn file_store_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let store = OrderStore::open(dir.path()).unwrap();
        assert_eq!(store.db_path(), Some(dir.path().join("kanban.db").as_path()));
        let mode: String = store
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn orders_load_oldest_first_with_labels() {
        let store = OrderStore::open_in_memory().unwrap();
        store.insert_order(&order("B", "Design", 2)).unwrap();
        store.insert_order(&order("A", "Design", 1)).unwrap();

        let orders = store.orders().unwrap();
        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);
        assert_eq!(orders[0].items[0].product_name, "Banner 2x1m");
        assert_eq!(orders[0].status_label.as_ref().unwrap().name, "Design");
    }

    #[test]
    fn failed_seed_leaves_schema_unstamped() {
        let conn = Connection::open_in_memory().unwrap();
        // Pre-existing table without `sort_order` makes the seed insert fail.
        conn.execute_batch("CREATE TABLE order_statuses (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();

        assert!(run_migrations(&conn).is_err());
        let version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 0);
        let orders_table: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'orders'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orders_table, 0);
    }

    #[test]
    fn corrupt_items_json_is_an_error() {
        let store = OrderStore::open_in_memory().unwrap();
        store.insert_order(&order("A", "Design", 1)).unwrap();
        store
            .with_conn(|conn| {
                conn.execute("UPDATE orders SET items_json = '{not json' WHERE id = 'A'", [])?;
                Ok(())
            })
            .unwrap();

        let err = store.orders().unwrap_err();
        assert!(matches!(
            err,
            BoardError::Database(rusqlite::Error::FromSqlConversionFailure(5, Type::Text, _))
        ));
    }

    #[test]
    fn insert_generates_missing_id() {
        let store = OrderStore::open_in_memory().unwrap();
        let id = store.insert_order(&WorkItem::new("", "Pending")).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn insert_rejects_unknown_status() {
        let store = OrderStore::open_in_memory().unwrap();
        let err = store.insert_order(&WorkItem::new("X", "Arsip")).unwrap_err();
        assert!(matches!(err, BoardError::UnknownStatus(_)));
    }

    #[test]
    fn status_update_validates_order_and_status() {
        let store = OrderStore::open_in_memory().unwrap();
        store.insert_order(&order("A", "Design", 1)).unwrap();
        let produksi = store.resolve("produksi").unwrap();

        assert!(matches!(
            store.set_order_status("missing", produksi),
            Err(BoardError::UnknownOrder(_))
        ));
        assert!(matches!(
            store.set_order_status("A", 999),
            Err(BoardError::UnknownStatus(_))
        ));

        store.set_order_status("A", produksi).unwrap();
        assert_eq!(store.orders().unwrap()[0].status, "Produksi");
    }

    #[test]
    fn status_changes_are_broadcast() {
        let store = OrderStore::open_in_memory().unwrap();
        store.insert_order(&order("A", "Design", 1)).unwrap();
        let mut rx = store.subscribe();
        let selesai = store.resolve("Selesai").unwrap();
        store.set_order_status("A", selesai).unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.order_id, "A");
        assert_eq!(change.status, "Selesai");
        assert_eq!(change.status_id, selesai);
    }

    #[test]
    fn catalog_matches_store_rows() {
        let store = OrderStore::open_in_memory().unwrap();
        let arsip = store.add_status("Arsip").unwrap();
        let table = store.status_table().unwrap();
        assert_eq!(table.len(), 7);
        assert_eq!(table.resolve("arsip"), Some(arsip));
        assert_eq!(store.resolve(" ARSIP "), Some(arsip));
        assert_eq!(store.resolve("Unknown"), None);
    }

    #[test]
    fn settings_round_trip() {
        let store = OrderStore::open_in_memory().unwrap();
        assert_eq!(store.setting("kanban", "move_timeout_ms").unwrap(), None);
        store.set_setting("kanban", "move_timeout_ms", "7000").unwrap();
        store.set_setting("kanban", "move_timeout_ms", "8000").unwrap();
        assert_eq!(
            store.setting("kanban", "move_timeout_ms").unwrap().as_deref(),
            Some("8000")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn board_drop_commits_to_store() {
        let store = Arc::new(OrderStore::open_in_memory().unwrap());
        store.insert_order(&order("A", "Design", 1)).unwrap();
        store.insert_order(&order("B", "Design", 2)).unwrap();
        let mut changes = store.subscribe();

        let sink = Arc::new(RecordingSink::default());
        let mut board =
            KanbanBoard::new(&BoardConfig::default(), store.clone(), store.clone(), sink);
        board.refresh().await.unwrap();

        let outcome = board
            .handle_drop(DropResult {
                source: DropLocation::new("design", 0),
                destination: Some(DropLocation::new("cek-file", 0)),
                dragged_id: "A".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, DropOutcome::Committed);
        assert_eq!(changes.recv().await.unwrap().status, "Cek File");

        board.refresh().await.unwrap();
        let cek_file: Vec<String> = board
            .column_cards("cek-file")
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(cek_file, ["A"]);
        assert_eq!(board.sequence("Design"), ["B"]);
    }
}
