//! Board configuration: move timeouts, auto-scroll tuning and the column set.
//!
//! Values come from (lowest to highest precedence) built-in defaults, a JSON
//! file, the `kanban` category of the local settings table, and environment
//! variables.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BoardError, BoardResult};
use crate::models::StatusColumn;
use crate::store;

/// Settings category holding board overrides.
pub const SETTINGS_CATEGORY: &str = "kanban";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardConfig {
    /// How long a status update may stay unresolved before it is rolled back.
    #[serde(default = "default_move_timeout_ms")]
    pub move_timeout_ms: u64,
    /// Delay between a confirmed update and dropping the optimistic overlay.
    #[serde(default = "default_confirm_grace_ms")]
    pub confirm_grace_ms: u64,
    #[serde(default)]
    pub autoscroll: AutoScrollConfig,
    #[serde(default = "StatusColumn::defaults")]
    pub columns: Vec<StatusColumn>,
}

fn default_move_timeout_ms() -> u64 {
    5_000
}
fn default_confirm_grace_ms() -> u64 {
    500
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            move_timeout_ms: default_move_timeout_ms(),
            confirm_grace_ms: default_confirm_grace_ms(),
            autoscroll: AutoScrollConfig::default(),
            columns: StatusColumn::defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScrollConfig {
    /// Distance from a container edge (px) that starts scrolling.
    #[serde(default = "default_edge_threshold_px")]
    pub edge_threshold_px: f64,
    /// Pixels per frame when scrolling starts.
    #[serde(default = "default_initial_speed")]
    pub initial_speed: f64,
    /// Added to the speed after every frame.
    #[serde(default = "default_speed_increment")]
    pub speed_increment: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

fn default_edge_threshold_px() -> f64 {
    80.0
}
fn default_initial_speed() -> f64 {
    4.0
}
fn default_speed_increment() -> f64 {
    0.5
}
fn default_max_speed() -> f64 {
    24.0
}
fn default_frame_interval_ms() -> u64 {
    16
}

impl Default for AutoScrollConfig {
    fn default() -> Self {
        Self {
            edge_threshold_px: default_edge_threshold_px(),
            initial_speed: default_initial_speed(),
            speed_increment: default_speed_increment(),
            max_speed: default_max_speed(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl AutoScrollConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl BoardConfig {
    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn confirm_grace(&self) -> Duration {
        Duration::from_millis(self.confirm_grace_ms)
    }

    /// Load from a JSON file; missing keys fall back to defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read board config {}", path.display()))?;
        let config: BoardConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse board config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values stored in the `kanban` settings category.
    pub fn apply_settings(&mut self, conn: &Connection) -> BoardResult<()> {
        if let Some(v) = store::get_setting(conn, SETTINGS_CATEGORY, "move_timeout_ms") {
            self.move_timeout_ms = parse_ms("move_timeout_ms", &v)?;
        }
        if let Some(v) = store::get_setting(conn, SETTINGS_CATEGORY, "confirm_grace_ms") {
            self.confirm_grace_ms = parse_ms("confirm_grace_ms", &v)?;
        }
        if let Some(v) = store::get_setting(conn, SETTINGS_CATEGORY, "columns") {
            self.columns = serde_json::from_str(&v)?;
        }
        debug!(
            move_timeout_ms = self.move_timeout_ms,
            confirm_grace_ms = self.confirm_grace_ms,
            columns = self.columns.len(),
            "Board settings applied"
        );
        self.validate()
    }

    /// Overlay `KANBAN_MOVE_TIMEOUT_MS` / `KANBAN_CONFIRM_GRACE_MS`.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("KANBAN_MOVE_TIMEOUT_MS") {
            match parse_ms("KANBAN_MOVE_TIMEOUT_MS", &v) {
                Ok(ms) => self.move_timeout_ms = ms,
                Err(e) => warn!(error = %e, "Ignoring invalid env override"),
            }
        }
        if let Ok(v) = std::env::var("KANBAN_CONFIRM_GRACE_MS") {
            match parse_ms("KANBAN_CONFIRM_GRACE_MS", &v) {
                Ok(ms) => self.confirm_grace_ms = ms,
                Err(e) => warn!(error = %e, "Ignoring invalid env override"),
            }
        }
    }

    pub fn validate(&self) -> BoardResult<()> {
        if self.move_timeout_ms == 0 {
            return Err(BoardError::Config("moveTimeoutMs must be > 0".into()));
        }
        if self.confirm_grace_ms >= self.move_timeout_ms {
            return Err(BoardError::Config(
                "confirmGraceMs must be shorter than moveTimeoutMs".into(),
            ));
        }
        let scroll = &self.autoscroll;
        if scroll.initial_speed <= 0.0 || scroll.speed_increment < 0.0 {
            return Err(BoardError::Config("autoscroll speeds must be positive".into()));
        }
        if scroll.max_speed < scroll.initial_speed {
            return Err(BoardError::Config(
                "autoscroll maxSpeed must be >= initialSpeed".into(),
            ));
        }
        if scroll.edge_threshold_px < 0.0 {
            return Err(BoardError::Config("autoscroll edgeThresholdPx must be >= 0".into()));
        }
        for (i, col) in self.columns.iter().enumerate() {
            let dup = self.columns[..i]
                .iter()
                .any(|c| c.id == col.id || c.status_key == col.status_key);
            if dup {
                return Err(BoardError::Config(format!(
                    "duplicate column '{}' ({})",
                    col.id, col.status_key
                )));
            }
        }
        Ok(())
    }
}

fn parse_ms(key: &str, raw: &str) -> BoardResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| BoardError::Config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = BoardConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.move_timeout(), Duration::from_secs(5));
        assert_eq!(config.columns.len(), 6);
    }

    #[test]
    fn json_file_fills_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "moveTimeoutMs": 8000, "autoscroll": {{ "maxSpeed": 40 }} }}"#).unwrap();
        let config = BoardConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.move_timeout_ms, 8000);
        assert_eq!(config.confirm_grace_ms, 500);
        assert_eq!(config.autoscroll.max_speed, 40.0);
        assert_eq!(config.autoscroll.initial_speed, 4.0);
    }

    #[test]
    fn rejects_duplicate_columns() {
        let mut config = BoardConfig::default();
        config.columns.push(StatusColumn::new("design", "Design 2", "Design"));
        assert!(matches!(config.validate(), Err(BoardError::Config(_))));
    }

    #[test]
    fn rejects_inverted_speed_bounds() {
        let mut config = BoardConfig::default();
        config.autoscroll.max_speed = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn settings_table_overrides_timeouts() {
        let store = store::OrderStore::open_in_memory().unwrap();
        store
            .set_setting(SETTINGS_CATEGORY, "move_timeout_ms", "9000")
            .unwrap();
        let mut config = BoardConfig::default();
        store
            .with_conn(|conn| config.apply_settings(conn))
            .unwrap();
        assert_eq!(config.move_timeout_ms, 9000);
    }

    #[test]
    fn settings_table_rejects_garbage() {
        let store = store::OrderStore::open_in_memory().unwrap();
        store
            .set_setting(SETTINGS_CATEGORY, "confirm_grace_ms", "soon")
            .unwrap();
        let mut config = BoardConfig::default();
        let result = store.with_conn(|conn| config.apply_settings(conn));
        assert!(matches!(result, Err(BoardError::Config(_))));
    }
}
