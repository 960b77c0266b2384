//! Print-shop production board engine.
//!
//! Orders move through six production stages (Pending, Design, Cek File,
//! Produksi, Selesai, Diambil). Staff drag cards between columns; the board
//! applies the move immediately, sends the status update, and reverts the
//! move if the backend rejects it or does not answer in time.
//!
//! - [`sequencer`] keeps each column's manual card order.
//! - [`board`] reconciles drag gestures with the sequences and local data.
//! - [`tracker`] owns in-flight moves, their timeouts and grace periods.
//! - [`autoscroll`] scrolls the board while a card is held near an edge.
//!
//! Order data comes through [`source::OrderDataSource`], implemented by the
//! local [`store::OrderStore`] and the hosted [`remote::RestOrderSource`].

pub mod autoscroll;
pub mod board;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod notify;
pub mod remote;
pub mod sequencer;
pub mod source;
pub mod store;
pub mod tracker;

pub use board::{DragState, DropOutcome, DropStep, KanbanBoard, PendingDrop, RollbackReason};
pub use config::{AutoScrollConfig, BoardConfig};
pub use error::{BoardError, BoardResult};
pub use models::{DropLocation, DropResult, StatusColumn, StatusId, WorkItem};
pub use notify::{Notification, NotificationSink, Severity};
pub use sequencer::ColumnSequencer;
pub use source::{DragCompleteListener, OrderDataSource, StatusCatalog, StatusTable};
pub use tracker::{MoveOutcome, OptimisticMoveTracker};
