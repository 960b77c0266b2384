//! Production board: drag/drop reconciliation over the column sequencer.
//!
//! A drop mutates the column sequences and the local order copy together,
//! synchronously, before the status update is sent. The update runs through
//! the [`OptimisticMoveTracker`], which decides between confirmation,
//! rejection and timeout; the board only applies or reverts its own state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::autoscroll::{AutoScrollDriver, ScrollContainer, ScrollState};
use crate::config::BoardConfig;
use crate::error::{BoardError, BoardResult};
use crate::models::{DropResult, StatusColumn, WorkItem, STATUS_COMPLETED, STATUS_TAKEN};
use crate::notify::{Notification, NotificationSink};
use crate::sequencer::{ColumnSequence, ColumnSequencer};
use crate::source::{DragCompleteListener, OrderDataSource, StatusCatalog};
use crate::tracker::{MoveOutcome, MoveTicket, OptimisticMoveTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragState {
    Idle,
    Dragging { order_id: String, gesture: Uuid },
}

/// Board state captured right before a drop is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSnapshot {
    pub sequences: ColumnSequence,
    pub orders: Vec<WorkItem>,
}

/// Result of the synchronous half of a drop.
#[derive(Debug)]
pub enum DropStep {
    NoOp,
    /// Same-column reorder; nothing to confirm.
    Reordered,
    /// Cross-column move awaiting the backend.
    Pending(PendingDrop),
}

/// A cross-column move whose status update is in flight.
#[derive(Debug)]
pub struct PendingDrop {
    result: DropResult,
    snapshot: BoardSnapshot,
    revision: u64,
    ticket: MoveTicket,
}

impl PendingDrop {
    pub fn order_id(&self) -> &str {
        &self.result.dragged_id
    }

    /// Wait for the tracker to settle this move.
    ///
    /// Does not borrow the board, so other drops can be handled meanwhile.
    pub async fn settle(self) -> SettledDrop {
        let outcome = self.ticket.outcome().await;
        SettledDrop {
            result: self.result,
            snapshot: self.snapshot,
            revision: self.revision,
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct SettledDrop {
    result: DropResult,
    snapshot: BoardSnapshot,
    revision: u64,
    outcome: MoveOutcome,
}

impl SettledDrop {
    pub fn outcome(&self) -> &MoveOutcome {
        &self.outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RollbackReason {
    Rejected,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DropOutcome {
    NoOp,
    Reordered,
    Committed,
    RolledBack(RollbackReason),
    /// A newer move of the same order took over; nothing was applied.
    Superseded,
}

/// The production status board.
pub struct KanbanBoard {
    columns: Vec<StatusColumn>,
    sequencer: ColumnSequencer,
    orders: Vec<WorkItem>,
    drag: DragState,
    /// Bumped on every local mutation; tells a settling drop whether its
    /// snapshot is still the latest state.
    revision: u64,
    tracker: OptimisticMoveTracker,
    source: Arc<dyn OrderDataSource>,
    catalog: Arc<dyn StatusCatalog>,
    sink: Arc<dyn NotificationSink>,
    listener: Option<Arc<dyn DragCompleteListener>>,
    autoscroll: Option<Box<dyn AutoScroll>>,
    busy: Mutex<HashSet<String>>,
}

/// Object-safe view of [`AutoScrollDriver`] so the board is not generic.
trait AutoScroll: Send {
    fn start(&mut self);
    fn pointer_moved(&mut self, x: f64) -> ScrollState;
    fn stop(&mut self);
}

impl<C: ScrollContainer + 'static> AutoScroll for AutoScrollDriver<C> {
    fn start(&mut self) {
        AutoScrollDriver::start(self)
    }
    fn pointer_moved(&mut self, x: f64) -> ScrollState {
        AutoScrollDriver::pointer_moved(self, x)
    }
    fn stop(&mut self) {
        AutoScrollDriver::stop(self)
    }
}

impl KanbanBoard {
    pub fn new(
        config: &BoardConfig,
        source: Arc<dyn OrderDataSource>,
        catalog: Arc<dyn StatusCatalog>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let tracker = OptimisticMoveTracker::new(
            config.move_timeout(),
            config.confirm_grace(),
            Arc::clone(&sink),
        );
        Self {
            columns: config.columns.clone(),
            sequencer: ColumnSequencer::new(),
            orders: Vec::new(),
            drag: DragState::Idle,
            revision: 0,
            tracker,
            source,
            catalog,
            sink,
            listener: None,
            autoscroll: None,
            busy: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn DragCompleteListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_autoscroll<C: ScrollContainer + 'static>(mut self, driver: AutoScrollDriver<C>) -> Self {
        self.autoscroll = Some(Box::new(driver));
        self
    }

    // -- Columns and data ---------------------------------------------------

    pub fn columns(&self) -> &[StatusColumn] {
        &self.columns
    }

    /// Append a column. Its status key need not exist in the backend.
    pub fn add_column(&mut self, column: StatusColumn) -> BoardResult<()> {
        if self
            .columns
            .iter()
            .any(|c| c.id == column.id || c.status_key == column.status_key)
        {
            return Err(BoardError::Config(format!(
                "column '{}' already exists",
                column.id
            )));
        }
        info!(column = %column.id, status = %column.status_key, "Column added");
        self.columns.push(column);
        Ok(())
    }

    fn column(&self, column_id: &str) -> BoardResult<&StatusColumn> {
        self.columns
            .iter()
            .find(|c| c.id == column_id)
            .ok_or_else(|| BoardError::UnknownColumn(column_id.to_string()))
    }

    pub fn orders(&self) -> &[WorkItem] {
        &self.orders
    }

    pub fn sequence(&self, status: &str) -> &[String] {
        self.sequencer.sequence(status)
    }

    pub fn sequences(&self) -> &ColumnSequence {
        self.sequencer.sequences()
    }

    pub fn tracker(&self) -> &OptimisticMoveTracker {
        &self.tracker
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            sequences: self.sequencer.snapshot(),
            orders: self.orders.clone(),
        }
    }

    /// Replace the local order copy with an authoritative list.
    ///
    /// Seeds the sequencer the first time a non-empty list arrives; later
    /// refreshes never reorder cards.
    pub fn sync_orders(&mut self, orders: Vec<WorkItem>) {
        self.orders = orders;
        self.sequencer.initialize(&self.orders);
        self.revision += 1;
        debug!(orders = self.orders.len(), revision = self.revision, "Orders synced");
    }

    /// Load orders from the data source and sync them.
    pub async fn refresh(&mut self) -> BoardResult<()> {
        let orders = self.source.load_orders().await?;
        self.sync_orders(orders);
        Ok(())
    }

    /// Local orders with pending optimistic moves overlaid.
    fn effective_orders(&self) -> Vec<WorkItem> {
        self.orders
            .iter()
            .map(|order| {
                let status = self.tracker.effective_status(&order.id, &order.status);
                let mut order = order.clone();
                if status != order.status {
                    order.set_status(&status);
                }
                order
            })
            .collect()
    }

    /// Cards of one column in display order.
    pub fn column_cards(&self, column_id: &str) -> BoardResult<Vec<WorkItem>> {
        let column = self.column(column_id)?;
        let view = self.effective_orders();
        Ok(self
            .sequencer
            .get_ordered(&column.status_key, &view)
            .into_iter()
            .cloned()
            .collect())
    }

    fn rendered_ids(&self, status: &str, view: &[WorkItem]) -> Vec<String> {
        self.sequencer
            .get_ordered(status, view)
            .into_iter()
            .map(|o| o.id.clone())
            .collect()
    }

    // -- Drag gesture -------------------------------------------------------

    pub fn drag_state(&self) -> &DragState {
        &self.drag
    }

    pub fn start_drag(&mut self, order_id: &str) {
        let gesture = Uuid::new_v4();
        debug!(order_id = %order_id, gesture = %gesture, "Drag started");
        self.drag = DragState::Dragging {
            order_id: order_id.to_string(),
            gesture,
        };
        if let Some(scroll) = self.autoscroll.as_mut() {
            scroll.start();
        }
    }

    /// Pointer moved during the drag; drives edge auto-scroll.
    pub fn drag_update(&mut self, pointer_x: f64) -> ScrollState {
        if matches!(self.drag, DragState::Idle) {
            return ScrollState::Stopped;
        }
        match self.autoscroll.as_mut() {
            Some(scroll) => scroll.pointer_moved(pointer_x),
            None => ScrollState::Stopped,
        }
    }

    fn finish_gesture(&mut self) {
        self.drag = DragState::Idle;
        if let Some(scroll) = self.autoscroll.as_mut() {
            scroll.stop();
        }
    }

    /// Apply a drop: mutate sequences and orders, start the status update.
    pub fn end_drag(&mut self, result: DropResult) -> BoardResult<DropStep> {
        self.finish_gesture();

        let Some(destination) = result.destination.clone().filter(|_| !result.is_noop()) else {
            debug!(order_id = %result.dragged_id, "Drop ignored");
            return Ok(DropStep::NoOp);
        };

        let source_status = self.column(&result.source.column_id)?.status_key.clone();
        let dest_status = self.column(&destination.column_id)?.status_key.clone();
        let order_id = result.dragged_id.clone();
        if !self.orders.iter().any(|o| o.id == order_id) {
            return Err(BoardError::UnknownOrder(order_id));
        }

        let view = self.effective_orders();
        // Rollback target is what was on screen, overlays included.
        let snapshot = BoardSnapshot {
            sequences: self.sequencer.snapshot(),
            orders: view.clone(),
        };
        let rendered_source = self.rendered_ids(&source_status, &view);
        self.sequencer.materialize(&source_status, rendered_source);

        if source_status == dest_status {
            self.sequencer.move_within(
                &source_status,
                &order_id,
                result.source.index,
                destination.index,
            );
            self.revision += 1;
            info!(
                order_id = %order_id,
                status = %source_status,
                from = result.source.index,
                to = destination.index,
                "Order reordered"
            );
            return Ok(DropStep::Reordered);
        }

        let rendered_dest = self.rendered_ids(&dest_status, &view);
        self.sequencer.materialize(&dest_status, rendered_dest);
        self.sequencer.move_across(
            &source_status,
            result.source.index,
            &dest_status,
            destination.index,
            &order_id,
        );
        if let Some(order) = self.orders.iter_mut().find(|o| o.id == order_id) {
            order.set_status(&dest_status);
        }
        self.revision += 1;
        self.sink.notify(Notification::info(
            "Order moved",
            format!("Order {order_id} moved to {dest_status}"),
        ));

        let Some(status_id) = self.catalog.resolve(&dest_status) else {
            self.sequencer.restore(snapshot.sequences);
            self.orders = snapshot.orders;
            self.revision += 1;
            warn!(
                order_id = %order_id,
                status = %dest_status,
                "No backend status for column, move reverted"
            );
            self.sink.notify(Notification::destructive(
                "Failed to update order status",
                format!("Status '{dest_status}' is not configured in the backend."),
            ));
            return Err(BoardError::UnknownStatus(dest_status));
        };

        let source = Arc::clone(&self.source);
        let id = order_id.clone();
        let ticket = self.tracker.record_move(&order_id, &source_status, &dest_status, async move {
            source.update_status(&id, status_id).await
        });
        info!(
            order_id = %order_id,
            from = %source_status,
            to = %dest_status,
            status_id,
            "Order moved optimistically"
        );

        Ok(DropStep::Pending(PendingDrop {
            result,
            snapshot,
            revision: self.revision,
            ticket,
        }))
    }

    /// Apply the settled outcome of a cross-column drop.
    pub fn finish_drop(&mut self, settled: SettledDrop) -> DropOutcome {
        let SettledDrop {
            result,
            snapshot,
            revision,
            outcome,
        } = settled;

        match outcome {
            MoveOutcome::Confirmed => {
                if let Some(listener) = &self.listener {
                    listener.on_drag_complete(&result);
                }
                DropOutcome::Committed
            }
            MoveOutcome::Superseded => DropOutcome::Superseded,
            MoveOutcome::Failed(_) => {
                self.rollback(&result, snapshot, revision);
                DropOutcome::RolledBack(RollbackReason::Rejected)
            }
            MoveOutcome::TimedOut => {
                self.rollback(&result, snapshot, revision);
                DropOutcome::RolledBack(RollbackReason::TimedOut)
            }
        }
    }

    /// End a drag and wait for its status update to settle.
    pub async fn handle_drop(&mut self, result: DropResult) -> BoardResult<DropOutcome> {
        match self.end_drag(result)? {
            DropStep::NoOp => Ok(DropOutcome::NoOp),
            DropStep::Reordered => Ok(DropOutcome::Reordered),
            DropStep::Pending(pending) => {
                let settled = pending.settle().await;
                Ok(self.finish_drop(settled))
            }
        }
    }

    /// Revert a failed drop.
    ///
    /// If nothing touched the board since the drop, the snapshot is restored
    /// as is. Otherwise only the dragged order is put back, so later drops
    /// and refreshes survive.
    fn rollback(&mut self, result: &DropResult, snapshot: BoardSnapshot, revision: u64) {
        let order_id = &result.dragged_id;
        if revision == self.revision {
            self.sequencer.restore(snapshot.sequences);
            self.orders = snapshot.orders;
            self.revision += 1;
            warn!(order_id = %order_id, "Drop rolled back");
            return;
        }

        let Some(previous) = snapshot.orders.iter().find(|o| &o.id == order_id) else {
            return;
        };
        if let Some(order) = self.orders.iter_mut().find(|o| &o.id == order_id) {
            order.status = previous.status.clone();
            order.status_label = previous.status_label.clone();
        }
        let mut sequences = self.sequencer.snapshot();
        for seq in sequences.values_mut() {
            seq.retain(|id| id != order_id);
        }
        let original = sequences.entry(previous.status.clone()).or_default();
        let index = result.source.index.min(original.len());
        original.insert(index, order_id.clone());
        self.sequencer.restore(sequences);
        self.revision += 1;
        warn!(
            order_id = %order_id,
            status = %previous.status,
            "Drop rolled back for this order only"
        );
    }

    // -- One-step status actions -------------------------------------------

    pub fn is_busy(&self, order_id: &str) -> bool {
        self.busy
            .lock()
            .map(|busy| busy.contains(order_id))
            .unwrap_or(false)
    }

    fn set_busy(&self, order_id: &str, busy: bool) -> BoardResult<bool> {
        let mut set = self
            .busy
            .lock()
            .map_err(|e| BoardError::Lock(e.to_string()))?;
        Ok(if busy {
            set.insert(order_id.to_string())
        } else {
            set.remove(order_id)
        })
    }

    /// Set an order's status by name without touching the sequences.
    ///
    /// The authoritative refresh that follows brings the new status in.
    /// Fails with [`BoardError::Busy`] while an update for the same order is
    /// still running.
    pub async fn mark_status(&self, order_id: &str, status_name: &str) -> BoardResult<()> {
        let Some(status_id) = self.catalog.resolve(status_name) else {
            self.sink.notify(Notification::destructive(
                "Failed to update order status",
                format!("Status '{status_name}' is not configured in the backend."),
            ));
            return Err(BoardError::UnknownStatus(status_name.to_string()));
        };

        if !self.set_busy(order_id, true)? {
            debug!(order_id = %order_id, "Status update already running");
            return Err(BoardError::Busy(order_id.to_string()));
        }
        let result = self.source.update_status(order_id, status_id).await;
        self.set_busy(order_id, false)?;

        match result {
            Ok(()) => {
                info!(order_id = %order_id, status = %status_name, "Order status set");
                self.sink.notify(Notification::info(
                    "Order updated",
                    format!("Order {order_id} marked as {status_name}"),
                ));
                Ok(())
            }
            Err(error) => {
                warn!(order_id = %order_id, status = %status_name, error = %error, "Order status update failed");
                self.sink.notify(Notification::destructive(
                    "Failed to update order status",
                    "Please try again.",
                ));
                Err(error)
            }
        }
    }

    pub async fn mark_taken(&self, order_id: &str) -> BoardResult<()> {
        self.mark_status(order_id, STATUS_TAKEN).await
    }

    pub async fn mark_completed(&self, order_id: &str) -> BoardResult<()> {
        self.mark_status(order_id, STATUS_COMPLETED).await
    }

    /// Tear down: cancel pending move timers and any auto-scroll loop.
    pub fn shutdown(&mut self) {
        self.finish_gesture();
        self.tracker.clear();
    }
}

impl Drop for KanbanBoard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
