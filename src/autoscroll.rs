//! Edge auto-scroll for the horizontally scrolling board during a drag.
//!
//! [`AutoScrollController`] is the pure state machine: pointer position in,
//! direction and speed out. [`AutoScrollDriver`] runs it on a frame loop task
//! and owns the loop's handles, so ending the drag or dropping the driver
//! always stops the loop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AutoScrollConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrollState {
    Stopped,
    ScrollingLeft,
    ScrollingRight,
}

/// The horizontally scrollable element hosting the columns.
pub trait ScrollContainer: Send {
    /// Left and right edges of the visible area, in pointer coordinates.
    fn edges(&self) -> (f64, f64);
    fn scroll_left(&self) -> f64;
    /// Largest valid `scroll_left` (content width minus viewport width).
    fn max_scroll_left(&self) -> f64;
    fn set_scroll_left(&mut self, value: f64);
}

#[derive(Debug, Clone)]
pub struct AutoScrollController {
    config: AutoScrollConfig,
    state: ScrollState,
    speed: f64,
}

impl AutoScrollController {
    pub fn new(config: AutoScrollConfig) -> Self {
        let speed = config.initial_speed;
        Self {
            config,
            state: ScrollState::Stopped,
            speed,
        }
    }

    pub fn state(&self) -> ScrollState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Classify the pointer against the container edges.
    ///
    /// Speed resets whenever the state changes.
    pub fn pointer_moved(&mut self, x: f64, left_edge: f64, right_edge: f64) -> ScrollState {
        let threshold = self.config.edge_threshold_px;
        let next = if x - left_edge < threshold {
            ScrollState::ScrollingLeft
        } else if right_edge - x < threshold {
            ScrollState::ScrollingRight
        } else {
            ScrollState::Stopped
        };
        if next != self.state {
            debug!(from = ?self.state, to = ?next, x, "Auto-scroll state change");
            self.state = next;
            self.speed = self.config.initial_speed;
        }
        next
    }

    pub fn stop(&mut self) {
        self.state = ScrollState::Stopped;
        self.speed = self.config.initial_speed;
    }

    /// Advance one frame. Returns the offset actually applied.
    pub fn step(&mut self, container: &mut dyn ScrollContainer) -> f64 {
        let direction = match self.state {
            ScrollState::Stopped => return 0.0,
            ScrollState::ScrollingLeft => -1.0,
            ScrollState::ScrollingRight => 1.0,
        };
        let current = container.scroll_left();
        let max = container.max_scroll_left().max(0.0);
        let next = (current + direction * self.speed).clamp(0.0, max);
        container.set_scroll_left(next);
        self.speed = (self.speed + self.config.speed_increment).min(self.config.max_speed);
        next - current
    }
}

struct Shared<C> {
    controller: AutoScrollController,
    container: C,
}

struct FrameLoop {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl FrameLoop {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Drives an [`AutoScrollController`] once per frame while a drag is active.
pub struct AutoScrollDriver<C: ScrollContainer + 'static> {
    shared: Arc<Mutex<Shared<C>>>,
    frame_interval: Duration,
    frame_loop: Option<FrameLoop>,
    listening: bool,
}

impl<C: ScrollContainer + 'static> AutoScrollDriver<C> {
    pub fn new(config: AutoScrollConfig, container: C) -> Self {
        let frame_interval = config.frame_interval();
        Self {
            shared: Arc::new(Mutex::new(Shared {
                controller: AutoScrollController::new(config),
                container,
            })),
            frame_interval,
            frame_loop: None,
            listening: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<C>> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drag started: begin listening for pointer moves.
    pub fn start(&mut self) {
        self.listening = true;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Whether the frame loop task is alive.
    pub fn is_running(&self) -> bool {
        self.frame_loop
            .as_ref()
            .is_some_and(|frame_loop| !frame_loop.task.is_finished())
    }

    pub fn state(&self) -> ScrollState {
        self.lock().controller.state()
    }

    pub fn with_container<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(&self.lock().container)
    }

    /// Pointer moved during the drag. Ignored when no drag is active.
    pub fn pointer_moved(&mut self, x: f64) -> ScrollState {
        if !self.listening {
            return ScrollState::Stopped;
        }
        let state = {
            let mut shared = self.lock();
            let (left, right) = shared.container.edges();
            shared.controller.pointer_moved(x, left, right)
        };
        match state {
            ScrollState::Stopped => self.stop_loop(),
            _ if !self.is_running() => self.spawn_loop(),
            _ => {}
        }
        state
    }

    /// Drag ended: stop scrolling and stop listening.
    pub fn stop(&mut self) {
        self.listening = false;
        self.stop_loop();
        self.lock().controller.stop();
    }

    fn stop_loop(&mut self) {
        if let Some(frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
            debug!("Auto-scroll frame loop stopped");
        }
    }

    fn spawn_loop(&mut self) {
        self.stop_loop();
        let shared = Arc::clone(&self.shared);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = self.frame_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !run_frame(&shared) {
                            break;
                        }
                    }
                }
            }
        });
        debug!(interval_ms = interval.as_millis() as u64, "Auto-scroll frame loop started");
        self.frame_loop = Some(FrameLoop { task, cancel });
    }
}

/// One animation frame; returns false once scrolling has stopped.
fn run_frame<C: ScrollContainer>(shared: &Mutex<Shared<C>>) -> bool {
    let mut guard = shared.lock().unwrap_or_else(|p| p.into_inner());
    let Shared {
        controller,
        container,
    } = &mut *guard;
    if controller.state() == ScrollState::Stopped {
        return false;
    }
    controller.step(container);
    true
}

impl<C: ScrollContainer + 'static> Drop for AutoScrollDriver<C> {
    fn drop(&mut self) {
        self.stop_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Container whose offset stays observable after the driver is dropped.
    #[derive(Clone)]
    struct TestContainer {
        offset: Arc<Mutex<f64>>,
        max: f64,
    }

    impl TestContainer {
        fn new(max: f64) -> Self {
            Self {
                offset: Arc::new(Mutex::new(0.0)),
                max,
            }
        }

        fn offset(&self) -> f64 {
            *self.offset.lock().unwrap()
        }
    }

    impl ScrollContainer for TestContainer {
        fn edges(&self) -> (f64, f64) {
            (0.0, 1000.0)
        }
        fn scroll_left(&self) -> f64 {
            self.offset()
        }
        fn max_scroll_left(&self) -> f64 {
            self.max
        }
        fn set_scroll_left(&mut self, value: f64) {
            *self.offset.lock().unwrap() = value;
        }
    }

    fn config() -> AutoScrollConfig {
        AutoScrollConfig::default()
    }

    #[test]
    fn pointer_zones_map_to_states() {
        let mut c = AutoScrollController::new(config());
        assert_eq!(c.pointer_moved(10.0, 0.0, 1000.0), ScrollState::ScrollingLeft);
        assert_eq!(c.pointer_moved(500.0, 0.0, 1000.0), ScrollState::Stopped);
        assert_eq!(c.pointer_moved(990.0, 0.0, 1000.0), ScrollState::ScrollingRight);
        assert_eq!(c.pointer_moved(920.0, 0.0, 1000.0), ScrollState::Stopped);
    }

    #[test]
    fn speed_accelerates_up_to_max() {
        let mut c = AutoScrollController::new(config());
        let mut container = TestContainer::new(10_000.0);
        c.pointer_moved(995.0, 0.0, 1000.0);

        assert_eq!(c.step(&mut container), 4.0);
        assert_eq!(c.step(&mut container), 4.5);
        assert_eq!(c.step(&mut container), 5.0);
        for _ in 0..100 {
            c.step(&mut container);
        }
        assert_eq!(c.speed(), 24.0);
    }

    #[test]
    fn direction_change_resets_speed() {
        let mut c = AutoScrollController::new(config());
        let mut container = TestContainer::new(10_000.0);
        container.set_scroll_left(500.0);
        c.pointer_moved(995.0, 0.0, 1000.0);
        c.step(&mut container);
        c.step(&mut container);
        assert!(c.speed() > 4.0);

        c.pointer_moved(5.0, 0.0, 1000.0);
        assert_eq!(c.speed(), 4.0);
        assert_eq!(c.step(&mut container), -4.0);
    }

    #[test]
    fn staying_in_zone_keeps_accelerating() {
        let mut c = AutoScrollController::new(config());
        let mut container = TestContainer::new(10_000.0);
        c.pointer_moved(995.0, 0.0, 1000.0);
        c.step(&mut container);
        c.pointer_moved(990.0, 0.0, 1000.0);
        assert_eq!(c.speed(), 4.5);
    }

    #[test]
    fn scrolling_clamps_to_bounds() {
        let mut c = AutoScrollController::new(config());
        let mut container = TestContainer::new(6.0);
        c.pointer_moved(995.0, 0.0, 1000.0);
        c.step(&mut container);
        assert_eq!(c.step(&mut container), 2.0);
        assert_eq!(container.offset(), 6.0);
        assert_eq!(c.step(&mut container), 0.0);

        c.pointer_moved(1.0, 0.0, 1000.0);
        for _ in 0..5 {
            c.step(&mut container);
        }
        assert_eq!(container.offset(), 0.0);
    }

    #[test]
    fn stopped_step_is_noop() {
        let mut c = AutoScrollController::new(config());
        let mut container = TestContainer::new(100.0);
        assert_eq!(c.step(&mut container), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_scrolls_while_pointer_in_edge_zone() {
        let container = TestContainer::new(10_000.0);
        let mut driver = AutoScrollDriver::new(config(), container.clone());
        driver.start();
        assert_eq!(driver.pointer_moved(995.0), ScrollState::ScrollingRight);
        assert!(driver.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_100ms = container.offset();
        assert!(after_100ms > 0.0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        // accelerating: the second window covers more ground than the first
        assert!(container.offset() - after_100ms > after_100ms);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_edge_zone_stops_loop() {
        let container = TestContainer::new(10_000.0);
        let mut driver = AutoScrollDriver::new(config(), container.clone());
        driver.start();
        driver.pointer_moved(995.0);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(driver.pointer_moved(500.0), ScrollState::Stopped);
        assert!(!driver.is_running());
        let parked = container.offset();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(container.offset(), parked);
    }

    #[tokio::test(start_paused = true)]
    async fn drag_end_cancels_loop_and_listener() {
        let container = TestContainer::new(10_000.0);
        let mut driver = AutoScrollDriver::new(config(), container.clone());
        driver.start();
        driver.pointer_moved(995.0);
        tokio::time::sleep(Duration::from_millis(50)).await;

        driver.stop();
        assert!(!driver.is_running());
        assert!(!driver.is_listening());
        assert_eq!(driver.state(), ScrollState::Stopped);

        // Late pointer events after drag end are ignored.
        assert_eq!(driver.pointer_moved(995.0), ScrollState::Stopped);
        let parked = container.offset();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(container.offset(), parked);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_driver_cancels_loop() {
        let container = TestContainer::new(10_000.0);
        {
            let mut driver = AutoScrollDriver::new(config(), container.clone());
            driver.start();
            driver.pointer_moved(995.0);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let parked = container.offset();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(container.offset(), parked);
    }

    #[tokio::test(start_paused = true)]
    async fn pointer_moves_before_start_are_ignored() {
        let container = TestContainer::new(10_000.0);
        let mut driver = AutoScrollDriver::new(config(), container.clone());
        assert_eq!(driver.pointer_moved(995.0), ScrollState::Stopped);
        assert!(!driver.is_running());
    }
}
