//! Change detection and debounced status broadcasting.
//!
//! The motion layer reports coordinate updates many times per second while
//! the machine moves. [`ChangeDetectionDispatcher`] turns that stream into
//! at most one broadcast per debounce window:
//!
//! ```text
//!  attribute change ──► dedup cache ──(value differs)──┐
//!  lifecycle event ────────────────────────────────────┼──► schedule ──► Idle? ──► Pending
//!  axis set changed ──► resubscribe + reseed ──────────┘                               │
//!                                                                  window elapsed      ▼
//!                                              Idle ◄── sink.broadcast() ◄── scheduler task
//! ```
//!
//! A window starts at the first qualifying change and is never extended:
//! changes arriving while a broadcast is pending only update the cache.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::domain::{
    AttributeValue, ChangeEventSource, ChangeKey, ChangeListener, ChangeNotification, ListenerId,
    MachineEvent,
};

/// Receiver of debounced broadcast triggers.
pub trait BroadcastSink: Send + Sync + fmt::Debug {
    /// Pushes one fresh snapshot to every subscriber. Must not block.
    fn broadcast(&self);
}

/// Debounces machine change notifications into broadcast triggers.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct ChangeDetectionDispatcher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    source: Arc<dyn ChangeEventSource>,
    sink: Arc<dyn BroadcastSink>,
    window: Duration,
    last_values: DashMap<ChangeKey, AttributeValue>,
    pending: AtomicBool,
    subscriptions: Mutex<Subscriptions>,
    scheduler: Mutex<Option<Scheduler>>,
    broadcasts: AtomicU64,
}

#[derive(Debug, Default)]
struct Subscriptions {
    machine: Option<ListenerId>,
    axes: Vec<(String, ListenerId)>,
}

#[derive(Debug)]
struct Scheduler {
    tx: mpsc::UnboundedSender<Instant>,
    task: JoinHandle<()>,
}

/// Listener registered with the source. Holds a weak reference so the
/// source never keeps a dropped dispatcher alive.
#[derive(Debug)]
struct DispatchListener {
    inner: Weak<Inner>,
}

impl ChangeListener for DispatchListener {
    fn on_change(&self, notification: ChangeNotification) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle(notification);
        }
    }
}

impl ChangeDetectionDispatcher {
    /// Creates an uninitialized dispatcher. Nothing is subscribed until
    /// [`Self::initialize`] is called.
    #[must_use]
    pub fn new(
        source: Arc<dyn ChangeEventSource>,
        sink: Arc<dyn BroadcastSink>,
        window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                sink,
                window,
                last_values: DashMap::new(),
                pending: AtomicBool::new(false),
                subscriptions: Mutex::new(Subscriptions::default()),
                scheduler: Mutex::new(None),
                broadcasts: AtomicU64::new(0),
            }),
        }
    }

    /// Starts the debounce scheduler, subscribes to machine-level and
    /// per-axis notifications, and seeds the dedup cache with current
    /// values. Re-initializing tears the previous subscriptions down first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&self) {
        if self.is_initialized() {
            self.teardown();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_scheduler(
            Arc::downgrade(&self.inner),
            rx,
            self.inner.window,
        ));
        *self.inner.scheduler.lock() = Some(Scheduler { tx, task });

        let listener = self.inner.listener();
        let machine_id = self.inner.source.add_machine_listener(listener);
        self.inner.subscriptions.lock().machine = Some(machine_id);
        let axes = self.inner.subscribe_axes();

        tracing::info!(
            axes,
            window_ms = self.inner.window.as_millis() as u64,
            "change detection dispatcher initialized"
        );
    }

    /// Unsubscribes everything, cancels any pending broadcast, and clears
    /// the cache. Safe to call repeatedly or before [`Self::initialize`].
    pub fn teardown(&self) {
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock());
        let was_initialized = subscriptions.machine.is_some();
        if let Some(id) = subscriptions.machine {
            self.inner.source.remove_listener(id);
        }
        for (_, id) in subscriptions.axes {
            self.inner.source.remove_listener(id);
        }
        if let Some(scheduler) = self.inner.scheduler.lock().take() {
            scheduler.task.abort();
        }
        self.inner.pending.store(false, Ordering::Release);
        self.inner.last_values.clear();
        if was_initialized {
            tracing::info!("change detection dispatcher torn down");
        }
    }

    /// Returns `true` between [`Self::initialize`] and [`Self::teardown`].
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.scheduler.lock().is_some()
    }

    /// Returns `true` while a broadcast is scheduled but has not fired.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Number of broadcasts fired since creation.
    #[must_use]
    pub fn broadcast_count(&self) -> u64 {
        self.inner.broadcasts.load(Ordering::Relaxed)
    }

    /// Last value recorded for `key`.
    #[must_use]
    pub fn cached_value(&self, key: &ChangeKey) -> Option<AttributeValue> {
        self.inner.last_values.get(key).map(|v| v.value().clone())
    }

    /// Axes currently subscribed, in subscription order.
    #[must_use]
    pub fn subscribed_axes(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .lock()
            .axes
            .iter()
            .map(|(axis, _)| axis.clone())
            .collect()
    }

    /// Feeds a notification directly, as if it came from the source.
    pub fn notify(&self, notification: ChangeNotification) {
        self.inner.handle(notification);
    }
}

impl Inner {
    fn listener(self: &Arc<Self>) -> Arc<dyn ChangeListener> {
        Arc::new(DispatchListener {
            inner: Arc::downgrade(self),
        })
    }

    fn handle(self: &Arc<Self>, notification: ChangeNotification) {
        match notification {
            ChangeNotification::Attribute { key, value } => {
                if self.record(key, value) {
                    self.schedule();
                }
            }
            ChangeNotification::Lifecycle(event) => {
                log_lifecycle(&event);
                self.schedule();
            }
            ChangeNotification::HeadActivity { head_id, jogging } => {
                tracing::debug!(%head_id, jogging, "head activity; rescanning axes");
                if self.rescan_axes() {
                    self.schedule();
                }
            }
            ChangeNotification::AxesChanged => self.resubscribe(),
        }
    }

    /// Stores `value` for `key`. Returns `true` if it differs from the
    /// previously recorded value.
    fn record(&self, key: ChangeKey, value: AttributeValue) -> bool {
        match self.last_values.entry(key) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == value {
                    false
                } else {
                    entry.insert(value);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        }
    }

    fn rescan_axes(&self) -> bool {
        let axes: Vec<String> = self
            .subscriptions
            .lock()
            .axes
            .iter()
            .map(|(axis, _)| axis.clone())
            .collect();
        let mut changed = false;
        for axis in axes {
            for (attribute, value) in self.source.axis_attributes(&axis) {
                changed |= self.record(ChangeKey::new(axis.as_str(), attribute), value);
            }
        }
        changed
    }

    /// Subscribes to every observed axis and seeds the cache. Returns the
    /// number of axes subscribed.
    fn subscribe_axes(self: &Arc<Self>) -> usize {
        let listener = self.listener();
        let mut subscribed = Vec::new();
        for axis in self.source.observed_axes() {
            let Some(id) = self.source.add_axis_listener(&axis, Arc::clone(&listener)) else {
                continue;
            };
            for (attribute, value) in self.source.axis_attributes(&axis) {
                self.last_values
                    .insert(ChangeKey::new(axis.as_str(), attribute), value);
            }
            subscribed.push((axis, id));
        }
        let count = subscribed.len();
        self.subscriptions.lock().axes = subscribed;
        count
    }

    fn resubscribe(self: &Arc<Self>) {
        let previous = {
            let mut subscriptions = self.subscriptions.lock();
            if subscriptions.machine.is_none() {
                return;
            }
            std::mem::take(&mut subscriptions.axes)
        };
        for (_, id) in previous {
            self.source.remove_listener(id);
        }
        self.last_values.clear();
        let axes = self.subscribe_axes();
        tracing::info!(axes, "axis set changed; resubscribed");
        self.schedule();
    }

    /// Moves Idle to Pending and hands the window start to the scheduler.
    /// A no-op while already Pending.
    fn schedule(&self) {
        let now = Instant::now();
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let sent = self
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(|scheduler| scheduler.tx.send(now).is_ok());
        if !sent {
            self.pending.store(false, Ordering::Release);
        }
    }
}

fn log_lifecycle(event: &MachineEvent) {
    match event {
        MachineEvent::Enabled => tracing::info!("machine enabled"),
        MachineEvent::EnableFailed { reason } => {
            tracing::warn!(%reason, "machine enable failed");
        }
        MachineEvent::AboutToBeDisabled { reason } => {
            tracing::info!(%reason, "machine about to be disabled");
        }
        MachineEvent::Disabled { reason } => tracing::info!(%reason, "machine disabled"),
        MachineEvent::DisableFailed { reason } => {
            tracing::warn!(%reason, "machine disable failed");
        }
        MachineEvent::Homed { homed } => tracing::info!(homed, "machine homed"),
        MachineEvent::Busy { busy } => tracing::debug!(busy, "machine busy changed"),
        MachineEvent::ActuatorActivity { actuator_id } => {
            tracing::debug!(%actuator_id, "actuator activity");
        }
        MachineEvent::JobStateChanged { state } => tracing::info!(?state, "job state changed"),
    }
}

/// Single scheduler task: waits out each window, then fires the sink.
async fn run_scheduler(
    inner: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<Instant>,
    window: Duration,
) {
    while let Some(started) = rx.recv().await {
        tokio::time::sleep_until(started + window).await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.pending.store(false, Ordering::Release);
        inner.broadcasts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("dispatching status broadcast");
        inner.sink.broadcast();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::machine::ATTR_COORDINATE;
    use crate::domain::{AxisKind, Location, MachineCommands, SimulatedMachine};
    use std::sync::atomic::AtomicUsize;

    const WINDOW: Duration = Duration::from_millis(50);

    #[derive(Debug, Default)]
    struct CountingSink {
        count: AtomicUsize,
    }

    impl BroadcastSink for CountingSink {
        fn broadcast(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingSink {
        fn get(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    fn setup() -> (Arc<SimulatedMachine>, Arc<CountingSink>, ChangeDetectionDispatcher) {
        let machine = Arc::new(SimulatedMachine::new(8, 8));
        let sink = Arc::new(CountingSink::default());
        let dispatcher = ChangeDetectionDispatcher::new(
            Arc::clone(&machine) as Arc<dyn ChangeEventSource>,
            Arc::clone(&sink) as Arc<dyn BroadcastSink>,
            WINDOW,
        );
        (machine, sink, dispatcher)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_identical_values_do_not_broadcast() {
        let (machine, sink, dispatcher) = setup();
        dispatcher.initialize();
        // seeded with 0.0 on initialize
        for _ in 0..10 {
            assert!(machine.report_coordinate("x", 0.0).is_ok());
        }
        advance(200).await;
        assert_eq!(sink.get(), 0);

        for _ in 0..10 {
            assert!(machine.report_coordinate("x", 1.0).is_ok());
        }
        advance(200).await;
        assert_eq!(sink.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_fires_once_after_window() {
        let (machine, sink, dispatcher) = setup();
        dispatcher.initialize();

        assert!(machine.report_coordinate("x", 1.0).is_ok());
        advance(10).await;
        assert!(machine.report_coordinate("x", 2.0).is_ok());
        advance(10).await;
        assert!(machine.report_coordinate("y", 3.0).is_ok());
        assert!(dispatcher.is_pending());

        advance(29).await;
        assert_eq!(sink.get(), 0);
        advance(2).await;
        assert_eq!(sink.get(), 1);
        assert!(!dispatcher.is_pending());

        advance(500).await;
        assert_eq!(sink.get(), 1);
        assert_eq!(
            dispatcher.cached_value(&ChangeKey::new("x", ATTR_COORDINATE)),
            Some(AttributeValue::Number(2.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn later_burst_triggers_another_broadcast() {
        let (machine, sink, dispatcher) = setup();
        dispatcher.initialize();

        assert!(machine.report_coordinate("x", 1.0).is_ok());
        advance(100).await;
        assert!(machine.report_coordinate("x", 2.0).is_ok());
        advance(100).await;
        assert_eq!(sink.get(), 2);
        assert_eq!(dispatcher.broadcast_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_events_bypass_dedup() {
        let (machine, sink, dispatcher) = setup();
        dispatcher.initialize();

        machine.fire_actuator("vacuum");
        advance(100).await;
        machine.fire_actuator("vacuum");
        advance(100).await;
        machine.fire_actuator("vacuum");
        advance(100).await;
        assert_eq!(sink.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn motion_burst_coalesces() {
        let (machine, sink, dispatcher) = setup();
        dispatcher.initialize();
        assert!(machine.enable().is_ok());
        let target = Location {
            x: 10.0,
            y: 5.0,
            ..Location::default()
        };
        assert!(machine.move_to("n1", target, 1.0).is_ok());
        advance(200).await;
        assert_eq!(sink.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn head_activity_without_changes_is_ignored() {
        let (_machine, sink, dispatcher) = setup();
        dispatcher.initialize();
        dispatcher.notify(ChangeNotification::HeadActivity {
            head_id: "h1".to_string(),
            jogging: true,
        });
        advance(200).await;
        assert_eq!(sink.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn axis_set_change_resubscribes_and_broadcasts() {
        let (machine, sink, dispatcher) = setup();
        dispatcher.initialize();
        assert_eq!(dispatcher.subscribed_axes(), ["x", "y", "z", "c"]);

        machine.add_axis("z2", AxisKind::Z);
        assert_eq!(dispatcher.subscribed_axes(), ["x", "y", "z", "c", "z2"]);
        advance(100).await;
        assert_eq!(sink.get(), 1);

        assert!(machine.report_coordinate("z2", 5.0).is_ok());
        advance(100).await;
        assert_eq!(sink.get(), 2);
        // one machine listener plus one per axis
        assert_eq!(machine.listener_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn reinitialize_does_not_duplicate_listeners() {
        let (machine, _sink, dispatcher) = setup();
        dispatcher.initialize();
        dispatcher.initialize();
        assert_eq!(machine.listener_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_unsubscribes_and_cancels_pending() {
        let (machine, sink, dispatcher) = setup();
        dispatcher.initialize();
        assert!(machine.report_coordinate("x", 1.0).is_ok());
        dispatcher.teardown();
        advance(200).await;
        assert_eq!(sink.get(), 0);
        assert_eq!(machine.listener_count(), 0);
        assert!(!dispatcher.is_initialized());

        assert!(machine.report_coordinate("x", 2.0).is_ok());
        advance(200).await;
        assert_eq!(sink.get(), 0);
    }

    #[test]
    fn teardown_before_initialize_is_safe() {
        let (_machine, _sink, dispatcher) = setup();
        dispatcher.teardown();
        dispatcher.teardown();
        assert!(!dispatcher.is_initialized());
    }

    #[test]
    fn schedule_without_scheduler_stays_idle() {
        let (_machine, _sink, dispatcher) = setup();
        dispatcher.notify(ChangeNotification::AxesChanged);
        assert!(!dispatcher.is_pending());
    }
}
