//! Poll loop: reads the control bytes, detects edges, routes events.
//!
//! [`Poller`] is one tick worth of logic and can be driven directly with
//! explicit instants. [`MonitorLoop`] runs a poller on a background thread,
//! idling between ticks while it services feedback clears.
//!
//! The edge state lives in the poller and survives a stop/start cycle, as
//! the bit history belongs to the controller, not to the thread that happens
//! to be polling it. Statistics are shared with the [`MonitorLoop`] so they
//! can be read while the thread runs.

use crate::dispatch::ControlHandle;
use crate::edge::{self, BridgeEvent, EdgeEvents, EdgeState};
use crate::pulse::FeedbackPulser;
use crate::session::PlcSession;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use plcshow_common::config::BridgeConfig;
use plcshow_common::consts::POLL_READ_LEN;
use plcshow_common::link::{LinkIoError, PlcLink};
use plcshow_common::status::{StatusEvent, StatusPublisher};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Where to poll and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Data block holding control and feedback bytes
    pub block: u16,
    /// Offset of the control byte; the index byte follows it
    pub control_offset: u16,
    /// Offset of the feedback byte
    pub feedback_offset: u16,
    /// Delay between ticks while connected
    pub poll_interval: Duration,
    /// Delay between ticks while disconnected
    pub reconnect_backoff: Duration,
    /// Width of the advance acknowledge pulse
    pub feedback_pulse: Duration,
}

impl MonitorSettings {
    /// Settings from a validated configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            block: config.plc.db_number,
            control_offset: config.plc.control_offset,
            feedback_offset: config.plc.feedback_offset,
            poll_interval: config.timing.poll_interval(),
            reconnect_backoff: config.timing.reconnect_backoff(),
            feedback_pulse: config.timing.feedback_pulse(),
        }
    }
}

/// Counters kept across the poller's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Ticks attempted
    pub ticks: u64,
    /// Ticks skipped because no link was open
    pub disconnected_ticks: u64,
    /// Failed or short control reads
    pub read_failures: u64,
    /// Events routed to the control context
    pub events: u64,
    /// Feedback pulses armed
    pub pulses: u64,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No link; nothing was read.
    Disconnected,
    /// The control read failed; edge state untouched.
    ReadFailed,
    /// Control bytes read; these events were routed.
    Polled(EdgeEvents),
}

/// Single-tick poll logic.
pub struct Poller {
    /// Link owner
    session: Arc<PlcSession>,
    /// Event sink on the control context
    control: ControlHandle,
    /// IndexChanged notifications
    status: StatusPublisher,
    /// Addresses and timings
    settings: MonitorSettings,
    /// Feedback acknowledge
    pulser: FeedbackPulser,
    /// Bit levels seen on the last successful read
    edge: EdgeState,
    /// Index last published as IndexChanged
    last_index: Option<u8>,
    /// Counters, shared with the owning monitor
    stats: Arc<Mutex<MonitorStats>>,
}

impl Poller {
    /// Create a poller with cleared edge state.
    pub fn new(
        session: Arc<PlcSession>,
        control: ControlHandle,
        status: StatusPublisher,
        settings: MonitorSettings,
    ) -> Self {
        Self::with_stats(session, control, status, settings, Arc::default())
    }

    fn with_stats(
        session: Arc<PlcSession>,
        control: ControlHandle,
        status: StatusPublisher,
        settings: MonitorSettings,
        stats: Arc<Mutex<MonitorStats>>,
    ) -> Self {
        let pulser = FeedbackPulser::new(
            settings.block,
            settings.feedback_offset,
            settings.feedback_pulse,
        );
        Self {
            session,
            control,
            status,
            settings,
            pulser,
            edge: EdgeState::default(),
            last_index: None,
            stats,
        }
    }

    /// Run one tick at `now`.
    ///
    /// The link is held for the whole tick: due feedback clears, the control
    /// read and any new pulse all happen under the same borrow.
    pub fn poll_once(&mut self, now: Instant) -> TickOutcome {
        self.stats.lock().ticks += 1;
        let session = Arc::clone(&self.session);
        match session.with_link(|link| self.tick(link, now)) {
            Some(outcome) => outcome,
            None => {
                self.stats.lock().disconnected_ticks += 1;
                trace!("Tick skipped, not connected");
                TickOutcome::Disconnected
            }
        }
    }

    fn tick(&mut self, link: &mut dyn PlcLink, now: Instant) -> TickOutcome {
        self.pulser.service(link, now);

        let bytes = match link.read_bytes(
            self.settings.block,
            self.settings.control_offset,
            POLL_READ_LEN,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.read_failed(&e);
                return TickOutcome::ReadFailed;
            }
        };
        let &[control, index, ..] = bytes.as_slice() else {
            self.read_failed(&LinkIoError::ShortRead {
                expected: usize::from(POLL_READ_LEN),
                got: bytes.len(),
            });
            return TickOutcome::ReadFailed;
        };
        trace!("Control 0x{:02X}, index {}", control, index);

        let (events, next) = edge::detect(self.edge, control, index);
        for event in &events {
            self.route(*event, link, now);
        }
        self.edge = next;

        if self.last_index != Some(index) {
            debug!("Index changed to {}", index);
            self.last_index = Some(index);
            self.status.publish(StatusEvent::IndexChanged(index));
        }

        TickOutcome::Polled(events)
    }

    fn route(&mut self, event: BridgeEvent, link: &mut dyn PlcLink, now: Instant) {
        debug!("Routing {:?}", event);
        self.stats.lock().events += 1;
        if !self.control.submit(event) {
            warn!("Control context gone, dropping {:?}", event);
        }
        // The acknowledge follows the PLC request, whatever the presenter does with it.
        if event == BridgeEvent::AdvanceRequested {
            self.pulser.pulse(link, now);
            self.stats.lock().pulses += 1;
        }
    }

    fn read_failed(&mut self, e: &LinkIoError) {
        let n = {
            let mut stats = self.stats.lock();
            stats.read_failures += 1;
            stats.read_failures
        };
        if n <= 10 || n % 100 == 0 {
            warn!("Control read failed (#{}): {}", n, e);
        } else {
            debug!("Control read failed (#{}): {}", n, e);
        }
    }

    /// Fire feedback clears that are due. No-op while disconnected.
    pub fn service_pulses(&mut self, now: Instant) -> usize {
        let session = Arc::clone(&self.session);
        session
            .with_link(|link| self.pulser.service(link, now))
            .unwrap_or(0)
    }

    /// When the idle phase before `next_tick` must wake up.
    fn wake_at(&self, next_tick: Instant) -> Instant {
        match self.pulser.next_deadline() {
            Some(deadline) if self.session.is_connected() => deadline.min(next_tick),
            _ => next_tick,
        }
    }

    /// Wait out the last pending pulse, then clear the feedback bit.
    pub fn finish(&mut self) {
        if let Some(last) = self.pulser.last_deadline() {
            let now = Instant::now();
            if last > now {
                thread::sleep(last - now);
            }
        }
        let session = Arc::clone(&self.session);
        let pending = self.pulser.pending();
        if session.with_link(|link| self.pulser.flush(link)).is_none() && pending > 0 {
            debug!("Dropping {} feedback clears, not connected", pending);
            self.pulser = FeedbackPulser::new(
                self.settings.block,
                self.settings.feedback_offset,
                self.settings.feedback_pulse,
            );
        }
    }

    /// Bit levels from the last successful read.
    pub fn edge_state(&self) -> EdgeState {
        self.edge
    }

    /// Counters so far.
    pub fn stats(&self) -> MonitorStats {
        *self.stats.lock()
    }

    /// Feedback clears not yet fired.
    pub fn pending_pulses(&self) -> usize {
        self.pulser.pending()
    }
}

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No poll thread.
    Stopped,
    /// Poll thread running.
    Running,
}

/// Stops a running monitor from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl StopHandle {
    /// Request a stop. The loop exits at its next tick boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.wake.try_send(());
    }
}

/// Background poll thread.
pub struct MonitorLoop {
    /// Poller while stopped; moved into the thread while running
    poller: Option<Poller>,
    /// Running thread, returning its poller on exit
    worker: Option<JoinHandle<Poller>>,
    /// Cooperative stop flag
    running: Arc<AtomicBool>,
    /// Wakes the idle phase on stop
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    /// Counters updated by the poller, live while running
    stats: Arc<Mutex<MonitorStats>>,
    /// Kept to rebuild a poller lost to a panic
    session: Arc<PlcSession>,
    control: ControlHandle,
    status: StatusPublisher,
    settings: MonitorSettings,
}

impl MonitorLoop {
    /// Create a stopped monitor.
    pub fn new(
        session: Arc<PlcSession>,
        control: ControlHandle,
        status: StatusPublisher,
        settings: MonitorSettings,
    ) -> Self {
        let (wake_tx, wake_rx) = channel::bounded(1);
        let stats = Arc::new(Mutex::new(MonitorStats::default()));
        let poller = Poller::with_stats(
            Arc::clone(&session),
            control.clone(),
            status.clone(),
            settings.clone(),
            Arc::clone(&stats),
        );
        Self {
            poller: Some(poller),
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
            stats,
            session,
            control,
            status,
            settings,
        }
    }

    /// Current state.
    pub fn state(&self) -> MonitorState {
        match &self.worker {
            Some(worker) if !worker.is_finished() => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }

    /// Start polling. No-op if already running.
    ///
    /// # Errors
    /// Fails only if the thread cannot be spawned.
    pub fn start(&mut self) -> io::Result<()> {
        if self.state() == MonitorState::Running {
            debug!("Monitor already running");
            return Ok(());
        }
        // A worker that exited on its own still holds the poller.
        self.join_worker();

        let mut poller = self.take_poller();
        self.running.store(true, Ordering::SeqCst);
        while self.wake_rx.try_recv().is_ok() {}

        let running = Arc::clone(&self.running);
        let wake = self.wake_rx.clone();
        let spawned = thread::Builder::new()
            .name("plcshow-monitor".to_string())
            .spawn(move || {
                run_worker(&mut poller, &running, &wake);
                poller
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(
                    "Monitoring DB{} every {:?}",
                    self.settings.block, self.settings.poll_interval
                );
                self.status.publish(StatusEvent::MonitorStarted);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop polling and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.stop_handle().stop();
        self.join_worker();
        let stats = self.stats();
        info!(
            "Monitor stopped after {} ticks ({} disconnected, {} read failures, {} events, {} pulses)",
            stats.ticks, stats.disconnected_ticks, stats.read_failures, stats.events, stats.pulses
        );
        self.status.publish(StatusEvent::MonitorStopped);
    }

    /// Handle for stopping from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
            wake: self.wake_tx.clone(),
        }
    }

    /// Counters so far, including the running thread's.
    pub fn stats(&self) -> MonitorStats {
        *self.stats.lock()
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(poller) => self.poller = Some(poller),
                Err(_) => error!("Monitor thread panicked"),
            }
        }
    }

    fn take_poller(&mut self) -> Poller {
        self.poller.take().unwrap_or_else(|| {
            warn!("Recreating poller, edge state reset");
            Poller::with_stats(
                Arc::clone(&self.session),
                self.control.clone(),
                self.status.clone(),
                self.settings.clone(),
                Arc::clone(&self.stats),
            )
        })
    }
}

impl Drop for MonitorLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(poller: &mut Poller, running: &AtomicBool, wake: &Receiver<()>) {
    debug!("Monitor thread started");
    while running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();
        let interval = match poller.poll_once(tick_start) {
            TickOutcome::Disconnected => poller.settings.reconnect_backoff,
            _ => poller.settings.poll_interval,
        };
        let next_tick = tick_start + interval;

        // Idle until the next tick, waking for feedback clears.
        loop {
            let now = Instant::now();
            poller.service_pulses(now);
            if now >= next_tick {
                break;
            }
            let wake_at = poller.wake_at(next_tick);
            match wake.recv_timeout(wake_at.saturating_duration_since(now)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
    poller.finish();
    debug!("Monitor thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedPlc;
    use plcshow_common::bits::ControlBits;
    use plcshow_common::config::PlcConfig;

    struct Rig {
        plc: SimulatedPlc,
        session: Arc<PlcSession>,
        poller: Poller,
        control: Receiver<crate::dispatch::ControlMessage>,
        status: Receiver<StatusEvent>,
    }

    fn settings() -> MonitorSettings {
        MonitorSettings::from_config(&BridgeConfig::default())
    }

    fn rig() -> Rig {
        let plc = SimulatedPlc::new();
        let (status, status_rx) = StatusPublisher::channel();
        let session = Arc::new(PlcSession::new(Box::new(plc.clone()), StatusPublisher::disabled()));
        session.connect(&PlcConfig::default().endpoint()).unwrap();
        let (control, control_rx) = ControlHandle::channel();
        let poller = Poller::new(Arc::clone(&session), control, status, settings());
        Rig {
            plc,
            session,
            poller,
            control: control_rx,
            status: status_rx,
        }
    }

    #[test]
    fn test_disconnected_tick_reads_nothing() {
        let r = rig();
        let mut poller = r.poller;
        r.session.disconnect();
        assert_eq!(poller.poll_once(Instant::now()), TickOutcome::Disconnected);
        assert_eq!(r.plc.read_count(), 0);
        assert_eq!(poller.stats().disconnected_ticks, 1);
    }

    #[test]
    fn test_index_published_once_per_change() {
        let mut r = rig();
        let t0 = Instant::now();
        r.plc.poke(1, 0, &[0, 3]);
        r.poller.poll_once(t0);
        r.poller.poll_once(t0);
        r.plc.poke(1, 1, &[4]);
        r.poller.poll_once(t0);
        let events: Vec<_> = r.status.try_iter().collect();
        assert_eq!(
            events,
            vec![StatusEvent::IndexChanged(3), StatusEvent::IndexChanged(4)]
        );
    }

    #[test]
    fn test_advance_arms_pulse_on_link() {
        let mut r = rig();
        let t0 = Instant::now();
        r.plc.raise(1, 0, ControlBits::ADVANCE);
        let outcome = r.poller.poll_once(t0);
        assert!(matches!(outcome, TickOutcome::Polled(ref e) if e[..] == [BridgeEvent::AdvanceRequested]));
        assert_eq!(r.plc.peek(1, 2, 1), vec![0b100]);
        assert_eq!(r.poller.pending_pulses(), 1);
        assert_eq!(
            r.control.try_recv().unwrap(),
            crate::dispatch::ControlMessage::Event(BridgeEvent::AdvanceRequested)
        );

        // Next tick past the width fires the clear before reading.
        r.poller.poll_once(t0 + settings().feedback_pulse);
        assert_eq!(r.plc.peek(1, 2, 1), vec![0]);
        assert_eq!(r.poller.stats().pulses, 1);
    }

    #[test]
    fn test_read_failure_preserves_edge_state() {
        let mut r = rig();
        let t0 = Instant::now();
        r.plc.raise(1, 0, ControlBits::START);
        r.poller.poll_once(t0);
        let before = r.poller.edge_state();

        r.plc.set_fail_reads(true);
        assert_eq!(r.poller.poll_once(t0), TickOutcome::ReadFailed);
        assert_eq!(r.poller.edge_state(), before);

        r.plc.set_fail_reads(false);
        assert_eq!(r.poller.poll_once(t0), TickOutcome::Polled(EdgeEvents::new()));
        assert_eq!(r.poller.stats().read_failures, 1);
    }

    #[test]
    fn test_loop_start_stop() {
        let r = rig();
        let (control, _control_rx) = ControlHandle::channel();
        let (status, status_rx) = StatusPublisher::channel();
        let mut monitor = MonitorLoop::new(Arc::clone(&r.session), control, status, settings());
        assert_eq!(monitor.state(), MonitorState::Stopped);

        monitor.start().unwrap();
        monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Running);
        thread::sleep(Duration::from_millis(250));

        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert!(monitor.stats().ticks >= 2);
        let events: Vec<_> = status_rx.try_iter().collect();
        assert_eq!(events.first(), Some(&StatusEvent::MonitorStarted));
        assert_eq!(events.last(), Some(&StatusEvent::MonitorStopped));

        monitor.stop();
    }

    #[test]
    fn test_stats_visible_while_running() {
        let r = rig();
        let (control, _control_rx) = ControlHandle::channel();
        let fast = MonitorSettings {
            poll_interval: Duration::from_millis(10),
            ..settings()
        };
        let mut monitor = MonitorLoop::new(Arc::clone(&r.session), control, StatusPublisher::disabled(), fast);

        monitor.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        let running = monitor.stats();
        assert_eq!(monitor.state(), MonitorState::Running);
        assert!(running.ticks > 0);

        monitor.stop();
        assert!(monitor.stats().ticks >= running.ticks);
    }
}
