//! The shared discrete-event clock.
//!
//! One [`Simulator`] exists per orchestration run. Stack builders register
//! time-stamped actions on it during setup, then the orchestrator sets a
//! stop bound and runs it once.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --run()--> Running --(stop bound reached / queue empty)--> Stopped
//!   \                                                               |
//!    \------------------------destroy()------------------------> Destroyed
//! ```
//!
//! The [`Clock`] trait is object-safe so the orchestrator can be driven by a
//! fake clock in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Action, EventId, EventKind, EventQueue, EventTag, ScheduledEvent};
use crate::types::{as_seconds, SimTime};

/// Lifecycle state of a clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    /// No run in progress; events may be scheduled.
    Idle,
    /// Draining the queue; actions may schedule more events.
    Running,
    /// Stop bound reached or queue exhausted.
    Stopped,
    /// Queue released; nothing further is permitted.
    Destroyed,
}

/// Contract violations raised by the clock.
///
/// None of these are recoverable runtime conditions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("cannot schedule {tag} at {at}ns: current time is already {now}ns")]
    PastEvent {
        tag: String,
        at: SimTime,
        now: SimTime,
    },

    #[error("operation `{operation}` is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ClockState,
    },
}

/// Result of a completed run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of events whose action ran
    pub events_fired: u64,
    /// Virtual time when the run ended
    pub final_time: SimTime,
    /// Events left past the stop bound
    pub pending_at_stop: usize,
}

/// A journaled milestone event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FiredEvent {
    /// Virtual time the event fired
    pub time: SimTime,
    /// Registration sequence number
    pub id: EventId,
    /// Owner and purpose
    pub tag: EventTag,
}

/// The virtual-time engine contract.
pub trait Clock {
    /// Returns the current virtual time.
    fn now(&self) -> SimTime;

    /// Returns the lifecycle state.
    fn state(&self) -> ClockState;

    /// Registers `action` to run at virtual time `at`.
    ///
    /// Valid only while `Idle` or `Running`, and only for `at >= now()`.
    fn schedule(&mut self, at: SimTime, tag: EventTag, action: Action) -> Result<EventId, ClockError>;

    /// Sets the inclusive stop bound for the next run.
    fn stop_at(&mut self, time: SimTime);

    /// Drains events in `(time, insertion)` order until the stop bound.
    fn run(&mut self) -> Result<RunSummary, ClockError>;

    /// Releases the queue. No further scheduling is permitted.
    fn destroy(&mut self);

    /// Returns the number of pending events.
    fn pending(&self) -> usize;
}

/// The real discrete-event clock.
///
/// # Example
///
/// ```
/// use stackweave::clock::{Clock, ClockState, Simulator};
/// use stackweave::event::{EventKind, EventTag};
///
/// let mut sim = Simulator::new();
/// let tag = EventTag::new("demo", EventKind::Custom);
/// sim.schedule(5, tag, Box::new(move |clock| {
///     let now = clock.now();
///     clock.schedule(now + 5, tag, Box::new(|_| Ok(())))?;
///     Ok(())
/// })).unwrap();
///
/// sim.stop_at(100);
/// let summary = sim.run().unwrap();
/// assert_eq!(summary.events_fired, 2);
/// assert_eq!(sim.now(), 100);
/// assert_eq!(sim.state(), ClockState::Stopped);
/// ```
pub struct Simulator {
    queue: EventQueue<ScheduledEvent>,
    now: SimTime,
    stop: Option<SimTime>,
    state: ClockState,
    journal: Option<Vec<FiredEvent>>,
    events_fired: u64,
}

impl Simulator {
    /// Creates an idle clock at time zero.
    pub fn new() -> Self {
        Self {
            queue: EventQueue::new(),
            now: 0,
            stop: None,
            state: ClockState::Idle,
            journal: None,
            events_fired: 0,
        }
    }

    /// Enables the milestone journal.
    pub fn with_journal(mut self) -> Self {
        self.journal = Some(Vec::new());
        self
    }

    /// Returns the journaled milestones, in firing order.
    pub fn journal(&self) -> &[FiredEvent] {
        self.journal.as_deref().unwrap_or(&[])
    }

    /// Returns the configured stop bound.
    pub fn stop_time(&self) -> Option<SimTime> {
        self.stop
    }

    /// Returns how many events have fired so far.
    pub fn events_fired(&self) -> u64 {
        self.events_fired
    }

    fn require_state(&self, operation: &'static str, allowed: &[ClockState]) -> Result<(), ClockError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ClockError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn within_bound(&self, time: SimTime) -> bool {
        self.stop.map_or(true, |stop| time <= stop)
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for Simulator {
    fn now(&self) -> SimTime {
        self.now
    }

    fn state(&self) -> ClockState {
        self.state
    }

    fn schedule(&mut self, at: SimTime, tag: EventTag, action: Action) -> Result<EventId, ClockError> {
        self.require_state("schedule", &[ClockState::Idle, ClockState::Running])?;
        if at < self.now {
            return Err(ClockError::PastEvent {
                tag: tag.to_string(),
                at,
                now: self.now,
            });
        }

        let id = self.queue.push(at, ScheduledEvent { tag, action });
        if tag.kind.is_milestone() {
            tracing::debug!(time_s = as_seconds(at), id, %tag, "scheduled");
        }
        Ok(id)
    }

    fn stop_at(&mut self, time: SimTime) {
        self.stop = Some(time);
    }

    fn run(&mut self) -> Result<RunSummary, ClockError> {
        self.require_state("run", &[ClockState::Idle])?;
        self.state = ClockState::Running;
        tracing::info!(
            stop_s = self.stop.map(as_seconds),
            pending = self.queue.len(),
            "clock running"
        );

        let fired_before = self.events_fired;
        while let Some(time) = self.queue.peek_time() {
            if !self.within_bound(time) {
                break;
            }
            let Some((time, id, event)) = self.queue.pop_next() else {
                break;
            };
            self.now = time;
            self.events_fired += 1;

            if event.tag.kind.is_milestone() {
                tracing::debug!(time_s = as_seconds(time), id, tag = %event.tag, "firing");
                if let Some(journal) = self.journal.as_mut() {
                    journal.push(FiredEvent {
                        time,
                        id,
                        tag: event.tag,
                    });
                }
            } else {
                tracing::trace!(time_s = as_seconds(time), id, tag = %event.tag, "firing");
            }

            if let Err(err) = (event.action)(self) {
                self.state = ClockState::Stopped;
                tracing::error!(error = %err, "event action failed, aborting run");
                return Err(err);
            }
        }

        if let Some(stop) = self.stop {
            self.now = self.now.max(stop);
        }
        self.state = ClockState::Stopped;

        let summary = RunSummary {
            events_fired: self.events_fired - fired_before,
            final_time: self.now,
            pending_at_stop: self.queue.len(),
        };
        tracing::info!(
            final_s = as_seconds(summary.final_time),
            events_fired = summary.events_fired,
            pending = summary.pending_at_stop,
            "clock stopped"
        );
        Ok(summary)
    }

    fn destroy(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.state = ClockState::Destroyed;
        tracing::debug!(dropped, "clock destroyed");
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("now", &self.now)
            .field("stop", &self.stop)
            .field("state", &self.state)
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Convenience for actions that only need to observe the clock.
pub fn noop() -> Action {
    Box::new(|_| Ok(()))
}

/// Shorthand for a custom-kind tag.
pub fn custom_tag(stack: &'static str) -> EventTag {
    EventTag::new(stack, EventKind::Custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<(SimTime, &'static str)>>>, label: &'static str) -> Action {
        let log = Rc::clone(log);
        Box::new(move |clock| {
            log.borrow_mut().push((clock.now(), label));
            Ok(())
        })
    }

    #[test]
    fn test_new_clock_is_idle() {
        let sim = Simulator::new();
        assert_eq!(sim.state(), ClockState::Idle);
        assert_eq!(sim.now(), 0);
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn test_events_fire_in_time_then_insertion_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut sim = Simulator::new();
        let tag = custom_tag("t");

        sim.schedule(30, tag, recorder(&log, "c")).unwrap();
        sim.schedule(10, tag, recorder(&log, "a1")).unwrap();
        sim.schedule(10, tag, recorder(&log, "a2")).unwrap();
        sim.schedule(20, tag, recorder(&log, "b")).unwrap();

        sim.run().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![(10, "a1"), (10, "a2"), (20, "b"), (30, "c")]
        );
    }

    #[test]
    fn test_stop_bound_is_inclusive() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut sim = Simulator::new();
        let tag = custom_tag("t");

        sim.schedule(100, tag, recorder(&log, "at-stop")).unwrap();
        sim.schedule(101, tag, recorder(&log, "past-stop")).unwrap();
        sim.stop_at(100);

        let summary = sim.run().unwrap();
        assert_eq!(summary.events_fired, 1);
        assert_eq!(summary.pending_at_stop, 1);
        assert_eq!(summary.final_time, 100);
        assert_eq!(*log.borrow(), vec![(100, "at-stop")]);
    }

    #[test]
    fn test_run_advances_to_stop_when_queue_drains_early() {
        let mut sim = Simulator::new();
        sim.schedule(5, custom_tag("t"), noop()).unwrap();
        sim.stop_at(1_000);
        let summary = sim.run().unwrap();
        assert_eq!(summary.final_time, 1_000);
        assert_eq!(sim.now(), 1_000);
    }

    #[test]
    fn test_run_without_stop_drains_queue() {
        let mut sim = Simulator::new();
        sim.schedule(7, custom_tag("t"), noop()).unwrap();
        sim.schedule(9, custom_tag("t"), noop()).unwrap();
        let summary = sim.run().unwrap();
        assert_eq!(summary.events_fired, 2);
        assert_eq!(summary.final_time, 9);
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn test_actions_can_schedule_same_time() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut sim = Simulator::new();
        let tag = custom_tag("t");

        let inner = recorder(&log, "child");
        let log_outer = Rc::clone(&log);
        sim.schedule(
            10,
            tag,
            Box::new(move |clock| {
                let now = clock.now();
                log_outer.borrow_mut().push((now, "parent"));
                clock.schedule(now, tag, inner)?;
                Ok(())
            }),
        )
        .unwrap();
        sim.schedule(10, tag, recorder(&log, "sibling")).unwrap();

        sim.run().unwrap();
        // The child was registered after the sibling, so it fires last.
        assert_eq!(
            *log.borrow(),
            vec![(10, "parent"), (10, "sibling"), (10, "child")]
        );
    }

    #[test]
    fn test_past_event_is_rejected() {
        let mut sim = Simulator::new();
        let tag = custom_tag("t");
        sim.schedule(
            50,
            tag,
            Box::new(move |clock| {
                clock.schedule(10, tag, noop())?;
                Ok(())
            }),
        )
        .unwrap();

        let err = sim.run().unwrap_err();
        assert!(matches!(err, ClockError::PastEvent { at: 10, now: 50, .. }));
        assert_eq!(sim.state(), ClockState::Stopped);
    }

    #[test]
    fn test_schedule_after_stop_is_rejected() {
        let mut sim = Simulator::new();
        sim.run().unwrap();
        assert_eq!(sim.state(), ClockState::Stopped);

        let err = sim.schedule(10, custom_tag("t"), noop()).unwrap_err();
        assert!(matches!(err, ClockError::InvalidState { operation: "schedule", .. }));
    }

    #[test]
    fn test_second_run_is_rejected() {
        let mut sim = Simulator::new();
        sim.run().unwrap();
        assert!(matches!(
            sim.run(),
            Err(ClockError::InvalidState { operation: "run", state: ClockState::Stopped })
        ));
    }

    #[test]
    fn test_destroy_releases_queue() {
        let mut sim = Simulator::new();
        sim.schedule(10, custom_tag("t"), noop()).unwrap();
        sim.schedule(20, custom_tag("t"), noop()).unwrap();
        sim.destroy();

        assert_eq!(sim.pending(), 0);
        assert_eq!(sim.state(), ClockState::Destroyed);
        assert!(sim.schedule(30, custom_tag("t"), noop()).is_err());
    }

    #[test]
    fn test_journal_records_milestones_only() {
        let mut sim = Simulator::new().with_journal();
        sim.schedule(1, EventTag::new("a", EventKind::PacketTx), noop()).unwrap();
        sim.schedule(2, EventTag::new("a", EventKind::MetricsSnapshot), noop()).unwrap();
        sim.run().unwrap();

        let journal = sim.journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].time, 2);
        assert_eq!(journal[0].tag.kind, EventKind::MetricsSnapshot);
    }
}
