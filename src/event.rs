//! Event definitions and the time-ordered event queue.
//!
//! Events are the only mechanism that changes simulation state. Every event
//! carries a virtual timestamp, a tag describing what it is for, and an
//! action that runs when the clock reaches it.
//!
//! The [`EventQueue`] is independent of what an action does: it orders
//! entries by time and, for equal times, by insertion order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, ClockError};
use crate::types::SimTime;

/// Identifier of a scheduled event, unique within one clock.
///
/// This is the insertion sequence number used as the tie-breaker.
pub type EventId = u64;

/// What a scheduled event is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A traffic generator starts sending.
    TrafficStart,
    /// A traffic generator stops sending.
    TrafficStop,
    /// A traffic sink starts accepting packets.
    SinkStart,
    /// A traffic sink stops accepting packets.
    SinkStop,
    /// A packet leaves an application.
    PacketTx,
    /// A packet arrives at the receiving device.
    PacketRx,
    /// A flow monitor takes its one-time snapshot.
    MetricsSnapshot,
    /// Anything else.
    Custom,
}

impl EventKind {
    /// Returns true for events that are not packet-level.
    ///
    /// Milestones are the events worth journaling and logging at debug level.
    pub fn is_milestone(&self) -> bool {
        !matches!(self, EventKind::PacketTx | EventKind::PacketRx)
    }
}

/// Identifies the owner and purpose of a scheduled event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct EventTag {
    /// Name of the stack that registered the event
    pub stack: &'static str,
    /// Purpose of the event
    pub kind: EventKind,
}

impl EventTag {
    /// Creates a new tag.
    pub fn new(stack: &'static str, kind: EventKind) -> Self {
        Self { stack, kind }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.stack, self.kind)
    }
}

/// The callback run when an event fires.
///
/// Actions receive the clock so they can schedule follow-up events. An error
/// returned from an action aborts the run.
pub type Action = Box<dyn FnOnce(&mut dyn Clock) -> Result<(), ClockError>>;

/// An event waiting in the queue. Its time and id are the queue key.
pub struct ScheduledEvent {
    /// Owner and purpose
    pub tag: EventTag,
    /// Callback to run
    pub action: Action,
}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent").field("tag", &self.tag).finish()
    }
}

/// A priority queue ordered by `(time, insertion order)`.
///
/// Entries at equal times pop in the order they were pushed, no matter who
/// pushed them. This is the only tie-break rule.
///
/// # Example
///
/// ```
/// use stackweave::event::EventQueue;
///
/// let mut queue = EventQueue::new();
/// queue.push(20, "late");
/// queue.push(10, "first");
/// queue.push(10, "second");
///
/// assert_eq!(queue.pop_next().map(|(t, _, v)| (t, v)), Some((10, "first")));
/// assert_eq!(queue.pop_next().map(|(t, _, v)| (t, v)), Some((10, "second")));
/// assert_eq!(queue.pop_next().map(|(t, _, v)| (t, v)), Some((20, "late")));
/// assert!(queue.is_empty());
/// ```
#[derive(Debug)]
pub struct EventQueue<T> {
    entries: BTreeMap<(SimTime, u64), T>,
    next_seq: u64,
}

impl<T> EventQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Inserts an entry and returns its sequence number.
    pub fn push(&mut self, time: SimTime, item: T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((time, seq), item);
        seq
    }

    /// Removes and returns the earliest entry as `(time, seq, item)`.
    pub fn pop_next(&mut self) -> Option<(SimTime, u64, T)> {
        self.entries
            .pop_first()
            .map(|((time, seq), item)| (time, seq, item))
    }

    /// Returns the time of the earliest entry.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.entries.keys().next().map(|&(time, _)| time)
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every pending entry. Sequence numbers keep increasing.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
