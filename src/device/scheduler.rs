//! Clock event scheduler.
//!
//! A binary min-heap of scheduled callbacks keyed by absolute SYS-clock
//! tick. Every other clock domain is an integer prescale of SYS; an event
//! remembers the scale it was scheduled under so it can be re-expressed
//! when the prescaler configuration changes.
//!
//! Events due at the same tick fire in `(priority, insertion)` order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use log::error;

use crate::blocks::BlockId;

/// Clock domains, integer prescales of the SYS clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    /// The fundamental time base.
    Sys,
    /// CPU clock.
    Cpu,
    /// Peripheral clock.
    Per,
    /// Peripheral 2x clock.
    Per2,
    /// Peripheral 4x clock.
    Per4,
    /// Asynchronous clock (unsupported, treated as SYS).
    Asy,
}

/// What a scheduled event fires into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// The CPU step callback.
    CpuStep,
    /// A connected block's `step` hook.
    Block(BlockId),
}

/// Opaque identity of a scheduled event, used to unschedule it.
///
/// Handles are never reused; a handle that outlives its event (or a queue
/// clear) simply fails to unschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(u64);

/// A scheduled event record.
#[derive(Debug, Clone)]
pub struct ClockEvent {
    handle: EventHandle,
    /// Clock domain the event ticks in.
    pub domain: ClockDomain,
    /// Dispatch target.
    pub target: EventTarget,
    /// Lower fires first among events due at the same tick.
    pub priority: u32,
    /// Absolute SYS tick of the next firing.
    pub tick: u64,
    /// SYS ticks per domain tick at the time the event was last scaled.
    pub scale: u64,
    seq: u64,
}

impl ClockEvent {
    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    fn key(&self) -> (u64, u32, u64) {
        (self.tick, self.priority, self.seq)
    }
}

impl PartialEq for ClockEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ClockEvent {}

impl PartialOrd for ClockEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClockEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// The event queue and the current SYS tick.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<ClockEvent>>,
    now: u64,
    next_handle: u64,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current SYS tick.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop all events and rewind the SYS tick to 0. Handle identities
    /// stay monotonic so stale handles never alias a new event.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.now = 0;
    }

    /// Schedule an event `ticks` domain ticks from now.
    ///
    /// The firing tick is aligned to the domain's scale, so `ticks = 1`
    /// means "the next domain tick", not "`scale` SYS ticks from here".
    pub fn schedule(
        &mut self,
        domain: ClockDomain,
        target: EventTarget,
        ticks: u64,
        priority: u32,
        scale: u64,
    ) -> EventHandle {
        debug_assert!(scale >= 1);
        let handle = EventHandle(self.next_handle);
        self.next_handle += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        let tick = (self.now / scale + ticks) * scale;
        self.queue.push(Reverse(ClockEvent {
            handle,
            domain,
            target,
            priority,
            tick,
            scale,
            seq,
        }));
        handle
    }

    /// Remove an event by handle. The queue is small, a linear pass and a
    /// heap rebuild are fine.
    pub fn unschedule(&mut self, handle: EventHandle) -> bool {
        let events = std::mem::take(&mut self.queue).into_vec();
        let before = events.len();
        let kept: Vec<Reverse<ClockEvent>> = events
            .into_iter()
            .filter(|Reverse(ev)| ev.handle != handle)
            .collect();
        let removed = kept.len() != before;
        self.queue = BinaryHeap::from(kept);
        if !removed {
            error!("cannot unschedule event: not found");
        }
        removed
    }

    /// Advance the SYS tick to the earliest scheduled event and return it,
    /// or `None` when the queue is empty.
    pub fn advance_to_next(&mut self) -> Option<u64> {
        let tick = self.queue.peek()?.0.tick;
        self.now = tick;
        Some(tick)
    }

    /// Pop the next event if it is due at the current tick.
    pub fn pop_due(&mut self) -> Option<ClockEvent> {
        if self.queue.peek()?.0.tick > self.now {
            return None;
        }
        self.queue.pop().map(|Reverse(ev)| ev)
    }

    /// Put a popped event back, `next_ticks` domain ticks after its last
    /// firing. `scale` is the domain's current scale, refreshed here so an
    /// in-flight event picks up a clock configuration change.
    pub fn reinsert(&mut self, mut ev: ClockEvent, next_ticks: u64, scale: u64) {
        debug_assert!(scale >= 1);
        ev.scale = scale;
        ev.tick += next_ticks * scale;
        self.queue.push(Reverse(ev));
    }

    /// Re-express every event whose domain scale changed, preserving the
    /// number of domain ticks remaining until it fires.
    ///
    /// Must be called on a tick boundary of the slowest affected domain,
    /// which guarantees the remaining SYS delta divides by the old scale.
    pub fn rescale(&mut self, scale_of: impl Fn(ClockDomain) -> u64) {
        let mut events = std::mem::take(&mut self.queue).into_vec();
        for Reverse(ev) in events.iter_mut() {
            let scale = scale_of(ev.domain);
            if scale == ev.scale {
                continue;
            }
            debug_assert_eq!((ev.tick - self.now) % ev.scale, 0);
            let dt = (ev.tick - self.now).div_ceil(ev.scale);
            ev.tick = self.now + dt * scale;
            ev.scale = scale;
        }
        self.queue = BinaryHeap::from(events);
    }

    /// Tick of the earliest live event.
    pub fn peek_tick(&self) -> Option<u64> {
        self.queue.peek().map(|Reverse(ev)| ev.tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: EventTarget = EventTarget::CpuStep;

    fn drain_order(sched: &mut Scheduler) -> Vec<EventHandle> {
        let mut fired = Vec::new();
        while sched.advance_to_next().is_some() {
            while let Some(ev) = sched.pop_due() {
                fired.push(ev.handle());
            }
        }
        fired
    }

    #[test]
    fn test_events_fire_in_tick_order() {
        let mut sched = Scheduler::new();
        let late = sched.schedule(ClockDomain::Sys, T, 10, 0, 1);
        let early = sched.schedule(ClockDomain::Sys, T, 2, 0, 1);
        assert_eq!(drain_order(&mut sched), vec![early, late]);
    }

    #[test]
    fn test_same_tick_orders_by_priority_then_insertion() {
        let mut sched = Scheduler::new();
        let a = sched.schedule(ClockDomain::Sys, T, 5, 100, 1);
        let b = sched.schedule(ClockDomain::Sys, T, 5, 10, 1);
        let c = sched.schedule(ClockDomain::Sys, T, 5, 10, 1);
        assert_eq!(drain_order(&mut sched), vec![b, c, a]);
    }

    #[test]
    fn test_schedule_aligns_to_domain_scale() {
        let mut sched = Scheduler::new();
        sched.schedule(ClockDomain::Per, T, 4, 0, 8);
        assert_eq!(sched.peek_tick(), Some(32));
    }

    #[test]
    fn test_unschedule_removes_event() {
        let mut sched = Scheduler::new();
        let a = sched.schedule(ClockDomain::Sys, T, 1, 0, 1);
        let b = sched.schedule(ClockDomain::Sys, T, 2, 0, 1);
        assert!(sched.unschedule(a));
        assert_eq!(drain_order(&mut sched), vec![b]);
    }

    #[test]
    fn test_unschedule_unknown_handle_reports_failure() {
        let mut sched = Scheduler::new();
        let a = sched.schedule(ClockDomain::Sys, T, 1, 0, 1);
        assert!(sched.unschedule(a));
        assert!(!sched.unschedule(a));
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut sched = Scheduler::new();
        let a = sched.schedule(ClockDomain::Sys, T, 1, 0, 1);
        sched.clear();
        assert_eq!(sched.now(), 0);
        assert!(!sched.unschedule(a));
    }

    #[test]
    fn test_reinsert_advances_by_domain_ticks() {
        let mut sched = Scheduler::new();
        sched.schedule(ClockDomain::Per, T, 1, 0, 4);
        sched.advance_to_next();
        let ev = sched.pop_due().unwrap();
        assert_eq!(ev.tick, 4);
        sched.reinsert(ev, 3, 4);
        assert_eq!(sched.peek_tick(), Some(16));
    }

    #[test]
    fn test_rescale_preserves_remaining_domain_ticks() {
        let mut sched = Scheduler::new();
        // 4 domain ticks at scale 8: due at SYS tick 32
        sched.schedule(ClockDomain::Per, T, 4, 0, 8);
        // consume two domain ticks
        sched.schedule(ClockDomain::Sys, T, 16, 0, 1);
        sched.advance_to_next();
        while sched.pop_due().is_some() {}
        assert_eq!(sched.now(), 16);
        // halve the PER scale: two remaining ticks now take 8 SYS ticks
        sched.rescale(|_| 4);
        assert_eq!(sched.peek_tick(), Some(24));
    }

    #[test]
    fn test_rescale_skips_unchanged_scales() {
        let mut sched = Scheduler::new();
        sched.schedule(ClockDomain::Per, T, 4, 0, 8);
        sched.rescale(|_| 8);
        assert_eq!(sched.peek_tick(), Some(32));
    }

    #[test]
    fn test_pop_due_respects_current_tick() {
        let mut sched = Scheduler::new();
        sched.schedule(ClockDomain::Sys, T, 3, 0, 1);
        sched.schedule(ClockDomain::Sys, T, 5, 0, 1);
        sched.advance_to_next();
        assert!(sched.pop_due().is_some());
        // the second event is not due yet
        assert!(sched.pop_due().is_none());
        assert_eq!(sched.len(), 1);
    }
}
