//! Soft-Timer Scheduler (C2): multiplexes up to [`MAX_TIMERS`] logical one-shot/periodic
//! timers onto the single compare channel of a [`TickSource`] (C1).
//!
//! The original firmware links timer nodes into a raw singly-linked list so that handlers can
//! insert and remove arbitrary nodes mid-walk. A safe Rust translation of an intrusive list of
//! caller-owned nodes needs unsafe pointer-chasing for little benefit at N <= 16, so this
//! scheduler instead keeps every node in a fixed-size table and hands callers back a small
//! `Copy` [`TimerId`] capability instead of a raw pointer — the substitution the design notes
//! explicitly allow, as long as re-entrant mutation during dispatch stays safe.

use crate::tick::{forward_distance, Tick, TickSource};
use crate::Error;
use heapless::Vec;

/// Maximum number of timers that can be concurrently active (`running = true`). This is the
/// spec's hard limit, not merely a convenience default.
pub const MAX_TIMERS: usize = 16;

/// Minimum horizon, in ticks, the scheduler will ever arm ahead of `now`. Compensates for the
/// compare hardware's inability to reliably fire on `current` or `current + 1`.
pub const H_MIN: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    OneShot,
    Periodic,
}

/// A lightweight, `Copy` handle to a timer node. Returned by [`Scheduler::create`]; pass it to
/// [`Scheduler::start`] and [`Scheduler::stop`], including from inside a firing handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(u8);

/// Fires when a timer is due. Receives the scheduler and its own id, so it can call `start` on
/// another node or `stop` on itself without any extra global state.
pub type Handler<T> = fn(&mut Scheduler<T>, TimerId);

struct Node<T: TickSource> {
    handler: Option<Handler<T>>,
    mode: Mode,
    interval: Tick,
    next_deadline: Tick,
    running: bool,
    due: bool,
}

impl<T: TickSource> Node<T> {
    const fn empty() -> Self {
        Node {
            handler: None,
            mode: Mode::OneShot,
            interval: 0,
            next_deadline: 0,
            running: false,
            due: false,
        }
    }
}

pub struct Scheduler<T: TickSource> {
    tick: T,
    nodes: [Node<T>; MAX_TIMERS],
    /// Ids currently `running`, in the order they were started — the scheduler's stand-in for
    /// the original's linked list.
    active: Vec<u8, MAX_TIMERS>,
    started: bool,
    armed_deadline: Tick,
}

impl<T: TickSource> Scheduler<T> {
    pub fn new(tick: T) -> Self {
        Scheduler {
            tick,
            nodes: core::array::from_fn(|_| Node::empty()),
            active: Vec::new(),
            started: false,
            armed_deadline: 0,
        }
    }

    /// Initializes a timer node. Has no side effect on the active list — call [`Self::start`]
    /// to actually schedule it.
    pub fn create(&mut self, handler: Handler<T>, mode: Mode) -> Result<TimerId, Error> {
        let slot = self.nodes.iter().position(|n| n.handler.is_none()).ok_or_else(|| {
            #[cfg(feature = "log")]
            log::warn!("timer create rejected, all {} slots in use", MAX_TIMERS);
            Error::LimitReached
        })?;
        self.nodes[slot] = Node {
            handler: Some(handler),
            mode,
            interval: 0,
            next_deadline: 0,
            running: false,
            due: false,
        };
        Ok(TimerId(slot as u8))
    }

    /// Starts `id` with the given `interval`. Fails silently (returns `Ok`) if already running;
    /// fails with [`Error::LimitReached`] if 16 timers are already active. If the tick source
    /// has not been started yet, this also calls [`TickSource::start`] on it.
    pub fn start(&mut self, id: TimerId, interval: Tick) -> Result<(), Error> {
        if self.nodes[id.0 as usize].running {
            return Ok(());
        }
        if self.active.len() >= MAX_TIMERS {
            #[cfg(feature = "log")]
            log::warn!("timer start rejected, {} timers already active", MAX_TIMERS);
            return Err(Error::LimitReached);
        }

        let next_deadline = if !self.started {
            self.tick.start();
            self.started = true;
            interval & crate::tick::TICK_MASK
        } else {
            self.tick.now().wrapping_add(interval) & crate::tick::TICK_MASK
        };

        {
            let node = &mut self.nodes[id.0 as usize];
            node.interval = interval;
            node.next_deadline = next_deadline;
            node.running = true;
            node.due = false;
        }
        self.active
            .push(id.0)
            .map_err(|_| Error::LimitReached)?;

        self.rearm();
        Ok(())
    }

    /// Idempotent: detaches the node from the active list and clears `running`.
    pub fn stop(&mut self, id: TimerId) {
        let node = &mut self.nodes[id.0 as usize];
        if !node.running {
            return;
        }
        node.running = false;
        node.due = false;
        if let Some(pos) = self.active.iter().position(|&x| x == id.0) {
            self.active.swap_remove(pos);
        }
        self.rearm();
    }

    /// Current tick count.
    pub fn now(&self) -> Tick {
        self.tick.now()
    }

    /// Whether `id` is currently running.
    pub fn is_running(&self, id: TimerId) -> bool {
        self.nodes[id.0 as usize].running
    }

    /// Number of currently active timers.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Dispatch algorithm, run from the tick source's compare interrupt: marks due timers,
    /// fires their handlers in insertion order, then recomputes and arms the next horizon.
    pub fn on_compare(&mut self) {
        self.tick.clear_compare_event();

        let armed = self.armed_deadline;
        for &idx in self.active.iter() {
            let node = &mut self.nodes[idx as usize];
            if node.next_deadline == armed || forward_distance(armed, node.next_deadline) < H_MIN
            {
                node.due = true;
            }
        }

        // Snapshot which ids are due before invoking anything: handlers are free to start/stop
        // arbitrary nodes (including themselves), which mutates `self.active` mid-walk.
        let mut due: Vec<u8, MAX_TIMERS> = Vec::new();
        for &idx in self.active.iter() {
            if self.nodes[idx as usize].due {
                let _ = due.push(idx);
            }
        }

        for idx in due {
            let id = TimerId(idx);
            // A handler earlier in this same batch may already have stopped this node.
            if !self.nodes[idx as usize].due {
                continue;
            }
            self.nodes[idx as usize].due = false;
            let handler = match self.nodes[idx as usize].handler {
                Some(h) => h,
                None => continue,
            };
            handler(self, id);

            if !self.nodes[idx as usize].running {
                // Handler called `stop` on itself (or something else stopped it); nothing more
                // to do for this node.
                continue;
            }
            match self.nodes[idx as usize].mode {
                Mode::OneShot => self.stop(id),
                Mode::Periodic => {
                    let interval = self.nodes[idx as usize].interval;
                    let next = self.tick.now().wrapping_add(interval) & crate::tick::TICK_MASK;
                    self.nodes[idx as usize].next_deadline = next;
                }
            }
        }

        self.rearm();
    }

    /// Recomputes the minimum deadline across active timers and arms it. Every stored
    /// `next_deadline` is already a masked 24-bit counter value (see `start` and the periodic
    /// reschedule in `on_compare`), so a wrapped deadline can have a *smaller* raw value than one
    /// that hasn't wrapped yet; comparing by [`forward_distance`] from `now` rather than by raw
    /// value is what actually makes the horizon pick correct across a counter wrap.
    fn rearm(&mut self) {
        let mut horizon: Option<Tick> = None;
        for &idx in self.active.iter() {
            let deadline = self.nodes[idx as usize].next_deadline;
            horizon = Some(match horizon {
                None => deadline,
                Some(h) => {
                    if forward_distance(self.tick.now(), deadline)
                        < forward_distance(self.tick.now(), h)
                    {
                        deadline
                    } else {
                        h
                    }
                }
            });
        }

        let horizon = match horizon {
            Some(h) => h,
            None => return,
        };

        self.armed_deadline = horizon;
        self.tick.arm(self.armed_deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// A host-side fake implementing [`TickSource`] without touching any hardware register,
    /// so the scheduler's dispatch logic can be exercised under plain `cargo test`.
    struct FakeTick {
        now: Cell<u32>,
        armed: Cell<u32>,
        started: Cell<bool>,
    }

    impl FakeTick {
        fn new() -> Self {
            FakeTick {
                now: Cell::new(0),
                armed: Cell::new(0),
                started: Cell::new(false),
            }
        }

        fn advance_to(&self, t: u32) {
            self.now.set(t & crate::tick::TICK_MASK);
        }
    }

    impl TickSource for FakeTick {
        fn start(&mut self) {
            self.started.set(true);
        }
        fn now(&self) -> Tick {
            self.now.get()
        }
        fn arm(&mut self, deadline: Tick) {
            self.armed.set(deadline);
        }
        fn clear_compare_event(&mut self) {}
    }

    fn noop(_s: &mut Scheduler<FakeTick>, _id: TimerId) {}

    #[test]
    fn start_sets_next_deadline_from_now() {
        let mut sched = Scheduler::new(FakeTick::new());
        let id = sched.create(noop, Mode::OneShot).unwrap();
        sched.start(id, 100).unwrap();
        assert!(sched.is_running(id));
        assert_eq!(sched.active_count(), 1);
    }

    #[test]
    fn starting_twice_is_silent_noop() {
        let mut sched = Scheduler::new(FakeTick::new());
        let id = sched.create(noop, Mode::Periodic).unwrap();
        sched.start(id, 100).unwrap();
        sched.start(id, 500).unwrap();
        assert_eq!(sched.active_count(), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut sched = Scheduler::new(FakeTick::new());
        let id = sched.create(noop, Mode::OneShot).unwrap();
        sched.start(id, 100).unwrap();
        sched.stop(id);
        sched.stop(id);
        assert!(!sched.is_running(id));
        assert_eq!(sched.active_count(), 0);
    }

    #[test]
    fn seventeenth_active_timer_is_rejected() {
        let mut sched = Scheduler::new(FakeTick::new());
        let mut ids = heapless::Vec::<TimerId, MAX_TIMERS>::new();
        for _ in 0..MAX_TIMERS {
            let id = sched.create(noop, Mode::OneShot).unwrap();
            sched.start(id, 1000).unwrap();
            let _ = ids.push(id);
        }
        let extra = sched.create(noop, Mode::OneShot).unwrap();
        assert_eq!(sched.start(extra, 1000), Err(Error::LimitReached));
    }

    #[test]
    fn oneshot_fires_once_and_detaches() {
        static CALLS: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);
        fn handler(_s: &mut Scheduler<FakeTick>, _id: TimerId) {
            CALLS.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
        }
        let mut sched = Scheduler::new(FakeTick::new());
        let id = sched.create(handler, Mode::OneShot).unwrap();
        sched.start(id, 100).unwrap();
        sched.tick.advance_to(100);
        sched.on_compare();
        assert_eq!(CALLS.load(core::sync::atomic::Ordering::SeqCst), 1);
        assert!(!sched.is_running(id));
        assert_eq!(sched.active_count(), 0);
    }

    #[test]
    fn periodic_reschedules_after_firing() {
        let mut sched = Scheduler::new(FakeTick::new());
        let id = sched.create(noop, Mode::Periodic).unwrap();
        sched.start(id, 100).unwrap();
        sched.tick.advance_to(100);
        sched.on_compare();
        assert!(sched.is_running(id));
        assert_eq!(sched.active_count(), 1);
    }

    #[test]
    fn handler_can_stop_itself_and_fires_exactly_once() {
        static CALLS: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);
        fn handler(s: &mut Scheduler<FakeTick>, id: TimerId) {
            CALLS.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
            s.stop(id);
        }
        let mut sched = Scheduler::new(FakeTick::new());
        let id = sched.create(handler, Mode::Periodic).unwrap();
        sched.start(id, 100).unwrap();
        sched.tick.advance_to(100);
        sched.on_compare();
        assert_eq!(CALLS.load(core::sync::atomic::Ordering::SeqCst), 1);
        assert!(!sched.is_running(id));
    }

    #[test]
    fn handler_can_start_another_timer_reentrantly() {
        static OTHER_FIRED: core::sync::atomic::AtomicBool =
            core::sync::atomic::AtomicBool::new(false);
        fn other_handler(_s: &mut Scheduler<FakeTick>, _id: TimerId) {
            OTHER_FIRED.store(true, core::sync::atomic::Ordering::SeqCst);
        }

        // We need `other`'s id available to the first handler; stash it in a thread-local-ish
        // static cell for this test only.
        static OTHER_ID: core::sync::atomic::AtomicU8 = core::sync::atomic::AtomicU8::new(0);
        fn starter_handler(s: &mut Scheduler<FakeTick>, _id: TimerId) {
            let other = TimerId(OTHER_ID.load(core::sync::atomic::Ordering::SeqCst));
            s.start(other, 1).unwrap();
        }

        let mut sched = Scheduler::new(FakeTick::new());
        let other = sched.create(other_handler, Mode::OneShot).unwrap();
        OTHER_ID.store(other.0, core::sync::atomic::Ordering::SeqCst);
        let starter = sched.create(starter_handler, Mode::OneShot).unwrap();
        sched.start(starter, 100).unwrap();

        sched.tick.advance_to(100);
        sched.on_compare();
        assert!(sched.is_running(other));

        sched.tick.advance_to(101);
        sched.on_compare();
        assert!(OTHER_FIRED.load(core::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn rearm_picks_the_true_horizon_across_a_counter_wrap() {
        let mut sched = Scheduler::new(FakeTick::new());
        sched.tick.advance_to(crate::tick::TICK_MASK - 20);
        let soon = sched.create(noop, Mode::OneShot).unwrap();
        let later = sched.create(noop, Mode::OneShot).unwrap();
        // `soon` is 10 ticks out and doesn't wrap; `later` is 26 ticks out and wraps past the
        // modulus, landing on a *smaller* raw deadline (5) than `soon`'s (TICK_MASK - 10). A
        // raw-value comparison would pick `later` as the horizon; the true, modular-distance
        // horizon is `soon`.
        sched.start(soon, 10).unwrap();
        sched.start(later, 26).unwrap();
        assert_eq!(sched.armed_deadline, crate::tick::TICK_MASK - 10);
    }

    #[test]
    fn periodic_timer_fires_exactly_once_per_period_across_a_counter_wrap() {
        static CALLS: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);
        fn handler(_s: &mut Scheduler<FakeTick>, _id: TimerId) {
            CALLS.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
        }
        CALLS.store(0, core::sync::atomic::Ordering::SeqCst);

        let mut sched = Scheduler::new(FakeTick::new());
        sched.tick.advance_to(crate::tick::TICK_MASK - 50);
        let id = sched.create(handler, Mode::Periodic).unwrap();
        sched.start(id, 100).unwrap();
        // First deadline wraps past the modulus: (TICK_MASK - 50 + 100) mod 2^24 == 49.
        assert_eq!(sched.nodes[id.0 as usize].next_deadline, 49);

        for (n, deadline) in [49u32, 149, 249].into_iter().enumerate() {
            sched.tick.advance_to(deadline);
            sched.on_compare();
            assert_eq!(CALLS.load(core::sync::atomic::Ordering::SeqCst), n as u32 + 1);
        }
        assert!(sched.is_running(id));
    }
}
