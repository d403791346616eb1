//! Hierarchical timing wheel with O(1) amortised insert and tick.
//!
//! Four cascading wheels cover ~18.6 hours:
//!
//! | wheel | slots | resolution | span     |
//! |-------|-------|------------|----------|
//! | 0     | 256   | 1 ms       | 256 ms   |
//! | 1     | 64    | 256 ms     | ~16.4 s  |
//! | 2     | 64    | ~16.4 s    | ~17.5 min|
//! | 3     | 64    | ~17.5 min  | ~18.6 h  |
//!
//! Timers beyond the horizon wait in a sorted overflow map and are promoted
//! as their expiry approaches. Cancellations are tracked in a sorted id set
//! and consumed lazily when the cancelled timer is next encountered.
//!
//! Timer processing is not automatic: call [`TimerWheel::process`]
//! periodically from an event loop, or [`TimerWheel::advance_time`] in
//! tests for deterministic virtual-time playback.
//!
//! The wheel is single-threaded; wrap it in a mutex for shared use.

use crate::kernel::intset::IntSetU32;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

/// Timer identifier. Ids start at 1, increase monotonically, and are never
/// reused within a process lifetime.
pub type TimerId = u64;

/// Timer callback. Fired when the timer expires; the return value requests
/// rescheduling for repeating timers (`repeat_us > 0`) and is ignored for
/// one-shot timers. Callbacks may register and unregister timers freely;
/// registrations made inside a callback take effect through the pending
/// sequence.
pub type TimerCallback = dyn FnMut(&mut TimerWheel, TimerId) -> bool;

const NUM_WHEELS: usize = 4;
const WHEEL_SLOTS: [usize; NUM_WHEELS] = [256, 64, 64, 64];

/// Wheel 0 slot width: 1 ms.
const WHEEL0_RESOLUTION_US: u64 = 1_000;

const WHEEL_RESOLUTION_US: [u64; NUM_WHEELS] = [1_000, 256_000, 16_384_000, 1_048_576_000];
const WHEEL_SPAN_US: [u64; NUM_WHEELS] = [256_000, 16_384_000, 1_048_576_000, 67_108_864_000];

/// Total wheel coverage (~18.6 hours); timers past this go to overflow.
const MAX_WHEEL_COVERAGE_US: u64 = WHEEL_SPAN_US[3];

/// Which wheel a delay lands in, or `None` for overflow.
#[inline]
fn wheel_level(delay_us: u64) -> Option<usize> {
    WHEEL_SPAN_US.iter().position(|&span| delay_us < span)
}

#[derive(Clone)]
struct TimerRecord {
    expire_us: u64,
    cb: Rc<RefCell<TimerCallback>>,
    id: TimerId,
    repeat_us: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Context {
    User,
    Timer,
}

/// Scoped acquisition of the in-callback flag: restores user context on
/// every exit path, including unwinding out of a panicking callback.
struct ContextScope {
    flag: Rc<Cell<Context>>,
}

impl ContextScope {
    fn enter(flag: Rc<Cell<Context>>) -> Self {
        flag.set(Context::Timer);
        Self { flag }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        self.flag.set(Context::User);
    }
}

/// Counters and sizes for monitoring a wheel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerWheelStats {
    /// Timers registered since creation or the last reset.
    pub total_registrations: u64,
    /// Timers cancelled via `unregister`.
    pub total_cancellations: u64,
    /// Timer callbacks executed.
    pub total_expirations: u64,
    /// Slot migrations between wheel levels.
    pub total_cascades: u64,
    /// Timers currently waiting in overflow.
    pub overflow_count: u64,
    /// Approximate memory footprint in bytes.
    pub memory_bytes: usize,
}

/// A four-level cascading timer dispatcher.
pub struct TimerWheel {
    /// Wheel-internal time; zero at creation, advanced in 1 ms steps.
    current_time_us: u64,
    /// Real monotonic anchor.
    start: Instant,
    /// Virtual microseconds added by [`TimerWheel::advance_time`].
    virtual_us: u64,

    slot_index: [usize; NUM_WHEELS],
    wheels: [Vec<Vec<TimerRecord>>; NUM_WHEELS],

    /// Timers beyond the wheel horizon, sorted by (expiry, id).
    overflow: BTreeMap<(u64, TimerId), TimerRecord>,

    cancelled: IntSetU32,
    cancel_lowest: TimerId,
    cancel_highest: TimerId,

    /// Timers registered from callbacks, with zero or sub-resolution delay,
    /// or otherwise deferred to the next drain.
    pending: Vec<TimerRecord>,

    next_id: TimerId,
    context: Rc<Cell<Context>>,

    stats: TimerWheelStats,
    timer_count: u64,

    cached_next_expiry: u64,
    next_expiry_cache_valid: bool,
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerWheel {
    /// Creates a wheel anchored at the current monotonic time.
    pub fn new() -> Self {
        Self {
            current_time_us: 0,
            start: Instant::now(),
            virtual_us: 0,
            slot_index: [0; NUM_WHEELS],
            wheels: [
                vec![Vec::new(); WHEEL_SLOTS[0]],
                vec![Vec::new(); WHEEL_SLOTS[1]],
                vec![Vec::new(); WHEEL_SLOTS[2]],
                vec![Vec::new(); WHEEL_SLOTS[3]],
            ],
            overflow: BTreeMap::new(),
            cancelled: IntSetU32::new(),
            cancel_lowest: 0,
            cancel_highest: 0,
            pending: Vec::new(),
            next_id: 0,
            context: Rc::new(Cell::new(Context::User)),
            stats: TimerWheelStats::default(),
            timer_count: 0,
            cached_next_expiry: 0,
            next_expiry_cache_valid: false,
        }
    }

    #[inline]
    fn adjusted_now(&self) -> u64 {
        (Instant::now() - self.start).as_micros() as u64 + self.virtual_us
    }

    #[inline]
    fn slot_for(&self, level: usize, expire_us: u64) -> usize {
        let diff = expire_us.saturating_sub(self.current_time_us);
        (self.slot_index[level] + (diff / WHEEL_RESOLUTION_US[level]) as usize)
            & (WHEEL_SLOTS[level] - 1)
    }

    /// Places a timer into its wheel slot, or overflow when the delay
    /// exceeds the horizon.
    fn place(&mut self, record: TimerRecord, delay_us: u64) {
        match wheel_level(delay_us) {
            Some(level) => {
                let idx = self.slot_for(level, record.expire_us);
                self.wheels[level][idx].push(record);
            }
            None => {
                self.overflow.insert((record.expire_us, record.id), record);
            }
        }
    }

    /// Registers a timer firing after `delay_us` microseconds, repeating
    /// every `repeat_us` microseconds when `repeat_us > 0` and the callback
    /// returns `true`. Returns the timer id (never 0).
    ///
    /// Zero-delay and sub-millisecond timers, and any timer registered from
    /// within a callback, go through the pending sequence and fire on the
    /// next [`TimerWheel::process`].
    pub fn register<F>(&mut self, delay_us: u64, repeat_us: u64, cb: F) -> TimerId
    where
        F: FnMut(&mut TimerWheel, TimerId) -> bool + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        let now = self.adjusted_now();

        let record = TimerRecord {
            expire_us: now + delay_us,
            cb: Rc::new(RefCell::new(cb)),
            id,
            repeat_us,
        };

        self.stats.total_registrations += 1;
        self.timer_count += 1;
        self.next_expiry_cache_valid = false;

        if self.context.get() == Context::Timer || delay_us < WHEEL0_RESOLUTION_US {
            self.pending.push(record);
            return id;
        }

        self.place(record, delay_us);
        id
    }

    /// Cancels a timer. Returns false only for an invalid id (zero or
    /// beyond the last assigned). The timer will not fire after this call;
    /// its record is dropped lazily the next time processing encounters it.
    pub fn unregister(&mut self, id: TimerId) -> bool {
        if id == 0 || id > self.next_id {
            return false;
        }

        if self.cancelled.add(id as u32) {
            self.stats.total_cancellations += 1;

            if self.cancelled.count() == 1 {
                self.cancel_lowest = id;
                self.cancel_highest = id;
            } else {
                if id < self.cancel_lowest {
                    self.cancel_lowest = id;
                }
                if id > self.cancel_highest {
                    self.cancel_highest = id;
                }
            }
        }

        true
    }

    /// Cancels every registered timer.
    pub fn stop_all(&mut self) {
        for id in 1..=self.next_id {
            self.unregister(id);
        }
    }

    /// Scheduled timers, excluding cancelled ones.
    pub fn count(&self) -> u64 {
        self.timer_count.saturating_sub(self.cancelled.count() as u64)
    }

    /// If `id` sits in the cancellation set, consumes the entry and drops
    /// the timer. Bounds are cached so the common no-cancellation path is a
    /// pair of compares.
    fn consume_cancellation(&mut self, id: TimerId) -> bool {
        if self.cancelled.is_empty() {
            return false;
        }
        if id < self.cancel_lowest || id > self.cancel_highest {
            return false;
        }
        if !self.cancelled.remove(id as u32) {
            return false;
        }

        let count = self.cancelled.count();
        if count > 0 {
            self.cancel_lowest = u64::from(self.cancelled.get(0).expect("non-empty"));
            self.cancel_highest = u64::from(self.cancelled.get(count - 1).expect("non-empty"));
        } else {
            self.cancel_lowest = 0;
            self.cancel_highest = 0;
        }

        self.timer_count -= 1;
        true
    }

    /// Runs one callback under the timer context flag.
    fn fire(&mut self, record: &TimerRecord) -> bool {
        let _scope = ContextScope::enter(Rc::clone(&self.context));
        let cb = Rc::clone(&record.cb);
        let mut cb = cb.borrow_mut();
        (&mut *cb)(self, record.id)
    }

    /// Fires or re-places every timer in one wheel-0 slot.
    fn process_slot(&mut self, slot: usize, now: u64) {
        let records = std::mem::take(&mut self.wheels[0][slot]);

        for record in records {
            if record.expire_us <= now {
                if self.consume_cancellation(record.id) {
                    continue;
                }

                let reschedule = self.fire(&record);
                self.stats.total_expirations += 1;
                self.timer_count -= 1;

                if reschedule && record.repeat_us > 0 {
                    // Reschedule relative to the wheel position after this
                    // slot, not the tick target, so long-delayed ticks still
                    // fire once per interval.
                    let slot_end = self.current_time_us + WHEEL0_RESOLUTION_US;
                    let next = TimerRecord {
                        expire_us: slot_end + record.repeat_us,
                        ..record
                    };
                    self.timer_count += 1;

                    if next.repeat_us < WHEEL0_RESOLUTION_US {
                        self.pending.push(next);
                    } else {
                        let repeat = next.repeat_us;
                        self.place(next, repeat);
                    }
                }
            } else {
                // Not due yet: re-place by remaining delay.
                let delay = record.expire_us - now;
                if delay < WHEEL0_RESOLUTION_US {
                    self.pending.push(record);
                } else {
                    match wheel_level(delay) {
                        Some(level) => {
                            let idx = self.slot_for(level, record.expire_us);
                            if level == 0 && idx == slot {
                                // Would land back in the slot being drained;
                                // defer to the pending drain instead.
                                self.pending.push(record);
                            } else {
                                self.wheels[level][idx].push(record);
                            }
                        }
                        None => {
                            self.overflow.insert((record.expire_us, record.id), record);
                        }
                    }
                }
            }
        }
    }

    /// Moves the current slot of a coarser wheel down to finer wheels,
    /// recomputing each timer's level from its remaining delay.
    fn cascade(&mut self, level: usize) {
        let slot = self.slot_index[level];
        let records = std::mem::take(&mut self.wheels[level][slot]);
        if records.is_empty() {
            return;
        }

        self.stats.total_cascades += 1;
        let current = self.current_time_us;

        for record in records {
            if self.consume_cancellation(record.id) {
                continue;
            }

            let delay = record.expire_us.saturating_sub(current);
            if delay < WHEEL0_RESOLUTION_US {
                self.pending.push(record);
                continue;
            }

            match wheel_level(delay) {
                Some(new_level) if new_level < level => {
                    let idx = self.slot_for(new_level, record.expire_us);
                    self.wheels[new_level][idx].push(record);
                }
                None => {
                    self.overflow.insert((record.expire_us, record.id), record);
                }
                Some(_) => {
                    // Level did not drop; let the pending drain re-place it.
                    self.pending.push(record);
                }
            }
        }
    }

    /// Promotes overflow timers whose expiry fits inside the wheel horizon.
    fn promote_overflow(&mut self, now: u64) {
        loop {
            let Some((&(expire, id), _)) = self.overflow.iter().next() else {
                break;
            };
            if expire > now + MAX_WHEEL_COVERAGE_US {
                break;
            }

            let record = self.overflow.remove(&(expire, id)).expect("front entry");
            if self.consume_cancellation(id) {
                continue;
            }

            let delay = expire.saturating_sub(now);
            if delay < WHEEL0_RESOLUTION_US {
                self.pending.push(record);
            } else {
                self.place(record, delay);
            }
        }
    }

    /// Drains the pending sequence, firing due timers and placing the rest.
    ///
    /// The sequence is swapped out first, so registrations made by the
    /// callbacks fired here land in a fresh pending list and wait for the
    /// next tick.
    fn process_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending);
        let now = self.adjusted_now();

        for record in pending {
            if record.expire_us <= now {
                if self.consume_cancellation(record.id) {
                    continue;
                }

                let reschedule = self.fire(&record);
                self.stats.total_expirations += 1;
                self.timer_count -= 1;

                if reschedule && record.repeat_us > 0 {
                    // The wheel already advanced to `now`, so pending
                    // reschedules are now-relative.
                    let next = TimerRecord {
                        expire_us: now + record.repeat_us,
                        ..record
                    };
                    self.timer_count += 1;

                    if next.repeat_us < WHEEL0_RESOLUTION_US {
                        self.pending.push(next);
                    } else {
                        let repeat = next.repeat_us;
                        self.place(next, repeat);
                    }
                }
            } else {
                let delay = record.expire_us - now;
                if delay < WHEEL0_RESOLUTION_US {
                    self.pending.push(record);
                } else {
                    self.place(record, delay);
                }
            }
        }
    }

    /// Processes all expired timers. Must be called periodically.
    ///
    /// Promotes due overflow timers, advances wheel 0 slot by slot to the
    /// current time (cascading coarser wheels on wrap), then drains the
    /// pending sequence. Timers that expired while this was not being
    /// called fire on the next call; none are lost.
    pub fn process(&mut self) {
        let now = self.adjusted_now();
        self.next_expiry_cache_valid = false;

        self.promote_overflow(now);

        while self.current_time_us < now {
            let slot0 = self.slot_index[0];
            self.process_slot(slot0, now);

            let next0 = (slot0 + 1) & (WHEEL_SLOTS[0] - 1);
            self.slot_index[0] = next0;
            self.current_time_us += WHEEL0_RESOLUTION_US;

            if next0 == 0 {
                // Wheel 0 wrapped: each coarser wheel that advances has
                // entered a new slot whose expiry window starts now.
                // Cascade coarsest-first so timers ripple down through the
                // finer slots they now belong in.
                self.slot_index[1] = (self.slot_index[1] + 1) & (WHEEL_SLOTS[1] - 1);
                if self.slot_index[1] == 0 {
                    self.slot_index[2] = (self.slot_index[2] + 1) & (WHEEL_SLOTS[2] - 1);
                    if self.slot_index[2] == 0 {
                        self.slot_index[3] =
                            (self.slot_index[3] + 1) & (WHEEL_SLOTS[3] - 1);
                        self.cascade(3);
                    }
                    self.cascade(2);
                }
                self.cascade(1);
            }
        }

        self.process_pending();
    }

    /// Advances virtual time by `microseconds` and processes: deterministic
    /// playback for tests and simulations.
    pub fn advance_time(&mut self, microseconds: u64) {
        self.virtual_us += microseconds;
        self.process();
    }

    /// Wheel-internal absolute time (microseconds since creation, including
    /// virtual advances) of the next timer event, or `None` when nothing is
    /// scheduled. Cached until the next registration or tick.
    pub fn next_event_at(&mut self) -> Option<u64> {
        if self.next_expiry_cache_valid {
            return Some(self.cached_next_expiry);
        }

        let mut earliest = u64::MAX;

        // Pending head fires first regardless of wheel state.
        if let Some(r) = self.pending.first() {
            earliest = r.expire_us;
        }

        // Nearest occupied wheel-0 slot, scanning forward from the cursor.
        for i in 0..WHEEL_SLOTS[0] {
            let idx = (self.slot_index[0] + i) & (WHEEL_SLOTS[0] - 1);
            if let Some(r) = self.wheels[0][idx].first() {
                earliest = earliest.min(r.expire_us);
                break;
            }
        }

        if earliest == u64::MAX {
            'levels: for level in 1..NUM_WHEELS {
                for i in 0..WHEEL_SLOTS[level] {
                    let idx = (self.slot_index[level] + i) & (WHEEL_SLOTS[level] - 1);
                    if let Some(r) = self.wheels[level][idx].first() {
                        earliest = earliest.min(r.expire_us);
                        break 'levels;
                    }
                }
            }
        }

        if let Some((&(expire, _), _)) = self.overflow.iter().next() {
            earliest = earliest.min(expire);
        }

        if earliest == u64::MAX {
            return None;
        }

        self.cached_next_expiry = earliest;
        self.next_expiry_cache_valid = true;
        Some(earliest)
    }

    /// Microseconds until the next timer event: negative when overdue,
    /// `None` when nothing is scheduled. Useful as an event-loop sleep
    /// bound.
    pub fn next_event_offset_us(&mut self) -> Option<i64> {
        let next = self.next_event_at()?;
        Some(next as i64 - self.adjusted_now() as i64)
    }

    /// A statistics snapshot including current overflow and memory sizes.
    pub fn stats(&self) -> TimerWheelStats {
        let mut stats = self.stats;
        stats.overflow_count = self.overflow.len() as u64;

        let record = std::mem::size_of::<TimerRecord>();
        let mut bytes = std::mem::size_of::<TimerWheel>();
        for wheel in &self.wheels {
            for slot in wheel {
                bytes += slot.capacity() * record;
            }
        }
        bytes += self.overflow.len() * (record + std::mem::size_of::<(u64, TimerId)>());
        bytes += self.cancelled.bytes();
        bytes += self.pending.capacity() * record;
        stats.memory_bytes = bytes;

        stats
    }

    /// Zeroes the registration/cancellation/expiration/cascade counters.
    /// Current-state gauges (overflow, memory) are unaffected.
    pub fn reset_stats(&mut self) {
        self.stats.total_registrations = 0;
        self.stats.total_cancellations = 0;
        self.stats.total_expirations = 0;
        self.stats.total_cascades = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl FnMut(&mut TimerWheel, TimerId) -> bool) {
        let fired = Rc::new(Cell::new(0u32));
        let fired2 = Rc::clone(&fired);
        (fired, move |_: &mut TimerWheel, _| {
            fired2.set(fired2.get() + 1);
            false
        })
    }

    #[test]
    fn test_ids_monotonic_never_reused() {
        let mut tw = TimerWheel::new();
        let mut last = 0;
        for _ in 0..100 {
            let id = tw.register(5_000, 0, |_, _| false);
            assert!(id > last);
            last = id;
        }
        tw.advance_time(10_000);
        let id = tw.register(5_000, 0, |_, _| false);
        assert!(id > last, "ids keep increasing after fires");
    }

    #[test]
    fn test_fire_after_delay() {
        let mut tw = TimerWheel::new();
        let (fired, cb) = counter();
        tw.register(5_000, 0, cb);

        tw.advance_time(3_000);
        assert_eq!(fired.get(), 0, "not due yet");

        tw.advance_time(3_000);
        assert_eq!(fired.get(), 1, "fired exactly once");

        tw.advance_time(10_000);
        assert_eq!(fired.get(), 1, "one-shot does not refire");
    }

    #[test]
    fn test_zero_delay_fires_on_next_process() {
        let mut tw = TimerWheel::new();
        let (fired, cb) = counter();
        tw.register(0, 0, cb);
        assert_eq!(fired.get(), 0);

        tw.process();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_sub_millisecond_delay_goes_pending() {
        let mut tw = TimerWheel::new();
        let (fired, cb) = counter();
        tw.register(500, 0, cb);

        tw.advance_time(1_000);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_wheel1_cascade() {
        let mut tw = TimerWheel::new();
        let (fired, cb) = counter();
        tw.register(1_500_000, 0, cb);

        tw.advance_time(1_000_000);
        assert_eq!(fired.get(), 0, "wheel 1 timer not yet due");

        tw.advance_time(500_000);
        assert_eq!(fired.get(), 1, "fires after cascade to wheel 0");
        assert!(tw.stats().total_cascades > 0);
    }

    #[test]
    fn test_overflow_promotion() {
        let mut tw = TimerWheel::new();
        let (fired, cb) = counter();
        // Past the ~18.6 h horizon.
        tw.register(MAX_WHEEL_COVERAGE_US + 60_000_000, 0, cb);
        assert_eq!(tw.stats().overflow_count, 1);

        tw.advance_time(60_000_000);
        assert_eq!(fired.get(), 0);
        assert_eq!(tw.stats().overflow_count, 0, "promoted into the wheel");
        assert_eq!(tw.count(), 1, "still scheduled after promotion");

        let offset = tw.next_event_offset_us().expect("scheduled");
        assert!(offset > 0 && offset <= MAX_WHEEL_COVERAGE_US as i64);
    }

    #[test]
    fn test_unregister_prevents_fire() {
        let mut tw = TimerWheel::new();
        let (fired, cb) = counter();
        let id = tw.register(5_000, 0, cb);

        assert!(tw.unregister(id));
        assert_eq!(tw.count(), 0);

        tw.advance_time(10_000);
        assert_eq!(fired.get(), 0);

        assert!(!tw.unregister(0));
        assert!(!tw.unregister(9999));
    }

    #[test]
    fn test_count_conservation() {
        let mut tw = TimerWheel::new();
        let (_fired, cb) = counter();
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(tw.register(5_000, 0, |_, _| false));
        }
        tw.register(5_000, 0, cb);

        assert_eq!(tw.count(), 11);

        tw.unregister(ids[0]);
        tw.unregister(ids[1]);
        assert_eq!(tw.count(), 9);

        tw.advance_time(10_000);
        assert_eq!(tw.count(), 0, "all fired or cancelled");
    }

    #[test]
    fn test_repeating_timer() {
        let mut tw = TimerWheel::new();
        let fired = Rc::new(Cell::new(0u32));
        let fired2 = Rc::clone(&fired);
        tw.register(2_000, 2_000, move |_, _| {
            fired2.set(fired2.get() + 1);
            true
        });

        for _ in 0..5 {
            tw.advance_time(2_500);
        }
        assert!(fired.get() >= 4, "repeating timer keeps firing: {}", fired.get());
        assert_eq!(tw.count(), 1, "still scheduled");
    }

    #[test]
    fn test_repeating_timer_stops_on_false() {
        let mut tw = TimerWheel::new();
        let fired = Rc::new(Cell::new(0u32));
        let fired2 = Rc::clone(&fired);
        tw.register(1_000, 1_000, move |_, _| {
            fired2.set(fired2.get() + 1);
            fired2.get() < 3
        });

        for _ in 0..10 {
            tw.advance_time(1_500);
        }
        assert_eq!(fired.get(), 3, "stops after returning false");
        assert_eq!(tw.count(), 0);
    }

    #[test]
    fn test_register_from_callback() {
        let mut tw = TimerWheel::new();
        let inner_fired = Rc::new(Cell::new(0u32));
        let inner2 = Rc::clone(&inner_fired);

        tw.register(1_000, 0, move |tw, _| {
            let inner3 = Rc::clone(&inner2);
            tw.register(1_000, 0, move |_, _| {
                inner3.set(inner3.get() + 1);
                false
            });
            false
        });

        tw.advance_time(1_500);
        assert_eq!(inner_fired.get(), 0, "inner timer registered, not yet due");
        assert_eq!(tw.count(), 1);

        tw.advance_time(1_500);
        assert_eq!(inner_fired.get(), 1);
    }

    #[test]
    fn test_unregister_self_from_callback() {
        let mut tw = TimerWheel::new();
        let fired = Rc::new(Cell::new(0u32));
        let fired2 = Rc::clone(&fired);
        tw.register(1_000, 1_000, move |tw, id| {
            fired2.set(fired2.get() + 1);
            tw.unregister(id);
            true
        });

        for _ in 0..5 {
            tw.advance_time(1_500);
        }
        // Rescheduled once, then the cancellation catches it.
        assert!(fired.get() <= 2, "self-cancel stops the repeat: {}", fired.get());
    }

    #[test]
    fn test_context_flag_restored_on_panic() {
        let mut tw = TimerWheel::new();
        tw.register(1_000, 0, |_, _| panic!("callback failure"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tw.advance_time(2_000);
        }));
        assert!(result.is_err());

        // A subsequent registration must take the normal wheel path.
        let (fired, cb) = counter();
        tw.register(2_000, 0, cb);
        tw.advance_time(3_000);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_next_event_query() {
        let mut tw = TimerWheel::new();
        assert_eq!(tw.next_event_at(), None);

        tw.register(5_000, 0, |_, _| false);
        let at = tw.next_event_at().expect("scheduled");
        let offset = tw.next_event_offset_us().expect("scheduled");
        assert!(offset <= 5_000);
        assert!(offset > 0);

        // Cached until invalidated by a registration.
        assert_eq!(tw.next_event_at(), Some(at));

        tw.register(2_000, 0, |_, _| false);
        let sooner = tw.next_event_at().expect("scheduled");
        assert!(sooner < at);
    }

    #[test]
    fn test_stop_all() {
        let mut tw = TimerWheel::new();
        let (fired, cb) = counter();
        tw.register(1_000, 0, cb);
        for _ in 0..5 {
            tw.register(2_000, 0, |_, _| false);
        }

        tw.stop_all();
        assert_eq!(tw.count(), 0);

        tw.advance_time(5_000);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_stats_counters() {
        let mut tw = TimerWheel::new();
        let id = tw.register(1_000, 0, |_, _| false);
        tw.register(2_000, 0, |_, _| false);
        tw.unregister(id);
        tw.advance_time(5_000);

        let stats = tw.stats();
        assert_eq!(stats.total_registrations, 2);
        assert_eq!(stats.total_cancellations, 1);
        assert_eq!(stats.total_expirations, 1);
        assert!(stats.memory_bytes > 0);

        tw.reset_stats();
        let stats = tw.stats();
        assert_eq!(stats.total_registrations, 0);
        assert_eq!(stats.total_expirations, 0);
    }
}
