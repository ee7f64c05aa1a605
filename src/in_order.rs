//! Delay-windowed reordering of a competitor's fixes
//!
//! Fixes arrive from several ground receivers, so they are neither ordered
//! nor unique. The buffer keeps every fix sorted by timestamp and only
//! releases the oldest unread one once it is `delay` seconds old, giving
//! stragglers from slower receivers time to slot in ahead of it. The read
//! cursor can be rewound so the task state machine can reprocess a stretch
//! of track after a turn has been confirmed in hindsight.

use tracing::{debug, trace};

use crate::fix::{Epoch, PositionFix};

/// Default hold time before a fix is released
pub const DEFAULT_IN_ORDER_DELAY_SECS: i64 = 10;

/// Outcome of asking a pipeline stage for its next output
#[derive(Debug, Clone, PartialEq)]
pub enum Pull<T> {
    Ready(T),
    /// Nothing eligible yet, ask again later
    Pending,
    /// Nothing will ever be produced again
    Closed,
}

/// A fix released by the buffer
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedFix {
    pub fix: PositionFix,
    /// First fix released after the buffer ran dry (catch-up boundary or
    /// data gap); downstream always forwards these
    pub live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Close once the buffer is exhausted
    Replay,
    /// Idle when exhausted and wait for more inserts
    Live,
}

#[derive(Debug, Clone)]
pub struct InOrderBuffer {
    buffer: Vec<PositionFix>,
    cursor: usize,
    delay: i64,
    mode: Mode,
    last_emitted: Option<Epoch>,
    idle: bool,
}

impl InOrderBuffer {
    pub fn new(delay_secs: i64, mode: Mode) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            delay: delay_secs,
            mode,
            last_emitted: None,
            idle: true,
        }
    }

    /// Seed with historical fixes (any order, duplicates dropped)
    pub fn with_history(delay_secs: i64, mode: Mode, history: Vec<PositionFix>) -> Self {
        let mut buffer = Self::new(delay_secs, mode);
        buffer.buffer.reserve(history.len());
        for fix in history {
            buffer.insert(fix);
        }
        buffer
    }

    /// Insert a fix at its sorted position. Returns false if a fix with the
    /// same timestamp is already buffered (the first one received wins).
    pub fn insert(&mut self, mut fix: PositionFix) -> bool {
        let position = self.buffer.partition_point(|f| f.t < fix.t);
        if self.buffer.get(position).is_some_and(|f| f.t == fix.t) {
            metrics::counter!("scoring.in_order.duplicate_dropped").increment(1);
            trace!(competitor = %fix.competitor, t = fix.t, "Dropping duplicate fix");
            return false;
        }

        if position < self.cursor {
            // already read past this point, keep it for rewinds only
            fix.is_late = true;
            self.cursor += 1;
            metrics::counter!("scoring.in_order.late_received").increment(1);
            debug!(
                competitor = %fix.competitor,
                t = fix.t,
                last_emitted = ?self.last_emitted,
                "Fix arrived after its slot was released"
            );
        }

        self.buffer.insert(position, fix);
        true
    }

    /// Release the next fix if it is old enough.
    ///
    /// `rewind` moves the cursor back to the first buffered fix at or after
    /// that timestamp before reading.
    pub fn next(&mut self, now: Epoch, rewind: Option<Epoch>) -> Pull<OrderedFix> {
        if let Some(from) = rewind {
            self.cursor = self.buffer.partition_point(|f| f.t < from);
            debug!(from, cursor = self.cursor, "Rewinding fix stream");
        }

        match self.buffer.get(self.cursor) {
            Some(fix) if fix.t.saturating_add(self.delay) <= now => {
                let fix = fix.clone();
                self.cursor += 1;
                self.last_emitted = Some(fix.t);
                let live = std::mem::replace(&mut self.idle, false);
                Pull::Ready(OrderedFix { fix, live })
            }
            Some(_) => {
                self.idle = true;
                Pull::Pending
            }
            None => {
                self.idle = true;
                match self.mode {
                    Mode::Replay => Pull::Closed,
                    Mode::Live => Pull::Pending,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Fixes not yet released
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn last_emitted(&self) -> Option<Epoch> {
        self.last_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(t: Epoch, lat: f64) -> PositionFix {
        PositionFix {
            competitor: "T1".to_string(),
            lat,
            lng: 8.0,
            altitude_msl: 1000.0,
            altitude_agl: Some(800.0),
            t,
            bearing: None,
            speed: None,
            vario: None,
            is_late: false,
        }
    }

    fn drain(buffer: &mut InOrderBuffer, now: Epoch) -> Vec<Epoch> {
        let mut out = Vec::new();
        while let Pull::Ready(ordered) = buffer.next(now, None) {
            out.push(ordered.fix.t);
        }
        out
    }

    #[test]
    fn test_sorts_and_drops_duplicates() {
        let mut buffer = InOrderBuffer::new(10, Mode::Replay);
        assert!(buffer.insert(fix(30, 50.0)));
        assert!(buffer.insert(fix(10, 50.0)));
        assert!(buffer.insert(fix(20, 50.0)));
        assert!(!buffer.insert(fix(20, 51.0)));
        assert_eq!(drain(&mut buffer, 1_000), vec![10, 20, 30]);
        assert_eq!(buffer.next(1_000, None), Pull::Closed);
    }

    #[test]
    fn test_first_received_wins() {
        let mut buffer = InOrderBuffer::new(0, Mode::Replay);
        buffer.insert(fix(10, 50.0));
        buffer.insert(fix(10, 51.0));
        match buffer.next(100, None) {
            Pull::Ready(ordered) => assert_eq!(ordered.fix.lat, 50.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_holds_fixes_for_delay() {
        let mut buffer = InOrderBuffer::new(10, Mode::Live);
        buffer.insert(fix(100, 50.0));
        assert_eq!(buffer.next(105, None), Pull::Pending);
        assert_eq!(buffer.next(109, None), Pull::Pending);
        assert!(matches!(buffer.next(110, None), Pull::Ready(_)));
        assert_eq!(buffer.next(200, None), Pull::Pending);
    }

    #[test]
    fn test_live_flag_after_idle() {
        let mut buffer = InOrderBuffer::new(0, Mode::Live);
        buffer.insert(fix(1, 50.0));
        buffer.insert(fix(2, 50.0));
        let first = buffer.next(10, None);
        let second = buffer.next(10, None);
        assert!(matches!(first, Pull::Ready(OrderedFix { live: true, .. })));
        assert!(matches!(second, Pull::Ready(OrderedFix { live: false, .. })));
        assert_eq!(buffer.next(10, None), Pull::Pending);

        buffer.insert(fix(3, 50.0));
        assert!(matches!(
            buffer.next(10, None),
            Pull::Ready(OrderedFix { live: true, .. })
        ));
    }

    #[test]
    fn test_late_fix_is_not_emitted_out_of_order() {
        let mut buffer = InOrderBuffer::new(0, Mode::Replay);
        buffer.insert(fix(10, 50.0));
        buffer.insert(fix(20, 50.0));
        assert_eq!(drain(&mut buffer, 100), vec![10, 20]);

        buffer.insert(fix(30, 50.0));
        buffer.insert(fix(15, 50.0));
        assert_eq!(drain(&mut buffer, 100), vec![30]);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_rewind_replays_from_timestamp() {
        let mut buffer = InOrderBuffer::new(0, Mode::Replay);
        for t in [10, 20, 30, 40] {
            buffer.insert(fix(t, 50.0));
        }
        assert_eq!(drain(&mut buffer, 100), vec![10, 20, 30, 40]);

        match buffer.next(100, Some(25)) {
            Pull::Ready(ordered) => assert_eq!(ordered.fix.t, 30),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(drain(&mut buffer, 100), vec![40]);
    }
}
