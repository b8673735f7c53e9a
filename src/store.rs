//! The cache service.
//!
//! The [`Cache`] is the one shared mutable object in the process. It holds
//! the current ROA set, the serial it is at, the session id, and the diff
//! leading from the previous revision to the current one. The refresh task
//! is its only writer; server sessions and the status task read consistent
//! snapshots under a brief shared lock acquisition. Snapshots are `Arc`
//! handles copied out of the lock, so the lock is never held across
//! socket I/O.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use crate::diff::SerialDiff;
use crate::payload::RoaSet;
use crate::pdu::Timing;
use crate::serial::Serial;


//------------ RoaSource -----------------------------------------------------

/// Read access to the data a server session serves.
pub trait RoaSource: Clone + Send + Sync + 'static {
    /// A consistent view of the full current set.
    fn full(&self) -> FullSnapshot;

    /// What to answer a serial query for `serial` with.
    fn diff(&self, serial: Serial) -> DiffResponse;

    /// The timer values to advise in End-of-Data PDUs.
    fn timing(&self) -> Timing;
}


//------------ FullSnapshot --------------------------------------------------

/// One consistent (session, serial, set) view of the cache.
#[derive(Clone, Debug)]
pub struct FullSnapshot {
    pub session: u16,
    pub serial: Serial,
    pub roas: Arc<RoaSet>,
}


//------------ DiffResponse --------------------------------------------------

/// The possible answers to a serial query.
#[derive(Clone, Debug)]
pub enum DiffResponse {
    /// The client is at the current serial already.
    Empty {
        session: u16,
        serial: Serial,
    },

    /// The client is exactly one revision behind.
    Diff {
        session: u16,
        serial: Serial,
        diff: Arc<SerialDiff>,
    },

    /// The client's serial is unknown; it has to start over.
    Reset,
}


//------------ UpdateOutcome -------------------------------------------------

/// What applying a freshly ingested set did to the cache.
///
/// The serial advances either way; see `Cache::apply_update`.
#[derive(Clone, Debug)]
pub enum UpdateOutcome {
    /// The new set equals the current one.
    Unchanged(Serial),

    /// The set was swapped; the diff leads to the new serial.
    Advanced(Arc<SerialDiff>),
}


//------------ CacheStatus ---------------------------------------------------

/// Bookkeeping numbers for the status task.
#[derive(Clone, Copy, Debug)]
pub struct CacheStatus {
    pub serial: Serial,
    pub roa_count: usize,
    pub last_check: Option<SystemTime>,
    pub last_error: Option<SystemTime>,
    pub last_update: Option<SystemTime>,
}


//------------ Cache ---------------------------------------------------------

#[derive(Clone)]
pub struct Cache {
    inner: Arc<RwLock<CacheInner>>,
    timing: Timing,
}

struct CacheInner {
    roas: Arc<RoaSet>,
    serial: Serial,
    session: u16,
    diff: Option<Arc<SerialDiff>>,
    last_check: Option<SystemTime>,
    last_error: Option<SystemTime>,
    last_update: Option<SystemTime>,
}

impl Cache {
    /// Creates the cache from the first successful ingest.
    pub fn new(session: u16, initial: RoaSet, timing: Timing) -> Self {
        Cache {
            inner: Arc::new(RwLock::new(CacheInner {
                roas: Arc::new(initial),
                serial: Serial::default(),
                session,
                diff: None,
                last_check: Some(SystemTime::now()),
                last_error: None,
                last_update: Some(SystemTime::now()),
            })),
            timing,
        }
    }

    /// Applies a freshly ingested set.
    ///
    /// The serial is bumped on every successful ingest, matching the wire
    /// behavior routers have come to expect from this cache; RFC 8210
    /// would also permit staying put when nothing changed. The retained
    /// diff's new serial always equals the current serial afterwards. The
    /// set itself is only swapped when it actually differs.
    pub fn apply_update(&self, new_set: RoaSet) -> UpdateOutcome {
        let mut inner = self.inner.write().unwrap();
        let diff = Arc::new(
            SerialDiff::compute(&new_set, &inner.roas, inner.serial)
        );
        let now = SystemTime::now();
        inner.serial = diff.new_serial;
        inner.last_check = Some(now);
        let outcome = if diff.has_changes {
            inner.roas = Arc::new(new_set);
            inner.last_update = Some(now);
            UpdateOutcome::Advanced(diff.clone())
        }
        else {
            UpdateOutcome::Unchanged(inner.serial)
        };
        inner.diff = Some(diff);
        outcome
    }

    /// Records that an ingest attempt failed. The served data is kept.
    pub fn record_error(&self) {
        self.inner.write().unwrap().last_error = Some(SystemTime::now());
    }

    /// The data to broadcast in a Serial Notify.
    pub fn notify_info(&self) -> (u16, Serial) {
        let inner = self.inner.read().unwrap();
        (inner.session, inner.serial)
    }

    pub fn status(&self) -> CacheStatus {
        let inner = self.inner.read().unwrap();
        CacheStatus {
            serial: inner.serial,
            roa_count: inner.roas.len(),
            last_check: inner.last_check,
            last_error: inner.last_error,
            last_update: inner.last_update,
        }
    }
}

impl RoaSource for Cache {
    fn full(&self) -> FullSnapshot {
        let inner = self.inner.read().unwrap();
        FullSnapshot {
            session: inner.session,
            serial: inner.serial,
            roas: inner.roas.clone(),
        }
    }

    fn diff(&self, serial: Serial) -> DiffResponse {
        let inner = self.inner.read().unwrap();
        if serial == inner.serial {
            return DiffResponse::Empty {
                session: inner.session,
                serial: inner.serial,
            }
        }
        if let Some(ref diff) = inner.diff {
            if diff.old_serial == serial && diff.new_serial == inner.serial {
                return DiffResponse::Diff {
                    session: inner.session,
                    serial: inner.serial,
                    diff: diff.clone(),
                }
            }
        }
        DiffResponse::Reset
    }

    fn timing(&self) -> Timing {
        self.timing
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Roa;

    fn roa(prefix: &str, prefix_len: u8, max_len: u8, asn: u32) -> Roa {
        Roa::new(prefix.parse().unwrap(), prefix_len, max_len, asn)
    }

    fn cache_with(roas: Vec<Roa>) -> Cache {
        Cache::new(42, RoaSet::from_raw(roas), Timing::default())
    }

    #[test]
    fn fresh_cache() {
        let cache = cache_with(vec![roa("192.0.2.0", 24, 32, 64496)]);
        let snapshot = cache.full();
        assert_eq!(snapshot.session, 42);
        assert_eq!(snapshot.serial, Serial::from(0));
        assert_eq!(snapshot.roas.len(), 1);
        assert_eq!(cache.notify_info(), (42, Serial::from(0)));
        assert!(matches!(
            cache.diff(Serial::from(0)), DiffResponse::Empty { .. }
        ));
        // Nothing retained yet, anything older needs a reset.
        assert!(matches!(
            cache.diff(Serial::from(0).previous()), DiffResponse::Reset
        ));
    }

    #[test]
    fn advance_and_serve_diff() {
        let kept = roa("192.0.2.0", 24, 32, 64496);
        let dropped = roa("2001:db8::", 32, 48, 64496);
        let added = roa("198.51.100.0", 24, 24, 64497);
        let cache = cache_with(vec![kept, dropped]);

        let outcome = cache.apply_update(
            RoaSet::from_raw(vec![kept, added])
        );
        let diff = match outcome {
            UpdateOutcome::Advanced(diff) => diff,
            UpdateOutcome::Unchanged(_) => panic!("expected an advance"),
        };
        assert_eq!(diff.old_serial, Serial::from(0));
        assert_eq!(diff.new_serial, Serial::from(1));
        assert_eq!(diff.announce, vec![added]);
        assert_eq!(diff.withdraw, vec![dropped]);

        let snapshot = cache.full();
        assert_eq!(snapshot.serial, Serial::from(1));
        assert!(snapshot.roas.contains(&added));
        assert!(!snapshot.roas.contains(&dropped));

        // A client one revision behind gets exactly that diff.
        match cache.diff(Serial::from(0)) {
            DiffResponse::Diff { session, serial, diff } => {
                assert_eq!(session, 42);
                assert_eq!(serial, Serial::from(1));
                assert_eq!(diff.announce, vec![added]);
            }
            other => panic!("expected a diff, got {:?}", other),
        }
        assert!(matches!(
            cache.diff(Serial::from(1)), DiffResponse::Empty { .. }
        ));
        assert!(matches!(
            cache.diff(Serial::from(5)), DiffResponse::Reset
        ));
    }

    #[test]
    fn unchanged_ingest_still_bumps_serial() {
        let only = roa("192.0.2.0", 24, 32, 64496);
        let cache = cache_with(vec![only]);

        let outcome = cache.apply_update(RoaSet::from_raw(vec![only]));
        assert!(matches!(
            outcome, UpdateOutcome::Unchanged(serial) if serial == 1
        ));
        assert_eq!(cache.full().serial, Serial::from(1));

        // The retained diff is empty but addressable.
        match cache.diff(Serial::from(0)) {
            DiffResponse::Diff { diff, .. } => {
                assert!(!diff.has_changes);
                assert!(diff.announce.is_empty());
                assert!(diff.withdraw.is_empty());
            }
            other => panic!("expected an empty diff, got {:?}", other),
        }
    }

    #[test]
    fn only_latest_diff_is_retained() {
        let first = roa("192.0.2.0", 24, 32, 64496);
        let second = roa("198.51.100.0", 24, 24, 64497);
        let cache = cache_with(vec![first]);
        cache.apply_update(RoaSet::from_raw(vec![first, second]));
        cache.apply_update(RoaSet::from_raw(vec![second]));

        assert_eq!(cache.full().serial, Serial::from(2));
        assert!(matches!(cache.diff(Serial::from(0)), DiffResponse::Reset));
        assert!(matches!(
            cache.diff(Serial::from(1)), DiffResponse::Diff { .. }
        ));
    }

    #[test]
    fn error_bookkeeping() {
        let cache = cache_with(Vec::new());
        assert!(cache.status().last_error.is_none());
        cache.record_error();
        assert!(cache.status().last_error.is_some());
        // The served data survives a failed ingest untouched.
        assert_eq!(cache.full().serial, Serial::from(0));
    }
}
