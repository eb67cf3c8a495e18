use crate::Clock;
use lab_core::{EngineError, EngineResult, OwnerId, TimeAnchor, Timestamp};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Per-owner mapping between real and effective time.
///
/// Owners without an anchor run at scale 1 with effective time equal to real
/// time. Effective instants round down and real instants round up, so a
/// callback registered at `real_time_for(deadline)` never observes an
/// effective time before `deadline`.
pub struct TimeAuthority {
    clock: Arc<dyn Clock>,
    anchors: RwLock<HashMap<OwnerId, TimeAnchor>>,
}

impl TimeAuthority {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            anchors: RwLock::new(HashMap::new()),
        }
    }

    fn anchor(&self, owner: &OwnerId) -> Option<TimeAnchor> {
        self.anchors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner)
            .copied()
    }

    pub fn real_now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn effective_at(&self, owner: &OwnerId, real: Timestamp) -> Timestamp {
        match self.anchor(owner) {
            Some(a) => a.effective_at(real),
            None => real,
        }
    }

    pub fn effective_now(&self, owner: &OwnerId) -> Timestamp {
        self.effective_at(owner, self.real_now())
    }

    /// Real instant at which `owner`'s effective clock reaches `effective`.
    pub fn real_time_for(&self, owner: &OwnerId, effective: Timestamp) -> Timestamp {
        match self.anchor(owner) {
            Some(a) => a.real_time_for(effective),
            None => effective,
        }
    }

    pub fn scale(&self, owner: &OwnerId) -> Decimal {
        self.anchor(owner).map_or(Decimal::ONE, |a| a.scale)
    }

    /// Every anchor, for snapshots.
    pub fn export_anchors(&self) -> BTreeMap<OwnerId, TimeAnchor> {
        let anchors = self.anchors.read().unwrap_or_else(|e| e.into_inner());
        anchors.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Replace all anchors with those of a restored snapshot.
    pub fn import_anchors(&self, restored: BTreeMap<OwnerId, TimeAnchor>) {
        let mut anchors = self.anchors.write().unwrap_or_else(|e| e.into_inner());
        *anchors = restored.into_iter().collect();
    }

    /// Re-anchor `owner` at the current instant with a new scale. Both
    /// anchor timestamps are taken under one write lock.
    pub fn set_scale(&self, owner: &OwnerId, scale: Decimal) -> EngineResult<TimeAnchor> {
        if scale <= Decimal::ZERO {
            return Err(EngineError::InvalidTimeScale(format!(
                "scale must be > 0, got {scale}"
            )));
        }
        let mut anchors = self.anchors.write().unwrap_or_else(|e| e.into_inner());
        let real = self.clock.now();
        let effective = anchors.get(owner).map_or(real, |a| a.effective_at(real));
        let anchor = TimeAnchor {
            real,
            effective,
            scale,
        };
        anchors.insert(owner.clone(), anchor);
        info!(owner = %owner, %scale, effective = %effective, "time scale changed");
        Ok(anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::{TimeZone, Utc};
    use lab_core::{add_millis, millis_between};
    use proptest::prelude::*;
    use rust_decimal::prelude::ToPrimitive;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (Arc<ManualClock>, TimeAuthority) {
        let clock = Arc::new(ManualClock::new(t0()));
        let ta = TimeAuthority::new(clock.clone());
        (clock, ta)
    }

    #[test]
    fn default_is_identity() {
        let (clock, ta) = setup();
        let p = OwnerId::new("p");
        clock.advance_ms(5_000);
        assert_eq!(ta.effective_now(&p), clock.now());
        assert_eq!(ta.real_time_for(&p, clock.now()), clock.now());
        assert_eq!(ta.scale(&p), Decimal::ONE);
    }

    #[test]
    fn accelerated_owner_runs_faster() {
        let (clock, ta) = setup();
        let p = OwnerId::new("p");
        ta.set_scale(&p, Decimal::from(10)).unwrap();
        clock.advance_ms(1_000);
        assert_eq!(ta.effective_now(&p), add_millis(t0(), 10_000));
        let deadline = add_millis(t0(), 300_000);
        assert_eq!(ta.real_time_for(&p, deadline), add_millis(t0(), 30_000));
        // other owners are unaffected
        assert_eq!(ta.effective_now(&OwnerId::new("q")), clock.now());
    }

    #[test]
    fn rescale_keeps_effective_time_continuous() {
        let (clock, ta) = setup();
        let p = OwnerId::new("p");
        ta.set_scale(&p, Decimal::from(4)).unwrap();
        clock.advance_ms(1_000);
        let before = ta.effective_now(&p);
        let anchor = ta.set_scale(&p, Decimal::ONE).unwrap();
        assert_eq!(anchor.effective, before);
        assert_eq!(ta.effective_now(&p), before);
        clock.advance_ms(500);
        assert_eq!(ta.effective_now(&p), add_millis(before, 500));
    }

    #[test]
    fn imported_anchors_continue_where_they_left_off() {
        let (clock, ta) = setup();
        let p = OwnerId::new("p");
        ta.set_scale(&p, Decimal::from(10)).unwrap();
        clock.advance_ms(2_000);
        let saved = ta.export_anchors();

        let (later, restored) = setup();
        later.advance_ms(2_000);
        restored.import_anchors(saved);
        assert_eq!(restored.scale(&p), Decimal::from(10));
        assert_eq!(restored.effective_now(&p), add_millis(t0(), 20_000));
    }

    #[test]
    fn rejects_non_positive_scale() {
        let (_, ta) = setup();
        let err = ta.set_scale(&OwnerId::new("p"), Decimal::ZERO).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTimeScale(_)));
    }

    #[test]
    fn uneven_division_never_fires_early() {
        let (_, ta) = setup();
        let p = OwnerId::new("p");
        ta.set_scale(&p, Decimal::new(3, 0)).unwrap();
        let deadline = add_millis(t0(), 1_000);
        let fire = ta.real_time_for(&p, deadline);
        assert!(ta.effective_at(&p, fire) >= deadline);
        assert!(ta.effective_at(&p, add_millis(fire, -1)) < deadline);
    }

    proptest! {
        #[test]
        fn round_trip_within_rounding(scale_milli in 1u32..50_000, elapsed in 0u64..10_000_000, deadline in 0i64..10_000_000) {
            let (clock, ta) = setup();
            let p = OwnerId::new("p");
            let scale = Decimal::new(scale_milli as i64, 3);
            ta.set_scale(&p, scale).unwrap();
            clock.advance_ms(elapsed);
            let real = clock.now();
            let back = ta.real_time_for(&p, ta.effective_now(&p));
            let tolerance = (Decimal::ONE / scale).ceil().to_i64().unwrap_or(i64::MAX) + 1;
            prop_assert!(back <= real);
            prop_assert!(millis_between(back, real) <= tolerance);

            let target = add_millis(t0(), deadline);
            let fire = ta.real_time_for(&p, target);
            prop_assert!(ta.effective_at(&p, fire) >= target);
        }
    }
}
