use lab_core::{
    ActiveHireEffect, Catalog, Denial, EngineError, EngineResult, JobId, JobSpec, JobStatus,
    OwnerRecord, OwnerState, Subject, UpgradeTable, UpgradeTrack,
};
use lab_econ::{OwnerBonuses, SourceBonus};
use rust_decimal::Decimal;
use serde::Serialize;

fn rank_value<'a, V>(
    table: &'a UpgradeTable<V>,
    track: UpgradeTrack,
    state: &OwnerState,
) -> EngineResult<&'a V> {
    let rank = state.ranks.get(track);
    table
        .value(rank)
        .ok_or(EngineError::AdmissionDenied(Denial::CapacityUnknown { track, rank }))
}

/// Sum the five bonus sources of an owner. `exclude` leaves one in-progress
/// hire out of the active-hire source (the job being completed).
pub fn owner_bonuses(
    catalog: &Catalog,
    rec: &OwnerRecord,
    exclude: Option<JobId>,
) -> EngineResult<OwnerBonuses> {
    let state = &rec.state;
    let founder = catalog
        .founders
        .get(&state.founder)
        .ok_or_else(|| EngineError::not_found(Subject::Founder(state.founder.clone())))?;
    let speed = rank_value(&catalog.upgrades.speed, UpgradeTrack::Speed, state)?;
    let money = rank_value(&catalog.upgrades.money, UpgradeTrack::Money, state)?;

    let mut hires = SourceBonus::default();
    for job in rec.jobs.iter().filter(|j| Some(j.id) != exclude) {
        match job.active_hire_effect() {
            Some(ActiveHireEffect::Speed(p)) => hires.speed_pct += *p,
            Some(ActiveHireEffect::Money(p)) => hires.money_pct += *p,
            _ => {}
        }
    }

    let levels_above_one = Decimal::from(state.level.saturating_sub(1));
    Ok(OwnerBonuses {
        founder: SourceBonus::new(founder.speed_pct, founder.money_pct),
        upgrade: SourceBonus::from_upgrade(*speed, *money),
        research: SourceBonus::new(state.pool.speed_bonus_pct, state.pool.money_bonus_pct),
        hires,
        level: SourceBonus::new(
            catalog.level_bonus.speed_pct_per_level * levels_above_one,
            catalog.level_bonus.money_pct_per_level * levels_above_one,
        ),
    })
}

/// Jobs that may be in progress at once: queue rank + permanent staff +
/// active parallel-slot hires.
pub fn parallel_capacity(catalog: &Catalog, rec: &OwnerRecord) -> EngineResult<u32> {
    let slots = rank_value(&catalog.upgrades.queue, UpgradeTrack::Queue, &rec.state)?;
    let extra: u32 = rec
        .jobs_with_status(JobStatus::InProgress)
        .filter_map(|j| match j.active_hire_effect() {
            Some(ActiveHireEffect::ParallelSlots(n)) => Some(*n),
            _ => None,
        })
        .sum();
    Ok(slots.parallel + rec.state.pool.staff + extra)
}

/// Jobs that may wait in the queue.
pub fn queue_capacity(catalog: &Catalog, rec: &OwnerRecord) -> EngineResult<u32> {
    Ok(rank_value(&catalog.upgrades.queue, UpgradeTrack::Queue, &rec.state)?.queued)
}

pub fn staff_capacity(catalog: &Catalog, state: &OwnerState) -> EngineResult<u32> {
    rank_value(&catalog.upgrades.staff, UpgradeTrack::Staff, state).copied()
}

pub fn compute_capacity(catalog: &Catalog, state: &OwnerState) -> EngineResult<u32> {
    rank_value(&catalog.upgrades.compute, UpgradeTrack::Compute, state).copied()
}

/// Permanent staff plus staff promised by open hire jobs.
pub fn committed_staff(rec: &OwnerRecord) -> u32 {
    let pending: u32 = rec
        .jobs
        .iter()
        .filter(|j| j.status != JobStatus::Completed)
        .map(|j| match &j.spec {
            JobSpec::Hire { staff, .. } => *staff,
            _ => 0,
        })
        .sum();
    rec.state.pool.staff + pending
}

/// Capacity figures for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CapacityView {
    pub parallel: u32,
    pub in_flight: u32,
    pub queue: u32,
    pub queued: u32,
    pub compute: u32,
    pub compute_in_use: u32,
    pub staff: u32,
    pub staff_committed: u32,
}

pub fn capacity_view(catalog: &Catalog, rec: &OwnerRecord) -> EngineResult<CapacityView> {
    Ok(CapacityView {
        parallel: parallel_capacity(catalog, rec)?,
        in_flight: rec.in_flight(),
        queue: queue_capacity(catalog, rec)?,
        queued: rec.queued(),
        compute: compute_capacity(catalog, &rec.state)?,
        compute_in_use: rec.compute_in_use(),
        staff: staff_capacity(catalog, &rec.state)?,
        staff_committed: committed_staff(rec),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, t0};
    use lab_core::{Cost, FounderId, Job, JobBase, JobDefId, OwnerId, Rewards};

    fn owner(founder: &str) -> OwnerRecord {
        OwnerRecord::new(OwnerState::new(
            OwnerId::new("p"),
            FounderId::new(founder),
            t0(),
        ))
    }

    fn hire(id: u64, staff: u32, active: Option<ActiveHireEffect>, running: bool) -> Job {
        let mut j = Job::new(
            JobId(id),
            OwnerId::new("p"),
            JobSpec::Hire {
                def: JobDefId::new("hire"),
                staff,
                active,
            },
            JobBase {
                duration_ms: 10,
                cost: Cost::default(),
                compute: 0,
                rewards: Rewards::default(),
                cooldown_ms: None,
            },
            Cost::default(),
            t0(),
        );
        if running {
            j.begin(t0(), t0()).unwrap();
        }
        j
    }

    #[test]
    fn bonuses_sum_every_source() {
        let c = catalog();
        let mut rec = owner("scientist");
        rec.state.level = 3;
        rec.state.ranks.money = 1;
        rec.state.pool.speed_bonus_pct = Decimal::from(5);
        rec.jobs.push(hire(1, 1, Some(ActiveHireEffect::Speed(Decimal::from(5))), true));
        rec.jobs.push(hire(2, 0, Some(ActiveHireEffect::Money(Decimal::from(15))), false));
        let b = owner_bonuses(&c, &rec, None).unwrap();
        // founder 5 + research 5 + hire 5 + level 2
        assert_eq!(b.total_speed_pct(), Decimal::from(17));
        // 100 + founder 5 + upgrade 10 + level 4; queued hire is not active
        assert_eq!(b.money_total_pct(), Decimal::from(119));
        let without = owner_bonuses(&c, &rec, Some(JobId(1))).unwrap();
        assert_eq!(without.total_speed_pct(), Decimal::from(12));
    }

    #[test]
    fn unknown_founder_is_not_found() {
        let c = catalog();
        let rec = owner("nobody");
        assert!(matches!(
            owner_bonuses(&c, &rec, None),
            Err(EngineError::NotFound(Subject::Founder(_)))
        ));
    }

    #[test]
    fn capacity_counts_staff_and_active_hires() {
        let c = catalog();
        let mut rec = owner("hacker");
        assert_eq!(parallel_capacity(&c, &rec).unwrap(), 1);
        assert_eq!(queue_capacity(&c, &rec).unwrap(), 0);
        rec.state.pool.staff = 1;
        rec.jobs.push(hire(1, 1, Some(ActiveHireEffect::ParallelSlots(1)), true));
        rec.jobs.push(hire(2, 0, Some(ActiveHireEffect::ParallelSlots(1)), false));
        // the queued hire holds no slot yet
        assert_eq!(parallel_capacity(&c, &rec).unwrap(), 3);
        assert_eq!(queue_capacity(&c, &rec).unwrap(), 0);
        assert_eq!(committed_staff(&rec), 2);
    }

    #[test]
    fn missing_rank_is_capacity_unknown() {
        let c = catalog();
        let mut rec = owner("hacker");
        rec.state.ranks.queue = 99;
        assert_eq!(
            parallel_capacity(&c, &rec).unwrap_err(),
            EngineError::AdmissionDenied(Denial::CapacityUnknown {
                track: UpgradeTrack::Queue,
                rank: 99
            })
        );
    }
}
