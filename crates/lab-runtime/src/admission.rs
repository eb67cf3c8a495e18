use crate::{committed_staff, compute_capacity, parallel_capacity, queue_capacity, staff_capacity};
use lab_core::{
    millis_between, Catalog, Cost, Denial, EngineError, EngineResult, JobDefId, JobKind,
    OwnerRecord, Resource, Shortfall, Subject, Timestamp,
};
use serde::Serialize;
use tracing::debug;

/// Placement of an admitted job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "admission", rename_all = "snake_case")]
pub enum Admission {
    Immediate,
    /// 1-based position in the owner's FIFO queue.
    Queued { position: u32 },
}

/// Everything the gates need to know about a requested job.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionRequest<'a> {
    pub kind: JobKind,
    /// Effective cost, after bonuses.
    pub cost: Cost,
    pub compute: u32,
    /// Permanent staff the job adds on completion (hires only).
    pub staff: u32,
    /// Definition id when the definition carries a cooldown.
    pub cooldown: Option<&'a JobDefId>,
}

/// Currency, research point and compute shortfalls, all reported at once.
pub fn resource_shortfalls(
    catalog: &Catalog,
    rec: &OwnerRecord,
    req: &AdmissionRequest<'_>,
) -> EngineResult<Vec<Shortfall>> {
    let mut missing = rec.state.pool.shortfalls(req.cost);
    if req.kind.consumes_compute() {
        let free = compute_capacity(catalog, &rec.state)?.saturating_sub(rec.compute_in_use());
        if req.compute > free {
            missing.push(Shortfall::new(
                Resource::Compute,
                u64::from(req.compute),
                u64::from(free),
            ));
        }
    }
    Ok(missing)
}

fn check_staff(catalog: &Catalog, rec: &OwnerRecord, req: &AdmissionRequest<'_>) -> EngineResult<()> {
    if req.kind != JobKind::Hire || req.staff == 0 {
        return Ok(());
    }
    let capacity = staff_capacity(catalog, &rec.state)?;
    let current = committed_staff(rec);
    if current + req.staff > capacity {
        return Err(EngineError::AdmissionDenied(Denial::StaffCapacityExceeded {
            capacity,
            current,
            requested: req.staff,
        }));
    }
    Ok(())
}

fn check_cooldown(rec: &OwnerRecord, def: Option<&JobDefId>, now: Timestamp) -> EngineResult<()> {
    let Some(def) = def else {
        return Ok(());
    };
    if rec.open_jobs_of(def).next().is_some() {
        return Err(EngineError::AlreadyInProgress(Subject::JobDefinition(
            def.clone(),
        )));
    }
    if let Some(until) = rec.state.cooldowns.get(def) {
        let remaining = millis_between(now, *until);
        if remaining > 0 {
            return Err(EngineError::AdmissionDenied(Denial::CooldownActive {
                remaining_ms: remaining as u64,
            }));
        }
    }
    Ok(())
}

/// Slot decision alone: run now, queue, or deny. A free slot only goes to
/// the new job when nothing is waiting ahead of it.
pub fn capacity_decision(catalog: &Catalog, rec: &OwnerRecord) -> EngineResult<Admission> {
    let parallel = parallel_capacity(catalog, rec)?;
    let queued = rec.queued();
    if queued == 0 && rec.in_flight() < parallel {
        return Ok(Admission::Immediate);
    }
    let capacity = queue_capacity(catalog, rec)?;
    if capacity == 0 {
        return Err(EngineError::AdmissionDenied(Denial::QueueNotUnlocked));
    }
    if queued >= capacity {
        return Err(EngineError::AdmissionDenied(Denial::QueueFull { capacity }));
    }
    Ok(Admission::Queued {
        position: queued + 1,
    })
}

/// Run every gate in order: resources, staff, cooldown, then capacity.
pub fn admit(
    catalog: &Catalog,
    rec: &OwnerRecord,
    req: &AdmissionRequest<'_>,
    now: Timestamp,
) -> EngineResult<Admission> {
    let missing = resource_shortfalls(catalog, rec, req)?;
    if !missing.is_empty() {
        return Err(EngineError::InsufficientResource(missing));
    }
    check_staff(catalog, rec, req)?;
    check_cooldown(rec, req.cooldown, now)?;
    let decision = capacity_decision(catalog, rec)?;
    debug!(owner = %rec.state.id, kind = %req.kind, ?decision, "admitted");
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, t0};
    use lab_core::{
        add_millis, FounderId, Job, JobBase, JobId, JobSpec, OwnerId, OwnerState, Rewards,
    };

    fn owner() -> OwnerRecord {
        let mut rec = OwnerRecord::new(OwnerState::new(
            OwnerId::new("p"),
            FounderId::new("hacker"),
            t0(),
        ));
        rec.state.pool.currency = 1_000;
        rec
    }

    fn contract(id: u64, compute: u32, running: bool) -> Job {
        let mut j = Job::new(
            JobId(id),
            OwnerId::new("p"),
            JobSpec::Contract {
                def: JobDefId::new("gig"),
            },
            JobBase {
                duration_ms: 1_000,
                cost: Cost::default(),
                compute,
                rewards: Rewards::default(),
                cooldown_ms: Some(5_000),
            },
            Cost::default(),
            t0(),
        );
        if running {
            j.begin(t0(), add_millis(t0(), 1_000)).unwrap();
        }
        j
    }

    fn req(kind: JobKind, currency: u64, compute: u32) -> AdmissionRequest<'static> {
        AdmissionRequest {
            kind,
            cost: Cost {
                currency,
                research_points: 0,
            },
            compute,
            staff: 0,
            cooldown: None,
        }
    }

    #[test]
    fn immediate_then_queue_not_unlocked() {
        let c = catalog();
        let mut rec = owner();
        assert_eq!(
            admit(&c, &rec, &req(JobKind::Contract, 0, 1), t0()).unwrap(),
            Admission::Immediate
        );
        rec.jobs.push(contract(1, 1, true));
        assert_eq!(
            admit(&c, &rec, &req(JobKind::Contract, 0, 1), t0()).unwrap_err(),
            EngineError::AdmissionDenied(Denial::QueueNotUnlocked)
        );
    }

    #[test]
    fn queue_positions_and_full() {
        let c = catalog();
        let mut rec = owner();
        rec.state.ranks.queue = 1;
        rec.jobs.push(contract(1, 0, true));
        assert_eq!(
            capacity_decision(&c, &rec).unwrap(),
            Admission::Queued { position: 1 }
        );
        rec.jobs.push(contract(2, 0, false));
        let err = capacity_decision(&c, &rec).unwrap_err();
        assert_eq!(err.to_string(), "admission denied: queue full (capacity 1)");
    }

    #[test]
    fn free_slot_goes_to_the_queue_first() {
        let c = catalog();
        let mut rec = owner();
        rec.state.ranks.queue = 2;
        rec.jobs.push(contract(1, 0, true));
        rec.jobs.push(contract(2, 0, false));
        // one of two slots is free, but job 2 is still waiting
        assert_eq!(rec.in_flight(), 1);
        assert_eq!(
            capacity_decision(&c, &rec).unwrap(),
            Admission::Queued { position: 2 }
        );
    }

    #[test]
    fn currency_and_compute_reported_together() {
        let c = catalog();
        let mut rec = owner();
        rec.state.ranks.queue = 2;
        rec.jobs.push(contract(1, 3, true));
        let err = admit(&c, &rec, &req(JobKind::Training, 1_500, 2), t0()).unwrap_err();
        let s = err.shortfalls();
        assert_eq!(s.len(), 2);
        assert_eq!((s[0].resource, s[0].missing()), (Resource::Currency, 500));
        assert_eq!((s[1].resource, s[1].missing()), (Resource::Compute, 1));
        // research jobs hold no compute
        assert!(admit(&c, &rec, &req(JobKind::Research, 0, 2), t0()).is_ok());
    }

    #[test]
    fn staff_gate_counts_open_hires() {
        let c = catalog();
        let mut rec = owner();
        rec.state.pool.staff = 2;
        let hire = AdmissionRequest {
            staff: 1,
            ..req(JobKind::Hire, 0, 0)
        };
        assert_eq!(
            admit(&c, &rec, &hire, t0()).unwrap_err(),
            EngineError::AdmissionDenied(Denial::StaffCapacityExceeded {
                capacity: 2,
                current: 2,
                requested: 1
            })
        );
    }

    #[test]
    fn cooldown_gate() {
        let c = catalog();
        let mut rec = owner();
        rec.state.ranks.queue = 2;
        let def = JobDefId::new("gig");
        let gated = AdmissionRequest {
            cooldown: Some(&def),
            ..req(JobKind::Contract, 0, 0)
        };
        rec.jobs.push(contract(1, 0, true));
        assert!(matches!(
            admit(&c, &rec, &gated, t0()),
            Err(EngineError::AlreadyInProgress(Subject::JobDefinition(_)))
        ));
        rec.jobs.clear();
        rec.state.cooldowns.insert(def.clone(), add_millis(t0(), 4_000));
        assert_eq!(
            admit(&c, &rec, &gated, add_millis(t0(), 1_000)).unwrap_err(),
            EngineError::AdmissionDenied(Denial::CooldownActive { remaining_ms: 3_000 })
        );
        assert!(admit(&c, &rec, &gated, add_millis(t0(), 4_000)).is_ok());
    }
}
