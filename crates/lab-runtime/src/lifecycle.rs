use crate::{
    admit, apply_experience, compute_capacity, owner_bonuses, parallel_capacity, Admission,
    AdmissionRequest,
};
use lab_core::{
    add_millis, Catalog, Cost, EngineConfig, EngineError, EngineResult, Job, JobBase, JobDefId,
    JobDefKind, JobId, JobKind, JobSpec, JobStatus, NodeId, OwnerRecord, OwnerState, Rewards,
    ScoredArtifact, Subject, Timestamp, Unmet, Visibility,
};
use lab_econ::{
    effective_cost, effective_duration, effective_rewards, training_score, EconError, OwnerBonuses,
};
use lab_research::{apply_unlock, check_available, UnlockDelta, UnlockOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

fn econ(e: EconError) -> EngineError {
    EngineError::Bonus(e.to_string())
}

/// Per-request options for `start_job`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Visibility of the artifact a training job produces.
    pub visibility: Visibility,
}

/// A job ready to be admitted: its kind data and captured base values.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Template {
    pub spec: JobSpec,
    pub base: JobBase,
}

/// Build a job from its catalog definition, enforcing level and unlock gates.
pub(crate) fn job_template(
    catalog: &Catalog,
    state: &OwnerState,
    def_id: &JobDefId,
    opts: JobOptions,
) -> EngineResult<Template> {
    let def = catalog
        .jobs
        .get(def_id)
        .ok_or_else(|| EngineError::not_found(Subject::JobDefinition(def_id.clone())))?;
    if state.level < def.min_level {
        return Err(EngineError::PrerequisiteUnmet(Unmet::Level {
            required: def.min_level,
            current: state.level,
        }));
    }
    if def.requires_unlock && !state.unlocks.jobs.contains(def_id) {
        return Err(EngineError::PrerequisiteUnmet(Unmet::JobLocked(def_id.clone())));
    }
    let spec = match &def.kind {
        JobDefKind::Training { blueprint } => {
            let bp = catalog
                .blueprints
                .get(blueprint)
                .ok_or_else(|| EngineError::not_found(Subject::Blueprint(blueprint.clone())))?;
            if bp.requires_unlock && !state.unlocks.blueprints.contains(blueprint) {
                return Err(EngineError::PrerequisiteUnmet(Unmet::BlueprintLocked(
                    blueprint.clone(),
                )));
            }
            JobSpec::Training {
                def: def_id.clone(),
                blueprint: blueprint.clone(),
                visibility: opts.visibility,
            }
        }
        JobDefKind::Contract => JobSpec::Contract {
            def: def_id.clone(),
        },
        JobDefKind::Hire { staff, active } => JobSpec::Hire {
            def: def_id.clone(),
            staff: *staff,
            active: active.clone(),
        },
    };
    Ok(Template {
        spec,
        base: JobBase {
            duration_ms: def.base_duration_ms,
            cost: Cost {
                currency: def.base_cost,
                research_points: 0,
            },
            compute: def.compute,
            rewards: def.rewards,
            cooldown_ms: def.cooldown_ms,
        },
    })
}

/// Build a research job after the unlock graph's availability checks.
pub(crate) fn research_template(
    catalog: &Catalog,
    rec: &OwnerRecord,
    node_id: &NodeId,
    bonuses: &OwnerBonuses,
) -> EngineResult<Template> {
    let node = catalog
        .nodes
        .get(node_id)
        .ok_or_else(|| EngineError::not_found(Subject::Node(node_id.clone())))?;
    if rec.open_research(node_id).is_some() {
        return Err(EngineError::AlreadyInProgress(Subject::Node(node_id.clone())));
    }
    check_available(catalog, node, &rec.state, bonuses)?;
    Ok(Template {
        spec: JobSpec::Research {
            node: node_id.clone(),
        },
        base: JobBase {
            duration_ms: node.duration_ms,
            cost: Cost {
                currency: 0,
                research_points: node.cost,
            },
            compute: 0,
            rewards: Rewards {
                experience: node.experience,
                ..Rewards::default()
            },
            cooldown_ms: None,
        },
    })
}

fn effective_cost_of(base: Cost, bonuses: &OwnerBonuses) -> EngineResult<Cost> {
    Ok(Cost {
        currency: effective_cost(base.currency, bonuses).map_err(econ)?,
        research_points: effective_cost(base.research_points, bonuses).map_err(econ)?,
    })
}

fn request_of(template: &Template, cost: Cost) -> AdmissionRequest<'_> {
    AdmissionRequest {
        kind: template.spec.kind(),
        cost,
        compute: template.base.compute,
        staff: match &template.spec {
            JobSpec::Hire { staff, .. } => *staff,
            _ => 0,
        },
        cooldown: template
            .base
            .cooldown_ms
            .and(template.spec.definition()),
    }
}

/// Move `job` to in progress at `now`; sets its definition's cooldown.
fn begin_job(
    job: &mut Job,
    cooldowns: &mut BTreeMap<JobDefId, Timestamp>,
    bonuses: &OwnerBonuses,
    now: Timestamp,
) -> EngineResult<Timestamp> {
    let duration = effective_duration(job.base.duration_ms, job.kind(), bonuses).map_err(econ)?;
    let completes_at = add_millis(now, i64::try_from(duration).unwrap_or(i64::MAX));
    job.begin(now, completes_at)?;
    if let (Some(cooldown), Some(def)) = (job.base.cooldown_ms, job.spec.definition()) {
        let until = add_millis(completes_at, i64::try_from(cooldown).unwrap_or(i64::MAX));
        cooldowns.insert(def.clone(), until);
    }
    Ok(completes_at)
}

/// Effective figures for a job, computed exactly as `start` charges them.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobQuote {
    pub def: JobDefId,
    pub kind: JobKind,
    pub duration_ms: u64,
    pub cost: Cost,
    pub compute: u32,
    /// Rewards if the job completed under current bonuses.
    pub rewards: Rewards,
    /// Placement if requested now.
    pub admission: Option<Admission>,
    /// Reason a request would be denied now.
    pub blocked: Option<String>,
}

pub(crate) fn quote_in(
    catalog: &Catalog,
    rec: &OwnerRecord,
    def_id: &JobDefId,
    now: Timestamp,
) -> EngineResult<JobQuote> {
    let template = job_template(catalog, &rec.state, def_id, JobOptions::default())?;
    let bonuses = owner_bonuses(catalog, rec, None)?;
    let kind = template.spec.kind();
    let cost = effective_cost_of(template.base.cost, &bonuses)?;
    let (admission, blocked) = match admit(catalog, rec, &request_of(&template, cost), now) {
        Ok(a) => (Some(a), None),
        Err(e) => (None, Some(e.to_string())),
    };
    Ok(JobQuote {
        def: def_id.clone(),
        kind,
        duration_ms: effective_duration(template.base.duration_ms, kind, &bonuses).map_err(econ)?,
        cost,
        compute: template.base.compute,
        rewards: effective_rewards(&template.base.rewards, &bonuses),
        admission,
        blocked,
    })
}

/// Result of a successful start request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub job: JobId,
    pub admission: Admission,
    /// Amount debited.
    pub cost: Cost,
    /// Effective deadline, for jobs admitted immediately.
    pub completes_at: Option<Timestamp>,
}

/// Admit, debit and persist a job in one step against `rec`.
pub(crate) fn start_in(
    catalog: &Catalog,
    rec: &mut OwnerRecord,
    template: Template,
    id: JobId,
    real_now: Timestamp,
    effective_now: Timestamp,
) -> EngineResult<StartOutcome> {
    let bonuses = owner_bonuses(catalog, rec, None)?;
    let cost = effective_cost_of(template.base.cost, &bonuses)?;
    let admission = admit(catalog, rec, &request_of(&template, cost), effective_now)?;
    rec.state.pool.debit(cost)?;
    let mut job = Job::new(
        id,
        rec.state.id.clone(),
        template.spec,
        template.base,
        cost,
        real_now,
    );
    let completes_at = match admission {
        Admission::Immediate => Some(begin_job(
            &mut job,
            &mut rec.state.cooldowns,
            &bonuses,
            effective_now,
        )?),
        Admission::Queued { .. } => None,
    };
    info!(
        owner = %rec.state.id,
        job = %id,
        kind = %job.kind(),
        currency = cost.currency,
        research_points = cost.research_points,
        ?admission,
        "job started"
    );
    rec.jobs.push(job);
    Ok(StartOutcome {
        job: id,
        admission,
        cost,
        completes_at,
    })
}

/// A queued job moved to in progress after a completion freed capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub job: JobId,
    pub completes_at: Timestamp,
}

/// Start the single oldest queued job if a slot and its compute are free.
/// A head job that cannot run stays queued.
fn promote_next(
    catalog: &Catalog,
    rec: &mut OwnerRecord,
    now: Timestamp,
) -> Option<Promotion> {
    let head = rec.oldest_queued()?;
    let (id, kind, compute) = (head.id, head.kind(), head.base.compute);
    match parallel_capacity(catalog, rec) {
        Ok(parallel) if rec.in_flight() < parallel => {}
        Ok(_) => return None,
        Err(e) => {
            warn!(owner = %rec.state.id, job = %id, error = %e, "promotion skipped");
            return None;
        }
    }
    if kind.consumes_compute() {
        let capacity = compute_capacity(catalog, &rec.state).ok()?;
        if rec.compute_in_use() + compute > capacity {
            debug!(owner = %rec.state.id, job = %id, "queued job waits for compute");
            return None;
        }
    }
    let bonuses = match owner_bonuses(catalog, rec, None) {
        Ok(b) => b,
        Err(e) => {
            warn!(owner = %rec.state.id, job = %id, error = %e, "promotion skipped");
            return None;
        }
    };
    let job = rec.jobs.iter_mut().find(|j| j.id == id)?;
    match begin_job(job, &mut rec.state.cooldowns, &bonuses, now) {
        Ok(completes_at) => {
            info!(owner = %rec.state.id, job = %id, "queued job promoted");
            Some(Promotion {
                job: id,
                completes_at,
            })
        }
        Err(e) => {
            warn!(owner = %rec.state.id, job = %id, error = %e, "promotion failed");
            None
        }
    }
}

/// Promote queued jobs oldest first until the head one cannot run.
pub(crate) fn promote_ready(
    catalog: &Catalog,
    rec: &mut OwnerRecord,
    now: Timestamp,
) -> Vec<Promotion> {
    let mut promoted = Vec::new();
    while let Some(p) = promote_next(catalog, rec, now) {
        promoted.push(p);
    }
    promoted
}

/// Effects of one applied completion.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletionRecord {
    pub job: JobId,
    pub kind: JobKind,
    /// Display name of the definition or research node.
    pub label: String,
    pub rewards: Rewards,
    pub artifact: Option<ScoredArtifact>,
    pub unlocked: Option<(NodeId, UnlockDelta)>,
    /// Levels reached, one entry per level gained.
    pub levels: Vec<u32>,
    /// Queued jobs started because this completion freed capacity.
    pub promoted: Vec<Promotion>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed(CompletionRecord),
    /// Duplicate delivery; nothing was applied.
    AlreadyCompleted,
    /// Delivered before the effective deadline; nothing was applied.
    NotDue { deadline: Timestamp },
}

pub(crate) fn job_label(catalog: &Catalog, spec: &JobSpec) -> String {
    match spec {
        JobSpec::Research { node } => catalog
            .nodes
            .get(node)
            .map_or_else(|| node.to_string(), |n| n.name.clone()),
        other => other
            .definition()
            .map(|d| {
                catalog
                    .jobs
                    .get(d)
                    .map_or_else(|| d.to_string(), |j| j.name.clone())
            })
            .unwrap_or_default(),
    }
}

/// Apply a due completion to `rec`. A completed job is a no-op.
pub(crate) fn complete_in(
    catalog: &Catalog,
    config: &EngineConfig,
    rec: &mut OwnerRecord,
    job_id: JobId,
    now: Timestamp,
) -> EngineResult<CompletionOutcome> {
    let idx = rec
        .jobs
        .iter()
        .position(|j| j.id == job_id)
        .ok_or_else(|| EngineError::not_found(Subject::Job(job_id)))?;
    let job = &rec.jobs[idx];
    match job.status {
        JobStatus::Completed => return Ok(CompletionOutcome::AlreadyCompleted),
        JobStatus::Queued => {
            return Err(EngineError::InvalidTransition {
                job: job_id,
                from: JobStatus::Queued,
                to: JobStatus::Completed,
            })
        }
        JobStatus::InProgress => {}
    }
    if let Some(deadline) = job.completes_at {
        if deadline > now {
            return Ok(CompletionOutcome::NotDue { deadline });
        }
    }
    let spec = job.spec.clone();
    let base_rewards = job.base.rewards;

    let bonuses = owner_bonuses(catalog, rec, Some(job_id))?;
    let rewards = effective_rewards(&base_rewards, &bonuses);
    let mut artifact = None;
    let mut unlocked = None;
    match &spec {
        JobSpec::Training {
            blueprint,
            visibility,
            ..
        } => {
            let bp = catalog
                .blueprints
                .get(blueprint)
                .ok_or_else(|| EngineError::not_found(Subject::Blueprint(blueprint.clone())))?;
            let score = training_score(
                bp.base_score,
                config.score_noise_frac,
                config.rng_seed ^ job_id.0,
            )
            .map_err(econ)?;
            let made = ScoredArtifact {
                blueprint: blueprint.clone(),
                owner: rec.state.id.clone(),
                version: rec.latest_version(blueprint) + 1,
                score,
                created_at: now,
                visibility: *visibility,
                job: job_id,
            };
            rec.artifacts.push(made.clone());
            artifact = Some(made);
        }
        JobSpec::Research { node } => {
            let n = catalog
                .nodes
                .get(node)
                .ok_or_else(|| EngineError::not_found(Subject::Node(node.clone())))?;
            if let UnlockOutcome::Applied(delta) =
                apply_unlock(n, &mut rec.state.unlocks, &mut rec.state.pool, now)
            {
                unlocked = Some((node.clone(), delta));
            }
        }
        JobSpec::Hire { staff, .. } => {
            rec.state.pool.staff += *staff;
        }
        JobSpec::Contract { .. } => {}
    }
    rec.state.pool.credit(&rewards);
    rec.jobs[idx].finish(rewards, now)?;
    let levels = apply_experience(catalog, &mut rec.state, rewards.experience);
    info!(
        owner = %rec.state.id,
        job = %job_id,
        kind = %spec.kind(),
        currency = rewards.currency,
        research_points = rewards.research_points,
        experience = rewards.experience,
        "job completed"
    );
    let promoted = promote_ready(catalog, rec, now);
    Ok(CompletionOutcome::Completed(CompletionRecord {
        job: job_id,
        kind: spec.kind(),
        label: job_label(catalog, &spec),
        rewards,
        artifact,
        unlocked,
        levels,
        promoted,
    }))
}
