use crate::lifecycle::{
    complete_in, job_template, promote_ready, quote_in, research_template, start_in,
    CompletionOutcome, CompletionRecord, JobOptions, JobQuote, Promotion, StartOutcome,
};
use crate::{
    capacity_view, job_link, owner_bonuses, purchase_upgrade, research_link, CapacityView, Clock,
    CompletionCallback, CompletionScheduler, MemoryStore, Notification, NotificationKind,
    NotificationSink, Store, TimeAuthority, TimerQueue, TracingSink,
};
use lab_core::{
    BlueprintId, Catalog, EngineConfig, EngineError, EngineResult, FounderId, JobDefId, JobId,
    JobStatus, NodeId, OwnerId, OwnerRecord, OwnerState, StoreSnapshot, Subject, Timestamp,
    UpgradeTrack,
};
use lab_econ::OwnerBonuses;
use lab_leaderboard::{
    aggregate, global_ranking, owner_standings, BlueprintSummary, OwnerStanding, RankedEntry,
};
use lab_research::{grant_starters, is_available, Availability};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Tally of one `run_due` pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub completed: usize,
    /// Redeliveries of callbacks whose job was already completed.
    pub duplicates: usize,
    pub not_due: usize,
    /// Callbacks kept for redelivery after a retryable failure.
    pub retried: usize,
    /// Callbacks dropped after a non-retryable failure.
    pub failed: usize,
}

/// Scheduling engine facade.
pub struct Engine<S: Store = MemoryStore> {
    catalog: Arc<Catalog>,
    config: EngineConfig,
    store: S,
    time: TimeAuthority,
    scheduler: Arc<dyn CompletionScheduler>,
    sink: Arc<dyn NotificationSink>,
}

impl Engine<MemoryStore> {
    pub fn in_memory(catalog: Arc<Catalog>, clock: Arc<dyn Clock>) -> Self {
        Self::new(catalog, MemoryStore::new(), clock)
    }

    /// Rebuild from a saved snapshot, time scales included. Call
    /// [`Engine::resume`] afterwards to re-arm completion callbacks.
    pub fn from_snapshot(
        catalog: Arc<Catalog>,
        snapshot: StoreSnapshot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let anchors = snapshot.time_anchors.clone();
        let engine = Self::new(catalog, MemoryStore::from_snapshot(snapshot), clock);
        engine.time.import_anchors(anchors);
        engine
    }
}

impl<S: Store> Engine<S> {
    pub fn new(catalog: Arc<Catalog>, store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            config: EngineConfig::default(),
            store,
            time: TimeAuthority::new(clock),
            scheduler: Arc::new(TimerQueue::new()),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn CompletionScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn time(&self) -> &TimeAuthority {
        &self.time
    }

    pub fn scheduler(&self) -> &dyn CompletionScheduler {
        self.scheduler.as_ref()
    }

    /// Create an owner with the catalog's starting resources and every
    /// starter research node already applied.
    pub fn create_owner(&self, owner: OwnerId, founder: FounderId) -> EngineResult<OwnerState> {
        if !self.catalog.founders.contains_key(&founder) {
            return Err(EngineError::not_found(Subject::Founder(founder)));
        }
        let mut state = OwnerState::new(owner.clone(), founder, self.time.real_now());
        state.pool.currency = self.catalog.starting.currency;
        state.pool.research_points = self.catalog.starting.research_points;
        let starters = grant_starters(&self.catalog, &mut state, self.time.effective_now(&owner));
        self.store.insert_owner(OwnerRecord::new(state.clone()))?;
        info!(owner = %owner, founder = %state.founder, starters = starters.len(), "owner created");
        Ok(state)
    }

    pub fn owner(&self, owner: &OwnerId) -> EngineResult<OwnerRecord> {
        self.store.load(owner)
    }

    pub fn bonuses(&self, owner: &OwnerId) -> EngineResult<OwnerBonuses> {
        let rec = self.store.load(owner)?;
        owner_bonuses(&self.catalog, &rec, None)
    }

    pub fn capacity(&self, owner: &OwnerId) -> EngineResult<CapacityView> {
        let rec = self.store.load(owner)?;
        capacity_view(&self.catalog, &rec)
    }

    /// Effective duration, cost, rewards and admission preview for a job.
    pub fn quote_job(&self, owner: &OwnerId, def: &JobDefId) -> EngineResult<JobQuote> {
        let rec = self.store.load(owner)?;
        quote_in(&self.catalog, &rec, def, self.time.effective_now(owner))
    }

    pub fn start_job(
        &self,
        owner: &OwnerId,
        def: &JobDefId,
        opts: JobOptions,
    ) -> EngineResult<StartOutcome> {
        let real_now = self.time.real_now();
        let effective_now = self.time.effective_at(owner, real_now);
        let outcome = self.store.transact(owner, |rec| {
            let template = job_template(&self.catalog, &rec.state, def, opts)?;
            let id = self.store.next_job_id()?;
            start_in(&self.catalog, rec, template, id, real_now, effective_now)
        })?;
        self.schedule_started(owner, &outcome);
        Ok(outcome)
    }

    pub fn start_research(&self, owner: &OwnerId, node: &NodeId) -> EngineResult<StartOutcome> {
        let real_now = self.time.real_now();
        let effective_now = self.time.effective_at(owner, real_now);
        let outcome = self.store.transact(owner, |rec| {
            let bonuses = owner_bonuses(&self.catalog, rec, None)?;
            let template = research_template(&self.catalog, rec, node, &bonuses)?;
            let id = self.store.next_job_id()?;
            start_in(&self.catalog, rec, template, id, real_now, effective_now)
        })?;
        self.schedule_started(owner, &outcome);
        Ok(outcome)
    }

    pub fn research_availability(
        &self,
        owner: &OwnerId,
        node: &NodeId,
    ) -> EngineResult<Availability> {
        let n = self
            .catalog
            .nodes
            .get(node)
            .ok_or_else(|| EngineError::not_found(Subject::Node(node.clone())))?;
        let rec = self.store.load(owner)?;
        let bonuses = owner_bonuses(&self.catalog, &rec, None)?;
        Ok(is_available(&self.catalog, n, &rec.state, &bonuses))
    }

    /// Buy one rank of `track`. Queued jobs that fit the new capacity start
    /// right away.
    pub fn purchase_upgrade(&self, owner: &OwnerId, track: UpgradeTrack) -> EngineResult<u32> {
        let now = self.time.effective_now(owner);
        let (rank, promoted) = self.store.transact(owner, |rec| {
            let rank = purchase_upgrade(&self.catalog, &mut rec.state, track)?;
            Ok((rank, promote_ready(&self.catalog, rec, now)))
        })?;
        for p in &promoted {
            self.register(owner, p.job, p.completes_at);
            self.publish_promotion(owner, p);
        }
        Ok(rank)
    }

    /// Apply the completion of `job`. Safe to call any number of times.
    pub fn complete(&self, owner: &OwnerId, job: JobId) -> EngineResult<CompletionOutcome> {
        let now = self.time.effective_now(owner);
        let outcome = self.store.transact(owner, |rec| {
            complete_in(&self.catalog, &self.config, rec, job, now)
        })?;
        match &outcome {
            CompletionOutcome::Completed(record) => {
                self.scheduler.ack(job);
                for p in &record.promoted {
                    self.register(owner, p.job, p.completes_at);
                }
                self.publish_completion(owner, record);
            }
            CompletionOutcome::AlreadyCompleted => self.scheduler.ack(job),
            CompletionOutcome::NotDue { deadline } => self.register(owner, job, *deadline),
        }
        Ok(outcome)
    }

    /// Deliver every callback due at the current real time.
    pub fn run_due(&self) -> RunReport {
        let mut report = RunReport::default();
        for cb in self.scheduler.take_due(self.time.real_now()) {
            match self.complete(&cb.owner, cb.job) {
                Ok(CompletionOutcome::Completed(_)) => report.completed += 1,
                Ok(CompletionOutcome::AlreadyCompleted) => report.duplicates += 1,
                Ok(CompletionOutcome::NotDue { .. }) => report.not_due += 1,
                Err(e) if e.is_retryable() => {
                    warn!(owner = %cb.owner, job = %cb.job, error = %e, "completion will be redelivered");
                    report.retried += 1;
                }
                Err(e) => {
                    error!(owner = %cb.owner, job = %cb.job, error = %e, "completion dropped");
                    self.scheduler.ack(cb.job);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Change `owner`'s time scale and re-derive pending fire times from
    /// their effective deadlines.
    pub fn set_time_scale(&self, owner: &OwnerId, scale: Decimal) -> EngineResult<()> {
        self.store.load(owner)?;
        self.time.set_scale(owner, scale)?;
        self.scheduler
            .retime(owner, &|effective: Timestamp| self.time.real_time_for(owner, effective));
        info!(owner = %owner, pending = self.scheduler.pending(), "callbacks retimed");
        Ok(())
    }

    /// Register callbacks for every in-progress job, e.g. after a restore.
    pub fn resume(&self) -> EngineResult<usize> {
        let mut registered = 0;
        for owner in self.store.owner_ids()? {
            let rec = self.store.load(&owner)?;
            for job in rec.jobs_with_status(JobStatus::InProgress) {
                if let Some(deadline) = job.completes_at {
                    self.register(&owner, job.id, deadline);
                    registered += 1;
                }
            }
        }
        info!(registered, "callbacks resumed");
        Ok(registered)
    }

    pub fn leaderboard(&self, blueprint: &BlueprintId) -> EngineResult<Vec<RankedEntry>> {
        Ok(global_ranking(blueprint, &self.store.artifacts(Some(blueprint))?))
    }

    pub fn standings(&self) -> EngineResult<Vec<OwnerStanding>> {
        Ok(owner_standings(&self.store.artifacts(None)?))
    }

    /// Per-blueprint summaries of `owner`'s artifacts as seen by `viewer`.
    pub fn summaries(
        &self,
        viewer: &OwnerId,
        owner: &OwnerId,
    ) -> EngineResult<Vec<BlueprintSummary>> {
        let rec = self.store.load(owner)?;
        let visible: Vec<_> = rec
            .artifacts
            .into_iter()
            .filter(|a| a.visible_to(viewer))
            .collect();
        Ok(aggregate(&visible))
    }

    pub fn snapshot(&self) -> EngineResult<StoreSnapshot> {
        let mut snap = self.store.snapshot()?;
        snap.time_anchors = self.time.export_anchors();
        Ok(snap)
    }

    fn register(&self, owner: &OwnerId, job: JobId, deadline: Timestamp) {
        let fire_at = self.time.real_time_for(owner, deadline);
        self.scheduler.register_at(
            fire_at,
            CompletionCallback {
                owner: owner.clone(),
                job,
                effective_deadline: deadline,
            },
        );
    }

    fn schedule_started(&self, owner: &OwnerId, outcome: &StartOutcome) {
        if let Some(deadline) = outcome.completes_at {
            self.register(owner, outcome.job, deadline);
        }
    }

    fn publish_completion(&self, owner: &OwnerId, record: &CompletionRecord) {
        let mut parts: Vec<String> = record
            .rewards
            .display_entries()
            .into_iter()
            .map(|(name, v)| format!("+{v} {name}"))
            .collect();
        if let Some(a) = &record.artifact {
            parts.push(format!("{} v{} scored {}", a.blueprint, a.version, a.score));
        }
        let message = if parts.is_empty() {
            format!("{} finished", record.label)
        } else {
            format!("{} finished: {}", record.label, parts.join(", "))
        };
        self.sink.publish(
            Notification::new(owner, NotificationKind::JobCompleted, "Job complete", message)
                .with_link(job_link(record.job)),
        );
        for level in &record.levels {
            self.sink.publish(Notification::new(
                owner,
                NotificationKind::LevelUp,
                "Level up",
                format!("Reached level {level}; +1 upgrade point"),
            ));
        }
        if let Some((node, _)) = &record.unlocked {
            self.sink.publish(
                Notification::new(
                    owner,
                    NotificationKind::ResearchUnlocked,
                    "Research unlocked",
                    format!("{} is now available", record.label),
                )
                .with_link(research_link(node)),
            );
        }
        for p in &record.promoted {
            self.publish_promotion(owner, p);
        }
    }

    fn publish_promotion(&self, owner: &OwnerId, p: &Promotion) {
        self.sink.publish(
            Notification::new(
                owner,
                NotificationKind::JobPromoted,
                "Queued job started",
                format!("Job {} left the queue", p.job),
            )
            .with_link(job_link(p.job)),
        );
    }
}
