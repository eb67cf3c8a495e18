use crate::{
    add_millis, millis_between, BlueprintId, Cost, EngineError, EngineResult, FounderId, Job,
    JobDefId, JobId, JobKind, JobStatus, NodeId, OwnerId, Resource, Rewards, ScoredArtifact,
    Shortfall, Timestamp,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Upgradeable progression tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeTrack {
    Queue,
    Staff,
    Compute,
    Speed,
    Money,
}

impl UpgradeTrack {
    pub const ALL: [UpgradeTrack; 5] = [
        UpgradeTrack::Queue,
        UpgradeTrack::Staff,
        UpgradeTrack::Compute,
        UpgradeTrack::Speed,
        UpgradeTrack::Money,
    ];
}

impl fmt::Display for UpgradeTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpgradeTrack::Queue => "queue",
            UpgradeTrack::Staff => "staff",
            UpgradeTrack::Compute => "compute",
            UpgradeTrack::Speed => "speed",
            UpgradeTrack::Money => "money",
        })
    }
}

/// Current rank per upgrade track. Ranks only increase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranks {
    pub queue: u32,
    pub staff: u32,
    pub compute: u32,
    pub speed: u32,
    pub money: u32,
}

impl Ranks {
    pub fn get(&self, track: UpgradeTrack) -> u32 {
        match track {
            UpgradeTrack::Queue => self.queue,
            UpgradeTrack::Staff => self.staff,
            UpgradeTrack::Compute => self.compute,
            UpgradeTrack::Speed => self.speed,
            UpgradeTrack::Money => self.money,
        }
    }

    pub fn get_mut(&mut self, track: UpgradeTrack) -> &mut u32 {
        match track {
            UpgradeTrack::Queue => &mut self.queue,
            UpgradeTrack::Staff => &mut self.staff,
            UpgradeTrack::Compute => &mut self.compute,
            UpgradeTrack::Speed => &mut self.speed,
            UpgradeTrack::Money => &mut self.money,
        }
    }
}

/// Per-owner mutable ledger. Unsigned amounts keep it non-negative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub currency: u64,
    pub research_points: u64,
    /// Permanent speed bonus from research perks, in percent.
    pub speed_bonus_pct: Decimal,
    /// Permanent money bonus from research perks, in percent.
    pub money_bonus_pct: Decimal,
    /// Permanent staff hired.
    pub staff: u32,
}

impl ResourcePool {
    /// Debit `cost` only if every component is covered; otherwise report all
    /// shortfalls and leave the pool untouched.
    pub fn debit(&mut self, cost: Cost) -> EngineResult<()> {
        let missing = self.shortfalls(cost);
        if !missing.is_empty() {
            return Err(EngineError::InsufficientResource(missing));
        }
        self.currency -= cost.currency;
        self.research_points -= cost.research_points;
        Ok(())
    }

    pub fn shortfalls(&self, cost: Cost) -> Vec<Shortfall> {
        let mut out = Vec::new();
        if cost.currency > self.currency {
            out.push(Shortfall::new(Resource::Currency, cost.currency, self.currency));
        }
        if cost.research_points > self.research_points {
            out.push(Shortfall::new(
                Resource::ResearchPoints,
                cost.research_points,
                self.research_points,
            ));
        }
        out
    }

    pub fn credit(&mut self, rewards: &Rewards) {
        self.currency = self.currency.saturating_add(rewards.currency);
        self.research_points = self.research_points.saturating_add(rewards.research_points);
    }
}

/// Unlock sets and one-time purchase markers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockState {
    pub blueprints: BTreeSet<BlueprintId>,
    pub jobs: BTreeSet<JobDefId>,
    pub features: BTreeSet<String>,
    /// Purchase marker per node, with the effective time it was applied.
    pub purchased: BTreeMap<NodeId, Timestamp>,
}

impl UnlockState {
    pub fn is_purchased(&self, node: &NodeId) -> bool {
        self.purchased.contains_key(node)
    }
}

/// Level, experience, ranks, resources and unlocks of one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerState {
    pub id: OwnerId,
    pub founder: FounderId,
    pub level: u32,
    pub experience: u64,
    pub upgrade_points: u32,
    pub ranks: Ranks,
    pub pool: ResourcePool,
    pub unlocks: UnlockState,
    /// Effective time until which a job definition may not start again.
    pub cooldowns: BTreeMap<JobDefId, Timestamp>,
    /// Real creation time.
    pub created_at: Timestamp,
}

impl OwnerState {
    pub fn new(id: OwnerId, founder: FounderId, created_at: Timestamp) -> Self {
        Self {
            id,
            founder,
            level: 1,
            experience: 0,
            upgrade_points: 0,
            ranks: Ranks::default(),
            pool: ResourcePool::default(),
            unlocks: UnlockState::default(),
            cooldowns: BTreeMap::new(),
            created_at,
        }
    }
}

/// Everything persisted for one owner: state, job history and artifacts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub state: OwnerState,
    /// Insert-only, in creation order.
    pub jobs: Vec<Job>,
    /// Insert-only, in creation order.
    pub artifacts: Vec<ScoredArtifact>,
}

impl OwnerRecord {
    pub fn new(state: OwnerState) -> Self {
        Self {
            state,
            jobs: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn job_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(move |j| j.status == status)
    }

    pub fn in_flight(&self) -> u32 {
        self.jobs_with_status(JobStatus::InProgress).count() as u32
    }

    pub fn queued(&self) -> u32 {
        self.jobs_with_status(JobStatus::Queued).count() as u32
    }

    /// Oldest queued job, by creation order.
    pub fn oldest_queued(&self) -> Option<&Job> {
        self.jobs_with_status(JobStatus::Queued).next()
    }

    pub fn compute_in_use(&self) -> u32 {
        self.jobs.iter().map(Job::compute_in_use).sum()
    }

    /// Open (queued or in progress) research job for `node`.
    pub fn open_research(&self, node: &NodeId) -> Option<&Job> {
        self.jobs.iter().find(|j| {
            j.status != JobStatus::Completed
                && matches!(&j.spec, crate::JobSpec::Research { node: n } if n == node)
        })
    }

    /// Open jobs created from definition `def`.
    pub fn open_jobs_of(&self, def: &JobDefId) -> impl Iterator<Item = &Job> + '_ {
        let def = def.clone();
        self.jobs
            .iter()
            .filter(move |j| j.status != JobStatus::Completed && j.spec.definition() == Some(&def))
    }

    pub fn completed_of_kind(&self, kind: JobKind) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed && j.kind() == kind)
            .count()
    }

    /// Highest artifact version of `blueprint`, 0 when never trained.
    pub fn latest_version(&self, blueprint: &BlueprintId) -> u32 {
        self.artifacts
            .iter()
            .filter(|a| &a.blueprint == blueprint)
            .map(|a| a.version)
            .max()
            .unwrap_or(0)
    }
}

/// Serializable image of a whole store, used for save slots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub owners: Vec<OwnerRecord>,
    pub next_job_id: u64,
    /// Owners without an entry run at scale 1.
    #[serde(default)]
    pub time_anchors: BTreeMap<OwnerId, TimeAnchor>,
}

impl StoreSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Pair of instants that map to each other, plus the rate effective time
/// advances per unit of real time after them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAnchor {
    pub real: Timestamp,
    pub effective: Timestamp,
    pub scale: Decimal,
}

impl TimeAnchor {
    /// Rounds down.
    pub fn effective_at(&self, real: Timestamp) -> Timestamp {
        let elapsed = Decimal::from(millis_between(self.real, real)) * self.scale;
        add_millis(self.effective, to_millis(elapsed.floor()))
    }

    /// Rounds up.
    pub fn real_time_for(&self, effective: Timestamp) -> Timestamp {
        let elapsed = Decimal::from(millis_between(self.effective, effective)) / self.scale;
        add_millis(self.real, to_millis(elapsed.ceil()))
    }
}

fn to_millis(d: Decimal) -> i64 {
    d.to_i64()
        .unwrap_or(if d.is_sign_negative() { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn debit_reports_every_shortfall() {
        let mut pool = ResourcePool {
            currency: 100,
            research_points: 1,
            ..ResourcePool::default()
        };
        let err = pool
            .debit(Cost {
                currency: 150,
                research_points: 4,
            })
            .unwrap_err();
        assert_eq!(err.shortfalls().len(), 2);
        assert_eq!(err.shortfalls()[0].missing(), 50);
        assert_eq!(pool.currency, 100);
        assert_eq!(pool.research_points, 1);
    }

    #[test]
    fn new_owner_starts_at_level_one() {
        let s = OwnerState::new(OwnerId::new("p"), FounderId::new("hacker"), t0());
        assert_eq!(s.level, 1);
        assert_eq!(s.ranks, Ranks::default());
        let rec = OwnerRecord::new(s);
        assert_eq!(rec.in_flight(), 0);
        assert!(rec.oldest_queued().is_none());
        assert_eq!(rec.latest_version(&BlueprintId::new("x")), 0);
    }

    #[test]
    fn snapshot_json_roundtrip() {
        let snap = StoreSnapshot {
            owners: vec![OwnerRecord::new(OwnerState::new(
                OwnerId::new("p"),
                FounderId::new("hacker"),
                t0(),
            ))],
            next_job_id: 9,
            time_anchors: BTreeMap::from([(
                OwnerId::new("p"),
                TimeAnchor {
                    real: t0(),
                    effective: add_millis(t0(), 5_000),
                    scale: Decimal::new(25, 1),
                },
            )]),
        };
        let back = StoreSnapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(back, snap);
    }

    proptest! {
        #[test]
        fn debit_never_goes_negative(balance in 0u64..10_000, cost in 0u64..20_000) {
            let mut pool = ResourcePool { currency: balance, ..ResourcePool::default() };
            let res = pool.debit(Cost { currency: cost, research_points: 0 });
            if cost <= balance {
                prop_assert!(res.is_ok());
                prop_assert_eq!(pool.currency, balance - cost);
            } else {
                prop_assert!(res.is_err());
                prop_assert_eq!(pool.currency, balance);
            }
        }
    }
}
