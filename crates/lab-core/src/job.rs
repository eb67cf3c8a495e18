use crate::{
    BlueprintId, EngineError, EngineResult, JobDefId, JobId, NodeId, OwnerId, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad category of a job. Drives compute usage and speed scaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    Contract,
    Hire,
    Research,
}

impl JobKind {
    /// Kinds whose in-progress jobs occupy compute units.
    pub fn consumes_compute(self) -> bool {
        matches!(self, JobKind::Training | JobKind::Contract)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Training => "training",
            JobKind::Contract => "contract",
            JobKind::Hire => "hire",
            JobKind::Research => "research",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
        })
    }
}

/// Who may see a scored artifact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Bonus granted by a hire for as long as the hire job is in progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", content = "value", rename_all = "snake_case")]
pub enum ActiveHireEffect {
    /// Additive speed bonus, in percent.
    Speed(Decimal),
    /// Additive money bonus, in percent.
    Money(Decimal),
    /// Extra parallel job slots. Never more than the hire's permanent staff,
    /// so capacity does not shrink when the hire completes.
    ParallelSlots(u32),
}

/// Per-kind job data. Completion effects are dispatched on this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    Training {
        def: JobDefId,
        blueprint: BlueprintId,
        visibility: Visibility,
    },
    Contract {
        def: JobDefId,
    },
    Hire {
        def: JobDefId,
        staff: u32,
        active: Option<ActiveHireEffect>,
    },
    Research {
        node: NodeId,
    },
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        match self {
            JobSpec::Training { .. } => JobKind::Training,
            JobSpec::Contract { .. } => JobKind::Contract,
            JobSpec::Hire { .. } => JobKind::Hire,
            JobSpec::Research { .. } => JobKind::Research,
        }
    }

    /// Catalog definition the job was created from; research jobs come from nodes.
    pub fn definition(&self) -> Option<&JobDefId> {
        match self {
            JobSpec::Training { def, .. } | JobSpec::Contract { def } | JobSpec::Hire { def, .. } => {
                Some(def)
            }
            JobSpec::Research { .. } => None,
        }
    }
}

/// Currency, research points and experience granted on completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewards {
    #[serde(default)]
    pub currency: u64,
    #[serde(default)]
    pub research_points: u64,
    #[serde(default)]
    pub experience: u64,
}

impl Rewards {
    pub fn is_empty(&self) -> bool {
        self.currency == 0 && self.research_points == 0 && self.experience == 0
    }

    /// Non-zero entries for display; zero rewards count as absent.
    pub fn display_entries(&self) -> Vec<(&'static str, u64)> {
        [
            ("currency", self.currency),
            ("research points", self.research_points),
            ("experience", self.experience),
        ]
        .into_iter()
        .filter(|(_, v)| *v > 0)
        .collect()
    }
}

/// Price of an action after bonuses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    pub currency: u64,
    pub research_points: u64,
}

/// Catalog values captured when the job is requested. Completion rewards are
/// recomputed from these, never from the catalog at completion time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBase {
    pub duration_ms: u64,
    pub cost: Cost,
    pub compute: u32,
    pub rewards: Rewards,
    pub cooldown_ms: Option<u64>,
}

/// A single schedulable unit of work, retained as history after completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner: OwnerId,
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Real time of the request.
    pub created_at: Timestamp,
    /// Effective time the job entered `in_progress`.
    pub started_at: Option<Timestamp>,
    /// Effective deadline; set only while in progress and after.
    pub completes_at: Option<Timestamp>,
    /// Effective time the completion was applied.
    pub completed_at: Option<Timestamp>,
    pub base: JobBase,
    /// Cost actually debited at request time.
    pub cost_paid: Cost,
    /// Set once, on completion.
    pub rewards: Option<Rewards>,
}

impl Job {
    /// A new job in the `queued` state.
    pub fn new(
        id: JobId,
        owner: OwnerId,
        spec: JobSpec,
        base: JobBase,
        cost_paid: Cost,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            owner,
            spec,
            status: JobStatus::Queued,
            created_at,
            started_at: None,
            completes_at: None,
            completed_at: None,
            base,
            cost_paid,
            rewards: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.spec.kind()
    }

    /// `queued -> in_progress`.
    pub fn begin(&mut self, started_at: Timestamp, completes_at: Timestamp) -> EngineResult<()> {
        if self.status != JobStatus::Queued {
            return Err(EngineError::InvalidTransition {
                job: self.id,
                from: self.status,
                to: JobStatus::InProgress,
            });
        }
        self.status = JobStatus::InProgress;
        self.started_at = Some(started_at);
        self.completes_at = Some(completes_at);
        Ok(())
    }

    /// `in_progress -> completed`, recording rewards exactly once.
    pub fn finish(&mut self, rewards: Rewards, at: Timestamp) -> EngineResult<()> {
        if self.status != JobStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                job: self.id,
                from: self.status,
                to: JobStatus::Completed,
            });
        }
        self.status = JobStatus::Completed;
        self.completed_at = Some(at);
        self.rewards = Some(rewards);
        Ok(())
    }

    /// Hire effect currently in force, if this is an in-progress hire.
    pub fn active_hire_effect(&self) -> Option<&ActiveHireEffect> {
        match (&self.spec, self.status) {
            (JobSpec::Hire { active, .. }, JobStatus::InProgress) => active.as_ref(),
            _ => None,
        }
    }

    /// Compute units held while in progress.
    pub fn compute_in_use(&self) -> u32 {
        if self.status == JobStatus::InProgress && self.kind().consumes_compute() {
            self.base.compute
        } else {
            0
        }
    }
}
