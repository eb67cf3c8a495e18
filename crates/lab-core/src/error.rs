use crate::{BlueprintId, FounderId, JobDefId, JobId, JobStatus, NodeId, OwnerId, UpgradeTrack};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Resources whose shortfall can block an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    Currency,
    ResearchPoints,
    Compute,
    UpgradePoints,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Currency => "currency",
            Resource::ResearchPoints => "research points",
            Resource::Compute => "compute",
            Resource::UpgradePoints => "upgrade points",
        })
    }
}

/// Amount of a resource missing for an action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub resource: Resource,
    pub required: u64,
    pub available: u64,
}

impl Shortfall {
    pub fn new(resource: Resource, required: u64, available: u64) -> Self {
        Self {
            resource,
            required,
            available,
        }
    }

    /// How much more of the resource is needed.
    pub fn missing(&self) -> u64 {
        self.required.saturating_sub(self.available)
    }
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing {} {} (need {}, have {})",
            self.missing(),
            self.resource,
            self.required,
            self.available
        )
    }
}

fn join_shortfalls(items: &[Shortfall]) -> String {
    items
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Capacity, queue and cooldown denials.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("queue not unlocked: all parallel slots are busy")]
    QueueNotUnlocked,
    #[error("queue full (capacity {capacity})")]
    QueueFull { capacity: u32 },
    #[error("on cooldown for another {remaining_ms} ms")]
    CooldownActive { remaining_ms: u64 },
    #[error("staff capacity exceeded ({current} + {requested} > {capacity})")]
    StaffCapacityExceeded {
        capacity: u32,
        current: u32,
        requested: u32,
    },
    #[error("capacity unknown: no {track} value for rank {rank}")]
    CapacityUnknown { track: UpgradeTrack, rank: u32 },
}

/// Level, dependency and lock requirements that are not met.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Unmet {
    #[error("requires level {required} (current level {current})")]
    Level { required: u32, current: u32 },
    #[error("requires research \"{node}\" first")]
    Dependency { node: NodeId },
    #[error("job \"{0}\" is locked")]
    JobLocked(JobDefId),
    #[error("blueprint \"{0}\" is locked")]
    BlueprintLocked(BlueprintId),
    #[error("{track} is already at max rank {max}")]
    MaxRank { track: UpgradeTrack, max: u32 },
}

/// The entity an error refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    Job(JobId),
    JobDefinition(JobDefId),
    Node(NodeId),
    Owner(OwnerId),
    Blueprint(BlueprintId),
    Founder(FounderId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Job(id) => write!(f, "job {id}"),
            Subject::JobDefinition(id) => write!(f, "job definition \"{id}\""),
            Subject::Node(id) => write!(f, "research node \"{id}\""),
            Subject::Owner(id) => write!(f, "owner \"{id}\""),
            Subject::Blueprint(id) => write!(f, "blueprint \"{id}\""),
            Subject::Founder(id) => write!(f, "founder \"{id}\""),
        }
    }
}

/// Catalog validation errors.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    #[error("dependency not found: {0}")]
    DependencyNotFound(String),
    #[error("research graph has a cycle through {0}")]
    Cycle(String),
    #[error("{0} upgrade table is empty")]
    EmptyUpgradeTable(UpgradeTrack),
    #[error("{0} upgrade table must be non-decreasing in value and required level")]
    DecreasingUpgradeTable(UpgradeTrack),
    #[error("level thresholds must be non-empty and positive")]
    InvalidLevelThresholds,
    #[error("{0} must be positive")]
    NonPositive(String),
    #[error("hire {job} grants {slots} temporary slots but only {staff} permanent staff")]
    TemporarySlots { job: String, slots: u32, staff: u32 },
    #[error("failed to parse catalog: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Errors returned by engine operations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("admission denied: {0}")]
    AdmissionDenied(Denial),
    #[error("insufficient resources: {}", join_shortfalls(.0))]
    InsufficientResource(Vec<Shortfall>),
    #[error("prerequisite unmet: {0}")]
    PrerequisiteUnmet(Unmet),
    #[error("{0} is already completed")]
    AlreadyCompleted(Subject),
    #[error("research \"{0}\" is already purchased")]
    AlreadyPurchased(NodeId),
    #[error("{0} is already in progress")]
    AlreadyInProgress(Subject),
    #[error("{0} already exists")]
    AlreadyExists(Subject),
    #[error("{0} not found")]
    NotFound(Subject),
    #[error("job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("invalid time scale: {0}")]
    InvalidTimeScale(String),
    #[error("bonus computation failed: {0}")]
    Bonus(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Catalog(#[from] ValidationError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(subject: Subject) -> Self {
        Self::NotFound(subject)
    }

    pub fn shortfall(resource: Resource, required: u64, available: u64) -> Self {
        Self::InsufficientResource(vec![Shortfall::new(resource, required, available)])
    }

    /// Only persistence outages are retried, and only by callback redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }

    /// Shortfalls carried by the error, empty for other variants.
    pub fn shortfalls(&self) -> &[Shortfall] {
        match self {
            EngineError::InsufficientResource(items) => items,
            _ => &[],
        }
    }
}
