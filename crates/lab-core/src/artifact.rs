use crate::{BlueprintId, JobId, OwnerId, Timestamp, Visibility};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable output of a training job, eligible for leaderboard ranking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredArtifact {
    pub blueprint: BlueprintId,
    pub owner: OwnerId,
    /// Strictly increasing per (owner, blueprint), starting at 1.
    pub version: u32,
    pub score: Decimal,
    /// Effective time of the completing job.
    pub created_at: Timestamp,
    pub visibility: Visibility,
    /// Training job that produced it.
    pub job: JobId,
}

impl ScoredArtifact {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Whether `viewer` may see this artifact.
    pub fn visible_to(&self, viewer: &OwnerId) -> bool {
        self.is_public() || &self.owner == viewer
    }
}
