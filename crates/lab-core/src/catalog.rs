use crate::{
    validate_catalog, ActiveHireEffect, BlueprintId, FounderId, JobDefId, NodeId, Rewards,
    UpgradeTrack, ValidationError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

fn one() -> u32 {
    1
}

/// Founder archetype chosen at owner creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Founder {
    pub id: FounderId,
    pub name: String,
    /// Additive speed bonus, in percent.
    #[serde(default)]
    pub speed_pct: Decimal,
    /// Additive money bonus, in percent.
    #[serde(default)]
    pub money_pct: Decimal,
}

/// A trainable model family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub name: String,
    /// Expected score of a training run before noise.
    pub base_score: Decimal,
    #[serde(default)]
    pub requires_unlock: bool,
}

/// Kind-specific data of a job definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobDefKind {
    Training {
        blueprint: BlueprintId,
    },
    Contract,
    Hire {
        /// Permanent staff gained on completion.
        #[serde(default)]
        staff: u32,
        /// Bonus in force while the hire is in progress.
        #[serde(default)]
        active: Option<ActiveHireEffect>,
    },
}

/// Static definition of a job players may request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobDefId,
    pub name: String,
    pub kind: JobDefKind,
    pub base_duration_ms: u64,
    #[serde(default)]
    pub base_cost: u64,
    /// Compute units held while in progress (training and contracts only).
    #[serde(default)]
    pub compute: u32,
    #[serde(default)]
    pub rewards: Rewards,
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
    #[serde(default = "one")]
    pub min_level: u32,
    #[serde(default)]
    pub requires_unlock: bool,
}

/// Which permanent bonus a perk node adds to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerkKind {
    Speed,
    Money,
}

/// Permanent bonus granted by a perk-category research node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Perk {
    pub kind: PerkKind,
    /// Percent added to the owner's permanent bonus.
    pub value: Decimal,
}

/// Ids merged into an owner's unlock sets when a node is purchased.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Grants {
    #[serde(default)]
    pub blueprints: Vec<BlueprintId>,
    #[serde(default)]
    pub jobs: Vec<JobDefId>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl Grants {
    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty() && self.jobs.is_empty() && self.features.is_empty()
    }
}

/// A purchasable entry in the research graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnlockNode {
    pub id: NodeId,
    pub name: String,
    /// Research point cost before bonuses.
    #[serde(default)]
    pub cost: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub prerequisites: Vec<NodeId>,
    #[serde(default = "one")]
    pub min_level: u32,
    #[serde(default)]
    pub grants: Grants,
    #[serde(default)]
    pub perk: Option<Perk>,
    /// Experience granted when the research completes.
    #[serde(default)]
    pub experience: u64,
}

impl UnlockNode {
    /// Free root nodes granted to every owner automatically.
    pub fn is_starter(&self) -> bool {
        self.cost == 0 && self.prerequisites.is_empty() && self.min_level <= 1
    }
}

/// Parallel and queue slots granted by a queue rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSlots {
    pub parallel: u32,
    pub queued: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankDef<V> {
    #[serde(default = "one")]
    pub required_level: u32,
    pub value: V,
}

/// Rank table for one track; index 0 is the starting rank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpgradeTable<V> {
    pub ranks: Vec<RankDef<V>>,
}

impl<V> UpgradeTable<V> {
    pub fn max_rank(&self) -> u32 {
        self.ranks.len().saturating_sub(1) as u32
    }

    pub fn value(&self, rank: u32) -> Option<&V> {
        self.ranks.get(rank as usize).map(|r| &r.value)
    }

    pub fn required_level(&self, rank: u32) -> Option<u32> {
        self.ranks.get(rank as usize).map(|r| r.required_level)
    }
}

/// Upgrade tables for all five tracks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Upgrades {
    pub queue: UpgradeTable<QueueSlots>,
    /// Maximum permanent staff.
    pub staff: UpgradeTable<u32>,
    /// Compute units available to in-progress jobs.
    pub compute: UpgradeTable<u32>,
    /// Speed bonus, in percent.
    pub speed: UpgradeTable<Decimal>,
    /// Money multiplier, in percent including its 100% base.
    pub money: UpgradeTable<Decimal>,
}

impl Upgrades {
    pub fn max_rank(&self, track: UpgradeTrack) -> u32 {
        match track {
            UpgradeTrack::Queue => self.queue.max_rank(),
            UpgradeTrack::Staff => self.staff.max_rank(),
            UpgradeTrack::Compute => self.compute.max_rank(),
            UpgradeTrack::Speed => self.speed.max_rank(),
            UpgradeTrack::Money => self.money.max_rank(),
        }
    }

    pub fn required_level(&self, track: UpgradeTrack, rank: u32) -> Option<u32> {
        match track {
            UpgradeTrack::Queue => self.queue.required_level(rank),
            UpgradeTrack::Staff => self.staff.required_level(rank),
            UpgradeTrack::Compute => self.compute.required_level(rank),
            UpgradeTrack::Speed => self.speed.required_level(rank),
            UpgradeTrack::Money => self.money.required_level(rank),
        }
    }
}

/// Bonus percent granted per level above 1.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelBonus {
    #[serde(default)]
    pub speed_pct_per_level: Decimal,
    #[serde(default)]
    pub money_pct_per_level: Decimal,
}

/// Resources every new owner starts with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartingResources {
    #[serde(default)]
    pub currency: u64,
    #[serde(default)]
    pub research_points: u64,
}

/// On-disk catalog layout: flat lists, keyed by id on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    pub founders: Vec<Founder>,
    #[serde(default)]
    pub blueprints: Vec<Blueprint>,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
    #[serde(default)]
    pub research: Vec<UnlockNode>,
    pub upgrades: Upgrades,
    /// Experience needed to leave level `i + 1`.
    pub level_thresholds: Vec<u64>,
    #[serde(default)]
    pub level_bonus: LevelBonus,
    #[serde(default)]
    pub starting: StartingResources,
}

/// Read-only content catalog, injected into the engine at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Catalog {
    pub founders: BTreeMap<FounderId, Founder>,
    pub blueprints: BTreeMap<BlueprintId, Blueprint>,
    pub jobs: BTreeMap<JobDefId, JobDefinition>,
    pub nodes: BTreeMap<NodeId, UnlockNode>,
    pub upgrades: Upgrades,
    pub level_thresholds: Vec<u64>,
    pub level_bonus: LevelBonus,
    pub starting: StartingResources,
}

impl Catalog {
    /// Validate and index a catalog file.
    pub fn from_file(file: CatalogFile) -> Result<Self, ValidationError> {
        validate_catalog(&file)?;
        let catalog = Self {
            founders: file.founders.into_iter().map(|f| (f.id.clone(), f)).collect(),
            blueprints: file
                .blueprints
                .into_iter()
                .map(|b| (b.id.clone(), b))
                .collect(),
            jobs: file.jobs.into_iter().map(|j| (j.id.clone(), j)).collect(),
            nodes: file.research.into_iter().map(|n| (n.id.clone(), n)).collect(),
            upgrades: file.upgrades,
            level_thresholds: file.level_thresholds,
            level_bonus: file.level_bonus,
            starting: file.starting,
        };
        info!(
            founders = catalog.founders.len(),
            jobs = catalog.jobs.len(),
            nodes = catalog.nodes.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ValidationError> {
        let file: CatalogFile =
            serde_yaml::from_str(text).map_err(|e| ValidationError::Parse(e.to_string()))?;
        Self::from_file(file)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ValidationError> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| ValidationError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_yaml_str(&text)
    }

    /// Highest reachable level.
    pub fn max_level(&self) -> u32 {
        self.level_thresholds.len() as u32 + 1
    }

    /// Experience needed to leave `level`, `None` at max level.
    pub fn threshold_for(&self, level: u32) -> Option<u64> {
        level
            .checked_sub(1)
            .and_then(|i| self.level_thresholds.get(i as usize).copied())
    }

    pub fn starter_nodes(&self) -> impl Iterator<Item = &UnlockNode> {
        self.nodes.values().filter(|n| n.is_starter())
    }
}
