#![deny(warnings)]

//! Research graph: node availability and one-time unlock application.
//!
//! Availability is evaluated in a fixed order and only the first failure is
//! reported: level, then prerequisites, then affordability. Applying a node
//! is guarded by its purchase marker, so a duplicate completion delivery can
//! never grant a perk twice.

use lab_core::{
    BlueprintId, Catalog, EngineError, EngineResult, JobDefId, NodeId, OwnerState, Perk,
    PerkKind, ResourcePool, Resource, Timestamp, UnlockNode, UnlockState, Unmet,
};
use lab_econ::{effective_cost, OwnerBonuses};
use serde::Serialize;
use tracing::{debug, info};

/// Result of an availability check, for display.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Availability {
    pub available: bool,
    /// First failing check, human readable.
    pub reason: Option<String>,
    /// Research point cost after bonuses.
    pub cost: u64,
}

/// Ids newly added by an unlock application.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UnlockDelta {
    pub blueprints: Vec<BlueprintId>,
    pub jobs: Vec<JobDefId>,
    pub features: Vec<String>,
    pub perk: Option<Perk>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum UnlockOutcome {
    Applied(UnlockDelta),
    AlreadyApplied,
}

/// A prerequisite counts as met when purchased, or when it is a starter node.
pub fn prerequisite_met(catalog: &Catalog, unlocks: &UnlockState, id: &NodeId) -> bool {
    unlocks.is_purchased(id) || catalog.nodes.get(id).is_some_and(UnlockNode::is_starter)
}

/// Research point cost of `node` for an owner with `bonuses`.
pub fn node_cost(node: &UnlockNode, bonuses: &OwnerBonuses) -> EngineResult<u64> {
    effective_cost(node.cost, bonuses).map_err(|e| EngineError::Bonus(e.to_string()))
}

/// Check whether `node` may be purchased; returns its effective cost.
pub fn check_available(
    catalog: &Catalog,
    node: &UnlockNode,
    state: &OwnerState,
    bonuses: &OwnerBonuses,
) -> EngineResult<u64> {
    if state.unlocks.is_purchased(&node.id) {
        return Err(EngineError::AlreadyPurchased(node.id.clone()));
    }
    if state.level < node.min_level {
        return Err(EngineError::PrerequisiteUnmet(Unmet::Level {
            required: node.min_level,
            current: state.level,
        }));
    }
    if let Some(missing) = node
        .prerequisites
        .iter()
        .find(|p| !prerequisite_met(catalog, &state.unlocks, p))
    {
        return Err(EngineError::PrerequisiteUnmet(Unmet::Dependency {
            node: missing.clone(),
        }));
    }
    let cost = node_cost(node, bonuses)?;
    if cost > state.pool.research_points {
        return Err(EngineError::shortfall(
            Resource::ResearchPoints,
            cost,
            state.pool.research_points,
        ));
    }
    Ok(cost)
}

pub fn is_available(
    catalog: &Catalog,
    node: &UnlockNode,
    state: &OwnerState,
    bonuses: &OwnerBonuses,
) -> Availability {
    let cost = node_cost(node, bonuses).unwrap_or(node.cost);
    match check_available(catalog, node, state, bonuses) {
        Ok(cost) => Availability {
            available: true,
            reason: None,
            cost,
        },
        Err(e) => Availability {
            available: false,
            reason: Some(e.to_string()),
            cost,
        },
    }
}

/// Merge a node's grants into the owner's unlock sets and add its perk to the
/// permanent pool deltas. No-op when the purchase marker already exists.
pub fn apply_unlock(
    node: &UnlockNode,
    unlocks: &mut UnlockState,
    pool: &mut ResourcePool,
    at: Timestamp,
) -> UnlockOutcome {
    if unlocks.is_purchased(&node.id) {
        debug!(node = %node.id, "unlock already applied");
        return UnlockOutcome::AlreadyApplied;
    }
    let mut delta = UnlockDelta::default();
    for b in &node.grants.blueprints {
        if unlocks.blueprints.insert(b.clone()) {
            delta.blueprints.push(b.clone());
        }
    }
    for j in &node.grants.jobs {
        if unlocks.jobs.insert(j.clone()) {
            delta.jobs.push(j.clone());
        }
    }
    for f in &node.grants.features {
        if unlocks.features.insert(f.clone()) {
            delta.features.push(f.clone());
        }
    }
    if let Some(perk) = &node.perk {
        match perk.kind {
            PerkKind::Speed => pool.speed_bonus_pct += perk.value,
            PerkKind::Money => pool.money_bonus_pct += perk.value,
        }
        delta.perk = Some(perk.clone());
    }
    unlocks.purchased.insert(node.id.clone(), at);
    info!(
        node = %node.id,
        blueprints = delta.blueprints.len(),
        jobs = delta.jobs.len(),
        features = delta.features.len(),
        perk = delta.perk.is_some(),
        "research unlocked"
    );
    UnlockOutcome::Applied(delta)
}

/// Apply every starter node to a fresh owner. Returns the nodes granted.
pub fn grant_starters(catalog: &Catalog, state: &mut OwnerState, at: Timestamp) -> Vec<NodeId> {
    let mut granted = Vec::new();
    for node in catalog.starter_nodes() {
        if let UnlockOutcome::Applied(_) =
            apply_unlock(node, &mut state.unlocks, &mut state.pool, at)
        {
            granted.push(node.id.clone());
        }
    }
    granted
}

/// Unpurchased nodes whose prerequisites are all met, ignoring level and cost.
pub fn frontier<'a>(catalog: &'a Catalog, unlocks: &UnlockState) -> Vec<&'a UnlockNode> {
    catalog
        .nodes
        .values()
        .filter(|n| !unlocks.is_purchased(&n.id))
        .filter(|n| {
            n.prerequisites
                .iter()
                .all(|p| prerequisite_met(catalog, unlocks, p))
        })
        .collect()
}
