use crate::{ActiveHireEffect, CatalogFile, JobDefKind, NodeId, RankDef, UpgradeTable, UpgradeTrack, ValidationError};
use std::collections::{BTreeMap, BTreeSet};

fn unique_ids<'a, I>(ids: I) -> Result<BTreeSet<&'a str>, ValidationError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateId(id.to_string()));
        }
    }
    Ok(seen)
}

/// Validate a rank table: non-empty, rank 0 reachable at level 1, values and
/// required levels non-decreasing.
pub fn validate_upgrade_table<V>(
    track: UpgradeTrack,
    table: &UpgradeTable<V>,
    non_decreasing: impl Fn(&V, &V) -> bool,
) -> Result<(), ValidationError> {
    let first = table
        .ranks
        .first()
        .ok_or(ValidationError::EmptyUpgradeTable(track))?;
    if first.required_level > 1 {
        return Err(ValidationError::DecreasingUpgradeTable(track));
    }
    for pair in table.ranks.windows(2) {
        let (a, b): (&RankDef<V>, &RankDef<V>) = (&pair[0], &pair[1]);
        if b.required_level < a.required_level || !non_decreasing(&a.value, &b.value) {
            return Err(ValidationError::DecreasingUpgradeTable(track));
        }
    }
    Ok(())
}

/// Reject cycles in the research graph with an iterative three-colour DFS.
fn check_acyclic(edges: &BTreeMap<&NodeId, &[NodeId]>) -> Result<(), ValidationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: BTreeMap<&NodeId, Mark> = BTreeMap::new();
    for &root in edges.keys() {
        if marks.contains_key(root) {
            continue;
        }
        let mut stack: Vec<(&NodeId, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::Visiting);
        while let Some((node, idx)) = stack.pop() {
            let deps = edges.get(node).copied().unwrap_or(&[]);
            if let Some(dep) = deps.get(idx) {
                stack.push((node, idx + 1));
                match marks.get(dep) {
                    Some(Mark::Visiting) => return Err(ValidationError::Cycle(dep.0.clone())),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dep, Mark::Visiting);
                        stack.push((dep, 0));
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
            }
        }
    }
    Ok(())
}

/// Validate the catalog, including cross-references and the research DAG.
pub fn validate_catalog(file: &CatalogFile) -> Result<(), ValidationError> {
    unique_ids(file.founders.iter().map(|f| f.id.as_str()))?;
    let blueprints = unique_ids(file.blueprints.iter().map(|b| b.id.as_str()))?;
    let jobs = unique_ids(file.jobs.iter().map(|j| j.id.as_str()))?;
    let nodes = unique_ids(file.research.iter().map(|n| n.id.as_str()))?;
    if file.founders.is_empty() {
        return Err(ValidationError::DependencyNotFound("founder".into()));
    }

    for j in &file.jobs {
        if j.base_duration_ms == 0 {
            return Err(ValidationError::NonPositive(format!(
                "base_duration_ms of {}",
                j.id
            )));
        }
        match &j.kind {
            JobDefKind::Training { blueprint } => {
                if !blueprints.contains(blueprint.as_str()) {
                    return Err(ValidationError::DependencyNotFound(blueprint.0.clone()));
                }
            }
            // slots lent while the hire runs must be replaced by the staff it adds
            JobDefKind::Hire {
                staff,
                active: Some(ActiveHireEffect::ParallelSlots(slots)),
            } if slots > staff => {
                return Err(ValidationError::TemporarySlots {
                    job: j.id.0.clone(),
                    slots: *slots,
                    staff: *staff,
                });
            }
            _ => {}
        }
    }

    for n in &file.research {
        for dep in &n.prerequisites {
            if !nodes.contains(dep.as_str()) {
                return Err(ValidationError::DependencyNotFound(dep.0.clone()));
            }
        }
        for b in &n.grants.blueprints {
            if !blueprints.contains(b.as_str()) {
                return Err(ValidationError::DependencyNotFound(b.0.clone()));
            }
        }
        for j in &n.grants.jobs {
            if !jobs.contains(j.as_str()) {
                return Err(ValidationError::DependencyNotFound(j.0.clone()));
            }
        }
    }
    let edges: BTreeMap<&NodeId, &[NodeId]> = file
        .research
        .iter()
        .map(|n| (&n.id, n.prerequisites.as_slice()))
        .collect();
    check_acyclic(&edges)?;

    let u = &file.upgrades;
    validate_upgrade_table(UpgradeTrack::Queue, &u.queue, |a, b| {
        b.parallel >= a.parallel && b.queued >= a.queued
    })?;
    validate_upgrade_table(UpgradeTrack::Staff, &u.staff, |a, b| b >= a)?;
    validate_upgrade_table(UpgradeTrack::Compute, &u.compute, |a, b| b >= a)?;
    validate_upgrade_table(UpgradeTrack::Speed, &u.speed, |a, b| b >= a)?;
    validate_upgrade_table(UpgradeTrack::Money, &u.money, |a, b| b >= a)?;

    if file.level_thresholds.is_empty() || file.level_thresholds.contains(&0) {
        return Err(ValidationError::InvalidLevelThresholds);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Founder, FounderId, Grants, JobDefId, JobDefinition, LevelBonus, QueueSlots, Rewards,
        StartingResources, UnlockNode, Upgrades,
    };
    use rust_decimal::Decimal;

    fn table<V: Clone>(values: &[V]) -> UpgradeTable<V> {
        UpgradeTable {
            ranks: values
                .iter()
                .enumerate()
                .map(|(i, v)| RankDef {
                    required_level: i as u32 + 1,
                    value: v.clone(),
                })
                .collect(),
        }
    }

    fn node(id: &str, deps: &[&str]) -> UnlockNode {
        UnlockNode {
            id: NodeId::new(id),
            name: id.to_string(),
            cost: 10,
            duration_ms: 1_000,
            prerequisites: deps.iter().map(|d| NodeId::new(*d)).collect(),
            min_level: 1,
            grants: Grants::default(),
            perk: None,
            experience: 0,
        }
    }

    fn file(research: Vec<UnlockNode>) -> CatalogFile {
        CatalogFile {
            founders: vec![Founder {
                id: FounderId::new("f"),
                name: "F".into(),
                speed_pct: Decimal::ZERO,
                money_pct: Decimal::ZERO,
            }],
            blueprints: vec![],
            jobs: vec![],
            research,
            upgrades: Upgrades {
                queue: table(&[QueueSlots {
                    parallel: 1,
                    queued: 0,
                }]),
                staff: table(&[1u32, 2]),
                compute: table(&[4u32]),
                speed: table(&[Decimal::ZERO]),
                money: table(&[Decimal::ONE_HUNDRED]),
            },
            level_thresholds: vec![100, 200],
            level_bonus: LevelBonus::default(),
            starting: StartingResources::default(),
        }
    }

    #[test]
    fn accepts_dag() {
        let f = file(vec![node("a", &[]), node("b", &["a"]), node("c", &["a", "b"])]);
        validate_catalog(&f).unwrap();
    }

    #[test]
    fn rejects_cycle() {
        let f = file(vec![node("a", &["c"]), node("b", &["a"]), node("c", &["b"])]);
        assert!(matches!(
            validate_catalog(&f),
            Err(ValidationError::Cycle(_))
        ));
    }

    #[test]
    fn rejects_unknown_prerequisite() {
        let f = file(vec![node("a", &["ghost"])]);
        assert_eq!(
            validate_catalog(&f),
            Err(ValidationError::DependencyNotFound("ghost".into()))
        );
    }

    #[test]
    fn rejects_duplicate_node() {
        let f = file(vec![node("a", &[]), node("a", &[])]);
        assert_eq!(
            validate_catalog(&f),
            Err(ValidationError::DuplicateId("a".into()))
        );
    }

    #[test]
    fn rejects_decreasing_table() {
        let mut f = file(vec![]);
        f.upgrades.staff = table(&[3u32, 1]);
        assert_eq!(
            validate_catalog(&f),
            Err(ValidationError::DecreasingUpgradeTable(UpgradeTrack::Staff))
        );
    }

    fn hire(staff: u32, slots: u32) -> JobDefinition {
        JobDefinition {
            id: JobDefId::new("boost"),
            name: "Boost".into(),
            kind: JobDefKind::Hire {
                staff,
                active: Some(ActiveHireEffect::ParallelSlots(slots)),
            },
            base_duration_ms: 1_000,
            base_cost: 0,
            compute: 0,
            rewards: Rewards::default(),
            cooldown_ms: None,
            min_level: 1,
            requires_unlock: false,
        }
    }

    #[test]
    fn rejects_slots_that_vanish_on_completion() {
        let mut f = file(vec![]);
        f.jobs = vec![hire(0, 2)];
        assert_eq!(
            validate_catalog(&f),
            Err(ValidationError::TemporarySlots {
                job: "boost".into(),
                slots: 2,
                staff: 0
            })
        );
        f.jobs = vec![hire(2, 2)];
        validate_catalog(&f).unwrap();
    }

    #[test]
    fn rejects_zero_threshold() {
        let mut f = file(vec![]);
        f.level_thresholds = vec![100, 0];
        assert_eq!(
            validate_catalog(&f),
            Err(ValidationError::InvalidLevelThresholds)
        );
    }
}
