#![deny(warnings)]

//! Leaderboard aggregation over scored artifact history.
//!
//! Per-blueprint summaries pick the best version by score (earliest version
//! wins ties). Cross-owner rankings only ever look at public artifacts and
//! use dense ranks: tied scores share a rank and the next rank is `tie + 1`.

use lab_core::{BlueprintId, OwnerId, ScoredArtifact};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Version statistics for one blueprint of one owner's history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlueprintSummary {
    pub owner: OwnerId,
    pub blueprint: BlueprintId,
    pub latest: ScoredArtifact,
    pub best: ScoredArtifact,
    pub version_count: usize,
    pub public_count: usize,
}

/// A ranked owner on a blueprint leaderboard.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedEntry {
    pub rank: u32,
    pub owner: OwnerId,
    pub artifact: ScoredArtifact,
}

/// A ranked owner across all blueprints.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OwnerStanding {
    pub rank: u32,
    pub owner: OwnerId,
    /// Sum of the owner's public best score per blueprint.
    pub total_score: Decimal,
    pub blueprints: usize,
}

fn beats(a: &ScoredArtifact, b: &ScoredArtifact) -> bool {
    a.score > b.score || (a.score == b.score && a.version < b.version)
}

/// Max by score, ties broken by lowest version.
pub fn best_of<'a, I>(artifacts: I) -> Option<&'a ScoredArtifact>
where
    I: IntoIterator<Item = &'a ScoredArtifact>,
{
    artifacts.into_iter().fold(None, |best, a| match best {
        Some(b) if !beats(a, b) => Some(b),
        _ => Some(a),
    })
}

/// Group a flat history by owner and blueprint, in (owner, blueprint) order.
/// Versions only compare within one owner's line.
pub fn aggregate(artifacts: &[ScoredArtifact]) -> Vec<BlueprintSummary> {
    let mut groups: BTreeMap<(&OwnerId, &BlueprintId), Vec<&ScoredArtifact>> = BTreeMap::new();
    for a in artifacts {
        groups.entry((&a.owner, &a.blueprint)).or_default().push(a);
    }
    groups
        .into_iter()
        .filter_map(|((owner, blueprint), items)| {
            let best = best_of(items.iter().copied())?;
            let latest = items.iter().copied().max_by_key(|a| a.version)?;
            Some(BlueprintSummary {
                owner: owner.clone(),
                blueprint: blueprint.clone(),
                latest: latest.clone(),
                best: best.clone(),
                version_count: items.len(),
                public_count: items.iter().filter(|a| a.is_public()).count(),
            })
        })
        .collect()
}

/// Artifacts `viewer` may see: every public one plus their own private ones.
pub fn visible_to<'a>(viewer: &OwnerId, artifacts: &'a [ScoredArtifact]) -> Vec<&'a ScoredArtifact> {
    artifacts.iter().filter(|a| a.visible_to(viewer)).collect()
}

fn dense_ranks(scores: &[Decimal]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(scores.len());
    let mut rank = 0u32;
    let mut prev: Option<Decimal> = None;
    for s in scores {
        if prev != Some(*s) {
            rank += 1;
            prev = Some(*s);
        }
        ranks.push(rank);
    }
    ranks
}

/// Dense ranking of owners by their best public artifact of `blueprint`.
pub fn global_ranking(blueprint: &BlueprintId, artifacts: &[ScoredArtifact]) -> Vec<RankedEntry> {
    let mut per_owner: BTreeMap<&OwnerId, Vec<&ScoredArtifact>> = BTreeMap::new();
    for a in artifacts
        .iter()
        .filter(|a| a.is_public() && &a.blueprint == blueprint)
    {
        per_owner.entry(&a.owner).or_default().push(a);
    }
    let mut bests: Vec<&ScoredArtifact> = per_owner
        .into_values()
        .filter_map(|items| best_of(items))
        .collect();
    bests.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.owner.cmp(&b.owner))
    });
    let scores: Vec<Decimal> = bests.iter().map(|a| a.score).collect();
    let entries: Vec<RankedEntry> = dense_ranks(&scores)
        .into_iter()
        .zip(bests)
        .map(|(rank, a)| RankedEntry {
            rank,
            owner: a.owner.clone(),
            artifact: a.clone(),
        })
        .collect();
    debug!(blueprint = %blueprint, entries = entries.len(), "ranked blueprint");
    entries
}

/// Rank of `owner` on the `blueprint` leaderboard, if they have a public entry.
pub fn rank_of(owner: &OwnerId, blueprint: &BlueprintId, artifacts: &[ScoredArtifact]) -> Option<u32> {
    global_ranking(blueprint, artifacts)
        .into_iter()
        .find(|e| &e.owner == owner)
        .map(|e| e.rank)
}

/// Dense ranking of owners by the sum of their public best scores.
pub fn owner_standings(artifacts: &[ScoredArtifact]) -> Vec<OwnerStanding> {
    let mut groups: BTreeMap<(&OwnerId, &BlueprintId), Vec<&ScoredArtifact>> = BTreeMap::new();
    for a in artifacts.iter().filter(|a| a.is_public()) {
        groups.entry((&a.owner, &a.blueprint)).or_default().push(a);
    }
    let mut totals: BTreeMap<&OwnerId, (Decimal, usize)> = BTreeMap::new();
    for ((owner, _), items) in groups {
        if let Some(best) = best_of(items) {
            let entry = totals.entry(owner).or_insert((Decimal::ZERO, 0));
            entry.0 += best.score;
            entry.1 += 1;
        }
    }
    let mut rows: Vec<(&OwnerId, Decimal, usize)> =
        totals.into_iter().map(|(o, (s, n))| (o, s, n)).collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let scores: Vec<Decimal> = rows.iter().map(|r| r.1).collect();
    dense_ranks(&scores)
        .into_iter()
        .zip(rows)
        .map(|(rank, (owner, total_score, blueprints))| OwnerStanding {
            rank,
            owner: owner.clone(),
            total_score,
            blueprints,
        })
        .collect()
}
