use lab_core::{
    Catalog, Denial, EngineError, EngineResult, OwnerState, Resource, Unmet, UpgradeTrack,
};
use tracing::info;

/// Add experience and roll over every threshold it crosses. Each level
/// gained grants one upgrade point. Returns the levels reached, in order.
pub fn apply_experience(catalog: &Catalog, state: &mut OwnerState, experience: u64) -> Vec<u32> {
    state.experience = state.experience.saturating_add(experience);
    let mut reached = Vec::new();
    while state.level < catalog.max_level() {
        let Some(threshold) = catalog.threshold_for(state.level) else {
            break;
        };
        if state.experience < threshold {
            break;
        }
        state.experience -= threshold;
        state.level += 1;
        state.upgrade_points += 1;
        reached.push(state.level);
        info!(owner = %state.id, level = state.level, "level up");
    }
    reached
}

/// Spend one upgrade point to raise `track` by one rank. Returns the new rank.
pub fn purchase_upgrade(
    catalog: &Catalog,
    state: &mut OwnerState,
    track: UpgradeTrack,
) -> EngineResult<u32> {
    let current = state.ranks.get(track);
    let max = catalog.upgrades.max_rank(track);
    if current >= max {
        return Err(EngineError::PrerequisiteUnmet(Unmet::MaxRank { track, max }));
    }
    let next = current + 1;
    let required = catalog.upgrades.required_level(track, next).ok_or(
        EngineError::AdmissionDenied(Denial::CapacityUnknown { track, rank: next }),
    )?;
    if state.level < required {
        return Err(EngineError::PrerequisiteUnmet(Unmet::Level {
            required,
            current: state.level,
        }));
    }
    if state.upgrade_points == 0 {
        return Err(EngineError::shortfall(Resource::UpgradePoints, 1, 0));
    }
    state.upgrade_points -= 1;
    *state.ranks.get_mut(track) = next;
    info!(owner = %state.id, %track, rank = next, "upgrade purchased");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, t0};
    use lab_core::{FounderId, OwnerId};

    fn state() -> OwnerState {
        OwnerState::new(OwnerId::new("p"), FounderId::new("hacker"), t0())
    }

    #[test]
    fn single_level_rolls_over() {
        let c = catalog();
        let mut s = state();
        assert!(apply_experience(&c, &mut s, 99).is_empty());
        assert_eq!(apply_experience(&c, &mut s, 11), vec![2]);
        assert_eq!(s.experience, 10);
        assert_eq!(s.upgrade_points, 1);
    }

    #[test]
    fn large_reward_cascades() {
        let c = catalog();
        let mut s = state();
        // 100 to reach 2, 250 more to reach 3
        assert_eq!(apply_experience(&c, &mut s, 400), vec![2, 3]);
        assert_eq!((s.level, s.experience, s.upgrade_points), (3, 50, 2));
    }

    #[test]
    fn max_level_keeps_accumulating() {
        let c = catalog();
        let mut s = state();
        s.level = c.max_level();
        assert!(apply_experience(&c, &mut s, 1_000_000).is_empty());
        assert_eq!(s.level, c.max_level());
        assert_eq!(s.experience, 1_000_000);
    }

    #[test]
    fn upgrade_needs_point_and_level() {
        let c = catalog();
        let mut s = state();
        assert_eq!(
            purchase_upgrade(&c, &mut s, UpgradeTrack::Queue).unwrap_err(),
            EngineError::PrerequisiteUnmet(Unmet::Level {
                required: 2,
                current: 1
            })
        );
        s.level = 2;
        let err = purchase_upgrade(&c, &mut s, UpgradeTrack::Queue).unwrap_err();
        assert_eq!(err.shortfalls()[0].resource, Resource::UpgradePoints);
        s.upgrade_points = 1;
        assert_eq!(purchase_upgrade(&c, &mut s, UpgradeTrack::Queue).unwrap(), 1);
        assert_eq!(s.upgrade_points, 0);
        assert_eq!(s.ranks.queue, 1);
    }

    #[test]
    fn max_rank_is_reported() {
        let c = catalog();
        let mut s = state();
        s.level = c.max_level();
        s.upgrade_points = 10;
        for _ in 0..3 {
            purchase_upgrade(&c, &mut s, UpgradeTrack::Staff).unwrap();
        }
        assert_eq!(
            purchase_upgrade(&c, &mut s, UpgradeTrack::Staff).unwrap_err(),
            EngineError::PrerequisiteUnmet(Unmet::MaxRank {
                track: UpgradeTrack::Staff,
                max: 3
            })
        );
        assert_eq!(s.upgrade_points, 7);
    }
}
