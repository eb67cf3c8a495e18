#![deny(warnings)]

//! Core domain models and invariants for the AI lab progression engine.
//!
//! This crate defines the serializable types shared by every other crate:
//! identifiers, jobs and their lifecycle guards, per-owner progression state,
//! scored artifacts, the read-only content [`Catalog`] and the
//! [`EngineError`] taxonomy returned from every engine entry point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod artifact;
mod catalog;
mod error;
mod job;
mod owner;
mod validate;

pub use artifact::*;
pub use catalog::*;
pub use error::*;
pub use job::*;
pub use owner::*;
pub use validate::*;

/// Millisecond-precision instant. Used for both real and effective time.
pub type Timestamp = DateTime<Utc>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Player identifier, e.g. "player-1".
    OwnerId
);
string_id!(
    /// Job definition identifier in the catalog, e.g. "contract-chatbot".
    JobDefId
);
string_id!(
    /// Research node identifier, e.g. "transformers".
    NodeId
);
string_id!(
    /// Trainable model blueprint identifier, e.g. "llm-small".
    BlueprintId
);
string_id!(
    /// Founder archetype identifier, e.g. "hacker".
    FounderId
);

/// Engine-assigned job identifier. Monotonic across all owners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine configuration parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed for deterministic training scores.
    pub rng_seed: u64,
    /// Half-width of the multiplicative score noise, in [0, 1).
    pub score_noise_frac: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rng_seed: 42,
            score_noise_frac: 0.05,
        }
    }
}

/// Shift `ts` by `ms` milliseconds, saturating at the representable range.
pub fn add_millis(ts: Timestamp, ms: i64) -> Timestamp {
    let target = ts.timestamp_millis().saturating_add(ms);
    DateTime::<Utc>::from_timestamp_millis(target).unwrap_or(ts)
}

/// Signed milliseconds from `from` to `to`.
pub fn millis_between(from: Timestamp, to: Timestamp) -> i64 {
    to.timestamp_millis() - from.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_display_as_inner_string() {
        assert_eq!(OwnerId::new("p1").to_string(), "p1");
        assert_eq!(JobId(7).to_string(), "7");
    }

    #[test]
    fn millis_helpers_agree() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = add_millis(t0, 1_500);
        assert_eq!(millis_between(t0, t1), 1_500);
        assert_eq!(add_millis(t1, -1_500), t0);
    }

    #[test]
    fn config_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.rng_seed, 42);
        assert!(cfg.score_noise_frac < 1.0);
    }
}
