//! Per-user, per-feature baseline record.

use crate::model::user::UserId;
use serde::{Deserialize, Serialize};

/// Personal reference band for one (user, feature) pair.
///
/// Replaced wholesale on every recomputation; there is never more than one
/// live row per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub user_id: UserId,
    pub feature_name: String,
    /// Median of the sampled values.
    pub central: f64,
    pub upper: f64,
    pub lower: f64,
    /// Number of measurements the band was derived from.
    pub sample_size: u32,
    pub updated_at: i64,
}

impl Baseline {
    /// Approximate one-sigma width implied by a +/-2 sigma band.
    pub fn threshold_range(&self) -> f64 {
        (self.upper - self.lower) / 4.0
    }

    /// Returns whether `value` lies inside the band (inclusive).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}
