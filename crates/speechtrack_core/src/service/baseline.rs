//! Baseline estimation.
//!
//! # Responsibility
//! - Decide which of a user's features are eligible for a baseline.
//! - Derive median/population-sigma bands from the most recent values.
//!
//! # Invariants
//! - Only the user's own measurements are sampled.
//! - The band is a pure function of the sampled multiset: values are sorted
//!   before aggregation so recomputation is bit-identical.
//! - Earlier baselines are never read; each refresh starts from scratch.

use crate::config::TrackingPolicy;
use crate::model::baseline::Baseline;
use crate::repo::assessment_repo::AssessmentRepository;
use crate::repo::baseline_repo::BaselineRepository;
use crate::repo::RepoResult;
use log::debug;

/// Central value and band derived from one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub central: f64,
    pub spread: f64,
    pub upper: f64,
    pub lower: f64,
    pub sample_size: u32,
}

/// Computes and persists baselines according to a `TrackingPolicy`.
#[derive(Debug, Clone, Copy)]
pub struct BaselineEstimator<'p> {
    policy: &'p TrackingPolicy,
}

impl<'p> BaselineEstimator<'p> {
    pub fn new(policy: &'p TrackingPolicy) -> Self {
        Self { policy }
    }

    /// Band for one sample; `None` when the sample is too small.
    pub fn estimate(&self, values: &[f64]) -> Option<BaselineStats> {
        if values.len() < self.policy.min_measurements as usize {
            return None;
        }
        compute_stats(values, self.policy.threshold_sigma)
    }

    /// Recomputes every eligible baseline of `user_id` and returns the rows
    /// written, sorted by feature name.
    ///
    /// Writes nothing when the user has fewer than `min_assessments`
    /// assessments.
    pub fn refresh<A, B>(
        &self,
        assessments: &A,
        baselines: &B,
        user_id: &str,
        now_ms: i64,
    ) -> RepoResult<Vec<Baseline>>
    where
        A: AssessmentRepository,
        B: BaselineRepository,
    {
        let assessment_count = assessments.count_assessments(user_id)?;
        if assessment_count < self.policy.min_assessments {
            debug!(
                "event=baseline_refresh module=baseline status=skipped user_id={} assessments={} required={}",
                user_id, assessment_count, self.policy.min_assessments
            );
            return Ok(Vec::new());
        }

        let eligible = assessments.feature_counts(user_id, self.policy.min_measurements)?;
        let mut written = Vec::with_capacity(eligible.len());
        for (feature_name, _) in eligible {
            let recent =
                assessments.recent_feature_values(user_id, &feature_name, self.policy.window)?;
            let Some(stats) = self.estimate(&recent) else {
                continue;
            };

            let baseline = Baseline {
                user_id: user_id.to_string(),
                feature_name,
                central: stats.central,
                upper: stats.upper,
                lower: stats.lower,
                sample_size: stats.sample_size,
                updated_at: now_ms,
            };
            baselines.replace_baseline(&baseline)?;
            written.push(baseline);
        }

        debug!(
            "event=baseline_refresh module=baseline status=ok user_id={} assessments={} baselines={}",
            user_id,
            assessment_count,
            written.len()
        );
        Ok(written)
    }
}

/// Median / population standard deviation band, `None` for an empty sample.
pub fn compute_stats(values: &[f64], threshold_sigma: f64) -> Option<BaselineStats> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let central = median_of_sorted(&sorted);
    let spread = population_std_dev(&sorted);
    Some(BaselineStats {
        central,
        spread,
        upper: central + threshold_sigma * spread,
        lower: central - threshold_sigma * spread,
        sample_size: u32::try_from(sorted.len()).unwrap_or(u32::MAX),
    })
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn population_std_dev(values: &[f64]) -> f64 {
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values
        .iter()
        .map(|value| {
            let delta = value - mean;
            delta * delta
        })
        .sum::<f64>()
        / count;
    variance.sqrt()
}
