//! Deviation classification against a personal baseline.
//!
//! # Invariants
//! - No baseline, or a collapsed band (`upper == lower`), never yields an
//!   alert, however extreme the value.
//! - Output depends only on the value, the baseline and the cutoffs.

use crate::config::SeverityCutoffs;
use crate::model::alert::{NewAlert, Severity};
use crate::model::assessment::FeatureMeasurement;
use crate::model::baseline::Baseline;
use std::collections::BTreeMap;

/// Scored deviation of one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    /// `value - central`; the sign gives the direction of change.
    pub deviation: f64,
    pub z_score: f64,
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviationClassifier {
    cutoffs: SeverityCutoffs,
}

impl DeviationClassifier {
    pub fn new(cutoffs: SeverityCutoffs) -> Self {
        Self { cutoffs }
    }

    /// Scores `value` against `baseline`.
    ///
    /// Returns `None` when no score can be computed (no baseline or zero
    /// threshold range).
    pub fn score(&self, baseline: Option<&Baseline>, value: f64) -> Option<Deviation> {
        let baseline = baseline?;
        let threshold_range = baseline.threshold_range();
        if !(threshold_range > 0.0) || !threshold_range.is_finite() {
            return None;
        }

        let deviation = value - baseline.central;
        let z_score = deviation.abs() / threshold_range;
        Some(Deviation {
            deviation,
            z_score,
            severity: self.cutoffs.tier(z_score),
        })
    }

    /// Builds the alert for one measurement, if it deviates enough.
    pub fn classify(
        &self,
        baseline: Option<&Baseline>,
        user_id: &str,
        assessment_id: &str,
        measurement: &FeatureMeasurement,
    ) -> Option<NewAlert> {
        let scored = self.score(baseline, measurement.value)?;
        let severity = scored.severity?;
        Some(NewAlert {
            user_id: user_id.to_string(),
            assessment_id: assessment_id.to_string(),
            feature_name: measurement.feature_name.clone(),
            value: measurement.value,
            deviation: scored.deviation,
            z_score: scored.z_score,
            severity,
        })
    }

    /// Classifies every measurement of one assessment.
    ///
    /// Baselines belonging to other users are ignored.
    pub fn classify_assessment(
        &self,
        baselines: &[Baseline],
        user_id: &str,
        assessment_id: &str,
        measurements: &[FeatureMeasurement],
    ) -> Vec<NewAlert> {
        let by_feature: BTreeMap<&str, &Baseline> = baselines
            .iter()
            .filter(|baseline| baseline.user_id == user_id)
            .map(|baseline| (baseline.feature_name.as_str(), baseline))
            .collect();

        measurements
            .iter()
            .filter_map(|measurement| {
                let baseline = by_feature.get(measurement.feature_name.as_str()).copied();
                self.classify(baseline, user_id, assessment_id, measurement)
            })
            .collect()
    }
}
