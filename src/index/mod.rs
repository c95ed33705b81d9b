//! Hierarchical weighted composite behavior index: two levels (parent,
//! child), renormalized over present-only nodes at each level, with the
//! mobility-family inversion spec.md §9 calls authoritative.

pub mod derived;
pub mod weights;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::harmonizer::{HarmonizationStatus, HarmonizedFeature};
use crate::sources::MobilityKind;
use weights::ParentWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub parent: String,
    pub child: String,
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyIndex {
    pub date: NaiveDate,
    pub composite: f64,
    pub parents: BTreeMap<String, f64>,
    pub children: BTreeMap<String, f64>,
    pub contributions: Vec<Contribution>,
    pub degraded_all_missing: bool,
}

pub struct IndexComputer {
    weights: ParentWeights,
}

impl IndexComputer {
    pub fn new(weights: ParentWeights) -> Self {
        Self { weights }
    }

    /// Computes one `DailyIndex` per date present in any harmonized
    /// feature, renormalizing child weights within each parent over
    /// present children, then parent weights over present parents.
    pub fn compute(&self, features: &[HarmonizedFeature]) -> Vec<DailyIndex> {
        let included: Vec<&HarmonizedFeature> = features
            .iter()
            .filter(|f| f.status == HarmonizationStatus::Included)
            .collect();

        let mut dates: Vec<NaiveDate> = included
            .iter()
            .flat_map(|f| f.values.keys().copied())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        dates.sort();

        dates
            .into_iter()
            .map(|date| self.compute_day(date, &included))
            .collect()
    }

    fn compute_day(&self, date: NaiveDate, features: &[&HarmonizedFeature]) -> DailyIndex {
        let mut by_parent: BTreeMap<String, Vec<(&HarmonizedFeature, f64)>> = BTreeMap::new();
        for feature in features {
            let Some(&value) = feature.values.get(&date) else { continue };
            let Some(parent) = weights::parent_for_child(&feature.child) else { continue };
            by_parent.entry(parent.to_string()).or_default().push((feature, value));
        }

        let mut parent_values = BTreeMap::new();
        let mut child_values = BTreeMap::new();
        let mut contributions = Vec::new();

        for (parent, children) in &by_parent {
            let equal_weight = 1.0 / children.len() as f64;
            let mut weighted_sum = 0.0;
            for (feature, value) in children {
                let child_contribution_value = if parent == weights::MOBILITY {
                    activity_equivalent(feature.mobility_kind, *value)
                } else {
                    *value
                };
                child_values.insert(feature.child.clone(), *value);
                weighted_sum += equal_weight * child_contribution_value;
                contributions.push(Contribution {
                    parent: parent.clone(),
                    child: feature.child.clone(),
                    value: *value,
                    weight: equal_weight,
                });
            }
            let parent_value = if parent == weights::MOBILITY {
                1.0 - weighted_sum
            } else {
                weighted_sum
            };
            parent_values.insert(parent.clone(), parent_value.clamp(0.0, 1.0));
        }

        let pairs = self.weights.as_pairs();
        let present: Vec<(&str, f64, f64)> = pairs
            .iter()
            .filter_map(|(name, weight)| parent_values.get(*name).map(|value| (*name, *value, *weight)))
            .collect();

        let (composite, degraded) = if present.is_empty() {
            (0.5, true)
        } else {
            let weight_sum: f64 = present.iter().map(|(_, _, w)| w).sum();
            let composite = present.iter().map(|(_, v, w)| v * (w / weight_sum)).sum::<f64>();
            (composite.clamp(0.0, 1.0), false)
        };

        DailyIndex {
            date,
            composite,
            parents: parent_values,
            children: child_values,
            contributions,
            degraded_all_missing: degraded,
        }
    }
}

/// Converts a mobility-family child value into activity-space (higher =
/// more activity) so differently-polarized sources average consistently
/// before the single inversion applied at the parent level.
fn activity_equivalent(kind: Option<MobilityKind>, value: f64) -> f64 {
    match kind {
        Some(MobilityKind::AlreadyInverted) => 1.0 - value,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonizer::NormalizationRecord;
    use std::collections::BTreeMap as Map;

    fn feature(child: &str, date: NaiveDate, value: f64, mobility_kind: Option<MobilityKind>) -> HarmonizedFeature {
        let mut values = Map::new();
        values.insert(date, value);
        HarmonizedFeature {
            source_id: "test".into(),
            feature: child.into(),
            child: child.into(),
            values,
            coverage_ratio: 1.0,
            status: HarmonizationStatus::Included,
            normalization: NormalizationRecord::FixedRange { min: 0.0, max: 1.0 },
            mobility_kind,
        }
    }

    #[test]
    fn single_parent_present_matches_weighted_mean_invariant() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let features = vec![
            feature("market_volatility", date, 0.4, None),
            feature("fuel_stress", date, 0.8, None),
        ];
        let computer = IndexComputer::new(ParentWeights::DEFAULT);
        let result = computer.compute(&features);
        assert_eq!(result.len(), 1);
        let day = &result[0];
        assert!(!day.degraded_all_missing);
        let expected = (0.4 + 0.8) / 2.0;
        assert!((day.parents["economic_stress"] - expected).abs() < 1e-9);
        assert!((day.composite - expected).abs() < 1e-9);
    }

    #[test]
    fn all_missing_falls_back_to_neutral() {
        let computer = IndexComputer::new(ParentWeights::DEFAULT);
        let result = computer.compute(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn mobility_inverts_activity_into_stress() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let features = vec![feature("osm_activity", date, 0.9, Some(MobilityKind::Activity))];
        let computer = IndexComputer::new(ParentWeights::DEFAULT);
        let result = computer.compute(&features);
        let day = &result[0];
        assert!((day.parents["mobility_activity"] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn values_stay_within_unit_interval() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let features = vec![
            feature("market_volatility", date, 1.0, None),
            feature("weather_discomfort", date, 1.0, None),
            feature("osm_activity", date, 0.0, Some(MobilityKind::Activity)),
            feature("media_attention", date, 1.0, None),
            feature("health_risk_proxy", date, 1.0, None),
        ];
        let computer = IndexComputer::new(ParentWeights::DEFAULT);
        let day = &computer.compute(&features)[0];
        assert!((0.0..=1.0).contains(&day.composite));
        for value in day.parents.values() {
            assert!((0.0..=1.0).contains(value));
        }
    }
}
