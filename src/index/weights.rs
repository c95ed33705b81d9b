//! Default and configured parent weights for the behavior index.

use crate::error::AppError;

pub const ECONOMIC: &str = "economic_stress";
pub const ENVIRONMENTAL: &str = "environmental_stress";
pub const MOBILITY: &str = "mobility_activity";
pub const DIGITAL: &str = "digital_attention";
pub const PUBLIC_HEALTH: &str = "public_health_stress";

#[derive(Debug, Clone, Copy)]
pub struct ParentWeights {
    pub economic: f64,
    pub environmental: f64,
    pub mobility: f64,
    pub digital: f64,
    pub health: f64,
}

impl ParentWeights {
    pub const DEFAULT: ParentWeights = ParentWeights {
        economic: 0.25,
        environmental: 0.25,
        mobility: 0.20,
        digital: 0.15,
        health: 0.15,
    };

    /// Validates `weight >= 0` for every parent and `sum > 0`, then
    /// renormalizes so the weights sum to exactly 1. Fails with
    /// `invalid_configuration` precisely when the sum is non-positive, per
    /// the constructor contract.
    pub fn new(economic: f64, environmental: f64, mobility: f64, digital: f64, health: f64) -> Result<Self, AppError> {
        for (name, weight) in [
            ("economic", economic),
            ("environmental", environmental),
            ("mobility", mobility),
            ("digital", digital),
            ("health", health),
        ] {
            if weight < 0.0 {
                return Err(AppError::invalid_configuration(format!(
                    "{name}_weight must be >= 0, got {weight}"
                )));
            }
        }
        let sum = economic + environmental + mobility + digital + health;
        if sum <= 0.0 {
            return Err(AppError::invalid_configuration(
                "parent weights must sum to a strictly positive value",
            ));
        }
        Ok(Self {
            economic: economic / sum,
            environmental: environmental / sum,
            mobility: mobility / sum,
            digital: digital / sum,
            health: health / sum,
        })
    }

    pub fn as_pairs(&self) -> [(&'static str, f64); 5] {
        [
            (ECONOMIC, self.economic),
            (ENVIRONMENTAL, self.environmental),
            (MOBILITY, self.mobility),
            (DIGITAL, self.digital),
            (PUBLIC_HEALTH, self.health),
        ]
    }
}

impl Default for ParentWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which parent each child sub-index belongs to, per spec.md §4.5's table.
pub fn parent_for_child(child: &str) -> Option<&'static str> {
    match child {
        "market_volatility" | "fuel_stress" | "consumer_sentiment" => Some(ECONOMIC),
        "weather_discomfort" | "drought_stress" | "heatwave_stress" | "flood_risk_stress"
        | "storm_severity_stress" => Some(ENVIRONMENTAL),
        "osm_activity" | "transit_activity" => Some(MOBILITY),
        "media_attention" | "search_interest" => Some(DIGITAL),
        "health_risk_proxy" => Some(PUBLIC_HEALTH),
        _ => None,
    }
}

/// Every child sub-index name across the full tree, regardless of whether
/// it contributed to a given day. The denominator for `data_quality.
/// completeness` (SPEC_FULL.md §3: `present_children / total_children`).
pub const ALL_CHILDREN: &[&str] = &[
    "market_volatility",
    "fuel_stress",
    "consumer_sentiment",
    "weather_discomfort",
    "drought_stress",
    "heatwave_stress",
    "flood_risk_stress",
    "storm_severity_stress",
    "osm_activity",
    "transit_activity",
    "media_attention",
    "search_interest",
    "health_risk_proxy",
];
