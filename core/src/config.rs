//! Pipeline configuration.
//!
//! The activation and threshold constants below were chosen empirically.
//! They are kept at their historical values by default and can be overridden
//! from a JSON file for experimentation.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Number of fan-out partitions the fact scan is split into.
    /// Results are identical for any value.
    pub partitions: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { partitions: rayon::current_num_threads().max(1) }
    }
}

/// Signal 1: per-claim billing rate against the regional average.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierSignalConfig {
    /// Distinct qualifying providers a (region, procedure) pair needs.
    pub min_providers: usize,
    /// Claims a provider needs for a procedure to qualify.
    pub min_claims: i64,
    /// Provider rate / regional rate at or above which a pair is an outlier.
    pub ratio_threshold: f64,
    pub points_per_outlier: f64,
}

impl Default for OutlierSignalConfig {
    fn default() -> Self {
        Self {
            min_providers: 5,
            min_claims: 10,
            ratio_threshold: 10.0,
            points_per_outlier: 20.0,
        }
    }
}

/// Signal 2: year-over-year spending growth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthSignalConfig {
    /// Prior-year paid (dollars) must exceed this.
    pub min_prior_paid: f64,
    /// Following-year paid (dollars) must exceed this.
    pub min_current_paid: f64,
    /// Growth at or above which a year pair counts as a spike.
    pub spike_ratio: f64,
    pub points_per_multiple: f64,
}

impl Default for GrowthSignalConfig {
    fn default() -> Self {
        Self {
            min_prior_paid: 10_000.0,
            min_current_paid: 50_000.0,
            spike_ratio: 3.0,
            points_per_multiple: 10.0,
        }
    }
}

/// Signal 3: share of rare procedures in a provider's mix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSignalConfig {
    pub min_claims: i64,
    pub min_procedures: usize,
    /// Regional prevalence below which a procedure is rare.
    pub rarity_threshold: f64,
    pub rare_pct_multiplier: f64,
}

impl Default for MixSignalConfig {
    fn default() -> Self {
        Self {
            min_claims: 5,
            min_procedures: 3,
            rarity_threshold: 0.02,
            rare_pct_multiplier: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub outlier_weight: f64,
    pub growth_weight: f64,
    pub mix_weight: f64,
    pub min_active_signals: usize,
    pub min_composite: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            outlier_weight: 0.4,
            growth_weight: 0.3,
            mix_weight: 0.3,
            min_active_signals: 2,
            min_composite: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub aggregation: AggregationConfig,
    pub outlier: OutlierSignalConfig,
    pub growth: GrowthSignalConfig,
    pub mix: MixSignalConfig,
    pub composite: CompositeConfig,
    /// Upper bound of every per-signal score.
    pub score_cap: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationConfig::default(),
            outlier: OutlierSignalConfig::default(),
            growth: GrowthSignalConfig::default(),
            mix: MixSignalConfig::default(),
            composite: CompositeConfig::default(),
            score_cap: 100.0,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.aggregation.partitions == 0 {
            return Err(PipelineError::Config("aggregation.partitions must be >= 1".into()));
        }
        let non_negative = [
            ("outlier.ratio_threshold", self.outlier.ratio_threshold),
            ("outlier.points_per_outlier", self.outlier.points_per_outlier),
            ("growth.min_prior_paid", self.growth.min_prior_paid),
            ("growth.min_current_paid", self.growth.min_current_paid),
            ("growth.spike_ratio", self.growth.spike_ratio),
            ("growth.points_per_multiple", self.growth.points_per_multiple),
            ("mix.rarity_threshold", self.mix.rarity_threshold),
            ("mix.rare_pct_multiplier", self.mix.rare_pct_multiplier),
            ("composite.min_composite", self.composite.min_composite),
            ("score_cap", self.score_cap),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(PipelineError::Config(format!("{name} must be >= 0, got {value}")));
            }
        }
        if self.outlier.min_claims < 0 || self.mix.min_claims < 0 {
            return Err(PipelineError::Config("claim minimums must be >= 0".into()));
        }
        let c = &self.composite;
        let weight_sum = c.outlier_weight + c.growth_weight + c.mix_weight;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(PipelineError::Config(format!(
                "composite weights must sum to 1, got {weight_sum}"
            )));
        }
        Ok(())
    }

    /// Deterministic single-partition config for tests.
    pub fn default_test() -> Self {
        Self {
            aggregation: AggregationConfig { partitions: 1 },
            ..Self::default()
        }
    }
}
