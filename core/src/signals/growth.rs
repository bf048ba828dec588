//! Signal 2: year-over-year growth in a provider's total paid.

use crate::{
    aggregate::AggregateSet,
    config::GrowthSignalConfig,
    types::{cents_to_dollars, ratio, Cents, ProviderId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthEvidence {
    pub max_yoy: f64,
    /// Qualifying year pairs with growth at or above the spike ratio.
    pub years_3x: u32,
    pub score: f64,
}

pub fn score(max_yoy: f64, config: &GrowthSignalConfig, cap: f64) -> f64 {
    if max_yoy > 1.0 {
        ((max_yoy - 1.0) * config.points_per_multiple).min(cap)
    } else {
        0.0
    }
}

/// Only providers with at least one qualifying consecutive-year pair appear
/// in the result.
pub fn extract(
    aggregates: &AggregateSet,
    config: &GrowthSignalConfig,
    cap: f64,
) -> BTreeMap<ProviderId, GrowthEvidence> {
    let mut annual: BTreeMap<(ProviderId, i32), Cents> = BTreeMap::new();
    for row in &aggregates.provider_monthly {
        *annual.entry((row.provider_id, row.period.year)).or_default() += row.measures.paid_cents;
    }

    let mut out: BTreeMap<ProviderId, GrowthEvidence> = BTreeMap::new();
    for (&(provider_id, year), &prior) in &annual {
        let Some(&current) = annual.get(&(provider_id, year + 1)) else {
            continue;
        };
        let (prior, current) = (cents_to_dollars(prior), cents_to_dollars(current));
        if prior <= config.min_prior_paid || current <= config.min_current_paid {
            continue;
        }
        let Some(growth) = ratio(current, prior) else {
            continue;
        };

        let evidence = out.entry(provider_id).or_insert(GrowthEvidence {
            max_yoy: growth,
            ..GrowthEvidence::default()
        });
        evidence.max_yoy = evidence.max_yoy.max(growth);
        if growth >= config.spike_ratio {
            evidence.years_3x += 1;
        }
    }

    for evidence in out.values_mut() {
        evidence.score = score(evidence.max_yoy, config, cap);
    }
    out
}
