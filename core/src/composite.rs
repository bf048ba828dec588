//! Composite scorer: merges the three signals into one ranked list.
//!
//! For every provider in any signal:
//!   1. count signals with a non-zero score
//!   2. drop providers below the activation gate
//!   3. weight the three scores into a composite
//!   4. drop composites below the cutoff
//! Survivors are ranked by rounded composite descending, then provider id
//! ascending, so identical inputs always give an identical order.

use crate::{
    aggregate::AggregateSet,
    collaborator::{display_identity, ExclusionRegistry, ExclusionStatus, IdentityLookup},
    config::CompositeConfig,
    signals::{GrowthEvidence, MixEvidence, OutlierEvidence, SignalSet},
    types::{cents_to_dollars, round1, ProviderId},
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub outlier: OutlierEvidence,
    pub growth: GrowthEvidence,
    pub mix: MixEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub provider_id: ProviderId,
    /// Rounded to one decimal.
    pub composite_score: f64,
    pub signals: SignalBreakdown,
    pub active_signal_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub profiles: Vec<RiskProfile>,
    /// Every provider that passed the gate and the cutoff, not just the top N.
    pub total_flagged: usize,
}

/// Score, gate, sort and truncate to `limit`.
pub fn rank(signals: &SignalSet, config: &CompositeConfig, limit: usize) -> Ranking {
    let ids: BTreeSet<ProviderId> = signals
        .outlier
        .keys()
        .chain(signals.growth.keys())
        .chain(signals.mix.keys())
        .copied()
        .collect();

    let mut profiles: Vec<RiskProfile> = ids
        .into_iter()
        .filter_map(|id| {
            let outlier = signals.outlier.get(&id).cloned().unwrap_or_default();
            let growth = signals.growth.get(&id).cloned().unwrap_or_default();
            let mix = signals.mix.get(&id).cloned().unwrap_or_default();

            let active = [outlier.score, growth.score, mix.score]
                .iter()
                .filter(|s| **s > 0.0)
                .count();
            if active < config.min_active_signals {
                return None;
            }

            let composite = config.outlier_weight * outlier.score
                + config.growth_weight * growth.score
                + config.mix_weight * mix.score;
            if composite < config.min_composite {
                return None;
            }

            Some(RiskProfile {
                provider_id: id,
                composite_score: round1(composite),
                signals: SignalBreakdown { outlier, growth, mix },
                active_signal_count: active,
            })
        })
        .collect();

    profiles.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then(a.provider_id.cmp(&b.provider_id))
    });

    let total_flagged = profiles.len();
    profiles.truncate(limit);
    Ranking { profiles, total_flagged }
}

/// A ranked provider with display metadata attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProvider {
    #[serde(flatten)]
    pub profile: RiskProfile,
    pub name: String,
    pub region: String,
    pub city: String,
    pub total_paid: f64,
    pub total_claims: i64,
    pub exclusion: ExclusionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRiskRanking {
    pub providers: Vec<RankedProvider>,
    pub total_flagged: usize,
}

/// Attach identity, lifetime totals and exclusion status to each profile.
///
/// A failed or missing lookup yields defaults for that provider only.
/// `exclusions` is `None` when the registry is not available this run.
pub fn enrich(
    ranking: Ranking,
    aggregates: &AggregateSet,
    identity: &dyn IdentityLookup,
    exclusions: Option<&dyn ExclusionRegistry>,
) -> FraudRiskRanking {
    let providers = ranking
        .profiles
        .into_iter()
        .map(|profile| {
            let id = profile.provider_id;
            let display = display_identity(identity, id);

            let (total_paid, total_claims) = aggregates
                .provider_summary_for(id)
                .map(|s| (cents_to_dollars(s.measures.paid_cents), s.measures.claim_count))
                .unwrap_or((0.0, 0));

            let exclusion = match exclusions {
                Some(registry) => match registry.contains(id) {
                    Ok(Some(record)) => record.into(),
                    Ok(None) => ExclusionStatus::default(),
                    Err(e) => {
                        warn!("Exclusion lookup failed for provider {id}: {e}");
                        ExclusionStatus::default()
                    }
                },
                None => ExclusionStatus::default(),
            };

            RankedProvider {
                profile,
                name: display.name,
                region: display.region,
                city: display.city,
                total_paid,
                total_claims,
                exclusion,
            }
        })
        .collect();

    FraudRiskRanking {
        providers,
        total_flagged: ranking.total_flagged,
    }
}
