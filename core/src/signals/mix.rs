//! Signal 3: share of regionally rare procedures in a provider's mix.

use crate::{
    aggregate::AggregateSet,
    collaborator::RegionLookup,
    config::MixSignalConfig,
    types::{ratio, ProviderId, RegionCode},
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixEvidence {
    /// Distinct procedures the provider billed with enough claims.
    pub total_procs: u32,
    /// How many of those are rare in the provider's region.
    pub rare_procs: u32,
    pub rare_pct: f64,
    pub score: f64,
}

pub fn score(rare_pct: f64, config: &MixSignalConfig, cap: f64) -> f64 {
    (rare_pct * config.rare_pct_multiplier).min(cap)
}

/// Prevalence of a procedure in a region is the number of providers billing
/// it with at least `min_claims` claims, over every provider in the region
/// that has any billing at all.
pub fn extract(
    aggregates: &AggregateSet,
    regions: &dyn RegionLookup,
    config: &MixSignalConfig,
    cap: f64,
) -> BTreeMap<ProviderId, MixEvidence> {
    let mut region_providers: FxHashMap<&RegionCode, FxHashSet<ProviderId>> = FxHashMap::default();
    let mut prevalence: FxHashMap<(&RegionCode, &str), u64> = FxHashMap::default();
    let mut qualifying: BTreeMap<ProviderId, (&RegionCode, Vec<&str>)> = BTreeMap::new();

    for row in &aggregates.provider_procedure {
        let Some(region) = regions.lookup_region(row.provider_id) else {
            continue;
        };
        region_providers.entry(region).or_default().insert(row.provider_id);
        if row.measures.claim_count >= config.min_claims {
            *prevalence.entry((region, row.procedure_code.as_str())).or_default() += 1;
            qualifying
                .entry(row.provider_id)
                .or_insert_with(|| (region, Vec::new()))
                .1
                .push(row.procedure_code.as_str());
        }
    }

    let mut out = BTreeMap::new();
    for (provider_id, (region, procedures)) in qualifying {
        if procedures.len() < config.min_procedures {
            continue;
        }
        let population = region_providers.get(region).map_or(0, |s| s.len()) as f64;
        let rare_procs = procedures
            .iter()
            .filter(|code| {
                let n = prevalence.get(&(region, **code)).copied().unwrap_or(0) as f64;
                ratio(n, population).is_some_and(|share| share < config.rarity_threshold)
            })
            .count() as u32;
        let total_procs = procedures.len() as u32;
        let rare_pct = ratio(rare_procs as f64, total_procs as f64).unwrap_or(0.0);
        out.insert(
            provider_id,
            MixEvidence {
                total_procs,
                rare_procs,
                rare_pct,
                score: score(rare_pct, config, cap),
            },
        );
    }
    out
}
