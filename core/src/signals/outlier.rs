//! Signal 1: providers billing far above the regional per-claim average.

use crate::{
    aggregate::{AggregateSet, Measures},
    collaborator::RegionLookup,
    config::OutlierSignalConfig,
    types::{ratio, Cents, ProviderId, RegionCode},
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierEvidence {
    /// Procedures billed at or above the ratio threshold.
    pub procs_10x: u32,
    /// Largest ratio across every qualifying procedure, outlier or not.
    pub max_ratio: f64,
    /// Paid on outlier procedures only.
    pub outlier_spend_cents: Cents,
    pub score: f64,
}

pub fn score(procs_10x: u32, config: &OutlierSignalConfig, cap: f64) -> f64 {
    if procs_10x == 0 {
        return 0.0;
    }
    (procs_10x as f64 * config.points_per_outlier).min(cap)
}

#[derive(Default)]
struct Pool {
    measures: Measures,
    providers: usize,
}

pub fn extract(
    aggregates: &AggregateSet,
    regions: &dyn RegionLookup,
    config: &OutlierSignalConfig,
    cap: f64,
) -> BTreeMap<ProviderId, OutlierEvidence> {
    let qualifying: Vec<(&RegionCode, _)> = aggregates
        .provider_procedure
        .iter()
        .filter(|r| r.measures.claim_count >= config.min_claims)
        .filter_map(|r| regions.lookup_region(r.provider_id).map(|region| (region, r)))
        .collect();

    // Provider-procedure rows are unique per provider, so one row is one
    // distinct provider in its pool.
    let mut pools: FxHashMap<(&RegionCode, &str), Pool> = FxHashMap::default();
    for (region, row) in &qualifying {
        let pool = pools.entry((*region, row.procedure_code.as_str())).or_default();
        pool.measures.add(&row.measures);
        pool.providers += 1;
    }

    let mut out: BTreeMap<ProviderId, OutlierEvidence> = BTreeMap::new();
    for (region, row) in &qualifying {
        let pool = &pools[&(*region, row.procedure_code.as_str())];
        if pool.providers < config.min_providers {
            continue;
        }
        let Some(regional_avg) = pool.measures.avg_paid_per_claim().filter(|avg| *avg > 0.0)
        else {
            continue;
        };
        let Some(r) = row
            .measures
            .avg_paid_per_claim()
            .and_then(|provider_avg| ratio(provider_avg, regional_avg))
        else {
            continue;
        };

        let evidence = out.entry(row.provider_id).or_default();
        if r > evidence.max_ratio {
            evidence.max_ratio = r;
        }
        if r >= config.ratio_threshold {
            evidence.procs_10x += 1;
            evidence.outlier_spend_cents += row.measures.paid_cents;
        }
    }

    for evidence in out.values_mut() {
        evidence.score = score(evidence.procs_10x, config, cap);
    }
    out
}
