//! Signal extractors.
//!
//! Each signal is a pure function of an aggregate snapshot. Absence of a
//! provider from a signal's map means a score of 0 for that signal.

pub mod growth;
pub mod mix;
pub mod outlier;

pub use growth::GrowthEvidence;
pub use mix::MixEvidence;
pub use outlier::OutlierEvidence;

use crate::{
    aggregate::AggregateSet, collaborator::RegionLookup, config::PipelineConfig,
    types::ProviderId,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output of all three extractors over one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub outlier: BTreeMap<ProviderId, OutlierEvidence>,
    pub growth: BTreeMap<ProviderId, GrowthEvidence>,
    pub mix: BTreeMap<ProviderId, MixEvidence>,
}

/// Run the three extractors in parallel.
pub fn extract_signals(
    aggregates: &AggregateSet,
    regions: &dyn RegionLookup,
    config: &PipelineConfig,
) -> SignalSet {
    let cap = config.score_cap;
    let (outlier, (growth, mix)) = rayon::join(
        || outlier::extract(aggregates, regions, &config.outlier, cap),
        || {
            rayon::join(
                || growth::extract(aggregates, &config.growth, cap),
                || mix::extract(aggregates, regions, &config.mix, cap),
            )
        },
    );
    info!(
        "Signals extracted: {} billing-rate, {} growth, {} procedure-mix",
        outlier.len(),
        growth.len(),
        mix.len()
    );
    SignalSet { outlier, growth, mix }
}
