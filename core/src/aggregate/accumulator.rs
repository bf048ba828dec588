//! Mergeable per-key accumulators fed from a single pass over the facts.

use super::Measures;
use crate::{
    fact::ClaimFact,
    types::{Period, ProcedureCode, ProviderId, RegionCode},
};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
pub(crate) struct RegionCell {
    pub measures: Measures,
    pub providers: FxHashSet<ProviderId>,
}

/// One shard's worth of accumulation state.
///
/// Every update is a sum or a set insert, so merging shards in any order
/// yields the same final state.
#[derive(Debug, Default)]
pub struct FanOutAccumulator {
    pub(crate) provider_period: FxHashMap<(ProviderId, Period), Measures>,
    pub(crate) provider_procedure: FxHashMap<(ProviderId, ProcedureCode), Measures>,
    pub(crate) procedure_period: FxHashMap<(ProcedureCode, Period), Measures>,
    pub(crate) region_period: FxHashMap<(RegionCode, Period), RegionCell>,
    /// Totals over every fact seen, for the conservation check.
    pub(crate) scanned: Measures,
    /// Totals over facts whose provider had a region.
    pub(crate) mapped: Measures,
    pub(crate) facts_seen: u64,
    pub(crate) unmapped_facts: u64,
}

impl FanOutAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fact into every grain it belongs to.
    pub fn observe(&mut self, fact: &ClaimFact, region: Option<&RegionCode>) {
        let m = Measures {
            claim_count: fact.claim_count,
            paid_cents: fact.paid_cents,
            beneficiary_count: fact.beneficiary_count,
        };

        self.provider_period
            .entry((fact.provider_id, fact.period))
            .or_default()
            .add(&m);
        self.provider_procedure
            .entry((fact.provider_id, fact.procedure_code.clone()))
            .or_default()
            .add(&m);
        self.procedure_period
            .entry((fact.procedure_code.clone(), fact.period))
            .or_default()
            .add(&m);

        match region {
            Some(region) => {
                let cell = self
                    .region_period
                    .entry((region.clone(), fact.period))
                    .or_default();
                cell.measures.add(&m);
                cell.providers.insert(fact.provider_id);
                self.mapped.add(&m);
            }
            None => self.unmapped_facts += 1,
        }

        self.scanned.add(&m);
        self.facts_seen += 1;
    }

    /// Absorb another shard's state.
    pub fn merge(&mut self, other: FanOutAccumulator) {
        for (k, m) in other.provider_period {
            self.provider_period.entry(k).or_default().add(&m);
        }
        for (k, m) in other.provider_procedure {
            self.provider_procedure.entry(k).or_default().add(&m);
        }
        for (k, m) in other.procedure_period {
            self.procedure_period.entry(k).or_default().add(&m);
        }
        for (k, cell) in other.region_period {
            let mine = self.region_period.entry(k).or_default();
            mine.measures.add(&cell.measures);
            mine.providers.extend(cell.providers);
        }
        self.scanned.add(&other.scanned);
        self.mapped.add(&other.mapped);
        self.facts_seen += other.facts_seen;
        self.unmapped_facts += other.unmapped_facts;
    }

    pub fn facts_seen(&self) -> u64 {
        self.facts_seen
    }

    pub fn unmapped_facts(&self) -> u64 {
        self.unmapped_facts
    }
}
