//! The raw claims ledger. Read-only input to the aggregation engine.

use crate::{
    error::PipelineResult,
    types::{Cents, Period, ProcedureCode, ProviderId},
};
use serde::{Deserialize, Serialize};

/// One provider × procedure × month record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFact {
    pub provider_id: ProviderId,
    pub procedure_code: ProcedureCode,
    pub period: Period,
    pub claim_count: i64,
    pub paid_cents: Cents,
    pub beneficiary_count: i64,
}

/// Read-only access to the fact set, split into independently scannable
/// partitions. Every fact belongs to exactly one partition.
pub trait FactSource: Sync {
    fn partitions(&self) -> usize;

    /// Visit every fact of `partition`. An error aborts the whole build.
    fn scan_partition(
        &self,
        partition: usize,
        visit: &mut dyn FnMut(&ClaimFact),
    ) -> PipelineResult<()>;
}

/// A fact set held in memory, partitioned into contiguous chunks.
pub struct InMemoryFacts {
    facts: Vec<ClaimFact>,
    partitions: usize,
}

impl InMemoryFacts {
    pub fn new(facts: Vec<ClaimFact>) -> Self {
        Self { facts, partitions: 1 }
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn facts(&self) -> &[ClaimFact] {
        &self.facts
    }

    fn chunk_len(&self) -> usize {
        self.facts.len().div_ceil(self.partitions).max(1)
    }
}

impl FactSource for InMemoryFacts {
    fn partitions(&self) -> usize {
        self.partitions
    }

    fn scan_partition(
        &self,
        partition: usize,
        visit: &mut dyn FnMut(&ClaimFact),
    ) -> PipelineResult<()> {
        let chunk = self.chunk_len();
        let start = (partition * chunk).min(self.facts.len());
        let end = (start + chunk).min(self.facts.len());
        self.facts[start..end].iter().for_each(|f| visit(f));
        Ok(())
    }
}
