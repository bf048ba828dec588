//! Aggregation engine: seven grouped summaries from one fan-out scan.
//!
//! The three finest grains (provider × period, provider × procedure,
//! procedure × period) and the regional grain are accumulated together in a
//! single pass over the fact set. The coarse grains (provider, procedure,
//! period) are derived from the fine grains without touching raw facts.

mod accumulator;
mod engine;

pub use accumulator::FanOutAccumulator;
pub use engine::build_aggregates;

use crate::types::{ratio, Cents, Period, ProcedureCode, ProviderId, RegionCode};
use serde::{Deserialize, Serialize};

/// Summed measures carried by every aggregate row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measures {
    pub claim_count: i64,
    pub paid_cents: Cents,
    pub beneficiary_count: i64,
}

impl Measures {
    pub fn add(&mut self, other: &Measures) {
        self.claim_count += other.claim_count;
        self.paid_cents += other.paid_cents;
        self.beneficiary_count += other.beneficiary_count;
    }

    /// Average paid dollars per claim; `None` when there are no claims.
    pub fn avg_paid_per_claim(&self) -> Option<f64> {
        ratio(self.paid_cents as f64 / 100.0, self.claim_count as f64)
    }
}

/// The seven grouping grains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grain {
    NationalMonthly,
    ProviderSummary,
    ProviderMonthly,
    ProviderProcedure,
    RegionMonthly,
    ProcedureSummary,
    ProcedureMonthly,
}

impl Grain {
    pub const ALL: [Grain; 7] = [
        Grain::NationalMonthly,
        Grain::ProviderSummary,
        Grain::ProviderMonthly,
        Grain::ProviderProcedure,
        Grain::RegionMonthly,
        Grain::ProcedureSummary,
        Grain::ProcedureMonthly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NationalMonthly   => "national_monthly",
            Self::ProviderSummary   => "provider_summary",
            Self::ProviderMonthly   => "provider_monthly",
            Self::ProviderProcedure => "provider_procedure",
            Self::RegionMonthly     => "region_monthly",
            Self::ProcedureSummary  => "procedure_summary",
            Self::ProcedureMonthly  => "procedure_monthly",
        }
    }

    /// Only the regional grain drops facts (those with no mapped region).
    pub fn requires_region(&self) -> bool {
        matches!(self, Self::RegionMonthly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NationalMonthlyRow {
    pub period: Period,
    pub unique_providers: u64,
    #[serde(flatten)]
    pub measures: Measures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummaryRow {
    pub provider_id: ProviderId,
    pub first_period: Period,
    pub last_period: Period,
    pub unique_procedures: u64,
    #[serde(flatten)]
    pub measures: Measures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMonthlyRow {
    pub provider_id: ProviderId,
    pub period: Period,
    #[serde(flatten)]
    pub measures: Measures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProcedureRow {
    pub provider_id: ProviderId,
    pub procedure_code: ProcedureCode,
    #[serde(flatten)]
    pub measures: Measures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMonthlyRow {
    pub region: RegionCode,
    pub period: Period,
    pub unique_providers: u64,
    #[serde(flatten)]
    pub measures: Measures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureSummaryRow {
    pub procedure_code: ProcedureCode,
    pub unique_providers: u64,
    #[serde(flatten)]
    pub measures: Measures,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureMonthlyRow {
    pub procedure_code: ProcedureCode,
    pub period: Period,
    #[serde(flatten)]
    pub measures: Measures,
}

/// All seven grains, fully materialized and sorted by key.
///
/// Sorting makes every collection queryable by key prefix with a binary
/// search and makes two builds over the same facts compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSet {
    pub national_monthly: Vec<NationalMonthlyRow>,
    pub provider_summary: Vec<ProviderSummaryRow>,
    pub provider_monthly: Vec<ProviderMonthlyRow>,
    pub provider_procedure: Vec<ProviderProcedureRow>,
    pub region_monthly: Vec<RegionMonthlyRow>,
    pub procedure_summary: Vec<ProcedureSummaryRow>,
    pub procedure_monthly: Vec<ProcedureMonthlyRow>,
}

impl AggregateSet {
    pub fn row_count(&self, grain: Grain) -> usize {
        match grain {
            Grain::NationalMonthly   => self.national_monthly.len(),
            Grain::ProviderSummary   => self.provider_summary.len(),
            Grain::ProviderMonthly   => self.provider_monthly.len(),
            Grain::ProviderProcedure => self.provider_procedure.len(),
            Grain::RegionMonthly     => self.region_monthly.len(),
            Grain::ProcedureSummary  => self.procedure_summary.len(),
            Grain::ProcedureMonthly  => self.procedure_monthly.len(),
        }
    }

    /// Σ paid over every row of `grain`.
    pub fn total_paid(&self, grain: Grain) -> Cents {
        fn sum<'a>(it: impl Iterator<Item = &'a Measures>) -> Cents {
            it.map(|m| m.paid_cents).sum()
        }
        match grain {
            Grain::NationalMonthly   => sum(self.national_monthly.iter().map(|r| &r.measures)),
            Grain::ProviderSummary   => sum(self.provider_summary.iter().map(|r| &r.measures)),
            Grain::ProviderMonthly   => sum(self.provider_monthly.iter().map(|r| &r.measures)),
            Grain::ProviderProcedure => sum(self.provider_procedure.iter().map(|r| &r.measures)),
            Grain::RegionMonthly     => sum(self.region_monthly.iter().map(|r| &r.measures)),
            Grain::ProcedureSummary  => sum(self.procedure_summary.iter().map(|r| &r.measures)),
            Grain::ProcedureMonthly  => sum(self.procedure_monthly.iter().map(|r| &r.measures)),
        }
    }

    // ── Key-prefix lookups ─────────────────────────────────────

    pub fn provider_summary_for(&self, provider_id: ProviderId) -> Option<&ProviderSummaryRow> {
        self.provider_summary
            .binary_search_by_key(&provider_id, |r| r.provider_id)
            .ok()
            .map(|i| &self.provider_summary[i])
    }

    pub fn provider_monthly_for(&self, provider_id: ProviderId) -> &[ProviderMonthlyRow] {
        let rows = &self.provider_monthly;
        let start = rows.partition_point(|r| r.provider_id < provider_id);
        let end = rows.partition_point(|r| r.provider_id <= provider_id);
        &rows[start..end]
    }

    pub fn provider_procedures_for(&self, provider_id: ProviderId) -> &[ProviderProcedureRow] {
        let rows = &self.provider_procedure;
        let start = rows.partition_point(|r| r.provider_id < provider_id);
        let end = rows.partition_point(|r| r.provider_id <= provider_id);
        &rows[start..end]
    }

    pub fn procedure_summary_for(&self, code: &str) -> Option<&ProcedureSummaryRow> {
        self.procedure_summary
            .binary_search_by(|r| r.procedure_code.as_str().cmp(code))
            .ok()
            .map(|i| &self.procedure_summary[i])
    }

    pub fn procedure_monthly_for(&self, code: &str) -> &[ProcedureMonthlyRow] {
        let rows = &self.procedure_monthly;
        let start = rows.partition_point(|r| r.procedure_code.as_str() < code);
        let end = rows.partition_point(|r| r.procedure_code.as_str() <= code);
        &rows[start..end]
    }

    pub fn region_monthly_for(&self, region: &str) -> &[RegionMonthlyRow] {
        let rows = &self.region_monthly;
        let start = rows.partition_point(|r| r.region.as_str() < region);
        let end = rows.partition_point(|r| r.region.as_str() <= region);
        &rows[start..end]
    }

    /// National rows with `from <= period <= to`.
    pub fn national_monthly_between(&self, from: Period, to: Period) -> &[NationalMonthlyRow] {
        let rows = &self.national_monthly;
        let start = rows.partition_point(|r| r.period < from);
        let end = rows.partition_point(|r| r.period <= to);
        &rows[start..end.max(start)]
    }
}
