//! Read-only queries over the published snapshot.
//!
//! Every query takes its own `Arc` to the current snapshot, so a concurrent
//! publish never changes the data a query is in the middle of reading.

use crate::{
    aggregate::{
        Measures, NationalMonthlyRow, ProcedureMonthlyRow, ProcedureSummaryRow,
        ProviderMonthlyRow, ProviderProcedureRow, ProviderSummaryRow, RegionMonthlyRow,
    },
    collaborator::{
        display_identity, ExclusionRecord, ExclusionRegistry, IdentityLookup, RegionLookup,
    },
    composite::{enrich, rank, FraudRiskRanking},
    error::{PipelineError, PipelineResult},
    pipeline::PipelineContext,
    snapshot::{Snapshot, SnapshotCell},
    types::{cents_to_dollars, Period, ProviderId},
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub total_paid: f64,
    pub total_claims: i64,
    pub total_beneficiaries: i64,
    pub total_providers: usize,
    pub first_period: Option<Period>,
    pub last_period: Option<Period>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSort {
    #[default]
    TotalPaid,
    TotalClaims,
    TotalBeneficiaries,
}

impl ProviderSort {
    fn key(&self, m: &Measures) -> i64 {
        match self {
            Self::TotalPaid => m.paid_cents,
            Self::TotalClaims => m.claim_count,
            Self::TotalBeneficiaries => m.beneficiary_count,
        }
    }
}

/// Shortest query `search_providers` answers.
pub const MIN_SEARCH_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderListing {
    pub provider_id: ProviderId,
    pub name: String,
    pub region: String,
    pub city: String,
    pub total_paid: f64,
    pub total_claims: i64,
    pub total_beneficiaries: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedProvider {
    pub listing: ProviderListing,
    pub exclusion: ExclusionRecord,
}

/// Excluded providers still billing. `NotLoaded` is distinct from an empty
/// page so callers can tell "no data" from "no matches".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExclusionListing {
    NotLoaded,
    Loaded {
        providers: Vec<ExcludedProvider>,
        total: usize,
    },
}

pub struct LedgerReader<'a> {
    cell: &'a SnapshotCell,
    ctx: &'a PipelineContext,
    identity: &'a dyn IdentityLookup,
    exclusions: Option<&'a dyn ExclusionRegistry>,
}

impl<'a> LedgerReader<'a> {
    /// `exclusions` is ignored unless the context says the registry exists.
    pub fn new(
        cell: &'a SnapshotCell,
        ctx: &'a PipelineContext,
        identity: &'a dyn IdentityLookup,
        exclusions: Option<&'a dyn ExclusionRegistry>,
    ) -> Self {
        let exclusions = exclusions.filter(|_| ctx.capabilities.exclusion_registry);
        Self { cell, ctx, identity, exclusions }
    }

    fn snapshot(&self) -> PipelineResult<Arc<Snapshot>> {
        self.cell.current().ok_or(PipelineError::AggregatesNotBuilt)
    }

    /// Top `limit` providers by composite fraud-risk score.
    pub fn rank_fraud_risk(&self, limit: usize) -> PipelineResult<FraudRiskRanking> {
        let snap = self.snapshot()?;
        let ranking = rank(&snap.signals, &self.ctx.config.composite, limit);
        Ok(enrich(ranking, &snap.aggregates, self.identity, self.exclusions))
    }

    pub fn overview(&self) -> PipelineResult<Overview> {
        let snap = self.snapshot()?;
        let rows = &snap.aggregates.provider_summary;
        Ok(Overview {
            total_paid: cents_to_dollars(rows.iter().map(|r| r.measures.paid_cents).sum()),
            total_claims: rows.iter().map(|r| r.measures.claim_count).sum(),
            total_beneficiaries: rows.iter().map(|r| r.measures.beneficiary_count).sum(),
            total_providers: rows.len(),
            first_period: rows.iter().map(|r| r.first_period).min(),
            last_period: rows.iter().map(|r| r.last_period).max(),
        })
    }

    pub fn national_timeseries(&self) -> PipelineResult<Vec<NationalMonthlyRow>> {
        Ok(self.snapshot()?.aggregates.national_monthly.clone())
    }

    pub fn national_between(
        &self,
        from: Period,
        to: Period,
    ) -> PipelineResult<Vec<NationalMonthlyRow>> {
        Ok(self.snapshot()?.aggregates.national_monthly_between(from, to).to_vec())
    }

    /// One region's months, or every region when `region` is `None`.
    pub fn region_timeseries(
        &self,
        region: Option<&str>,
    ) -> PipelineResult<Vec<RegionMonthlyRow>> {
        let snap = self.snapshot()?;
        Ok(match region {
            Some(region) => snap.aggregates.region_monthly_for(region).to_vec(),
            None => snap.aggregates.region_monthly.clone(),
        })
    }

    pub fn provider_summary(
        &self,
        provider_id: ProviderId,
    ) -> PipelineResult<Option<ProviderSummaryRow>> {
        Ok(self.snapshot()?.aggregates.provider_summary_for(provider_id).cloned())
    }

    pub fn provider_timeseries(
        &self,
        provider_id: ProviderId,
    ) -> PipelineResult<Vec<ProviderMonthlyRow>> {
        Ok(self.snapshot()?.aggregates.provider_monthly_for(provider_id).to_vec())
    }

    /// A provider's procedures, highest paid first.
    pub fn provider_procedures(
        &self,
        provider_id: ProviderId,
    ) -> PipelineResult<Vec<ProviderProcedureRow>> {
        let snap = self.snapshot()?;
        let mut rows = snap.aggregates.provider_procedures_for(provider_id).to_vec();
        rows.sort_by(|a, b| {
            b.measures
                .paid_cents
                .cmp(&a.measures.paid_cents)
                .then_with(|| a.procedure_code.cmp(&b.procedure_code))
        });
        Ok(rows)
    }

    pub fn procedure_timeseries(&self, code: &str) -> PipelineResult<Vec<ProcedureMonthlyRow>> {
        Ok(self.snapshot()?.aggregates.procedure_monthly_for(code).to_vec())
    }

    /// Procedures by lifetime paid, highest first.
    pub fn top_procedures(&self, limit: usize) -> PipelineResult<Vec<ProcedureSummaryRow>> {
        let snap = self.snapshot()?;
        let mut rows = snap.aggregates.procedure_summary.clone();
        rows.sort_by(|a, b| {
            b.measures
                .paid_cents
                .cmp(&a.measures.paid_cents)
                .then_with(|| a.procedure_code.cmp(&b.procedure_code))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    /// Providers billing `code`, highest paid first.
    pub fn procedure_top_providers(
        &self,
        code: &str,
        limit: usize,
    ) -> PipelineResult<Vec<ProviderProcedureRow>> {
        let snap = self.snapshot()?;
        let mut rows: Vec<ProviderProcedureRow> = snap
            .aggregates
            .provider_procedure
            .iter()
            .filter(|r| r.procedure_code == code)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.measures
                .paid_cents
                .cmp(&a.measures.paid_cents)
                .then(a.provider_id.cmp(&b.provider_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    /// Providers by lifetime totals, optionally limited to one region.
    pub fn top_providers(
        &self,
        region: Option<&str>,
        sort_by: ProviderSort,
        limit: usize,
    ) -> PipelineResult<Vec<ProviderListing>> {
        let snap = self.snapshot()?;
        let totals = snap
            .aggregates
            .provider_summary
            .iter()
            .filter(|r| in_region(&snap, r.provider_id, region))
            .map(|r| (r.provider_id, r.measures))
            .collect();
        Ok(self.ranked_listings(totals, sort_by, limit))
    }

    /// Provider totals re-aggregated over `from <= period <= to`, optionally
    /// limited to one region. Providers with no billing in the window are
    /// left out.
    pub fn provider_totals_between(
        &self,
        from: Period,
        to: Period,
        region: Option<&str>,
        sort_by: ProviderSort,
        limit: usize,
    ) -> PipelineResult<Vec<ProviderListing>> {
        let snap = self.snapshot()?;
        let mut totals: Vec<(ProviderId, Measures)> = Vec::new();
        for row in &snap.aggregates.provider_monthly {
            if row.period < from || row.period > to {
                continue;
            }
            match totals.last_mut() {
                Some((id, m)) if *id == row.provider_id => m.add(&row.measures),
                _ if in_region(&snap, row.provider_id, region) => {
                    totals.push((row.provider_id, row.measures))
                }
                _ => {}
            }
        }
        Ok(self.ranked_listings(totals, sort_by, limit))
    }

    /// Providers whose id or name contains `query`, highest lifetime paid
    /// first. Queries shorter than [`MIN_SEARCH_LEN`] match nothing.
    pub fn search_providers(
        &self,
        query: &str,
        limit: usize,
    ) -> PipelineResult<Vec<ProviderListing>> {
        let snap = self.snapshot()?;
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }

        let mut ids: BTreeSet<ProviderId> = snap
            .aggregates
            .provider_summary
            .iter()
            .map(|r| r.provider_id)
            .filter(|id| id.to_string().contains(query))
            .collect();
        match self.identity.search_names(query) {
            Ok(named) => ids.extend(named),
            Err(e) => warn!("Provider name search failed for '{query}': {e}"),
        }

        let totals = ids
            .into_iter()
            .filter_map(|id| {
                let summary = snap.aggregates.provider_summary_for(id)?;
                Some((id, summary.measures))
            })
            .collect();
        Ok(self.ranked_listings(totals, ProviderSort::TotalPaid, limit))
    }

    /// Excluded providers present in the aggregates, highest paid first.
    pub fn excluded_providers(
        &self,
        limit: usize,
        offset: usize,
    ) -> PipelineResult<ExclusionListing> {
        let snap = self.snapshot()?;
        let Some(registry) = self.exclusions else {
            return Ok(ExclusionListing::NotLoaded);
        };
        let mut matched: Vec<(&ProviderSummaryRow, ExclusionRecord)> = registry
            .all_excluded()?
            .into_iter()
            .filter_map(|(id, record)| {
                snap.aggregates.provider_summary_for(id).map(|s| (s, record))
            })
            .collect();
        matched.sort_by(|(a, _), (b, _)| {
            b.measures
                .paid_cents
                .cmp(&a.measures.paid_cents)
                .then(a.provider_id.cmp(&b.provider_id))
        });
        let total = matched.len();
        let providers = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(summary, exclusion)| ExcludedProvider {
                listing: self.listing(summary.provider_id, &summary.measures),
                exclusion,
            })
            .collect();
        Ok(ExclusionListing::Loaded { providers, total })
    }

    /// Sort by `sort_by` descending, then id ascending, and attach identity.
    fn ranked_listings(
        &self,
        mut totals: Vec<(ProviderId, Measures)>,
        sort_by: ProviderSort,
        limit: usize,
    ) -> Vec<ProviderListing> {
        totals.sort_by(|(a_id, a), (b_id, b)| {
            sort_by.key(b).cmp(&sort_by.key(a)).then(a_id.cmp(b_id))
        });
        totals.truncate(limit);
        totals.iter().map(|(id, m)| self.listing(*id, m)).collect()
    }

    fn listing(&self, provider_id: ProviderId, measures: &Measures) -> ProviderListing {
        let display = display_identity(self.identity, provider_id);
        ProviderListing {
            provider_id,
            name: display.name,
            region: display.region,
            city: display.city,
            total_paid: cents_to_dollars(measures.paid_cents),
            total_claims: measures.claim_count,
            total_beneficiaries: measures.beneficiary_count,
        }
    }
}

fn in_region(snap: &Snapshot, provider_id: ProviderId, region: Option<&str>) -> bool {
    match region {
        Some(region) => snap.regions.lookup_region(provider_id).map(String::as_str) == Some(region),
        None => true,
    }
}
