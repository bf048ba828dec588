use super::{
    accumulator::FanOutAccumulator, AggregateSet, Grain, Measures, NationalMonthlyRow,
    ProcedureMonthlyRow, ProcedureSummaryRow, ProviderMonthlyRow, ProviderProcedureRow,
    ProviderSummaryRow, RegionMonthlyRow,
};
use crate::{
    collaborator::RegionLookup,
    error::{PipelineError, PipelineResult},
    fact::{ClaimFact, FactSource},
    types::{Period, ProcedureCode, ProviderId},
};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;

/// Build all seven grains with one scan of `source`.
///
/// Partitions are scanned in parallel, each into its own accumulator, then
/// merged. If any partition fails nothing is returned, so a caller can never
/// publish a partial set.
pub fn build_aggregates(
    source: &dyn FactSource,
    regions: &dyn RegionLookup,
) -> PipelineResult<AggregateSet> {
    let t0 = Instant::now();
    let partitions = source.partitions();
    info!("Scanning fact store across {partitions} partition(s)");

    let shards = (0..partitions)
        .into_par_iter()
        .map(|partition| {
            let mut acc = FanOutAccumulator::new();
            source.scan_partition(partition, &mut |fact: &ClaimFact| {
                acc.observe(fact, regions.lookup_region(fact.provider_id));
            })?;
            debug!("Partition {partition}: {} facts", acc.facts_seen());
            Ok(acc)
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    let mut merged = FanOutAccumulator::new();
    for shard in shards {
        merged.merge(shard);
    }
    info!(
        "Scanned {} facts in {:.1}s ({} without a region)",
        merged.facts_seen,
        t0.elapsed().as_secs_f64(),
        merged.unmapped_facts
    );

    let set = finalize(merged)?;
    for grain in Grain::ALL {
        info!("  ✓ {}: {} rows", grain.name(), set.row_count(grain));
    }
    Ok(set)
}

/// Turn merged accumulators into sorted row collections, deriving the
/// coarse grains from the fine ones, then verify conservation per grain.
fn finalize(acc: FanOutAccumulator) -> PipelineResult<AggregateSet> {
    let scanned_paid = acc.scanned.paid_cents;
    let mapped_paid = acc.mapped.paid_cents;

    // provider × period, and the two grains derived from it.
    let mut provider_monthly: Vec<ProviderMonthlyRow> = acc
        .provider_period
        .into_iter()
        .map(|((provider_id, period), measures)| ProviderMonthlyRow { provider_id, period, measures })
        .collect();
    provider_monthly.sort_unstable_by_key(|r| (r.provider_id, r.period));

    let mut national: BTreeMap<Period, (u64, Measures)> = BTreeMap::new();
    let mut lifetime: BTreeMap<ProviderId, (Period, Period, Measures)> = BTreeMap::new();
    for row in &provider_monthly {
        let n = national.entry(row.period).or_default();
        n.0 += 1;
        n.1.add(&row.measures);

        let l = lifetime
            .entry(row.provider_id)
            .or_insert((row.period, row.period, Measures::default()));
        l.0 = l.0.min(row.period);
        l.1 = l.1.max(row.period);
        l.2.add(&row.measures);
    }

    // provider × procedure, and the procedure lifetime grain derived from it.
    let mut provider_procedure: Vec<ProviderProcedureRow> = acc
        .provider_procedure
        .into_iter()
        .map(|((provider_id, procedure_code), measures)| ProviderProcedureRow {
            provider_id,
            procedure_code,
            measures,
        })
        .collect();
    provider_procedure.sort_unstable_by(|a, b| {
        (a.provider_id, &a.procedure_code).cmp(&(b.provider_id, &b.procedure_code))
    });

    let mut procedures: BTreeMap<&ProcedureCode, (u64, Measures)> = BTreeMap::new();
    let mut procedure_counts: BTreeMap<ProviderId, u64> = BTreeMap::new();
    for row in &provider_procedure {
        let p = procedures.entry(&row.procedure_code).or_default();
        p.0 += 1;
        p.1.add(&row.measures);
        *procedure_counts.entry(row.provider_id).or_default() += 1;
    }

    let national_monthly: Vec<NationalMonthlyRow> = national
        .into_iter()
        .map(|(period, (unique_providers, measures))| NationalMonthlyRow {
            period,
            unique_providers,
            measures,
        })
        .collect();

    let provider_summary: Vec<ProviderSummaryRow> = lifetime
        .into_iter()
        .map(|(provider_id, (first_period, last_period, measures))| ProviderSummaryRow {
            provider_id,
            first_period,
            last_period,
            unique_procedures: procedure_counts.get(&provider_id).copied().unwrap_or(0),
            measures,
        })
        .collect();

    let procedure_summary: Vec<ProcedureSummaryRow> = procedures
        .into_iter()
        .map(|(code, (unique_providers, measures))| ProcedureSummaryRow {
            procedure_code: code.clone(),
            unique_providers,
            measures,
        })
        .collect();

    let mut procedure_monthly: Vec<ProcedureMonthlyRow> = acc
        .procedure_period
        .into_iter()
        .map(|((procedure_code, period), measures)| ProcedureMonthlyRow {
            procedure_code,
            period,
            measures,
        })
        .collect();
    procedure_monthly.sort_unstable_by(|a, b| {
        (&a.procedure_code, a.period).cmp(&(&b.procedure_code, b.period))
    });

    let mut region_monthly: Vec<RegionMonthlyRow> = acc
        .region_period
        .into_iter()
        .map(|((region, period), cell)| RegionMonthlyRow {
            region,
            period,
            unique_providers: cell.providers.len() as u64,
            measures: cell.measures,
        })
        .collect();
    region_monthly.sort_unstable_by(|a, b| (&a.region, a.period).cmp(&(&b.region, b.period)));

    let set = AggregateSet {
        national_monthly,
        provider_summary,
        provider_monthly,
        provider_procedure,
        region_monthly,
        procedure_summary,
        procedure_monthly,
    };

    for grain in Grain::ALL {
        let expected = if grain.requires_region() { mapped_paid } else { scanned_paid };
        let actual = set.total_paid(grain);
        if actual != expected {
            return Err(PipelineError::BuildFailure {
                grain: grain.name(),
                reason: format!("paid total {actual} does not match scanned total {expected}"),
            });
        }
    }
    Ok(set)
}
