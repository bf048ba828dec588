//! spendwatch-runner: headless batch run of the claims ledger pipeline.
//!
//! Usage:
//!   spendwatch-runner --db ledger.db
//!   spendwatch-runner --db ledger.db --generate --seed 7 --providers 800
//!   spendwatch-runner --config pipeline.json --limit 25 --partitions 4
//!   spendwatch-runner --db ledger.db --restore

use anyhow::Result;
use spendwatch_core::{
    collaborator::ExclusionRegistry,
    config::PipelineConfig,
    pipeline::{self, PipelineContext},
    reader::{ExclusionListing, LedgerReader},
    snapshot::SnapshotCell,
    store::LedgerStore,
    synthetic::{self, SyntheticConfig},
    types::cents_to_dollars,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let generate = args.iter().any(|a| a == "--generate");
    let restore = args.iter().any(|a| a == "--restore");
    let seed = parse_arg(&args, "--seed", 42u64);
    let providers = parse_arg(&args, "--providers", 500usize);
    let limit = parse_arg(&args, "--limit", 10usize);
    let db = string_arg(&args, "--db").unwrap_or(":memory:");

    let mut config = match string_arg(&args, "--config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    config.aggregation.partitions =
        parse_arg(&args, "--partitions", config.aggregation.partitions);

    println!("spendwatch-runner");
    println!("  db:         {db}");
    println!("  partitions: {}", config.aggregation.partitions);
    if generate {
        println!("  seed:       {seed}");
        println!("  providers:  {providers}");
    }
    println!();

    // Partition scans open their own connections, so :memory: has to be a
    // named shared-cache database rather than a private one.
    let store = if db == ":memory:" {
        LedgerStore::shared_memory(&format!("spendwatch_{}", unix_secs()))?
    } else {
        LedgerStore::open(db)?
    };
    store.migrate()?;

    if generate {
        let ledger = synthetic::generate(&SyntheticConfig {
            seed,
            providers,
            ..SyntheticConfig::default()
        });
        ledger.load_into(&store)?;
    } else if db == ":memory:" {
        log::warn!("Empty in-memory ledger; pass --generate to populate it");
    }

    let ctx = PipelineContext::resolve(config, &store)?;
    let cell = SnapshotCell::new();
    let snapshot = if restore {
        pipeline::restore(&ctx, &store, &cell)?
            .ok_or_else(|| anyhow::anyhow!("{db} has no published build to restore"))?
    } else {
        pipeline::run(&ctx, &store, &cell)?
    };

    let exclusions: &dyn ExclusionRegistry = &store;
    let reader = LedgerReader::new(&cell, &ctx, &store, Some(exclusions));
    print_summary(&reader, &snapshot.build_id)?;

    let ranking = reader.rank_fraud_risk(limit)?;
    println!();
    println!("=== FRAUD RISK (top {limit} of {} flagged) ===", ranking.total_flagged);
    println!("{}", serde_json::to_string_pretty(&ranking)?);
    Ok(())
}

fn print_summary(reader: &LedgerReader<'_>, build_id: &str) -> Result<()> {
    let overview = reader.overview()?;
    let period_span = match (overview.first_period, overview.last_period) {
        (Some(first), Some(last)) => format!("{first} .. {last}"),
        _ => "(no facts)".to_string(),
    };

    println!("=== BUILD SUMMARY ===");
    println!("  build_id:       {build_id}");
    println!("  periods:        {period_span}");
    println!("  providers:      {}", overview.total_providers);
    println!("  claims:         {}", overview.total_claims);
    println!("  beneficiaries:  {}", overview.total_beneficiaries);
    println!("  total paid:     ${:.2}", overview.total_paid);

    println!();
    println!("=== REGIONS ===");
    let mut by_region: Vec<(String, i64)> = Vec::new();
    for row in reader.region_timeseries(None)? {
        match by_region.last_mut() {
            Some((region, paid)) if *region == row.region => *paid += row.measures.paid_cents,
            _ => by_region.push((row.region.clone(), row.measures.paid_cents)),
        }
    }
    for (region, paid) in by_region {
        println!("  {region:<6} ${:.2}", cents_to_dollars(paid));
    }

    println!();
    match reader.excluded_providers(5, 0)? {
        ExclusionListing::NotLoaded => {
            println!("=== EXCLUDED PROVIDERS === (registry not loaded)")
        }
        ExclusionListing::Loaded { providers, total } => {
            println!("=== EXCLUDED PROVIDERS STILL BILLING ({total}) ===");
            for p in providers {
                println!(
                    "  {} | {} | {} | ${:.2}",
                    p.listing.provider_id,
                    p.listing.name,
                    p.exclusion.exclusion_type,
                    p.listing.total_paid
                );
            }
        }
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn unix_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
