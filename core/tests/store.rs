//! SQLite ledger: fact scanning, aggregate publication and collaborators.

use spendwatch_core::{
    aggregate::{build_aggregates, AggregateSet},
    collaborator::{ExclusionRegistry, IdentityLookup},
    config::PipelineConfig,
    error::PipelineError,
    fact::InMemoryFacts,
    pipeline::{self, PipelineContext},
    reader::{ExclusionListing, LedgerReader, ProviderSort},
    snapshot::SnapshotCell,
    store::LedgerStore,
    synthetic::{self, SyntheticConfig, SyntheticLedger, PROVIDER_ID_BASE},
    types::{Period, ProviderId},
};

fn ledger() -> SyntheticLedger {
    synthetic::generate(&SyntheticConfig { providers: 150, ..SyntheticConfig::default() })
}

fn shared_store(name: &str) -> LedgerStore {
    let store = LedgerStore::shared_memory(name).unwrap();
    store.migrate().unwrap();
    store
}

fn config(partitions: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default_test();
    config.aggregation.partitions = partitions;
    config
}

#[test]
fn facts_round_trip_through_partitioned_scan() {
    let ledger = ledger();
    let store = shared_store("store_scan");
    ledger.load_into(&store).unwrap();
    assert_eq!(store.fact_count().unwrap(), ledger.facts.len() as i64);

    let regions = store.load_region_map().unwrap();
    let from_sqlite = build_aggregates(&store.fact_source(4).unwrap(), &regions).unwrap();
    let from_memory =
        build_aggregates(&InMemoryFacts::new(ledger.facts.clone()), &regions).unwrap();
    assert_eq!(from_sqlite, from_memory);
}

#[test]
fn private_memory_store_cannot_be_scanned() {
    let store = LedgerStore::in_memory().unwrap();
    store.migrate().unwrap();
    assert!(matches!(store.fact_source(2), Err(PipelineError::FactStore(_))));
}

#[test]
fn nothing_is_published_before_first_run() {
    let store = shared_store("store_unbuilt");
    assert_eq!(store.published_build_id().unwrap(), None);
    assert!(matches!(
        store.load_published_aggregates(),
        Err(PipelineError::AggregatesNotBuilt)
    ));

    let ctx = PipelineContext::resolve(config(1), &store).unwrap();
    let cell = SnapshotCell::new();
    let reader = LedgerReader::new(&cell, &ctx, &store, None);
    assert!(matches!(reader.overview(), Err(PipelineError::AggregatesNotBuilt)));
    assert!(matches!(reader.rank_fraud_risk(5), Err(PipelineError::AggregatesNotBuilt)));
    assert!(matches!(reader.excluded_providers(5, 0), Err(PipelineError::AggregatesNotBuilt)));
}

#[test]
fn run_publishes_and_rebuild_swaps() {
    let store = shared_store("store_swap");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(3), &store).unwrap();
    let cell = SnapshotCell::new();

    let first = pipeline::run(&ctx, &store, &cell).unwrap();
    assert_eq!(store.published_build_id().unwrap().as_deref(), Some(first.build_id.as_str()));
    assert_eq!(store.load_published_aggregates().unwrap(), first.aggregates);

    let second = pipeline::run(&ctx, &store, &cell).unwrap();
    assert_ne!(first.build_id, second.build_id);
    assert_eq!(store.published_build_id().unwrap().as_deref(), Some(second.build_id.as_str()));
    assert_eq!(second.aggregates, first.aggregates);

    // The old Arc is still readable after the swap.
    assert_eq!(first.aggregates.provider_summary.len(), 150);
    let current = cell.current().unwrap();
    assert_eq!(current.build_id, second.build_id);
}

#[test]
fn published_rows_are_queryable_by_key() {
    let store = shared_store("store_query");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let snapshot = pipeline::run(&ctx, &store, &SnapshotCell::new()).unwrap();

    let id = PROVIDER_ID_BASE + 12;
    assert_eq!(
        store.published_provider_monthly(id).unwrap(),
        snapshot.aggregates.provider_monthly_for(id).to_vec()
    );

    let (from, to) = (Period::new(2020, 3).unwrap(), Period::new(2020, 8).unwrap());
    let rows = store.published_national_between(from, to).unwrap();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows, snapshot.aggregates.national_monthly_between(from, to).to_vec());
}

#[test]
fn identity_and_exclusion_lookups() {
    let ledger = ledger();
    let store = shared_store("store_collab");
    ledger.load_into(&store).unwrap();

    let id = PROVIDER_ID_BASE + 1;
    let identity = store.lookup(id).unwrap().unwrap();
    assert_eq!(identity.region.as_deref(), Some("NY"));
    assert_eq!(store.lookup(7).unwrap(), None);

    assert!(store.has_exclusion_registry().unwrap());
    let excluded = store.all_excluded().unwrap();
    assert_eq!(excluded, ledger.exclusions.all_excluded().unwrap());
    assert!(store.contains(PROVIDER_ID_BASE + 3).unwrap().is_some());
    assert!(store.contains(PROVIDER_ID_BASE + 4).unwrap().is_none());
}

#[test]
fn missing_exclusion_registry_is_reported_as_not_loaded() {
    let ledger = ledger();
    let store = shared_store("store_no_registry");
    store.insert_facts(&ledger.facts).unwrap();
    for (id, identity) in ledger.identities.iter() {
        store.upsert_identity(*id, identity).unwrap();
    }

    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    assert!(!ctx.capabilities.exclusion_registry);
    let cell = SnapshotCell::new();
    pipeline::run(&ctx, &store, &cell).unwrap();

    // Passing a registry does not matter when the run did not detect one.
    let exclusions: &dyn ExclusionRegistry = &ledger.exclusions;
    let reader = LedgerReader::new(&cell, &ctx, &store, Some(exclusions));
    assert_eq!(reader.excluded_providers(10, 0).unwrap(), ExclusionListing::NotLoaded);
    let ranking = reader.rank_fraud_risk(50).unwrap();
    assert!(ranking.providers.iter().all(|p| !p.exclusion.excluded));
}

#[test]
fn excluded_providers_lists_only_those_still_billing() {
    let ledger = ledger();
    let store = shared_store("store_excluded");
    ledger.load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let cell = SnapshotCell::new();
    pipeline::run(&ctx, &store, &cell).unwrap();
    let exclusions: &dyn ExclusionRegistry = &store;
    let reader = LedgerReader::new(&cell, &ctx, &store, Some(exclusions));

    let registry_size = ledger.exclusions.all_excluded().unwrap().len();
    let ExclusionListing::Loaded { providers, total } = reader.excluded_providers(2, 0).unwrap()
    else {
        panic!("registry should be loaded");
    };
    // The registry has one provider with no claims at all.
    assert_eq!(total, registry_size - 1);
    assert_eq!(providers.len(), 2);
    assert!(providers[0].listing.total_paid >= providers[1].listing.total_paid);

    let ExclusionListing::Loaded { providers: rest, .. } = reader.excluded_providers(10, 2).unwrap()
    else {
        panic!("registry should be loaded");
    };
    assert_eq!(rest.len(), total - 2);
}

#[test]
fn reader_listings() {
    let store = shared_store("store_reader");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let cell = SnapshotCell::new();
    let snapshot = pipeline::run(&ctx, &store, &cell).unwrap();
    let reader = LedgerReader::new(&cell, &ctx, &store, None);

    let overview = reader.overview().unwrap();
    assert_eq!(overview.total_providers, 150);
    assert_eq!(overview.first_period, Some(Period::new(2019, 1).unwrap()));
    assert_eq!(overview.last_period, Some(Period::new(2021, 12).unwrap()));

    let top = reader.top_providers(Some("TX"), ProviderSort::TotalClaims, 5).unwrap();
    assert_eq!(top.len(), 5);
    assert!(top.iter().all(|p| p.region == "TX"));
    assert!(top.windows(2).all(|w| w[0].total_claims >= w[1].total_claims));

    let code = &snapshot.aggregates.procedure_summary[0].procedure_code;
    let billing = reader.procedure_top_providers(code, 3).unwrap();
    assert!(billing.windows(2).all(|w| w[0].measures.paid_cents >= w[1].measures.paid_cents));
    assert_eq!(
        reader.procedure_timeseries(code).unwrap(),
        snapshot.aggregates.procedure_monthly_for(code)
    );

    let id = top[0].provider_id;
    let procedures = reader.provider_procedures(id).unwrap();
    assert!(procedures.windows(2).all(|w| w[0].measures.paid_cents >= w[1].measures.paid_cents));
    let summary = reader.provider_summary(id).unwrap().unwrap();
    assert_eq!(summary.measures.claim_count, top[0].total_claims);

    let all_regions = reader.region_timeseries(None).unwrap();
    let tx = reader.region_timeseries(Some("TX")).unwrap();
    assert!(!tx.is_empty() && tx.len() < all_regions.len());
    assert!(reader.region_timeseries(Some("ZZ")).unwrap().is_empty());
}

#[test]
fn failed_run_keeps_the_current_snapshot() {
    let store = shared_store("store_failed_run");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let cell = SnapshotCell::new();
    let first = pipeline::run(&ctx, &store, &cell).unwrap();

    // A private in-memory store cannot hand out partition scans.
    let broken = LedgerStore::in_memory().unwrap();
    broken.migrate().unwrap();
    let err = pipeline::run(&ctx, &broken, &cell).unwrap_err();
    assert!(matches!(err, PipelineError::FactStore(_)));

    let current = cell.current().unwrap();
    assert_eq!(current.build_id, first.build_id);
    assert_eq!(current.aggregates, first.aggregates);
}

#[test]
fn failed_publish_rolls_back_to_the_previous_build() {
    let store = shared_store("store_failed_publish");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let first = pipeline::run(&ctx, &store, &SnapshotCell::new()).unwrap();

    // Two rows for the same month collide on the national primary key after
    // aggregate_build has already been written.
    let row = first.aggregates.national_monthly[0].clone();
    let duplicate = AggregateSet {
        national_monthly: vec![row.clone(), row],
        ..first.aggregates.clone()
    };
    assert!(store.publish_aggregates("broken-build", &duplicate).is_err());
    assert!(store.publish_aggregates(&first.build_id, &first.aggregates).is_err());

    assert_eq!(store.published_build_id().unwrap().as_deref(), Some(first.build_id.as_str()));
    assert_eq!(store.load_published_aggregates().unwrap(), first.aggregates);

    // Nothing of the failed build was kept, so its id is still free.
    store.publish_aggregates("broken-build", &first.aggregates).unwrap();
    assert_eq!(store.published_build_id().unwrap().as_deref(), Some("broken-build"));
}

#[test]
fn restore_reloads_the_published_build() {
    let store = shared_store("store_restore");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let built = SnapshotCell::new();
    let first = pipeline::run(&ctx, &store, &built).unwrap();

    let restarted = SnapshotCell::new();
    let restored = pipeline::restore(&ctx, &store, &restarted).unwrap().unwrap();
    assert_eq!(restored.build_id, first.build_id);
    assert_eq!(restored.aggregates, first.aggregates);
    assert_eq!(restored.signals, first.signals);
    assert_eq!(restarted.current().unwrap().build_id, first.build_id);

    let before = LedgerReader::new(&built, &ctx, &store, None);
    let after = LedgerReader::new(&restarted, &ctx, &store, None);
    assert_eq!(after.rank_fraud_risk(20).unwrap(), before.rank_fraud_risk(20).unwrap());
}

#[test]
fn restore_without_a_published_build_is_none() {
    let store = shared_store("store_restore_empty");
    let ctx = PipelineContext::resolve(config(1), &store).unwrap();
    let cell = SnapshotCell::new();
    assert!(pipeline::restore(&ctx, &store, &cell).unwrap().is_none());
    assert!(cell.current().is_none());
}

#[test]
fn provider_totals_over_a_window() {
    let store = shared_store("store_window");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let cell = SnapshotCell::new();
    let snapshot = pipeline::run(&ctx, &store, &cell).unwrap();
    let reader = LedgerReader::new(&cell, &ctx, &store, None);

    let (from, to) = (Period::new(2020, 1).unwrap(), Period::new(2020, 12).unwrap());
    let tx = reader
        .provider_totals_between(from, to, Some("TX"), ProviderSort::TotalPaid, 5)
        .unwrap();
    assert_eq!(tx.len(), 5);
    assert!(tx.iter().all(|p| p.region == "TX"));
    assert!(tx.windows(2).all(|w| w[0].total_paid >= w[1].total_paid));

    let in_window = |id: ProviderId| -> i64 {
        snapshot
            .aggregates
            .provider_monthly_for(id)
            .iter()
            .filter(|r| r.period >= from && r.period <= to)
            .map(|r| r.measures.claim_count)
            .sum()
    };
    for listing in &tx {
        assert_eq!(listing.total_claims, in_window(listing.provider_id));
    }

    // The full range re-aggregates to the lifetime totals.
    let (first, last) = (Period::new(2019, 1).unwrap(), Period::new(2021, 12).unwrap());
    assert_eq!(
        reader
            .provider_totals_between(first, last, None, ProviderSort::TotalClaims, 10)
            .unwrap(),
        reader.top_providers(None, ProviderSort::TotalClaims, 10).unwrap()
    );

    let later = Period::new(2030, 1).unwrap();
    assert!(reader
        .provider_totals_between(later, later, None, ProviderSort::TotalPaid, 10)
        .unwrap()
        .is_empty());
}

#[test]
fn top_procedures_by_paid() {
    let store = shared_store("store_top_procedures");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let cell = SnapshotCell::new();
    let snapshot = pipeline::run(&ctx, &store, &cell).unwrap();
    let reader = LedgerReader::new(&cell, &ctx, &store, None);

    let top = reader.top_procedures(3).unwrap();
    assert_eq!(top.len(), 3);
    assert!(top.windows(2).all(|w| w[0].measures.paid_cents >= w[1].measures.paid_cents));
    let max_paid = snapshot
        .aggregates
        .procedure_summary
        .iter()
        .map(|r| r.measures.paid_cents)
        .max();
    assert_eq!(Some(top[0].measures.paid_cents), max_paid);

    let all = reader.top_procedures(usize::MAX).unwrap();
    assert_eq!(all.len(), snapshot.aggregates.procedure_summary.len());
}

#[test]
fn search_providers_by_id_or_name() {
    let store = shared_store("store_search");
    ledger().load_into(&store).unwrap();
    let ctx = PipelineContext::resolve(config(2), &store).unwrap();
    let cell = SnapshotCell::new();
    pipeline::run(&ctx, &store, &cell).unwrap();
    let reader = LedgerReader::new(&cell, &ctx, &store, None);

    let id = PROVIDER_ID_BASE + 12;
    let by_id = reader.search_providers(&id.to_string(), 10).unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].provider_id, id);

    let name = store.lookup(PROVIDER_ID_BASE + 1).unwrap().unwrap().name.unwrap();
    let last_name = name.split(' ').next().unwrap().to_ascii_lowercase();
    let by_name = reader.search_providers(&format!("  {last_name} "), 50).unwrap();
    assert!(by_name.iter().any(|p| p.provider_id == PROVIDER_ID_BASE + 1));
    assert!(by_name
        .iter()
        .all(|p| p.name.to_ascii_lowercase().contains(&last_name)));
    assert!(by_name.windows(2).all(|w| w[0].total_paid >= w[1].total_paid));

    let capped = reader.search_providers(&last_name, 1).unwrap();
    assert_eq!(capped.len(), 1);
    assert_eq!(capped[0], by_name[0]);

    assert!(reader.search_providers("1", 10).unwrap().is_empty());
    assert!(reader.search_providers("   ", 10).unwrap().is_empty());
    // LIKE wildcards match literally.
    assert!(reader.search_providers("%_", 10).unwrap().is_empty());
}
